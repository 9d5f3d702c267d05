use async_trait::async_trait;

use maestro_core::error::{MaestroError, Result};
use maestro_core::models::{ResultFile, TaskResult};

use super::records;
use crate::component::Component;
use crate::process::Process;

/// Imports a file from an online resource given its url.
///
/// Parameters:
/// - `url`: publicly accessible resource
/// - `parameters`: GET parameters to append to the url (optional)
pub struct ImportFile;

#[async_trait]
impl Component for ImportFile {
    fn module(&self) -> &'static str {
        "maestro.catalog.ImportFile"
    }

    fn description(&self) -> &'static str {
        "Imports a file from an online resource given its url."
    }

    async fn execute(&self, pcs: &Process) -> Result<TaskResult> {
        let url = pcs.required_param_str("url")?;
        let parameters = pcs.param_str_or("parameters", "");

        let filename = filename_from_url(&url)?;
        let filepath = pcs.storage().local_dir().join(&filename);

        let full_url = format!("{url}{parameters}");
        pcs.info(format!("Downloading {full_url}"));

        let response = reqwest::get(&full_url)
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| MaestroError::storage(format!("could not download `{full_url}`: {e}")))?;
        let bytes = response.bytes().await.map_err(MaestroError::storage)?;
        std::fs::write(&filepath, &bytes).map_err(MaestroError::storage)?;

        let remote = pcs.storage().put_file(&filepath, None).await?;
        pcs.to_downstream(&records::temp_file(&remote)?).await?;

        Ok(TaskResult {
            message: Some(remote.resource.clone().into()),
            files: vec![ResultFile::Plain(remote)],
            log: None,
        })
    }
}

/// Last path segment of the url, the downloaded file's name.
pub(super) fn filename_from_url(url: &str) -> Result<String> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| MaestroError::validation(format!("invalid url `{url}`: {e}")))?;
    parsed
        .path_segments()
        .and_then(|segments| segments.last())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or_else(|| MaestroError::validation(format!("url `{url}` does not name a file")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_comes_from_the_last_path_segment() {
        assert_eq!(
            filename_from_url("https://example.org/data/reads.tsv").unwrap(),
            "reads.tsv"
        );
        assert!(filename_from_url("https://example.org/").is_err());
        assert!(filename_from_url("not a url").is_err());
    }
}
