use async_trait::async_trait;

use maestro_core::error::{MaestroError, Result};
use maestro_core::models::{ResultFile, TaskResult};

use super::import_file::filename_from_url;
use super::records;
use crate::component::Component;
use crate::process::Process;

/// Imports a tab-separated values file from an online resource, stripping
/// comments and normalizing rows on the way in.
///
/// Parameters:
/// - `url`: publicly accessible resource
/// - `delimiter`: column delimiter, defaults to `"\t"`
/// - `comment`: prefix starting a comment, defaults to `"#"`
pub struct ImportTsv;

#[async_trait]
impl Component for ImportTsv {
    fn module(&self) -> &'static str {
        "maestro.catalog.ImportTSV"
    }

    fn description(&self) -> &'static str {
        "Imports a tab-separated values file from an online resource given its url."
    }

    async fn execute(&self, pcs: &Process) -> Result<TaskResult> {
        let url = pcs.required_param_str("url")?;
        let delimiter = pcs.param_str_or("delimiter", "\t");
        let comment = pcs.param_str_or("comment", "#");

        let filename = filename_from_url(&url)?;
        let filepath = pcs.storage().local_dir().join(&filename);

        pcs.info(format!("Downloading {url}"));
        let response = reqwest::get(&url)
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| MaestroError::storage(format!("could not download `{url}`: {e}")))?;
        let body = response.text().await.map_err(MaestroError::storage)?;

        let out_tsv = pcs.storage().local_dir().join("out.tsv");
        let rewritten = rewrite_tsv(&body, &delimiter, &comment)?;
        std::fs::write(&filepath, &body).map_err(MaestroError::storage)?;
        std::fs::write(&out_tsv, rewritten).map_err(MaestroError::storage)?;

        let remote = pcs.storage().put_file(&out_tsv, None).await?;
        pcs.to_downstream(&records::simple_tabular_dataset(&remote, "\t", ".tsv")?)
            .await?;

        Ok(TaskResult {
            message: Some(remote.resource.clone().into()),
            files: vec![ResultFile::Plain(remote)],
            log: None,
        })
    }
}

/// Drop comment suffixes and blank lines, then re-emit the surviving rows
/// with the same delimiter.
fn rewrite_tsv(body: &str, delimiter: &str, comment: &str) -> Result<String> {
    let delimiter_byte = delimiter.as_bytes().first().copied().unwrap_or(b'\t');

    let decommented: Vec<&str> = body
        .lines()
        .filter_map(|row| {
            let raw = row.split(comment).next().unwrap_or_default().trim();
            (!raw.is_empty()).then_some(raw)
        })
        .collect();

    let joined = decommented.join("\n");
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter_byte)
        .has_headers(false)
        .flexible(true)
        .from_reader(joined.as_bytes());

    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter_byte)
        .flexible(true)
        .from_writer(Vec::new());

    for row in reader.records() {
        let row = row.map_err(|e| MaestroError::validation(format!("malformed row: {e}")))?;
        writer
            .write_record(&row)
            .map_err(MaestroError::storage)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| MaestroError::storage(e.to_string()))?;
    String::from_utf8(bytes).map_err(MaestroError::storage)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrite_strips_comments_and_blank_lines() {
        let body = "# header comment\na\tb\tc\n\nx\ty\tz # trailing note\n";
        let rewritten = rewrite_tsv(body, "\t", "#").unwrap();
        assert_eq!(rewritten, "a\tb\tc\nx\ty\tz\n");
    }

    #[test]
    fn rewrite_keeps_the_requested_delimiter() {
        let body = "a,b\nc,d\n";
        let rewritten = rewrite_tsv(body, ",", "#").unwrap();
        assert_eq!(rewritten, "a,b\nc,d\n");
    }
}
