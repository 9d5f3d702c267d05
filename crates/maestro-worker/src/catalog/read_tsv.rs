use async_trait::async_trait;

use maestro_core::error::{MaestroError, Result};
use maestro_core::models::TaskResult;

use crate::component::Component;
use crate::process::Process;

/// Reads an upstream `SimpleTabularDataset` row by row into the task log.
pub struct ReadTsv;

#[async_trait]
impl Component for ReadTsv {
    fn module(&self) -> &'static str {
        "maestro.catalog.ReadTSV"
    }

    fn description(&self) -> &'static str {
        "Reads a TSV file."
    }

    async fn execute(&self, pcs: &Process) -> Result<TaskResult> {
        let inputs = pcs.get_from_upstream().await?;

        let dataset = inputs
            .get("TabularDataset")
            .and_then(|payloads| payloads.first())
            .ok_or_else(|| {
                MaestroError::validation("no TabularDataset input arrived from upstream")
            })?;

        let resource = dataset["resource"]
            .as_str()
            .ok_or_else(|| MaestroError::validation("dataset has no resource"))?;
        let delimiter = dataset["delimiter"].as_str().unwrap_or("\t");
        let delimiter_byte = delimiter.as_bytes().first().copied().unwrap_or(b'\t');

        let local_path = pcs.storage().get_file(resource).await?;

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter_byte)
            .has_headers(false)
            .flexible(true)
            .from_path(&local_path)
            .map_err(MaestroError::storage)?;

        for row in reader.records() {
            let row = row.map_err(|e| MaestroError::validation(format!("malformed row: {e}")))?;
            pcs.info(row.iter().collect::<Vec<_>>().join(delimiter));
        }

        Ok(TaskResult::default())
    }
}
