use std::time::Duration;

use async_trait::async_trait;

use maestro_core::error::{MaestroError, Result};
use maestro_core::models::TaskResult;

use super::records;
use crate::component::Component;
use crate::process::Process;

const POLL_TIMEOUT: Duration = Duration::from_secs(600);

/// Waits for one message on the task's own topic (`"<workflow>-<task>"`)
/// and forwards it downstream, letting a user feed a value into a running
/// workflow.
pub struct DynamicParameter;

#[async_trait]
impl Component for DynamicParameter {
    fn module(&self) -> &'static str {
        "maestro.catalog.DynamicParameter"
    }

    fn description(&self) -> &'static str {
        "Gets a message from the task's own topic."
    }

    async fn execute(&self, pcs: &Process) -> Result<TaskResult> {
        let topic = format!("{}-{}", pcs.parent, pcs.name);
        pcs.info(format!("Waiting for a value on topic {topic}"));

        let consumer = pcs.topic_consumer(&topic)?;
        let record = consumer.recv_timeout(POLL_TIMEOUT).await?.ok_or_else(|| {
            MaestroError::DynamicParameterTimeout {
                topic: topic.clone(),
                waited_ms: POLL_TIMEOUT.as_millis() as u64,
            }
        })?;

        let value = String::from_utf8_lossy(&record.payload).to_string();
        pcs.to_downstream(&records::dynamic_parameter(&value)?).await?;

        Ok(TaskResult::with_message(value))
    }
}
