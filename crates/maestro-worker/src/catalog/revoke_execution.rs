use async_trait::async_trait;

use maestro_core::error::Result;
use maestro_core::models::{SignalKind, TaskResult};

use crate::component::Component;
use crate::process::Process;

/// Broadcasts a global interruption signal on the workflow topic, keyed by
/// the workflow id so every polling task observes it.
pub struct RevokeExecution;

#[async_trait]
impl Component for RevokeExecution {
    fn module(&self) -> &'static str {
        super::REVOKE_EXECUTION_MODULE
    }

    fn description(&self) -> &'static str {
        "Sends a global interruption signal."
    }

    async fn execute(&self, pcs: &Process) -> Result<TaskResult> {
        pcs.info("Broadcasting interruption signal to all workflow tasks");
        pcs.broadcast_signal(SignalKind::Interruption).await?;
        Ok(TaskResult::default())
    }
}
