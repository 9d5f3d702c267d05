// Durable job queue client.
//
// Tasks travel as JSON jobs on durable queues. The queue message id doubles
// as the task id, and is preserved when a job is re-enqueued (dependency
// gate, retries) so state-store rows stay stable.

use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use lapin::message::Delivery;

use maestro_core::error::{MaestroError, Result};
use maestro_core::models::Task;

/// Persistent delivery mode per the AMQP spec.
const DELIVERY_MODE_PERSISTENT: u8 = 2;

/// One unit of work: a task bound to its workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub task: Task,
    pub workflow_id: String,
    /// How many times this job has been retried after a failure.
    #[serde(default)]
    pub retries: u32,
}

#[derive(Clone)]
pub struct JobQueue {
    channel: Channel,
}

impl JobQueue {
    pub async fn connect(rabbit_dns: &str) -> Result<Self> {
        let connection = Connection::connect(rabbit_dns, ConnectionProperties::default())
            .await
            .map_err(|e| MaestroError::queue(format!("could not connect to `{rabbit_dns}`: {e}")))?;
        let channel = connection
            .create_channel()
            .await
            .map_err(MaestroError::queue)?;
        // one in-flight job per consumer
        channel
            .basic_qos(1, BasicQosOptions::default())
            .await
            .map_err(MaestroError::queue)?;
        Ok(Self { channel })
    }

    async fn declare(&self, queue_name: &str) -> Result<()> {
        self.channel
            .queue_declare(
                queue_name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(MaestroError::queue)?;
        Ok(())
    }

    /// Publish a job and return its message id, which becomes the task id.
    /// Pass `message_id` to re-enqueue an existing job under its own id.
    pub async fn enqueue(
        &self,
        queue_name: &str,
        job: &Job,
        message_id: Option<String>,
    ) -> Result<String> {
        self.declare(queue_name).await?;

        let message_id = message_id.unwrap_or_else(|| Uuid::new_v4().simple().to_string());
        let payload = serde_json::to_vec(job)
            .map_err(|e| MaestroError::queue(format!("could not encode job: {e}")))?;

        let properties = BasicProperties::default()
            .with_message_id(message_id.clone().into())
            .with_delivery_mode(DELIVERY_MODE_PERSISTENT);

        self.channel
            .basic_publish(
                "",
                queue_name,
                BasicPublishOptions::default(),
                &payload,
                properties,
            )
            .await
            .map_err(MaestroError::queue)?
            .await
            .map_err(MaestroError::queue)?;

        tracing::debug!(queue = queue_name, message_id, "job enqueued");
        Ok(message_id)
    }

    /// Open a delivery stream on a queue.
    pub async fn consume(&self, queue_name: &str, consumer_tag: &str) -> Result<Consumer> {
        self.declare(queue_name).await?;
        self.channel
            .basic_consume(
                queue_name,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(MaestroError::queue)
    }

    /// Acknowledge a delivery once its job has been fully handled.
    pub async fn ack(&self, delivery_tag: u64) -> Result<()> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(MaestroError::queue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jobs_round_trip_through_json() {
        let job = Job {
            task: Task::new("First", "maestro.catalog.ImportFile"),
            workflow_id: "wf-1".to_string(),
            retries: 0,
        };
        let encoded = serde_json::to_vec(&job).unwrap();
        let decoded: Job = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(decoded.task.name, "First");
        assert_eq!(decoded.workflow_id, "wf-1");
        assert_eq!(decoded.retries, 0);
    }

    #[test]
    fn retries_default_to_zero_on_old_payloads() {
        let decoded: Job = serde_json::from_str(
            r#"{"task": {"name": "First", "module": "test"}, "workflow_id": "wf-1"}"#,
        )
        .unwrap();
        assert_eq!(decoded.retries, 0);
    }
}
