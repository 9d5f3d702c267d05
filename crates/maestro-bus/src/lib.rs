// Clients for the two messaging fabrics: the per-workflow streaming topic
// (Kafka) and the durable job queue (RabbitMQ).

pub mod kafka;
pub mod queue;

pub use kafka::{TopicConsumer, TopicProducer, TopicRecord};
pub use queue::{Delivery, Job, JobQueue};
