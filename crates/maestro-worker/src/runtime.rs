// Process-wide dependencies, constructed once at startup and threaded
// through explicitly.

use std::sync::Arc;

use maestro_bus::{JobQueue, TopicConsumer, TopicProducer};
use maestro_core::config::Settings;
use maestro_core::error::Result;
use maestro_storage::Database;

use crate::component::ComponentRegistry;

/// Everything a scheduler, worker or API server needs to operate: settings,
/// the state store, the job queue and the component registry.
pub struct Runtime {
    pub settings: Settings,
    pub db: Database,
    pub queue: JobQueue,
    pub registry: ComponentRegistry,
}

impl Runtime {
    /// Connect to the state store and job queue with the built-in component
    /// catalog registered.
    pub async fn connect(settings: Settings) -> Result<Arc<Self>> {
        Self::connect_with_registry(settings, ComponentRegistry::with_builtins()).await
    }

    /// Connect with a caller-supplied component registry.
    pub async fn connect_with_registry(
        settings: Settings,
        registry: ComponentRegistry,
    ) -> Result<Arc<Self>> {
        let db = Database::from_url(&settings.mongo_dns).await?;
        tracing::info!("state store connection established");

        let queue = JobQueue::connect(&settings.rabbit_dns).await?;
        tracing::info!("job queue connection established");

        Ok(Arc::new(Self {
            settings,
            db,
            queue,
            registry,
        }))
    }

    /// A fresh producer for a workflow topic.
    pub fn producer(&self) -> Result<TopicProducer> {
        TopicProducer::new(&self.settings)
    }

    /// A fresh consumer subscribed to `topic` from the earliest offset.
    pub fn consumer(&self, topic: &str) -> Result<TopicConsumer> {
        TopicConsumer::new(&self.settings, topic)
    }
}
