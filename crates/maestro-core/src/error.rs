// Error types shared across the orchestrator

use thiserror::Error;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, MaestroError>;

/// Errors that can occur while scheduling or executing a workflow
#[derive(Debug, Error)]
pub enum MaestroError {
    /// A workflow or task broke a schema invariant at ingress
    #[error("validation error: {0}")]
    Validation(String),

    /// A resource URI does not carry the scheme the backend expects
    #[error("invalid resource scheme: expected `{expected}`, got `{uri}`")]
    NotValidScheme { expected: String, uri: String },

    /// A local file was requested but does not exist
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// The task's module key is not present in the component registry
    #[error("component `{0}` is not registered")]
    ComponentNotFound(String),

    /// An INTERRUPTION signal was observed while polling upstream
    #[error("task was interrupted by an upstream signal")]
    UpstreamInterrupted,

    /// Upstream tasks completed but some declared inputs never arrived
    #[error("some inputs were declared but are missing: {0:?}")]
    MissingInputs(Vec<String>),

    /// A dynamic-parameter poll exceeded its deadline
    #[error("no value found in topic `{topic}` after {waited_ms}ms")]
    DynamicParameterTimeout { topic: String, waited_ms: u64 },

    /// A component ran past the job time limit
    #[error("task exceeded its time limit of {0}ms")]
    TimeLimitExceeded(u64),

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Artifact storage error
    #[error("storage error: {0}")]
    Storage(String),

    /// State store error
    #[error("state store error: {0}")]
    State(String),

    /// Streaming bus error
    #[error("bus error: {0}")]
    Bus(String),

    /// Job queue error
    #[error("queue error: {0}")]
    Queue(String),

    /// Avro encode/decode error
    #[error("serialization error: {0}")]
    Servo(#[from] apache_avro::Error),

    /// Internal error
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl MaestroError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        MaestroError::Validation(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl ToString) -> Self {
        MaestroError::Configuration(msg.to_string())
    }

    /// Create a storage error
    pub fn storage(msg: impl ToString) -> Self {
        MaestroError::Storage(msg.to_string())
    }

    /// Create a state store error
    pub fn state(msg: impl ToString) -> Self {
        MaestroError::State(msg.to_string())
    }

    /// Create a bus error
    pub fn bus(msg: impl ToString) -> Self {
        MaestroError::Bus(msg.to_string())
    }

    /// Create a queue error
    pub fn queue(msg: impl ToString) -> Self {
        MaestroError::Queue(msg.to_string())
    }

    pub fn not_valid_scheme(expected: impl Into<String>, uri: impl Into<String>) -> Self {
        MaestroError::NotValidScheme {
            expected: expected.into(),
            uri: uri.into(),
        }
    }
}
