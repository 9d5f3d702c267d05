// Core data model, typed-record schemas and the Avro wire codec.

pub mod config;
pub mod datatype;
pub mod error;
pub mod models;
pub mod secrets;
pub mod servo;

pub use config::{ActorOpts, Settings};
pub use error::{MaestroError, Result};
pub use models::*;
pub use secrets::{SealedSecret, UnsealedSecret};
