// Execution plane: scheduler, worker actor and the component runtime.

pub mod catalog;
pub mod component;
pub mod process;
pub mod runtime;
pub mod scheduler;
pub mod worker;

pub use component::{Component, ComponentRegistry};
pub use process::{Process, UpstreamPayload};
pub use runtime::Runtime;
pub use scheduler::Scheduler;
pub use worker::{derive_workflow_status, set_workflow_run_state, Worker};
