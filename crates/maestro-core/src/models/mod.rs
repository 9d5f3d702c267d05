pub mod messages;
pub mod resource;
pub mod task;
pub mod workflow;

pub use messages::*;
pub use resource::*;
pub use task::*;
pub use workflow::*;
