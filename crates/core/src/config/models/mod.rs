pub mod app_config;
pub mod message_queue;
pub mod observability;
pub mod pipeline;
pub mod topology;

pub use app_config::*;
pub use message_queue::*;
pub use observability::*;
pub use pipeline::*;
pub use topology::*;
