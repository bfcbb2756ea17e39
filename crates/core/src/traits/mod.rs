pub mod command_handler;
pub mod message_queue;

pub use command_handler::*;
pub use message_queue::*;
