//! # 基础设施层
//!
//! 消息代理的具体实现（RabbitMQ、内存代理）以及队列消费循环。

pub mod consumer;
pub mod in_memory_queue;
pub mod message_queue;
pub mod message_queue_factory;

pub use consumer::*;
pub use in_memory_queue::*;
pub use message_queue::*;
pub use message_queue_factory::*;
