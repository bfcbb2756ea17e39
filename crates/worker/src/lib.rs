//! # 命令执行器
//!
//! 消费主队列，把消息反序列化为命令并交给领域层的 [`CommandHandler`](wordcard_core::CommandHandler) 执行。

pub mod service;

pub use service::*;
