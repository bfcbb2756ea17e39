//! # 数据模型
//!
//! 管道中流转的核心数据结构：
//!
//! - [`Message`] - 传输单元，负载字节 + 路由键 + 消息头
//! - [`RetryCount`] - `X-retry` 消息头中的重试次数
//! - [`Topology`] - 每个命令类型的交换机/队列/路由键静态描述
//!
//! ## 消息流转
//!
//! ```text
//! Dispatcher ──key──▶ main ──Worker失败──retry_key──▶ retry ──RetryCoordinator──┬─key──▶ main
//!                                                                               └─error_key──▶ error (终点)
//! ```

pub mod message;
pub mod topology;

pub use message::*;
pub use topology::*;
