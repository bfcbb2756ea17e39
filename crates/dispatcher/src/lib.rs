//! # 调度器
//!
//! 命令发布、重试协调和错误队列重放。

pub mod dispatcher;
pub mod parking_lot;
pub mod retry_service;

pub use dispatcher::*;
pub use parking_lot::*;
pub use retry_service::*;
