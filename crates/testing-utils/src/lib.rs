//! # Wordcard Testing Utils
//!
//! 各 crate 共享的测试工具：领域处理器替身、消息构建器、内存代理夹具和等待工具。
//!
//! ```toml
//! [dev-dependencies]
//! wordcard-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
