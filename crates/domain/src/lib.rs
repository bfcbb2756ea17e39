//! 单词卡片的领域命令

pub mod commands;

pub use commands::*;
