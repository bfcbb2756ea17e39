//! # 配置管理
//!
//! 配置按以下顺序合并，后者覆盖前者：
//!
//! 1. 内置默认值
//! 2. TOML 配置文件（默认 `config/wordcard.toml`，可选）
//! 3. 环境变量 `WORDCARD__<段>__<键>`

pub mod models;

pub use models::*;
