use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::correlation::CorrelationId;
use crate::{PipelineError, Result};

/// JSON 负载的内容类型
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// 默认的重试次数消息头名称
pub const DEFAULT_RETRY_HEADER: &str = "X-retry";

/// 消息头的值
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValue {
    Int(i64),
    Bool(bool),
    Str(String),
}

impl HeaderValue {
    /// 按整数解读，字符串形式的整数同样接受
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            HeaderValue::Int(value) => Some(*value),
            HeaderValue::Str(value) => value.trim().parse().ok(),
            HeaderValue::Bool(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeaderValue::Str(value) => Some(value),
            _ => None,
        }
    }
}

impl From<i64> for HeaderValue {
    fn from(value: i64) -> Self {
        HeaderValue::Int(value)
    }
}

impl From<bool> for HeaderValue {
    fn from(value: bool) -> Self {
        HeaderValue::Bool(value)
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        HeaderValue::Str(value)
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        HeaderValue::Str(value.to_string())
    }
}

/// 传输单元：不透明的负载字节、路由键和可变的消息头
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub payload: Vec<u8>,
    pub routing_key: String,
    pub headers: HashMap<String, HeaderValue>,
    pub content_type: Option<String>,
    /// 传输层关联ID字段
    pub correlation_id: Option<CorrelationId>,
    pub expiration: Option<Duration>,
}

impl Message {
    pub fn new(routing_key: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            payload,
            routing_key: routing_key.into(),
            headers: HashMap::new(),
            content_type: None,
            correlation_id: None,
            expiration: None,
        }
    }

    /// 将值序列化为 JSON 负载
    pub fn json<T: Serialize>(routing_key: impl Into<String>, value: &T) -> Result<Self> {
        let payload = serde_json::to_vec(value)
            .map_err(|e| PipelineError::Serialization(format!("序列化命令失败: {e}")))?;
        let mut message = Self::new(routing_key, payload);
        message.content_type = Some(CONTENT_TYPE_JSON.to_string());
        Ok(message)
    }

    /// 将 JSON 负载反序列化为目标类型
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| PipelineError::Deserialization(format!("反序列化消息负载失败: {e}")))
    }

    pub fn header(&self, name: &str) -> Option<&HeaderValue> {
        self.headers.get(name)
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<HeaderValue>) {
        self.headers.insert(name.into(), value.into());
    }

    pub fn remove_header(&mut self, name: &str) -> Option<HeaderValue> {
        self.headers.remove(name)
    }

    /// 同时写入消息头和传输层关联ID字段
    pub fn stamp_correlation_id(&mut self, header_name: &str, id: &CorrelationId) {
        self.set_header(header_name, id.as_str());
        self.correlation_id = Some(id.clone());
    }

    /// 读取关联ID：优先传输层字段，其次消息头
    pub fn correlation_id(&self, header_name: &str) -> Option<CorrelationId> {
        self.correlation_id.clone().or_else(|| {
            self.header(header_name)
                .and_then(HeaderValue::as_str)
                .and_then(CorrelationId::parse)
        })
    }

    /// 复制一份路由到新路由键的消息，负载、消息头和关联ID保持不变
    pub fn rerouted(&self, routing_key: impl Into<String>) -> Self {
        Self {
            routing_key: routing_key.into(),
            ..self.clone()
        }
    }

    pub fn retry_count(&self, header_name: &str) -> RetryCount {
        RetryCount::from_header(self.header(header_name))
    }

    pub fn set_retry_count(&mut self, header_name: &str, count: RetryCount) {
        self.set_header(header_name, i64::from(count.get()));
    }

    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = Some(expiration);
        self
    }
}

/// 重试次数，存放在 `X-retry` 消息头中
///
/// 消息头缺失、无法解析或不是正数时都按 1 处理：
/// 消息能到达重试队列本身就意味着第一次尝试已经发生。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RetryCount(u32);

impl RetryCount {
    pub const FIRST: RetryCount = RetryCount(1);

    pub fn new(value: u32) -> Self {
        Self(value.max(1))
    }

    pub fn from_header(value: Option<&HeaderValue>) -> Self {
        match value.and_then(HeaderValue::as_i64) {
            Some(n) if n >= 1 => Self(u32::try_from(n).unwrap_or(u32::MAX)),
            _ => Self::FIRST,
        }
    }

    pub fn get(self) -> u32 {
        self.0
    }

    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// 是否已超过最大重试次数
    pub fn exceeds(self, max_retries: u32) -> bool {
        self.0 > max_retries
    }
}

impl fmt::Display for RetryCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
