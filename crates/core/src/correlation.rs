//! # 关联ID追踪
//!
//! 关联ID用于在 发布 → 消费 → 重试 的异步链路中串联同一个原始请求产生的所有消息。
//!
//! 关联ID不存放在线程局部或任务局部的隐式存储中，而是由调用方显式持有的
//! [`CorrelationContext`] 携带，并沿调用链传递：
//!
//! - HTTP 层通过 [`CorrelationTracker::from_headers`] 从入站请求头得到一个已绑定的上下文；
//! - Dispatcher 通过 [`CorrelationTracker::current_or_new`] 取得（或生成）要写入消息的ID；
//! - 消费端通过 [`CorrelationTracker::from_message`] 从消息恢复上下文。
//!
//! [`CorrelationContext::bind`] 返回一个作用域守卫，守卫离开作用域（包括提前返回、
//! `?` 传播错误和 panic 展开）时自动恢复之前的绑定，避免ID泄漏到无关的后续工作中。

use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Message;

/// 默认的关联ID消息头名称
pub const DEFAULT_CORRELATION_HEADER: &str = "X-Correlation-Id";

/// 关联ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// 生成新的随机关联ID（128位 UUID v4）
    pub fn new_random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// 解析外部传入的关联ID，空白字符串视为不存在
    pub fn parse(value: &str) -> Option<Self> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// 是否为本系统生成的UUID格式ID
    pub fn is_uuid(&self) -> bool {
        Uuid::parse_str(&self.0).is_ok()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 显式传递的关联上下文
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorrelationContext {
    bound: Option<CorrelationId>,
}

impl CorrelationContext {
    /// 创建未绑定任何ID的上下文
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建已绑定指定ID的上下文
    pub fn with_id(id: CorrelationId) -> Self {
        Self { bound: Some(id) }
    }

    /// 当前绑定的ID
    pub fn current(&self) -> Option<&CorrelationId> {
        self.bound.as_ref()
    }

    /// 在作用域内绑定ID，守卫释放时恢复之前的绑定
    pub fn bind(&mut self, id: CorrelationId) -> CorrelationScope<'_> {
        let previous = self.bound.replace(id);
        CorrelationScope {
            context: self,
            previous,
        }
    }

    /// 解除绑定并返回之前绑定的ID
    pub fn unbind(&mut self) -> Option<CorrelationId> {
        self.bound.take()
    }
}

/// [`CorrelationContext::bind`] 返回的作用域守卫
#[derive(Debug)]
pub struct CorrelationScope<'a> {
    context: &'a mut CorrelationContext,
    previous: Option<CorrelationId>,
}

impl Deref for CorrelationScope<'_> {
    type Target = CorrelationContext;

    fn deref(&self) -> &Self::Target {
        self.context
    }
}

impl Drop for CorrelationScope<'_> {
    fn drop(&mut self) {
        self.context.bound = self.previous.take();
    }
}

/// 关联ID追踪器
#[derive(Debug, Clone)]
pub struct CorrelationTracker {
    header_name: String,
}

impl Default for CorrelationTracker {
    fn default() -> Self {
        Self::new(DEFAULT_CORRELATION_HEADER)
    }
}

impl CorrelationTracker {
    pub fn new(header_name: impl Into<String>) -> Self {
        Self {
            header_name: header_name.into(),
        }
    }

    /// 关联ID所使用的消息头名称
    pub fn header_name(&self) -> &str {
        &self.header_name
    }

    /// 返回上下文中绑定的ID，没有则生成新ID
    pub fn current_or_new(&self, context: &CorrelationContext) -> CorrelationId {
        context
            .current()
            .cloned()
            .unwrap_or_else(CorrelationId::new_random)
    }

    /// 从入站请求头建立上下文（头名称大小写不敏感），缺失或为空时生成新ID
    pub fn from_headers(&self, headers: &HashMap<String, String>) -> CorrelationContext {
        let id = headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(&self.header_name))
            .and_then(|(_, value)| CorrelationId::parse(value))
            .unwrap_or_else(CorrelationId::new_random);
        CorrelationContext::with_id(id)
    }

    /// 从消费到的消息恢复上下文：优先使用传输层字段，其次使用消息头
    pub fn from_message(&self, message: &Message) -> CorrelationContext {
        match message.correlation_id(&self.header_name) {
            Some(id) => CorrelationContext::with_id(id),
            None => CorrelationContext::new(),
        }
    }
}
