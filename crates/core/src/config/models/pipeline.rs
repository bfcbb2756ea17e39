use serde::{Deserialize, Serialize};

use crate::correlation::DEFAULT_CORRELATION_HEADER;
use crate::models::DEFAULT_RETRY_HEADER;

/// 默认最大重试次数
pub const DEFAULT_MAX_RETRIES_COUNT: u32 = 3;

/// Command pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub max_retries_count: u32,
    pub retry_header: String,
    pub correlation_header: String,
    /// 单条命令处理的超时时间，需小于代理的确认超时
    pub handler_timeout_seconds: u64,
    /// 每个队列启动的消费者数量
    pub consumers_per_queue: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retries_count: DEFAULT_MAX_RETRIES_COUNT,
            retry_header: DEFAULT_RETRY_HEADER.to_string(),
            correlation_header: DEFAULT_CORRELATION_HEADER.to_string(),
            handler_timeout_seconds: 30,
            consumers_per_queue: 1,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.retry_header.trim().is_empty() {
            return Err(anyhow::anyhow!("重试消息头名称不能为空"));
        }

        if self.correlation_header.trim().is_empty() {
            return Err(anyhow::anyhow!("关联ID消息头名称不能为空"));
        }

        if self.retry_header.eq_ignore_ascii_case(&self.correlation_header) {
            return Err(anyhow::anyhow!("重试消息头与关联ID消息头不能相同"));
        }

        if self.handler_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("命令处理超时时间必须大于0"));
        }

        if self.consumers_per_queue == 0 {
            return Err(anyhow::anyhow!("每个队列的消费者数量必须大于0"));
        }

        Ok(())
    }
}
