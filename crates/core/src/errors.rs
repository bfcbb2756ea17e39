use thiserror::Error;

/// 命令管道错误类型定义
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("反序列化错误: {0}")]
    Deserialization(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("命令校验失败: {0}")]
    InvalidCommand(String),

    #[error("命令处理失败: {0}")]
    Handler(String),

    #[error("命令处理超时: {seconds}秒")]
    HandlerTimeout { seconds: u64 },

    #[error("消息发布失败: {0}")]
    Publish(String),

    #[error("拓扑冲突: 队列 {queue} - {reason}")]
    TopologyConflict { queue: String, reason: String },

    #[error("消息代理错误: {0}")]
    Broker(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl PipelineError {
    /// 是否为单条消息级别的错误（应转换为路由决策而不是终止消费循环）
    pub fn is_per_message(&self) -> bool {
        matches!(
            self,
            PipelineError::Deserialization(_)
                | PipelineError::InvalidCommand(_)
                | PipelineError::Handler(_)
                | PipelineError::HandlerTimeout { .. }
        )
    }

    /// 是否为启动期致命错误
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::TopologyConflict { .. } | PipelineError::Configuration(_)
        )
    }
}

/// 统一的Result类型
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(PipelineError::Deserialization("bad json".to_string()).is_per_message());
        assert!(PipelineError::HandlerTimeout { seconds: 30 }.is_per_message());
        assert!(PipelineError::InvalidCommand("name1 不能为空".to_string()).is_per_message());
        assert!(!PipelineError::Publish("down".to_string()).is_per_message());

        let conflict = PipelineError::TopologyConflict {
            queue: "q.saveCard".to_string(),
            reason: "x-dead-letter-routing-key".to_string(),
        };
        assert!(conflict.is_fatal());
        assert!(!PipelineError::Broker("closed".to_string()).is_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = PipelineError::TopologyConflict {
            queue: "q.saveDeck.retry".to_string(),
            reason: "参数不一致".to_string(),
        };
        assert_eq!(err.to_string(), "拓扑冲突: 队列 q.saveDeck.retry - 参数不一致");
    }
}
