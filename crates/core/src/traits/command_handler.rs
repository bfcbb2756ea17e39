use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::{models::CommandKind, traits::Delivery, Result};

/// 可以经由管道投递的命令
pub trait Command: Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: CommandKind;

    /// 字段级校验，失败时返回 `InvalidCommand`
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

/// 命令的业务处理器，由领域层实现。
///
/// 消息是至少一次投递的，同一条命令可能被执行多次，实现需要保证幂等。
#[async_trait]
pub trait CommandHandler<C: Command>: Send + Sync {
    async fn execute(&self, command: C) -> Result<()>;
}

/// 消费循环调用的投递处理器
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    fn name(&self) -> &str;

    /// 处理一条投递并负责 ack/nack。
    ///
    /// 单条消息的业务失败由实现转换为路由决策，返回的错误只表示代理交互失败。
    async fn handle(&self, delivery: Delivery) -> Result<()>;
}
