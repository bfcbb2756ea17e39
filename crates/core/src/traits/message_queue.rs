use std::fmt;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::{
    models::{Message, Topology, TopologyHandles},
    Result,
};

/// 单条投递的确认句柄
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// 确认消息处理完成
    async fn ack(&self) -> Result<()>;

    /// 拒绝消息，`requeue = false` 时由代理按死信参数转发
    async fn nack(&self, requeue: bool) -> Result<()>;
}

/// 从队列取到的一条消息，必须恰好被 ack 或 nack 一次
pub struct Delivery {
    pub message: Message,
    /// 代理是否曾经投递过这条消息
    pub redelivered: bool,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(message: Message, redelivered: bool, acker: Box<dyn Acknowledger>) -> Self {
        Self {
            message,
            redelivered,
            acker,
        }
    }

    pub async fn ack(self) -> Result<()> {
        self.acker.ack().await
    }

    pub async fn nack(self, requeue: bool) -> Result<()> {
        self.acker.nack(requeue).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("message", &self.message)
            .field("redelivered", &self.redelivered)
            .finish_non_exhaustive()
    }
}

/// 订阅产生的投递流，流结束表示订阅已被取消或连接已断开
pub type DeliveryStream = BoxStream<'static, Result<Delivery>>;

/// 消息队列抽象接口
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// 声明交换机和三个队列并完成绑定，参数不一致时返回 `TopologyConflict`
    async fn declare_topology(&self, topology: &Topology) -> Result<TopologyHandles>;

    /// 发布消息到交换机，路由键取自 `message.routing_key`，返回前等待代理确认
    async fn publish(&self, exchange: &str, message: &Message) -> Result<()>;

    /// 订阅队列
    async fn subscribe(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream>;

    /// 取消订阅，未确认的预取消息由代理重新入队
    async fn cancel(&self, consumer_tag: &str) -> Result<()>;

    /// 拉取单条消息，队列为空时返回 None
    async fn fetch(&self, queue: &str) -> Result<Option<Delivery>>;

    /// 获取队列中的消息数量
    async fn get_queue_size(&self, queue: &str) -> Result<u32>;

    fn is_connected(&self) -> bool;

    async fn close(&self) -> Result<()>;
}
