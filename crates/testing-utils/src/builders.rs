//! 测试数据构建器

use std::sync::Arc;
use std::time::Duration;

use wordcard_core::{
    config::{AppConfig, MessageQueueType},
    correlation::CorrelationId,
    models::{CommandKind, HeaderValue, Message, Topology, TopologyRegistry},
    traits::{Command, MessageQueue},
};
use wordcard_domain::{CardRecord, SaveCardCommand, SaveDeckCommand};
use wordcard_infrastructure::InMemoryMessageQueue;

/// 常用的命令样例
pub struct CommandFixtures;

impl CommandFixtures {
    pub fn save_card() -> SaveCardCommand {
        SaveCardCommand::new("dog", "perro", 7)
    }

    pub fn save_deck() -> SaveDeckCommand {
        SaveDeckCommand::new("Animals", "es")
            .with_username("jsacristan")
            .with_card(CardRecord::new("cat", "gato"))
    }
}

/// 消息构建器
pub struct MessageBuilder {
    message: Message,
}

impl MessageBuilder {
    /// 序列化命令并路由到主路由键，与发布器产生的消息格式一致
    pub fn command<C: Command>(topology: &Topology, command: &C) -> Self {
        Self {
            message: Message::json(topology.key.clone(), command).unwrap(),
        }
    }

    pub fn raw(routing_key: &str, payload: &[u8]) -> Self {
        Self {
            message: Message::new(routing_key, payload.to_vec()),
        }
    }

    pub fn with_routing_key(mut self, routing_key: &str) -> Self {
        self.message.routing_key = routing_key.to_string();
        self
    }

    pub fn with_retry(mut self, retry_count: i64) -> Self {
        self.message.set_header("X-retry", retry_count);
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<HeaderValue>) -> Self {
        self.message.set_header(name, value);
        self
    }

    pub fn with_correlation_id(mut self, id: &CorrelationId) -> Self {
        self.message.stamp_correlation_id("X-Correlation-Id", id);
        self
    }

    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.message.expiration = Some(expiration);
        self
    }

    pub fn build(self) -> Message {
        self.message
    }
}

/// 声明好全部拓扑的内存代理
pub struct PipelineFixture {
    pub broker: InMemoryMessageQueue,
    pub queue: Arc<dyn MessageQueue>,
    pub config: AppConfig,
    pub topologies: Arc<TopologyRegistry>,
}

impl PipelineFixture {
    pub async fn new() -> Self {
        let mut config = AppConfig::default();
        config.message_queue.r#type = MessageQueueType::InMemory;

        let broker = InMemoryMessageQueue::new();
        let topologies = Arc::new(TopologyRegistry::from_config(&config.topology));
        for topology in topologies.iter() {
            broker.declare_topology(topology).await.unwrap();
        }

        Self {
            queue: Arc::new(broker.clone()),
            broker,
            config,
            topologies,
        }
    }

    pub fn topology(&self, kind: CommandKind) -> Topology {
        self.topologies.get(kind).unwrap().clone()
    }
}
