use anyhow::Context;
use serde::{Deserialize, Serialize};
use url::Url;

/// Message queue type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageQueueType {
    #[default]
    Rabbitmq,
    InMemory,
}

/// Message broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageQueueConfig {
    #[serde(rename = "type", default)]
    pub r#type: MessageQueueType,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub virtual_host: String,
    pub connection_timeout_seconds: u64,
    /// 每个消费者通道的预取数量
    pub prefetch_count: u16,
}

impl Default for MessageQueueConfig {
    fn default() -> Self {
        Self {
            r#type: MessageQueueType::Rabbitmq,
            host: "localhost".to_string(),
            port: 5672,
            username: "guest".to_string(),
            password: "guest".to_string(),
            virtual_host: "/".to_string(),
            connection_timeout_seconds: 30,
            prefetch_count: 10,
        }
    }
}

impl MessageQueueConfig {
    /// Validate message queue configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.is_rabbitmq() {
            return Ok(());
        }

        if self.host.is_empty() {
            return Err(anyhow::anyhow!("RabbitMQ主机地址不能为空"));
        }

        if self.port == 0 {
            return Err(anyhow::anyhow!("RabbitMQ端口必须大于0"));
        }

        if self.username.is_empty() {
            return Err(anyhow::anyhow!("RabbitMQ用户名不能为空"));
        }

        if self.virtual_host.is_empty() {
            return Err(anyhow::anyhow!("RabbitMQ虚拟主机不能为空"));
        }

        if self.connection_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("RabbitMQ连接超时时间必须大于0"));
        }

        if self.prefetch_count == 0 {
            return Err(anyhow::anyhow!("预取数量必须大于0"));
        }

        self.build_url()?;
        Ok(())
    }

    /// Build AMQP connection URL
    ///
    /// 用户名、密码和虚拟主机都经过百分号编码。
    pub fn build_url(&self) -> anyhow::Result<String> {
        let vhost = self.virtual_host.replace('%', "%25").replace('/', "%2f");
        let mut url = Url::parse(&format!("amqp://{}:{}/{}", self.host, self.port, vhost))
            .with_context(|| format!("无效的RabbitMQ地址: {}:{}", self.host, self.port))?;
        url.set_username(&self.username)
            .map_err(|_| anyhow::anyhow!("无法设置RabbitMQ用户名"))?;
        url.set_password(Some(&self.password))
            .map_err(|_| anyhow::anyhow!("无法设置RabbitMQ密码"))?;
        Ok(url.to_string())
    }

    /// Check if using RabbitMQ
    pub fn is_rabbitmq(&self) -> bool {
        self.r#type == MessageQueueType::Rabbitmq
    }
}
