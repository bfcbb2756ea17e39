use std::sync::Arc;

use tracing::{debug, info};
use wordcard_core::{
    config::{MessageQueueConfig, MessageQueueType},
    traits::MessageQueue,
    PipelineError, Result,
};

use crate::{InMemoryMessageQueue, RabbitMQMessageQueue};

pub struct MessageQueueFactory;

impl MessageQueueFactory {
    pub async fn create(config: &MessageQueueConfig) -> Result<Arc<dyn MessageQueue>> {
        debug!("Creating message queue with type: {:?}", config.r#type);
        Self::validate_config(config)?;

        match config.r#type {
            MessageQueueType::Rabbitmq => {
                info!("Initializing RabbitMQ message queue");
                let rabbitmq = RabbitMQMessageQueue::new(config.clone()).await?;
                Ok(Arc::new(rabbitmq))
            }
            MessageQueueType::InMemory => {
                info!("Initializing in-memory message queue");
                Ok(Arc::new(InMemoryMessageQueue::new()))
            }
        }
    }

    pub fn validate_config(config: &MessageQueueConfig) -> Result<()> {
        config
            .validate()
            .map_err(|e| PipelineError::Configuration(format!("{e:#}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_in_memory() {
        let config = MessageQueueConfig {
            r#type: MessageQueueType::InMemory,
            ..MessageQueueConfig::default()
        };
        let queue = MessageQueueFactory::create(&config).await.unwrap();
        assert!(queue.is_connected());
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let config = MessageQueueConfig {
            host: String::new(),
            ..MessageQueueConfig::default()
        };
        assert!(matches!(
            MessageQueueFactory::create(&config).await,
            Err(PipelineError::Configuration(_))
        ));
    }
}
