use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    acker::Acker,
    options::*,
    types::{AMQPValue, FieldTable, ShortString},
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind, Queue,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use wordcard_core::{
    config::MessageQueueConfig,
    correlation::CorrelationId,
    models::{
        HeaderValue, Message, QueueArguments, QueueDeclaration, QueueHandle, Topology,
        TopologyHandles, ARG_DEAD_LETTER_EXCHANGE, ARG_DEAD_LETTER_ROUTING_KEY,
    },
    traits::{Acknowledger, Delivery, DeliveryStream, MessageQueue},
    PipelineError, Result,
};

/// RabbitMQ消息队列实现
///
/// 发布统一走一个开启了 publisher confirm 的通道；每个订阅使用独立通道并设置 QoS，
/// 取消订阅时关闭该通道，未确认的预取消息由代理重新入队。
pub struct RabbitMQMessageQueue {
    connection: Connection,
    publish_channel: Arc<Mutex<Channel>>,
    consumers: Mutex<HashMap<String, Channel>>,
    config: MessageQueueConfig,
}

impl RabbitMQMessageQueue {
    /// 创建新的RabbitMQ消息队列实例
    pub async fn new(config: MessageQueueConfig) -> Result<Self> {
        let url = config
            .build_url()
            .map_err(|e| PipelineError::Configuration(format!("{e:#}")))?;
        let timeout = Duration::from_secs(config.connection_timeout_seconds);

        let connection =
            tokio::time::timeout(timeout, Connection::connect(&url, ConnectionProperties::default()))
                .await
                .map_err(|_| {
                    PipelineError::Broker(format!(
                        "连接RabbitMQ超时: {}:{} ({}秒)",
                        config.host, config.port, config.connection_timeout_seconds
                    ))
                })?
                .map_err(|e| PipelineError::Broker(format!("连接RabbitMQ失败: {e}")))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| PipelineError::Broker(format!("创建通道失败: {e}")))?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| PipelineError::Broker(format!("开启发布确认失败: {e}")))?;

        info!(
            "成功连接到RabbitMQ: {}:{}{}",
            config.host, config.port, config.virtual_host
        );

        Ok(Self {
            connection,
            publish_channel: Arc::new(Mutex::new(channel)),
            consumers: Mutex::new(HashMap::new()),
            config,
        })
    }

    async fn create_channel(&self) -> Result<Channel> {
        self.connection
            .create_channel()
            .await
            .map_err(|e| PipelineError::Broker(format!("创建通道失败: {e}")))
    }

    /// 声明队列，参数与已存在的队列不一致时代理返回 PRECONDITION_FAILED
    async fn declare_queue(
        &self,
        channel: &Channel,
        exchange: &str,
        declaration: &QueueDeclaration,
    ) -> Result<Queue> {
        let queue = channel
            .queue_declare(
                &declaration.name,
                QueueDeclareOptions {
                    durable: declaration.durable,
                    exclusive: false,
                    auto_delete: false,
                    ..Default::default()
                },
                queue_arguments(&declaration.arguments),
            )
            .await
            .map_err(|e| {
                let error_msg = e.to_string();
                if error_msg.contains("PRECONDITION_FAILED") || error_msg.contains("406") {
                    PipelineError::TopologyConflict {
                        queue: declaration.name.clone(),
                        reason: error_msg,
                    }
                } else {
                    PipelineError::Broker(format!("声明队列 {} 失败: {e}", declaration.name))
                }
            })?;

        channel
            .queue_bind(
                &declaration.name,
                exchange,
                &declaration.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                PipelineError::Broker(format!(
                    "绑定队列 {} 到路由键 {} 失败: {e}",
                    declaration.name, declaration.routing_key
                ))
            })?;

        debug!(
            "队列 {} 声明成功，路由键 {}",
            declaration.name, declaration.routing_key
        );
        Ok(queue)
    }

    /// 连接配置
    pub fn config(&self) -> &MessageQueueConfig {
        &self.config
    }
}

fn queue_handle(name: &str, queue: &Queue) -> QueueHandle {
    QueueHandle {
        name: name.to_string(),
        message_count: queue.message_count(),
        consumer_count: queue.consumer_count(),
    }
}

fn queue_arguments(arguments: &QueueArguments) -> FieldTable {
    let mut table = FieldTable::default();
    if let Some(exchange) = &arguments.dead_letter_exchange {
        table.insert(
            ShortString::from(ARG_DEAD_LETTER_EXCHANGE),
            AMQPValue::LongString(exchange.as_str().into()),
        );
    }
    if let Some(routing_key) = &arguments.dead_letter_routing_key {
        table.insert(
            ShortString::from(ARG_DEAD_LETTER_ROUTING_KEY),
            AMQPValue::LongString(routing_key.as_str().into()),
        );
    }
    table
}

fn header_table(headers: &HashMap<String, HeaderValue>) -> FieldTable {
    let mut table = FieldTable::default();
    for (name, value) in headers {
        let value = match value {
            HeaderValue::Int(value) => AMQPValue::LongLongInt(*value),
            HeaderValue::Bool(value) => AMQPValue::Boolean(*value),
            HeaderValue::Str(value) => AMQPValue::LongString(value.as_str().into()),
        };
        table.insert(ShortString::from(name.as_str()), value);
    }
    table
}

fn header_value(value: &AMQPValue) -> Option<HeaderValue> {
    match value {
        AMQPValue::Boolean(value) => Some(HeaderValue::Bool(*value)),
        AMQPValue::ShortShortInt(value) => Some(HeaderValue::Int(i64::from(*value))),
        AMQPValue::ShortShortUInt(value) => Some(HeaderValue::Int(i64::from(*value))),
        AMQPValue::ShortInt(value) => Some(HeaderValue::Int(i64::from(*value))),
        AMQPValue::ShortUInt(value) => Some(HeaderValue::Int(i64::from(*value))),
        AMQPValue::LongInt(value) => Some(HeaderValue::Int(i64::from(*value))),
        AMQPValue::LongUInt(value) => Some(HeaderValue::Int(i64::from(*value))),
        AMQPValue::LongLongInt(value) => Some(HeaderValue::Int(*value)),
        AMQPValue::ShortString(value) => Some(HeaderValue::Str(value.as_str().to_string())),
        AMQPValue::LongString(value) => Some(HeaderValue::Str(
            String::from_utf8_lossy(value.as_bytes()).into_owned(),
        )),
        _ => None,
    }
}

fn message_properties(message: &Message) -> BasicProperties {
    let mut properties = BasicProperties::default()
        .with_delivery_mode(2) // 2 = persistent
        .with_headers(header_table(&message.headers));

    if let Some(content_type) = &message.content_type {
        properties = properties.with_content_type(ShortString::from(content_type.as_str()));
    }
    if let Some(correlation_id) = &message.correlation_id {
        properties = properties.with_correlation_id(ShortString::from(correlation_id.as_str()));
    }
    if let Some(expiration) = message.expiration {
        properties =
            properties.with_expiration(ShortString::from(expiration.as_millis().to_string()));
    }
    properties
}

fn into_message(delivery: &lapin::message::Delivery) -> Message {
    let properties = &delivery.properties;
    let mut message = Message::new(delivery.routing_key.as_str(), delivery.data.clone());

    if let Some(headers) = properties.headers() {
        for (name, value) in headers.inner() {
            match header_value(value) {
                Some(value) => {
                    message.headers.insert(name.as_str().to_string(), value);
                }
                None => debug!("忽略不支持的消息头类型: {}", name.as_str()),
            }
        }
    }
    message.content_type = properties
        .content_type()
        .as_ref()
        .map(|value| value.as_str().to_string());
    message.correlation_id = properties
        .correlation_id()
        .as_ref()
        .and_then(|value| CorrelationId::parse(value.as_str()));
    message.expiration = properties
        .expiration()
        .as_ref()
        .and_then(|value| value.as_str().parse::<u64>().ok())
        .map(Duration::from_millis);
    message
}

fn into_delivery(delivery: lapin::message::Delivery) -> Delivery {
    let message = into_message(&delivery);
    Delivery::new(
        message,
        delivery.redelivered,
        Box::new(RabbitMQAcknowledger {
            acker: delivery.acker,
        }),
    )
}

struct RabbitMQAcknowledger {
    acker: Acker,
}

#[async_trait]
impl Acknowledger for RabbitMQAcknowledger {
    async fn ack(&self) -> Result<()> {
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .map(|_| ())
            .map_err(|e| PipelineError::Broker(format!("确认消息失败: {e}")))
    }

    async fn nack(&self, requeue: bool) -> Result<()> {
        self.acker
            .nack(BasicNackOptions {
                requeue,
                ..Default::default()
            })
            .await
            .map(|_| ())
            .map_err(|e| PipelineError::Broker(format!("拒绝消息失败: {e}")))
    }
}

#[async_trait]
impl MessageQueue for RabbitMQMessageQueue {
    async fn declare_topology(&self, topology: &Topology) -> Result<TopologyHandles> {
        // 声明失败会导致代理关闭通道，因此使用临时通道
        let channel = self.create_channel().await?;

        channel
            .exchange_declare(
                &topology.exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    auto_delete: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                PipelineError::Broker(format!("声明交换机 {} 失败: {e}", topology.exchange))
            })?;

        let [main, retry, error] = topology.declarations();
        let main_queue = self.declare_queue(&channel, &topology.exchange, &main).await?;
        let retry_queue = self.declare_queue(&channel, &topology.exchange, &retry).await?;
        let error_queue = self.declare_queue(&channel, &topology.exchange, &error).await?;

        if let Err(e) = channel.close(200, "拓扑声明完成").await {
            debug!("关闭拓扑声明通道失败: {}", e);
        }

        info!("命令类型 {} 的拓扑声明完成", topology.kind);
        Ok(TopologyHandles {
            kind: topology.kind,
            exchange: topology.exchange.clone(),
            main: queue_handle(&main.name, &main_queue),
            retry: queue_handle(&retry.name, &retry_queue),
            error: queue_handle(&error.name, &error_queue),
        })
    }

    async fn publish(&self, exchange: &str, message: &Message) -> Result<()> {
        let channel = self.publish_channel.lock().await;

        let confirm = channel
            .basic_publish(
                exchange,
                &message.routing_key,
                BasicPublishOptions::default(),
                &message.payload,
                message_properties(message),
            )
            .await
            .map_err(|e| {
                PipelineError::Publish(format!(
                    "发布消息到 {exchange}/{} 失败: {e}",
                    message.routing_key
                ))
            })?;

        let confirmation = confirm
            .await
            .map_err(|e| PipelineError::Publish(format!("消息发布确认失败: {e}")))?;

        if confirmation.is_nack() {
            return Err(PipelineError::Publish(format!(
                "代理拒绝了发布到 {exchange}/{} 的消息",
                message.routing_key
            )));
        }

        debug!("消息已发布到 {}/{}", exchange, message.routing_key);
        Ok(())
    }

    async fn subscribe(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream> {
        let channel = self.create_channel().await?;

        channel
            .basic_qos(self.config.prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| PipelineError::Broker(format!("设置预取数量失败: {e}")))?;

        let consumer = channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| PipelineError::Broker(format!("创建消费者失败: {e}")))?;

        self.consumers
            .lock()
            .await
            .insert(consumer_tag.to_string(), channel);

        debug!("为队列 {} 创建消费者: {}", queue, consumer_tag);

        let stream = consumer.map(|delivery| {
            delivery
                .map(into_delivery)
                .map_err(|e| PipelineError::Broker(format!("接收消息失败: {e}")))
        });
        Ok(stream.boxed())
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<()> {
        let Some(channel) = self.consumers.lock().await.remove(consumer_tag) else {
            debug!("消费者 {} 不存在，忽略取消", consumer_tag);
            return Ok(());
        };

        if let Err(e) = channel
            .basic_cancel(consumer_tag, BasicCancelOptions::default())
            .await
        {
            warn!("取消消费者 {} 失败: {}", consumer_tag, e);
        }

        channel
            .close(200, "消费者已取消")
            .await
            .map_err(|e| PipelineError::Broker(format!("关闭消费者通道失败: {e}")))?;

        debug!("消费者 {} 已取消", consumer_tag);
        Ok(())
    }

    async fn fetch(&self, queue: &str) -> Result<Option<Delivery>> {
        let channel = self.publish_channel.lock().await;

        match channel.basic_get(queue, BasicGetOptions::default()).await {
            Ok(Some(message)) => Ok(Some(into_delivery(message.delivery))),
            Ok(None) => Ok(None),
            Err(e) => Err(PipelineError::Broker(format!(
                "从队列 {queue} 获取消息失败: {e}"
            ))),
        }
    }

    async fn get_queue_size(&self, queue: &str) -> Result<u32> {
        let channel = self.create_channel().await?;
        let queue_info = channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    passive: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await;

        match queue_info {
            Ok(info) => {
                if let Err(e) = channel.close(200, "查询完成").await {
                    debug!("关闭查询通道失败: {}", e);
                }
                Ok(info.message_count())
            }
            Err(e) => {
                let error_msg = e.to_string();
                if error_msg.contains("NOT_FOUND") || error_msg.contains("404") {
                    debug!("队列 {} 不存在，返回大小为0", queue);
                    Ok(0)
                } else {
                    Err(PipelineError::Broker(format!(
                        "获取队列 {queue} 信息失败: {e}"
                    )))
                }
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }

    async fn close(&self) -> Result<()> {
        self.connection
            .close(200, "正常关闭")
            .await
            .map_err(|e| PipelineError::Broker(format!("关闭连接失败: {e}")))?;

        info!("RabbitMQ连接已关闭");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_table_conversion() {
        let mut headers = HashMap::new();
        headers.insert("X-retry".to_string(), HeaderValue::Int(3));
        headers.insert(
            "X-Correlation-Id".to_string(),
            HeaderValue::Str("abc".to_string()),
        );

        let table = header_table(&headers);
        let lookup = |name: &str| {
            table
                .inner()
                .iter()
                .find(|(key, _)| key.as_str() == name)
                .and_then(|(_, value)| header_value(value))
        };
        assert_eq!(lookup("X-retry"), Some(HeaderValue::Int(3)));
        assert_eq!(lookup("X-Correlation-Id"), Some(HeaderValue::Str("abc".to_string())));
    }

    #[test]
    fn test_narrow_integer_headers_widen() {
        assert_eq!(
            header_value(&AMQPValue::LongInt(2)),
            Some(HeaderValue::Int(2))
        );
        assert_eq!(header_value(&AMQPValue::Void), None);
    }

    #[test]
    fn test_dead_letter_arguments() {
        let table = queue_arguments(&QueueArguments::dead_letter_to(
            "exchange.saveCard",
            "routing.saveCard.retry",
        ));
        assert_eq!(table.inner().len(), 2);
        assert!(queue_arguments(&QueueArguments::default()).inner().is_empty());
    }
}
