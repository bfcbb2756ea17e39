use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::broadcast;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;
use wordcard_core::{
    traits::{DeliveryHandler, MessageQueue},
    PipelineError, Result,
};

/// 单个队列订阅的消费循环
///
/// 只在两次投递之间检查关闭信号，已取出的投递总会被处理完（ack 或 nack）后才退出。
/// 单条消息的失败由处理器转换为路由决策，订阅流出错或意外结束则向上返回。
pub struct QueueConsumer {
    message_queue: Arc<dyn MessageQueue>,
    queue: String,
    consumer_tag: String,
    handler: Arc<dyn DeliveryHandler>,
}

impl QueueConsumer {
    pub fn new(
        message_queue: Arc<dyn MessageQueue>,
        queue: impl Into<String>,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Self {
        let consumer_tag = format!("{}-{}", handler.name(), &Uuid::new_v4().simple().to_string()[..8]);
        Self {
            message_queue,
            queue: queue.into(),
            consumer_tag,
            handler,
        }
    }

    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// 运行消费循环直到收到关闭信号
    pub async fn run(self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let span = info_span!("consumer", queue = %self.queue, consumer_tag = %self.consumer_tag);
        self.consume(shutdown_rx).instrument(span).await
    }

    async fn consume(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let mut stream = self
            .message_queue
            .subscribe(&self.queue, &self.consumer_tag)
            .await?;
        info!("消费者 {} 开始消费队列 {}", self.consumer_tag, self.queue);

        let mut processed: u64 = 0;
        let result = loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    info!("消费者 {} 收到关闭信号", self.consumer_tag);
                    break Ok(());
                }
                next = stream.next() => {
                    match next {
                        Some(Ok(delivery)) => {
                            processed += 1;
                            if let Err(e) = self.handler.handle(delivery).await {
                                if e.is_fatal() {
                                    error!("处理器 {} 返回致命错误: {}", self.handler.name(), e);
                                    break Err(e);
                                }
                                // 未确认的投递会在通道关闭后由代理重新投递
                                error!("处理器 {} 处理消息失败: {}", self.handler.name(), e);
                            }
                        }
                        Some(Err(e)) => {
                            error!("队列 {} 的订阅出错: {}", self.queue, e);
                            break Err(e);
                        }
                        None => {
                            break Err(PipelineError::Broker(format!(
                                "队列 {} 的订阅意外结束",
                                self.queue
                            )));
                        }
                    }
                }
            }
        };

        drop(stream);
        if let Err(e) = self.message_queue.cancel(&self.consumer_tag).await {
            warn!("取消消费者 {} 失败: {}", self.consumer_tag, e);
        }
        debug!("消费者 {} 共处理 {} 条消息", self.consumer_tag, processed);
        info!("消费者 {} 已停止", self.consumer_tag);
        result
    }
}
