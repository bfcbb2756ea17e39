use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use tracing::{debug, error, info_span, warn, Instrument};
use wordcard_core::{
    config::PipelineConfig,
    correlation::CorrelationTracker,
    models::{HeaderValue, Message, Topology},
    traits::{Command, CommandHandler, Delivery, DeliveryHandler, MessageQueue},
    PipelineError, Result,
};

/// 单条主队列消息的处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkOutcome {
    /// 处理成功并已确认
    Completed,
    /// 处理失败，原消息已转发到重试路由键
    Retried { reason: String },
    /// 处理失败且转发也失败，消息被拒绝并由代理死信到重试队列
    DeadLettered { reason: String },
}

impl WorkOutcome {
    fn label(&self) -> &'static str {
        match self {
            WorkOutcome::Completed => "success",
            WorkOutcome::Retried { .. } => "retried",
            WorkOutcome::DeadLettered { .. } => "dead_lettered",
        }
    }
}

/// 命令执行器：消费某一命令类型的主队列
///
/// 失败时把原消息不做任何修改地转发到重试路由键，从不修改重试次数，
/// 也从不决定放弃，重试次数统一由重试协调器管理。
pub struct CommandWorker<C: Command> {
    message_queue: Arc<dyn MessageQueue>,
    topology: Topology,
    handler: Arc<dyn CommandHandler<C>>,
    handler_timeout: Duration,
    retry_header: String,
    tracker: CorrelationTracker,
    name: String,
    _command: PhantomData<fn() -> C>,
}

impl<C: Command> CommandWorker<C> {
    pub fn new(
        message_queue: Arc<dyn MessageQueue>,
        topology: Topology,
        handler: Arc<dyn CommandHandler<C>>,
        pipeline: &PipelineConfig,
    ) -> Result<Self> {
        if topology.kind != C::KIND {
            return Err(PipelineError::Configuration(format!(
                "拓扑 {} 与命令类型 {} 不匹配",
                topology.kind,
                C::KIND
            )));
        }

        Ok(Self {
            name: format!("worker-{}", topology.kind),
            message_queue,
            topology,
            handler,
            handler_timeout: Duration::from_secs(pipeline.handler_timeout_seconds),
            retry_header: pipeline.retry_header.clone(),
            tracker: CorrelationTracker::new(pipeline.correlation_header.clone()),
            _command: PhantomData,
        })
    }

    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = timeout;
        self
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// 处理一条主队列消息
    pub async fn on_message(&self, delivery: Delivery) -> Result<WorkOutcome> {
        let outcome = match self.process(&delivery.message).await {
            Ok(()) => {
                delivery.ack().await?;
                debug!("命令处理成功");
                WorkOutcome::Completed
            }
            Err(e) => {
                let reason = e.to_string();
                warn!("命令处理失败，转发到重试队列: {}", reason);

                let mut retry = delivery.message.rerouted(self.topology.retry_key.clone());
                // 过期时间会让消息绕过重试协调器直接回到主队列
                retry.expiration = None;
                match self
                    .message_queue
                    .publish(&self.topology.exchange, &retry)
                    .await
                {
                    Ok(()) => {
                        delivery.ack().await?;
                        WorkOutcome::Retried { reason }
                    }
                    Err(publish_error) => {
                        // 主队列的死信参数指向重试路由键
                        error!(
                            "转发到重试队列失败，拒绝消息交由代理死信: {}",
                            publish_error
                        );
                        delivery.nack(false).await?;
                        WorkOutcome::DeadLettered { reason }
                    }
                }
            }
        };

        counter!(
            "wordcard_commands_processed_total",
            "kind" => self.topology.kind.as_str(),
            "outcome" => outcome.label()
        )
        .increment(1);
        Ok(outcome)
    }

    async fn process(&self, message: &Message) -> Result<()> {
        let command: C = message.decode()?;
        command.validate()?;

        // 处理器在独立任务中运行，panic 只影响这一条消息
        let handler = Arc::clone(&self.handler);
        let mut task = tokio::spawn(async move { handler.execute(command).await });

        match tokio::time::timeout(self.handler_timeout, &mut task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) if e.is_panic() => Err(PipelineError::Handler(format!(
                "处理器异常终止: {}",
                panic_message(e.into_panic())
            ))),
            Ok(Err(e)) => Err(PipelineError::Handler(format!("处理器任务被取消: {e}"))),
            Err(_) => {
                task.abort();
                Err(PipelineError::HandlerTimeout {
                    seconds: self.handler_timeout.as_secs(),
                })
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "未知错误".to_string())
}

#[async_trait]
impl<C: Command> DeliveryHandler for CommandWorker<C> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, delivery: Delivery) -> Result<()> {
        let context = self.tracker.from_message(&delivery.message);
        let correlation_id = context
            .current()
            .map(|id| id.to_string())
            .unwrap_or_default();
        let span = info_span!(
            "delivery",
            queue = %self.topology.main_queue,
            kind = %self.topology.kind,
            correlation_id = %correlation_id
        );

        async {
            let retry_count = delivery
                .message
                .header(&self.retry_header)
                .and_then(HeaderValue::as_i64);
            debug!(
                redelivered = delivery.redelivered,
                retry_count = ?retry_count,
                "收到命令"
            );
            self.on_message(delivery).await.map(|_| ())
        }
        .instrument(span)
        .await
    }
}
