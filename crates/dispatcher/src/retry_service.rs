use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use tracing::{debug, info, info_span, warn, Instrument};
use wordcard_core::{
    config::PipelineConfig,
    correlation::CorrelationTracker,
    models::{RetryCount, Topology},
    traits::{Delivery, DeliveryHandler, MessageQueue},
    Result,
};

/// 重试策略
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries_count: u32,
    /// 重新发布失败后，把消息退回重试队列前的等待时间
    pub requeue_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries_count: 3,
            requeue_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_retries_count: config.max_retries_count,
            ..Default::default()
        }
    }

    /// 状态转换：`Attempted(n) → Attempted(n+1)` 当 `n ≤ max`，否则进入停车场
    pub fn decide(&self, count: RetryCount) -> RetryDecision {
        if count.exceeds(self.max_retries_count) {
            RetryDecision::Park { attempts: count }
        } else {
            RetryDecision::Retry { next: count.next() }
        }
    }
}

/// 重试决策
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// 带着新的重试次数回到主队列
    Retry { next: RetryCount },
    /// 重试次数耗尽，负载原样进入错误队列
    Park { attempts: RetryCount },
}

impl RetryDecision {
    fn label(&self) -> &'static str {
        match self {
            RetryDecision::Retry { .. } => "retry",
            RetryDecision::Park { .. } => "park",
        }
    }
}

/// 单条重试消息的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    Retried { retry_count: RetryCount },
    Parked { retry_count: RetryCount },
}

/// 重试协调器：消费重试队列，是重试次数唯一的递增点
pub struct RetryCoordinator {
    message_queue: Arc<dyn MessageQueue>,
    topology: Topology,
    policy: RetryPolicy,
    retry_header: String,
    tracker: CorrelationTracker,
    name: String,
}

impl RetryCoordinator {
    pub fn new(
        message_queue: Arc<dyn MessageQueue>,
        topology: Topology,
        pipeline: &PipelineConfig,
    ) -> Self {
        let name = format!("retry-{}", topology.kind);
        Self {
            message_queue,
            topology,
            policy: RetryPolicy::from_config(pipeline),
            retry_header: pipeline.retry_header.clone(),
            tracker: CorrelationTracker::new(pipeline.correlation_header.clone()),
            name,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// 处理一条来自重试队列的消息
    ///
    /// 只有在新消息发布成功后才确认原消息；发布失败时带 requeue 拒绝，
    /// 消息稍后重新投递到这里，不会绕过计数。
    pub async fn on_retry_message(&self, delivery: Delivery) -> Result<RetryOutcome> {
        let kind = self.topology.kind;
        let retry_count = delivery.message.retry_count(&self.retry_header);
        let decision = self.policy.decide(retry_count);

        let (mut outgoing, outcome) = match decision {
            RetryDecision::Retry { next } => {
                let mut outgoing = delivery.message.rerouted(self.topology.key.clone());
                outgoing.set_retry_count(&self.retry_header, next);
                (outgoing, RetryOutcome::Retried { retry_count: next })
            }
            RetryDecision::Park { attempts } => (
                delivery.message.rerouted(self.topology.error_key.clone()),
                RetryOutcome::Parked {
                    retry_count: attempts,
                },
            ),
        };

        // 重新发布的消息不带过期时间，否则会在主队列或错误队列中被死信或丢弃
        outgoing.expiration = None;

        if let Err(e) = self
            .message_queue
            .publish(&self.topology.exchange, &outgoing)
            .await
        {
            warn!(
                retry_count = %retry_count,
                "重新发布到 {} 失败，消息退回重试队列: {}", outgoing.routing_key, e
            );
            counter!(
                "wordcard_retry_decisions_total",
                "kind" => kind.as_str(),
                "decision" => "requeued"
            )
            .increment(1);
            if !self.policy.requeue_delay.is_zero() {
                tokio::time::sleep(self.policy.requeue_delay).await;
            }
            delivery.nack(true).await?;
            return Err(e);
        }

        delivery.ack().await?;

        counter!(
            "wordcard_retry_decisions_total",
            "kind" => kind.as_str(),
            "decision" => decision.label()
        )
        .increment(1);

        match outcome {
            RetryOutcome::Retried { retry_count } => {
                info!(retry_count = %retry_count, "消息重新进入主队列 {}", self.topology.main_queue);
            }
            RetryOutcome::Parked { retry_count } => {
                warn!(
                    retry_count = %retry_count,
                    "重试次数耗尽，消息进入错误队列 {}", self.topology.error_queue
                );
            }
        }
        Ok(outcome)
    }
}

#[async_trait]
impl DeliveryHandler for RetryCoordinator {
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
            queue = %self.topology.retry_queue,
            kind = %self.topology.kind,
            correlation_id = %correlation_id
        );

        async {
            debug!("收到重试消息, redelivered = {}", delivery.redelivered);
            self.on_retry_message(delivery).await.map(|_| ())
        }
        .instrument(span)
        .await
    }
}
