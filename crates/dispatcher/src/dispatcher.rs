use std::sync::Arc;

use metrics::counter;
use tracing::{debug, error, info};
use wordcard_core::{
    config::PipelineConfig,
    correlation::{CorrelationContext, CorrelationId, CorrelationTracker},
    models::{Message, TopologyRegistry},
    traits::{Command, MessageQueue},
    PipelineError, Result,
};

/// 命令发布器
///
/// 将命令序列化为 JSON，写入关联ID后发布到对应命令类型的主路由键。
/// 发布失败直接返回给调用方，不在这里重试。
pub struct CommandDispatcher {
    message_queue: Arc<dyn MessageQueue>,
    topologies: Arc<TopologyRegistry>,
    tracker: CorrelationTracker,
}

impl CommandDispatcher {
    pub fn new(
        message_queue: Arc<dyn MessageQueue>,
        topologies: Arc<TopologyRegistry>,
        pipeline: &PipelineConfig,
    ) -> Self {
        Self {
            message_queue,
            topologies,
            tracker: CorrelationTracker::new(pipeline.correlation_header.clone()),
        }
    }

    /// 发布命令，返回写入消息的关联ID
    pub async fn publish<C: Command>(
        &self,
        context: &CorrelationContext,
        command: &C,
    ) -> Result<CorrelationId> {
        let kind = C::KIND;
        let topology = self.topologies.get(kind)?;
        command.validate()?;

        let correlation_id = self.tracker.current_or_new(context);
        let mut message = Message::json(topology.key.clone(), command)?;
        message.stamp_correlation_id(self.tracker.header_name(), &correlation_id);

        if let Err(e) = self.message_queue.publish(&topology.exchange, &message).await {
            error!(
                kind = %kind,
                correlation_id = %correlation_id,
                "发布命令失败: {}", e
            );
            counter!("wordcard_commands_publish_failures_total", "kind" => kind.as_str())
                .increment(1);
            return Err(match e {
                PipelineError::Publish(_) => e,
                other => PipelineError::Publish(other.to_string()),
            });
        }

        counter!("wordcard_commands_published_total", "kind" => kind.as_str()).increment(1);
        debug!(
            "命令已发布到 {}/{}",
            topology.exchange, topology.key
        );
        info!(kind = %kind, correlation_id = %correlation_id, "命令已受理");
        Ok(correlation_id)
    }
}
