use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tracing::{error, info};
use wordcard_core::{
    config::PipelineConfig,
    models::{CommandKind, TopologyRegistry},
    traits::MessageQueue,
    Result,
};

/// 错误队列（停车场）的人工重放
pub struct ParkingLot {
    message_queue: Arc<dyn MessageQueue>,
    topologies: Arc<TopologyRegistry>,
    retry_header: String,
}

impl ParkingLot {
    pub fn new(
        message_queue: Arc<dyn MessageQueue>,
        topologies: Arc<TopologyRegistry>,
        pipeline: &PipelineConfig,
    ) -> Self {
        Self {
            message_queue,
            topologies,
            retry_header: pipeline.retry_header.clone(),
        }
    }

    /// 错误队列中的消息数量
    pub async fn depth(&self, kind: CommandKind) -> Result<u32> {
        let topology = self.topologies.get(kind)?;
        self.message_queue.get_queue_size(&topology.error_queue).await
    }

    /// 将错误队列中最多 `limit` 条消息送回主路由键，返回重放的数量
    ///
    /// 重放的消息移除重试次数头，重新获得完整的重试预算；负载和关联ID保持不变。
    /// 某条消息发布失败时退回错误队列并停止。
    pub async fn replay(
        &self,
        kind: CommandKind,
        limit: usize,
        expiration: Option<Duration>,
    ) -> Result<usize> {
        let topology = self.topologies.get(kind)?;
        let mut replayed = 0;

        while replayed < limit {
            let Some(delivery) = self.message_queue.fetch(&topology.error_queue).await? else {
                break;
            };

            let mut outgoing = delivery.message.rerouted(topology.key.clone());
            outgoing.remove_header(&self.retry_header);
            if let Some(expiration) = expiration {
                outgoing = outgoing.with_expiration(expiration);
            }

            if let Err(e) = self
                .message_queue
                .publish(&topology.exchange, &outgoing)
                .await
            {
                error!(
                    "重放 {} 的停车场消息失败，已重放 {} 条: {}",
                    kind, replayed, e
                );
                delivery.nack(true).await?;
                return Err(e);
            }

            delivery.ack().await?;
            replayed += 1;
        }

        counter!("wordcard_parking_lot_replayed_total", "kind" => kind.as_str())
            .increment(replayed as u64);
        info!("从 {} 重放了 {} 条消息", topology.error_queue, replayed);
        Ok(replayed)
    }
}
