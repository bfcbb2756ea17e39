//! 异步测试的等待和检查工具

use std::time::Duration;

use tokio::time::sleep;
use wordcard_core::{models::Message, traits::MessageQueue};
use wordcard_infrastructure::InMemoryMessageQueue;

pub struct TestEnv;

impl TestEnv {
    /// 轮询条件直到成立或超时
    pub async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let start = std::time::Instant::now();

        while start.elapsed() < timeout {
            if condition().await {
                return true;
            }
            sleep(Duration::from_millis(10)).await;
        }

        false
    }

    /// 等待队列中待投递的消息数量达到期望值
    pub async fn wait_for_queue_size(
        broker: &InMemoryMessageQueue,
        queue: &str,
        expected: u32,
        timeout: Duration,
    ) -> bool {
        Self::wait_for(
            || async move { broker.get_queue_size(queue).await.unwrap_or(0) == expected },
            timeout,
        )
        .await
    }

    /// 取出并确认队列中的全部消息
    pub async fn drain(broker: &InMemoryMessageQueue, queue: &str) -> Vec<Message> {
        let mut messages = Vec::new();
        while let Some(delivery) = broker.fetch(queue).await.unwrap() {
            messages.push(delivery.message.clone());
            delivery.ack().await.unwrap();
        }
        messages
    }
}
