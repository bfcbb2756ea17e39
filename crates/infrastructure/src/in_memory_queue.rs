use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use wordcard_core::{
    models::{Message, QueueArguments, QueueDeclaration, QueueHandle, Topology, TopologyHandles},
    traits::{Acknowledger, Delivery, DeliveryStream, MessageQueue},
    PipelineError, Result,
};

/// 内存消息代理
///
/// 模拟 RabbitMQ 的 topic 交换机、队列绑定、死信参数、未确认消息重新入队和消息过期，
/// 使整条管道无需真实代理即可运行和测试。
#[derive(Clone, Default)]
pub struct InMemoryMessageQueue {
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<BrokerState>,
}

#[derive(Default)]
struct BrokerState {
    /// 交换机 -> 绑定列表
    exchanges: HashMap<String, Vec<Binding>>,
    queues: HashMap<String, QueueState>,
    /// 消费者标签 -> 队列名
    consumers: HashMap<String, String>,
    outage: bool,
    closed: bool,
    next_tag: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Binding {
    queue: String,
    pattern: String,
}

#[derive(Default)]
struct QueueState {
    arguments: QueueArguments,
    ready: VecDeque<StoredMessage>,
    unacked: HashMap<u64, StoredMessage>,
    notify: Arc<Notify>,
}

#[derive(Clone)]
struct StoredMessage {
    message: Message,
    exchange: String,
    redelivered: bool,
    enqueued_at: Instant,
}

impl StoredMessage {
    fn is_expired(&self) -> bool {
        self.message
            .expiration
            .is_some_and(|ttl| self.enqueued_at.elapsed() >= ttl)
    }
}

/// topic 交换机匹配：`*` 匹配一个单词，`#` 匹配零个或多个单词
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    fn matches(pattern: &[&str], key: &[&str]) -> bool {
        match (pattern.first(), key.first()) {
            (None, None) => true,
            (Some(&"#"), _) => {
                matches(&pattern[1..], key) || (!key.is_empty() && matches(pattern, &key[1..]))
            }
            (Some(&"*"), Some(_)) => matches(&pattern[1..], &key[1..]),
            (Some(word), Some(key_word)) if word == key_word => matches(&pattern[1..], &key[1..]),
            _ => false,
        }
    }

    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    matches(&pattern, &key)
}

impl BrokerState {
    /// 按交换机绑定投递到所有匹配的队列，返回命中的队列数量
    fn route(&mut self, exchange: &str, message: Message, redelivered: bool) -> usize {
        let targets: Vec<String> = self
            .exchanges
            .get(exchange)
            .map(|bindings| {
                let mut targets: Vec<String> = bindings
                    .iter()
                    .filter(|binding| topic_matches(&binding.pattern, &message.routing_key))
                    .map(|binding| binding.queue.clone())
                    .collect();
                targets.dedup();
                targets
            })
            .unwrap_or_default();

        for queue in &targets {
            if let Some(state) = self.queues.get_mut(queue) {
                state.ready.push_back(StoredMessage {
                    message: message.clone(),
                    exchange: exchange.to_string(),
                    redelivered,
                    enqueued_at: Instant::now(),
                });
                state.notify.notify_waiters();
            }
        }

        if targets.is_empty() {
            debug!(
                "消息无法路由，已丢弃: {}/{}",
                exchange, message.routing_key
            );
        }
        targets.len()
    }

    /// 按队列的死信参数转发，没有死信参数时直接丢弃
    fn dead_letter(&mut self, queue: &str, stored: StoredMessage) {
        let Some(arguments) = self.queues.get(queue).map(|state| state.arguments.clone()) else {
            return;
        };
        let Some(exchange) = arguments.dead_letter_exchange else {
            debug!("队列 {} 没有死信交换机，消息已丢弃", queue);
            return;
        };

        let mut message = stored.message;
        if let Some(routing_key) = arguments.dead_letter_routing_key {
            message.routing_key = routing_key;
        }
        // 过期时间只作用于原队列
        message.expiration = None;
        debug!(
            "队列 {} 的消息死信到 {}/{}",
            queue, exchange, message.routing_key
        );
        self.route(&exchange, message, false);
    }

    /// 取出队首消息，过期消息按死信规则处理
    fn pop(&mut self, queue: &str) -> Result<Option<(u64, StoredMessage)>> {
        loop {
            let state = self
                .queues
                .get_mut(queue)
                .ok_or_else(|| PipelineError::Broker(format!("队列 {queue} 不存在 (NOT_FOUND)")))?;

            let Some(stored) = state.ready.pop_front() else {
                return Ok(None);
            };

            if stored.is_expired() {
                self.dead_letter(queue, stored);
                continue;
            }

            self.next_tag += 1;
            let tag = self.next_tag;
            if let Some(state) = self.queues.get_mut(queue) {
                state.unacked.insert(tag, stored.clone());
            }
            return Ok(Some((tag, stored)));
        }
    }

    fn settle(&mut self, queue: &str, tag: u64, outcome: Settlement) {
        let Some(stored) = self
            .queues
            .get_mut(queue)
            .and_then(|state| state.unacked.remove(&tag))
        else {
            return;
        };

        match outcome {
            Settlement::Ack => {}
            Settlement::Requeue => {
                if let Some(state) = self.queues.get_mut(queue) {
                    state.ready.push_front(StoredMessage {
                        redelivered: true,
                        ..stored
                    });
                    state.notify.notify_waiters();
                }
            }
            Settlement::DeadLetter => self.dead_letter(queue, stored),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Settlement {
    Ack,
    Requeue,
    DeadLetter,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct InMemoryAcknowledger {
    shared: Arc<Shared>,
    queue: String,
    tag: u64,
    settled: AtomicBool,
}

impl InMemoryAcknowledger {
    fn settle(&self, outcome: Settlement) -> Result<()> {
        if self.settled.swap(true, Ordering::SeqCst) {
            return Err(PipelineError::Broker(format!(
                "消息 {} 已经被确认过 (PRECONDITION_FAILED)",
                self.tag
            )));
        }
        self.shared.state().settle(&self.queue, self.tag, outcome);
        Ok(())
    }
}

#[async_trait]
impl Acknowledger for InMemoryAcknowledger {
    async fn ack(&self) -> Result<()> {
        self.settle(Settlement::Ack)
    }

    async fn nack(&self, requeue: bool) -> Result<()> {
        if requeue {
            self.settle(Settlement::Requeue)
        } else {
            self.settle(Settlement::DeadLetter)
        }
    }
}

impl Drop for InMemoryAcknowledger {
    // 未确认的投递被丢弃时等同于通道关闭，重新入队
    fn drop(&mut self) {
        if !self.settled.swap(true, Ordering::SeqCst) {
            self.shared
                .state()
                .settle(&self.queue, self.tag, Settlement::Requeue);
        }
    }
}

impl InMemoryMessageQueue {
    /// 创建新的内存消息代理
    pub fn new() -> Self {
        Self::default()
    }

    /// 模拟代理拒绝发布：恢复之前所有发布都失败，已有的投递和确认不受影响
    pub fn simulate_outage(&self, outage: bool) {
        if outage {
            warn!("内存消息代理进入不可用状态");
        } else {
            info!("内存消息代理恢复可用");
        }
        self.shared.state().outage = outage;
    }

    /// 查看队列中待投递的消息，不改变队列状态
    pub fn peek_messages(&self, queue: &str) -> Vec<Message> {
        self.shared
            .state()
            .queues
            .get(queue)
            .map(|state| state.ready.iter().map(|stored| stored.message.clone()).collect())
            .unwrap_or_default()
    }

    /// 已投递但尚未确认的消息数量
    pub fn unacked_count(&self, queue: &str) -> usize {
        self.shared
            .state()
            .queues
            .get(queue)
            .map(|state| state.unacked.len())
            .unwrap_or(0)
    }

    fn delivery(&self, queue: &str, tag: u64, stored: StoredMessage) -> Delivery {
        debug!(
            "从队列 {} 投递消息 (来源交换机 {})",
            queue, stored.exchange
        );
        Delivery::new(
            stored.message,
            stored.redelivered,
            Box::new(InMemoryAcknowledger {
                shared: self.shared.clone(),
                queue: queue.to_string(),
                tag,
                settled: AtomicBool::new(false),
            }),
        )
    }

    fn declare_queue(
        state: &mut BrokerState,
        exchange: &str,
        declaration: &QueueDeclaration,
    ) -> Result<QueueHandle> {
        match state.queues.get(&declaration.name) {
            Some(existing) => {
                if let Some(reason) = declaration.arguments.mismatch(&existing.arguments) {
                    return Err(PipelineError::TopologyConflict {
                        queue: declaration.name.clone(),
                        reason,
                    });
                }
            }
            None => {
                state.queues.insert(
                    declaration.name.clone(),
                    QueueState {
                        arguments: declaration.arguments.clone(),
                        ..Default::default()
                    },
                );
            }
        }

        let binding = Binding {
            queue: declaration.name.clone(),
            pattern: declaration.routing_key.clone(),
        };
        let bindings = state.exchanges.entry(exchange.to_string()).or_default();
        if !bindings.contains(&binding) {
            bindings.push(binding);
        }

        let consumer_count = state
            .consumers
            .values()
            .filter(|queue| **queue == declaration.name)
            .count() as u32;
        let message_count = state
            .queues
            .get(&declaration.name)
            .map(|queue| queue.ready.len() as u32)
            .unwrap_or(0);

        Ok(QueueHandle {
            name: declaration.name.clone(),
            message_count,
            consumer_count,
        })
    }
}

#[async_trait]
impl MessageQueue for InMemoryMessageQueue {
    async fn declare_topology(&self, topology: &Topology) -> Result<TopologyHandles> {
        let mut state = self.shared.state();
        if state.closed {
            return Err(PipelineError::Broker("内存消息代理已关闭".to_string()));
        }

        // 先检查全部队列，冲突时不留下部分声明
        for declaration in topology.declarations() {
            if let Some(existing) = state.queues.get(&declaration.name) {
                if let Some(reason) = declaration.arguments.mismatch(&existing.arguments) {
                    return Err(PipelineError::TopologyConflict {
                        queue: declaration.name,
                        reason,
                    });
                }
            }
        }

        state.exchanges.entry(topology.exchange.clone()).or_default();
        let [main, retry, error] = topology.declarations();
        let handles = TopologyHandles {
            kind: topology.kind,
            exchange: topology.exchange.clone(),
            main: Self::declare_queue(&mut state, &topology.exchange, &main)?,
            retry: Self::declare_queue(&mut state, &topology.exchange, &retry)?,
            error: Self::declare_queue(&mut state, &topology.exchange, &error)?,
        };

        info!("命令类型 {} 的拓扑声明完成 (内存代理)", topology.kind);
        Ok(handles)
    }

    async fn publish(&self, exchange: &str, message: &Message) -> Result<()> {
        let mut state = self.shared.state();
        if state.closed {
            return Err(PipelineError::Publish("内存消息代理已关闭".to_string()));
        }
        if state.outage {
            return Err(PipelineError::Publish(format!(
                "消息代理不可用，发布到 {exchange}/{} 失败",
                message.routing_key
            )));
        }
        if !state.exchanges.contains_key(exchange) {
            return Err(PipelineError::Publish(format!(
                "交换机 {exchange} 不存在 (NOT_FOUND)"
            )));
        }

        state.route(exchange, message.clone(), false);
        debug!("消息已发布到 {}/{}", exchange, message.routing_key);
        Ok(())
    }

    async fn subscribe(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream> {
        let notify = {
            let mut state = self.shared.state();
            if state.closed {
                return Err(PipelineError::Broker("内存消息代理已关闭".to_string()));
            }
            let notify = state
                .queues
                .get(queue)
                .map(|state| state.notify.clone())
                .ok_or_else(|| PipelineError::Broker(format!("队列 {queue} 不存在 (NOT_FOUND)")))?;
            if state.consumers.contains_key(consumer_tag) {
                return Err(PipelineError::Broker(format!(
                    "消费者标签 {consumer_tag} 已被使用"
                )));
            }
            state
                .consumers
                .insert(consumer_tag.to_string(), queue.to_string());
            notify
        };

        debug!("为队列 {} 创建消费者: {}", queue, consumer_tag);

        let broker = self.clone();
        let queue = queue.to_string();
        let consumer_tag = consumer_tag.to_string();
        let stream = futures::stream::unfold((), move |()| {
            let broker = broker.clone();
            let queue = queue.clone();
            let consumer_tag = consumer_tag.clone();
            let notify = notify.clone();
            async move {
                loop {
                    let notified = notify.notified();
                    tokio::pin!(notified);
                    notified.as_mut().enable();

                    let popped = {
                        let mut state = broker.shared.state();
                        if state.closed || !state.consumers.contains_key(&consumer_tag) {
                            return None;
                        }
                        state.pop(&queue)
                    };

                    match popped {
                        Ok(Some((tag, stored))) => {
                            // 让出执行权，避免立即重新入队的消息形成忙循环
                            tokio::task::yield_now().await;
                            return Some((Ok(broker.delivery(&queue, tag, stored)), ()));
                        }
                        Ok(None) => notified.await,
                        Err(e) => return Some((Err(e), ())),
                    }
                }
            }
        });

        Ok(stream.boxed())
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<()> {
        let mut state = self.shared.state();
        if let Some(queue) = state.consumers.remove(consumer_tag) {
            if let Some(queue_state) = state.queues.get(&queue) {
                queue_state.notify.notify_waiters();
            }
            debug!("消费者 {} 已取消", consumer_tag);
        }
        Ok(())
    }

    async fn fetch(&self, queue: &str) -> Result<Option<Delivery>> {
        let popped = {
            let mut state = self.shared.state();
            if state.closed {
                return Err(PipelineError::Broker(format!(
                    "内存消息代理已关闭，无法从队列 {queue} 获取消息"
                )));
            }
            state.pop(queue)?
        };

        Ok(popped.map(|(tag, stored)| self.delivery(queue, tag, stored)))
    }

    async fn get_queue_size(&self, queue: &str) -> Result<u32> {
        let state = self.shared.state();
        Ok(state
            .queues
            .get(queue)
            .map(|queue| queue.ready.len() as u32)
            .unwrap_or(0))
    }

    fn is_connected(&self) -> bool {
        !self.shared.state().closed
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.shared.state();
        state.closed = true;
        state.consumers.clear();
        for queue in state.queues.values() {
            queue.notify.notify_waiters();
        }
        info!("内存消息代理已关闭");
        Ok(())
    }
}
