use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::models::CommandKind;

/// 单个命令类型的交换机、队列和路由键名称
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KindTopologyConfig {
    pub exchange: String,
    pub queue: String,
    pub retry_queue: String,
    pub error_queue: String,
    pub routing_key: String,
    pub retry_routing_key: String,
    pub error_routing_key: String,
}

impl KindTopologyConfig {
    /// 按命令类型生成默认名称
    pub fn for_kind(kind: CommandKind) -> Self {
        let name = match kind {
            CommandKind::SaveCard => "saveCard",
            CommandKind::SaveDeck => "saveDeck",
        };
        Self {
            exchange: format!("exchange.{name}"),
            queue: format!("queue.{name}"),
            retry_queue: format!("queue.{name}.retry"),
            error_queue: format!("queue.{name}.error"),
            routing_key: format!("routing.{name}"),
            retry_routing_key: format!("routing.{name}.retry"),
            error_routing_key: format!("routing.{name}.error"),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let names = [
            ("exchange", &self.exchange),
            ("queue", &self.queue),
            ("retry_queue", &self.retry_queue),
            ("error_queue", &self.error_queue),
            ("routing_key", &self.routing_key),
            ("retry_routing_key", &self.retry_routing_key),
            ("error_routing_key", &self.error_routing_key),
        ];
        for (field, value) in names {
            if value.trim().is_empty() {
                return Err(anyhow::anyhow!("拓扑配置 {field} 不能为空"));
            }
        }

        let queues: HashSet<&String> = [&self.queue, &self.retry_queue, &self.error_queue]
            .into_iter()
            .collect();
        if queues.len() != 3 {
            return Err(anyhow::anyhow!("主队列、重试队列和错误队列名称必须互不相同"));
        }

        let keys: HashSet<&String> = [
            &self.routing_key,
            &self.retry_routing_key,
            &self.error_routing_key,
        ]
        .into_iter()
        .collect();
        if keys.len() != 3 {
            return Err(anyhow::anyhow!("主路由键、重试路由键和错误路由键必须互不相同"));
        }

        Ok(())
    }
}

/// 所有命令类型的拓扑配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TopologyConfig {
    pub save_card: KindTopologyConfig,
    pub save_deck: KindTopologyConfig,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            save_card: KindTopologyConfig::for_kind(CommandKind::SaveCard),
            save_deck: KindTopologyConfig::for_kind(CommandKind::SaveDeck),
        }
    }
}

impl TopologyConfig {
    pub fn for_kind(&self, kind: CommandKind) -> &KindTopologyConfig {
        match kind {
            CommandKind::SaveCard => &self.save_card,
            CommandKind::SaveDeck => &self.save_deck,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        for kind in CommandKind::ALL {
            self.for_kind(kind)
                .validate()
                .map_err(|e| anyhow::anyhow!("{kind}: {e}"))?;
        }

        let card_queues = [
            &self.save_card.queue,
            &self.save_card.retry_queue,
            &self.save_card.error_queue,
        ];
        let deck_queues = [
            &self.save_deck.queue,
            &self.save_deck.retry_queue,
            &self.save_deck.error_queue,
        ];
        if card_queues.iter().any(|queue| deck_queues.contains(queue)) {
            return Err(anyhow::anyhow!("不同命令类型不能共用队列"));
        }

        Ok(())
    }
}
