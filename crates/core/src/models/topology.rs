use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::models::{KindTopologyConfig, TopologyConfig};
use crate::{PipelineError, Result};

/// 死信交换机参数名
pub const ARG_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";
/// 死信路由键参数名
pub const ARG_DEAD_LETTER_ROUTING_KEY: &str = "x-dead-letter-routing-key";

/// 命令类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    SaveCard,
    SaveDeck,
}

impl CommandKind {
    pub const ALL: [CommandKind; 2] = [CommandKind::SaveCard, CommandKind::SaveDeck];

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::SaveCard => "save_card",
            CommandKind::SaveDeck => "save_deck",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "save_card" => Ok(CommandKind::SaveCard),
            "save_deck" => Ok(CommandKind::SaveDeck),
            other => Err(PipelineError::Configuration(format!("未知的命令类型: {other}"))),
        }
    }
}

/// 队列声明参数
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueArguments {
    pub dead_letter_exchange: Option<String>,
    pub dead_letter_routing_key: Option<String>,
}

impl QueueArguments {
    pub fn dead_letter_to(exchange: &str, routing_key: &str) -> Self {
        Self {
            dead_letter_exchange: Some(exchange.to_string()),
            dead_letter_routing_key: Some(routing_key.to_string()),
        }
    }

    /// 与已存在队列的参数比较，返回不一致的描述
    pub fn mismatch(&self, existing: &QueueArguments) -> Option<String> {
        if self.dead_letter_exchange != existing.dead_letter_exchange {
            return Some(format!(
                "{ARG_DEAD_LETTER_EXCHANGE} 不一致: 期望 {:?}, 实际 {:?}",
                self.dead_letter_exchange, existing.dead_letter_exchange
            ));
        }
        if self.dead_letter_routing_key != existing.dead_letter_routing_key {
            return Some(format!(
                "{ARG_DEAD_LETTER_ROUTING_KEY} 不一致: 期望 {:?}, 实际 {:?}",
                self.dead_letter_routing_key, existing.dead_letter_routing_key
            ));
        }
        None
    }
}

/// 单个队列的声明
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueDeclaration {
    pub name: String,
    pub routing_key: String,
    pub durable: bool,
    pub arguments: QueueArguments,
}

/// 单个命令类型的静态拓扑：一个交换机、三个队列、三个路由键
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub kind: CommandKind,
    pub exchange: String,
    pub main_queue: String,
    pub retry_queue: String,
    pub error_queue: String,
    pub key: String,
    pub retry_key: String,
    pub error_key: String,
}

impl Topology {
    pub fn from_config(kind: CommandKind, config: &KindTopologyConfig) -> Self {
        Self {
            kind,
            exchange: config.exchange.clone(),
            main_queue: config.queue.clone(),
            retry_queue: config.retry_queue.clone(),
            error_queue: config.error_queue.clone(),
            key: config.routing_key.clone(),
            retry_key: config.retry_routing_key.clone(),
            error_key: config.error_routing_key.clone(),
        }
    }

    /// 主队列：无法接收的消息死信到重试路由键
    pub fn main_declaration(&self) -> QueueDeclaration {
        QueueDeclaration {
            name: self.main_queue.clone(),
            routing_key: self.key.clone(),
            durable: true,
            arguments: QueueArguments::dead_letter_to(&self.exchange, &self.retry_key),
        }
    }

    /// 重试队列：暂存队列，死信回到主路由键
    pub fn retry_declaration(&self) -> QueueDeclaration {
        QueueDeclaration {
            name: self.retry_queue.clone(),
            routing_key: self.retry_key.clone(),
            durable: true,
            arguments: QueueArguments::dead_letter_to(&self.exchange, &self.key),
        }
    }

    /// 错误队列（停车场）：终点，没有后续路由
    pub fn error_declaration(&self) -> QueueDeclaration {
        QueueDeclaration {
            name: self.error_queue.clone(),
            routing_key: self.error_key.clone(),
            durable: true,
            arguments: QueueArguments::default(),
        }
    }

    pub fn declarations(&self) -> [QueueDeclaration; 3] {
        [
            self.main_declaration(),
            self.retry_declaration(),
            self.error_declaration(),
        ]
    }
}

/// 已声明队列的状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueHandle {
    pub name: String,
    pub message_count: u32,
    pub consumer_count: u32,
}

/// 拓扑声明结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyHandles {
    pub kind: CommandKind,
    pub exchange: String,
    pub main: QueueHandle,
    pub retry: QueueHandle,
    pub error: QueueHandle,
}

/// 所有命令类型的拓扑
#[derive(Debug, Clone)]
pub struct TopologyRegistry {
    topologies: HashMap<CommandKind, Topology>,
}

impl TopologyRegistry {
    pub fn from_config(config: &TopologyConfig) -> Self {
        let topologies = CommandKind::ALL
            .iter()
            .map(|kind| (*kind, Topology::from_config(*kind, config.for_kind(*kind))))
            .collect();
        Self { topologies }
    }

    pub fn get(&self, kind: CommandKind) -> Result<&Topology> {
        self.topologies
            .get(&kind)
            .ok_or_else(|| PipelineError::Configuration(format!("命令类型 {kind} 没有配置拓扑")))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Topology> {
        self.topologies.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card_topology() -> Topology {
        Topology::from_config(CommandKind::SaveCard, &KindTopologyConfig::for_kind(CommandKind::SaveCard))
    }

    #[test]
    fn test_dead_letter_wiring() {
        let topology = card_topology();

        let main = topology.main_declaration();
        assert_eq!(main.arguments.dead_letter_exchange.as_deref(), Some(topology.exchange.as_str()));
        assert_eq!(main.arguments.dead_letter_routing_key.as_deref(), Some(topology.retry_key.as_str()));

        let retry = topology.retry_declaration();
        assert_eq!(retry.arguments.dead_letter_routing_key.as_deref(), Some(topology.key.as_str()));

        let error = topology.error_declaration();
        assert_eq!(error.arguments, QueueArguments::default());

        assert!(topology.declarations().iter().all(|d| d.durable));
    }

    #[test]
    fn test_arguments_mismatch() {
        let expected = QueueArguments::dead_letter_to("ex", "retry");
        assert!(expected.mismatch(&expected.clone()).is_none());
        assert!(expected
            .mismatch(&QueueArguments::dead_letter_to("ex", "main"))
            .unwrap()
            .contains(ARG_DEAD_LETTER_ROUTING_KEY));
        assert!(expected.mismatch(&QueueArguments::default()).is_some());
    }

    #[test]
    fn test_command_kind_parsing() {
        assert_eq!("save_card".parse::<CommandKind>().unwrap(), CommandKind::SaveCard);
        assert_eq!(CommandKind::SaveDeck.to_string(), "save_deck");
        assert!("save_language".parse::<CommandKind>().is_err());
    }

    #[test]
    fn test_registry_lookup() {
        let registry = TopologyRegistry::from_config(&TopologyConfig::default());
        assert_eq!(registry.get(CommandKind::SaveDeck).unwrap().kind, CommandKind::SaveDeck);
        assert_eq!(registry.iter().count(), 2);
    }
}
