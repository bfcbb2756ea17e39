//! 经由管道异步执行的保存命令

use serde::{Deserialize, Serialize};
use wordcard_core::{Command, CommandKind, PipelineError, Result};

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(PipelineError::InvalidCommand(format!("{field} 不能为空")));
    }
    Ok(())
}

/// 保存卡片
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveCardCommand {
    pub name1: String,
    pub name2: String,
    /// 卡片所属的卡组ID
    #[serde(rename = "idDeck")]
    pub id_deck: i64,
}

impl SaveCardCommand {
    pub fn new(name1: impl Into<String>, name2: impl Into<String>, id_deck: i64) -> Self {
        Self {
            name1: name1.into(),
            name2: name2.into(),
            id_deck,
        }
    }
}

impl Command for SaveCardCommand {
    const KIND: CommandKind = CommandKind::SaveCard;

    fn validate(&self) -> Result<()> {
        require("name1", &self.name1)?;
        require("name2", &self.name2)
    }
}

/// 卡组中内嵌的卡片
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub name1: String,
    pub name2: String,
    #[serde(default = "default_enable")]
    pub enable: bool,
}

fn default_enable() -> bool {
    true
}

impl CardRecord {
    pub fn new(name1: impl Into<String>, name2: impl Into<String>) -> Self {
        Self {
            id: None,
            name1: name1.into(),
            name2: name2.into(),
            enable: true,
        }
    }
}

/// 保存卡组，可同时携带卡片
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveDeckCommand {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub language: String,
    /// 卡组创建者
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub cards: Vec<CardRecord>,
}

impl SaveDeckCommand {
    pub fn new(name: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            language: language.into(),
            username: None,
            cards: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_card(mut self, card: CardRecord) -> Self {
        self.cards.push(card);
        self
    }
}

impl Command for SaveDeckCommand {
    const KIND: CommandKind = CommandKind::SaveDeck;

    fn validate(&self) -> Result<()> {
        require("name", &self.name)?;
        require("language", &self.language)?;
        for card in &self.cards {
            require("cards.name1", &card.name1)?;
            require("cards.name2", &card.name2)?;
        }
        Ok(())
    }
}
