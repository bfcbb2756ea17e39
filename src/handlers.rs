//! 演示用的领域处理器
//!
//! 卡组和卡片保存在进程内存中。保存操作是幂等的：卡组按名称和所有者去重，
//! 卡片按两个词和所属卡组去重。卡组不存在时保存卡片会失败，从而走重试流程。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};
use wordcard_core::{CommandHandler, PipelineError, Result};
use wordcard_domain::{CardRecord, SaveCardCommand, SaveDeckCommand};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDeck {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub language: String,
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCard {
    pub id: i64,
    pub name1: String,
    pub name2: String,
    pub id_deck: i64,
    pub enable: bool,
}

#[derive(Default)]
struct StoreState {
    decks: Vec<StoredDeck>,
    cards: Vec<StoredCard>,
    next_deck_id: i64,
    next_card_id: i64,
}

impl StoreState {
    fn upsert_card(&mut self, name1: &str, name2: &str, id_deck: i64, enable: bool) -> i64 {
        if let Some(card) = self
            .cards
            .iter_mut()
            .find(|c| c.id_deck == id_deck && c.name1 == name1 && c.name2 == name2)
        {
            card.enable = enable;
            return card.id;
        }

        self.next_card_id += 1;
        let id = self.next_card_id;
        self.cards.push(StoredCard {
            id,
            name1: name1.to_string(),
            name2: name2.to_string(),
            id_deck,
            enable,
        });
        id
    }
}

/// 内存中的卡组存储
#[derive(Clone, Default)]
pub struct DeckStore {
    state: Arc<RwLock<StoreState>>,
}

impl DeckStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 保存卡组及其卡片，返回卡组ID
    pub async fn save_deck(&self, command: &SaveDeckCommand) -> i64 {
        let mut state = self.state.write().await;

        let existing = state
            .decks
            .iter_mut()
            .find(|d| d.name == command.name && d.username == command.username);
        let deck_id = match existing {
            Some(deck) => {
                deck.description = command.description.clone();
                deck.language = command.language.clone();
                deck.id
            }
            None => {
                state.next_deck_id += 1;
                let id = state.next_deck_id;
                state.decks.push(StoredDeck {
                    id,
                    name: command.name.clone(),
                    description: command.description.clone(),
                    language: command.language.clone(),
                    username: command.username.clone(),
                });
                id
            }
        };

        for CardRecord {
            name1,
            name2,
            enable,
            ..
        } in &command.cards
        {
            state.upsert_card(name1, name2, deck_id, *enable);
        }

        deck_id
    }

    /// 保存单张卡片，卡组不存在时返回错误
    pub async fn save_card(&self, command: &SaveCardCommand) -> Result<i64> {
        let mut state = self.state.write().await;
        if !state.decks.iter().any(|d| d.id == command.id_deck) {
            return Err(PipelineError::Handler(format!(
                "卡组不存在: {}",
                command.id_deck
            )));
        }
        Ok(state.upsert_card(&command.name1, &command.name2, command.id_deck, true))
    }

    pub async fn decks(&self) -> Vec<StoredDeck> {
        self.state.read().await.decks.clone()
    }

    pub async fn cards_of(&self, id_deck: i64) -> Vec<StoredCard> {
        self.state
            .read()
            .await
            .cards
            .iter()
            .filter(|c| c.id_deck == id_deck)
            .cloned()
            .collect()
    }
}

pub struct SaveDeckHandler {
    store: DeckStore,
}

impl SaveDeckHandler {
    pub fn new(store: DeckStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CommandHandler<SaveDeckCommand> for SaveDeckHandler {
    async fn execute(&self, command: SaveDeckCommand) -> Result<()> {
        let deck_id = self.store.save_deck(&command).await;
        info!(
            deck_id,
            cards = command.cards.len(),
            "卡组 {} 已保存",
            command.name
        );
        Ok(())
    }
}

pub struct SaveCardHandler {
    store: DeckStore,
}

impl SaveCardHandler {
    pub fn new(store: DeckStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CommandHandler<SaveCardCommand> for SaveCardHandler {
    async fn execute(&self, command: SaveCardCommand) -> Result<()> {
        let card_id = self.store.save_card(&command).await?;
        debug!(card_id, id_deck = command.id_deck, "卡片已保存");
        Ok(())
    }
}

/// 两种命令的处理器集合
#[derive(Clone)]
pub struct CommandHandlers {
    pub save_card: Arc<dyn CommandHandler<SaveCardCommand>>,
    pub save_deck: Arc<dyn CommandHandler<SaveDeckCommand>>,
}

impl CommandHandlers {
    pub fn new(
        save_card: Arc<dyn CommandHandler<SaveCardCommand>>,
        save_deck: Arc<dyn CommandHandler<SaveDeckCommand>>,
    ) -> Self {
        Self {
            save_card,
            save_deck,
        }
    }

    /// 基于内存存储的演示处理器
    pub fn in_memory(store: DeckStore) -> Self {
        Self::new(
            Arc::new(SaveCardHandler::new(store.clone())),
            Arc::new(SaveDeckHandler::new(store)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deck() -> SaveDeckCommand {
        SaveDeckCommand::new("Animals", "es")
            .with_username("jsacristan")
            .with_card(CardRecord::new("cat", "gato"))
    }

    #[tokio::test]
    async fn test_save_deck_is_idempotent() {
        let store = DeckStore::new();
        let first = store.save_deck(&deck()).await;
        let second = store.save_deck(&deck()).await;

        assert_eq!(first, second);
        assert_eq!(store.decks().await.len(), 1);
        assert_eq!(store.cards_of(first).await.len(), 1);
    }

    #[tokio::test]
    async fn test_save_card_requires_deck() {
        let store = DeckStore::new();
        let handler = SaveCardHandler::new(store.clone());

        let result = handler.execute(SaveCardCommand::new("dog", "perro", 1)).await;
        assert!(matches!(result, Err(PipelineError::Handler(_))));

        let deck_id = store.save_deck(&deck()).await;
        handler
            .execute(SaveCardCommand::new("dog", "perro", deck_id))
            .await
            .unwrap();
        handler
            .execute(SaveCardCommand::new("dog", "perro", deck_id))
            .await
            .unwrap();
        assert_eq!(store.cards_of(deck_id).await.len(), 2);
    }
}
