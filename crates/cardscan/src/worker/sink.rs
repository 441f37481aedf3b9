use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::WorkerError;
use crate::types::Game;

/// A card ready to be added to the user's collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmedCard {
    pub item_id: String,
    pub card_id: String,
    pub game: Game,
    pub card_name: Option<String>,
    pub set_code: Option<String>,
    pub card_number: Option<String>,
    pub is_foil: bool,
}

/// Receives confirmed cards. Collection storage lives outside this crate.
#[async_trait]
pub trait CollectionSink: Send + Sync {
    async fn add_cards(&self, cards: &[ConfirmedCard]) -> Result<(), WorkerError>;
}

/// Sink that only logs what it receives.
#[derive(Debug, Default)]
pub struct LoggingSink;

#[async_trait]
impl CollectionSink for LoggingSink {
    async fn add_cards(&self, cards: &[ConfirmedCard]) -> Result<(), WorkerError> {
        for card in cards {
            log::info!(
                "Confirmed {} card {} (item {}, foil: {})",
                card.game,
                card.card_id,
                card.item_id,
                card.is_foil
            );
        }
        Ok(())
    }
}
