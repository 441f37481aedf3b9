//! In-memory stand-ins for the identification service, the card catalog
//! and the collection.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use cardscan::identify::CardIdentifier;
use cardscan::worker::{CollectionSink, ConfirmedCard};
use cardscan::{
    CardCatalog, CardQuery, CardRecord, Game, IdentificationCandidate, IdentifyError, Language,
    WorkerError,
};

/// Answers every text with one confident candidate named after it, after
/// `delay`, and records how many calls overlapped.
pub struct CountingIdentifier {
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: AtomicUsize,
}

impl CountingIdentifier {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn answer(&self, name: String) -> Vec<IdentificationCandidate> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        vec![IdentificationCandidate {
            name,
            confidence: 0.9,
            ..Default::default()
        }]
    }
}

#[async_trait]
impl CardIdentifier for CountingIdentifier {
    async fn identify_text(
        &self,
        text: &str,
        _language: Language,
    ) -> Result<Vec<IdentificationCandidate>, IdentifyError> {
        Ok(self.answer(format!("Card {}", text.trim())).await)
    }

    async fn identify_image(
        &self,
        _image: &[u8],
        _mime_type: &str,
        _game: Game,
    ) -> Result<Vec<IdentificationCandidate>, IdentifyError> {
        Ok(self.answer("Card from image".to_string()).await)
    }
}

/// Catalog over a fixed card list.
#[derive(Default)]
pub struct MemoryCatalog {
    pub cards: Vec<CardRecord>,
}

impl MemoryCatalog {
    pub fn new(cards: Vec<CardRecord>) -> Self {
        Self { cards }
    }
}

#[async_trait]
impl CardCatalog for MemoryCatalog {
    async fn get_card(&self, id: &str) -> Result<Option<CardRecord>, IdentifyError> {
        Ok(self.cards.iter().find(|c| c.id == id).cloned())
    }

    async fn search(&self, query: &CardQuery) -> Result<Vec<CardRecord>, IdentifyError> {
        Ok(self
            .cards
            .iter()
            .filter(|c| {
                query
                    .name
                    .as_ref()
                    .map_or(true, |n| c.name.eq_ignore_ascii_case(n))
            })
            .filter(|c| query.set_code.is_none() || c.set_code == query.set_code)
            .filter(|c| query.number.is_none() || c.number == query.number)
            .cloned()
            .collect())
    }
}

/// Collection sink that keeps what it receives.
#[derive(Default)]
pub struct RecordingSink {
    cards: Mutex<Vec<ConfirmedCard>>,
}

impl RecordingSink {
    pub fn cards(&self) -> Vec<ConfirmedCard> {
        self.cards.lock().unwrap().clone()
    }
}

#[async_trait]
impl CollectionSink for RecordingSink {
    async fn add_cards(&self, cards: &[ConfirmedCard]) -> Result<(), WorkerError> {
        self.cards.lock().unwrap().extend_from_slice(cards);
        Ok(())
    }
}
