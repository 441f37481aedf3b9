use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::item_repo::ItemRow;
use crate::db::job_repo::JobRow;
use crate::db::parse_timestamp;
use crate::error::ErrorCode;
use crate::extract::ExtractedFields;
use crate::types::{Game, IdentificationCandidate, ImageHints, Language};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub const ACTIVE: [&'static str; 2] = ["pending", "processing"];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Processing)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Item lifecycle. Transitions only move forward; nothing returns to
/// pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Pending,
    Processing,
    Identified,
    Failed,
    Skipped,
    Confirmed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Processing => "processing",
            ItemStatus::Identified => "identified",
            ItemStatus::Failed => "failed",
            ItemStatus::Skipped => "skipped",
            ItemStatus::Confirmed => "confirmed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ItemStatus::Pending),
            "processing" => Some(ItemStatus::Processing),
            "identified" => Some(ItemStatus::Identified),
            "failed" => Some(ItemStatus::Failed),
            "skipped" => Some(ItemStatus::Skipped),
            "confirmed" => Some(ItemStatus::Confirmed),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, next: ItemStatus) -> bool {
        use ItemStatus::*;
        matches!(
            (self, next),
            (Pending, Processing | Skipped | Failed)
                | (Processing, Identified | Failed | Skipped)
                | (Failed, Identified | Skipped)
                | (Identified, Identified | Confirmed)
        )
    }

    /// Statuses that may move to `next`.
    pub fn sources_of(next: ItemStatus) -> Vec<&'static str> {
        [
            ItemStatus::Pending,
            ItemStatus::Processing,
            ItemStatus::Identified,
            ItemStatus::Failed,
            ItemStatus::Skipped,
            ItemStatus::Confirmed,
        ]
        .into_iter()
        .filter(|from| from.can_transition_to(next))
        .map(|from| from.as_str())
        .collect()
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportJob {
    pub id: String,
    pub status: JobStatus,
    pub game: Game,
    pub language: Language,
    pub item_count: u32,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<JobRow> for ImportJob {
    fn from(row: JobRow) -> Self {
        Self {
            status: JobStatus::parse(&row.status).unwrap_or(JobStatus::Failed),
            game: Game::parse(&row.game).unwrap_or(Game::Pokemon),
            language: Language::from_code(&row.language),
            item_count: row.item_count.max(0) as u32,
            error: row.error,
            created_at: timestamp(&row.created_at),
            updated_at: timestamp(&row.updated_at),
            completed_at: row.completed_at.as_deref().and_then(parse_timestamp),
            id: row.id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportItem {
    pub id: String,
    pub job_id: String,
    pub position: u32,
    pub game: Game,
    pub language: Language,
    pub image_path: Option<String>,
    pub ocr_text: Option<String>,
    pub status: ItemStatus,
    pub error_code: Option<ErrorCode>,
    pub error_message: Option<String>,
    pub card_name: Option<String>,
    pub card_number: Option<String>,
    pub set_code: Option<String>,
    pub set_name: Option<String>,
    pub card_id: Option<String>,
    pub is_foil: bool,
    pub confidence: Option<f64>,
    pub source: Option<String>,
    pub candidates: Vec<IdentificationCandidate>,
    pub extracted_fields: Option<ExtractedFields>,
    pub image_hints: Option<ImageHints>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ItemRow> for ImportItem {
    fn from(row: ItemRow) -> Self {
        Self {
            job_id: row.job_id,
            position: row.position.max(0) as u32,
            game: Game::parse(&row.game).unwrap_or(Game::Pokemon),
            language: Language::from_code(&row.language),
            image_path: row.image_path,
            ocr_text: row.ocr_text,
            status: ItemStatus::parse(&row.status).unwrap_or(ItemStatus::Failed),
            error_code: row.error_code.as_deref().and_then(ErrorCode::parse),
            error_message: row.error_message,
            card_name: row.card_name,
            card_number: row.card_number,
            set_code: row.set_code,
            set_name: row.set_name,
            card_id: row.card_id,
            is_foil: row.is_foil,
            confidence: row.confidence,
            source: row.source,
            candidates: decode_json(&row.id, "candidates", row.candidates.as_deref())
                .unwrap_or_default(),
            extracted_fields: decode_json(&row.id, "extracted_fields", row.extracted_fields.as_deref()),
            image_hints: decode_json(&row.id, "image_hints", row.image_hints.as_deref()),
            created_at: timestamp(&row.created_at),
            updated_at: timestamp(&row.updated_at),
            id: row.id,
        }
    }
}

/// Decodes an optional JSON column. An unreadable value is logged and
/// treated as absent.
fn decode_json<T: serde::de::DeserializeOwned>(
    item_id: &str,
    column: &str,
    raw: Option<&str>,
) -> Option<T> {
    let raw = raw?;
    serde_json::from_str(raw)
        .map_err(|e| log::warn!("Item {} has unreadable {}: {}", item_id, column, e))
        .ok()
}

fn timestamp(raw: &str) -> DateTime<Utc> {
    parse_timestamp(raw).unwrap_or_default()
}

/// A job with its items in submission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDetail {
    pub job: ImportJob,
    pub items: Vec<ImportItem>,
}

/// A user's choice of identity for an item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemSelection {
    pub card_id: String,
    pub card_name: Option<String>,
    pub card_number: Option<String>,
    pub set_code: Option<String>,
    pub set_name: Option<String>,
    #[serde(default)]
    pub is_foil: bool,
}

/// Outcome of confirming items.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmOutcome {
    pub confirmed: Vec<String>,
    /// Items that were not identified (or had no card id) and were left alone.
    pub skipped: Vec<String>,
}
