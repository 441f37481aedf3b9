//! Batch identification of pending import items.
//!
//! One pass of [`JobProcessor::process_pending`]:
//!
//! 1. Acquire the processor lease (released by a drop guard on every path)
//! 2. Fail items left in `processing` by a crashed or cancelled pass
//! 3. Take the oldest active job and mark it processing
//! 4. Identify its pending items with at most `concurrency` in flight, each
//!    bounded by the per-item timeout
//! 5. Complete the job once nothing is pending or processing
//!
//! Per item the work is: read the image, extract fields, try a direct
//! catalog match, run the resolver, then enrich the best guess from the
//! catalog, using visual comparison when the guess is weak and several
//! catalog cards share its name.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::job::{ImportItem, JobStatus};
use super::service::delete_images;
use super::PROCESSOR_LEASE;
use crate::catalog::CardCatalog;
use crate::config::Config;
use crate::db::item_repo::{self, ItemFields};
use crate::db::{format_timestamp, job_repo, lease_repo, Database};
use crate::error::{ErrorCode, Result};
use crate::extract::{ExtractedFields, FieldExtractor};
use crate::identify::{IdentificationResolver, VisualMatcher};
use crate::storage::ImageStore;
use crate::types::{
    CardQuery, CardRecord, Game, IdentificationCandidate, Resolution, ResolutionSource,
};

/// Catalog results considered when enriching a guess.
const ENRICH_LIMIT: u32 = 10;

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub concurrency: usize,
    pub item_timeout: Duration,
    pub stale_after: chrono::Duration,
    pub lease_ttl: chrono::Duration,
    pub retention: chrono::Duration,
    /// Best guesses below this confidence are checked visually.
    pub weak_confidence: f64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            item_timeout: Duration::from_secs(60),
            stale_after: chrono::Duration::seconds(300),
            lease_ttl: chrono::Duration::seconds(600),
            retention: chrono::Duration::hours(24),
            weak_confidence: 0.8,
        }
    }
}

impl From<&Config> for ProcessorConfig {
    fn from(config: &Config) -> Self {
        Self {
            concurrency: config.worker.concurrency,
            item_timeout: config.worker.item_timeout(),
            stale_after: config.worker.stale_after(),
            lease_ttl: config.worker.lease_ttl(),
            retention: config.worker.retention(),
            weak_confidence: config.visual.weak_confidence,
        }
    }
}

/// What one `process_pending` pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSummary {
    /// False when another processor held the lease and nothing was done.
    pub lease_acquired: bool,
    pub job_id: Option<String>,
    pub reclaimed: usize,
    pub identified: usize,
    pub failed: usize,
    pub job_completed: bool,
    /// The pass stopped early because shutdown was requested.
    pub cancelled: bool,
}

/// What one `cleanup_expired` pass removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupSummary {
    pub jobs_deleted: usize,
    pub images_deleted: usize,
    pub cache_entries_purged: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemOutcome {
    Identified,
    Failed,
    /// Claimed by someone else or gone before it could be written.
    Untouched,
}

/// Why an item could not be identified. `partial` keeps whatever was
/// learned so the item can be resolved by hand.
struct ItemFailure {
    code: ErrorCode,
    message: String,
    partial: Option<ItemFields>,
}

impl ItemFailure {
    fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            partial: None,
        }
    }
}

/// Releases the lease when dropped, including on early returns and
/// cancellation.
struct LeaseGuard {
    db: Database,
    owner: String,
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if let Err(e) = lease_repo::release(&self.db, PROCESSOR_LEASE, &self.owner) {
            log::error!("Failed to release processor lease: {}", e);
        }
    }
}

pub struct JobProcessor {
    db: Database,
    images: Arc<dyn ImageStore>,
    resolver: Arc<IdentificationResolver>,
    extractor: FieldExtractor,
    catalog: Option<Arc<dyn CardCatalog>>,
    visual: Option<Arc<VisualMatcher>>,
    config: ProcessorConfig,
    name: String,
    cancel: CancellationToken,
}

impl JobProcessor {
    pub fn new(
        db: Database,
        images: Arc<dyn ImageStore>,
        resolver: Arc<IdentificationResolver>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            db,
            images,
            resolver,
            extractor: FieldExtractor::new(),
            catalog: None,
            visual: None,
            config,
            name: format!("processor-{}", uuid::Uuid::new_v4()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn CardCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn with_visual(mut self, visual: Arc<VisualMatcher>) -> Self {
        self.visual = Some(visual);
        self
    }

    /// Stops in-flight passes when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn has_catalog(&self) -> bool {
        self.catalog.is_some()
    }

    pub fn has_visual(&self) -> bool {
        self.visual.is_some()
    }

    /// Runs one pass over the oldest active job.
    ///
    /// Every pass takes the lease under its own owner id, so overlapping
    /// passes exclude each other even within one processor.
    pub async fn process_pending(&self) -> Result<ProcessSummary> {
        let mut summary = ProcessSummary::default();
        if self.cancel.is_cancelled() {
            summary.cancelled = true;
            return Ok(summary);
        }
        let owner = format!("{}/{}", self.name, uuid::Uuid::new_v4());
        let now = Utc::now();
        let acquired = lease_repo::try_acquire(
            &self.db,
            PROCESSOR_LEASE,
            &owner,
            &format_timestamp(now),
            &format_timestamp(now + self.config.lease_ttl),
        )?;
        if !acquired {
            log::debug!("Processor lease is held elsewhere, skipping pass");
            return Ok(summary);
        }
        let _lease = LeaseGuard {
            db: self.db.clone(),
            owner: owner.clone(),
        };
        summary.lease_acquired = true;

        summary.reclaimed = item_repo::reclaim_stale(
            &self.db,
            &format_timestamp(now - self.config.stale_after),
            &format_timestamp(now),
        )?;
        if summary.reclaimed > 0 {
            log::warn!("Failed {} items abandoned in processing", summary.reclaimed);
        }

        let Some(job) = job_repo::find_active(&self.db)? else {
            return Ok(summary);
        };
        summary.job_id = Some(job.id.clone());
        if job.status == JobStatus::Pending.as_str() {
            job_repo::update_status(
                &self.db,
                &job.id,
                JobStatus::Processing.as_str(),
                &format_timestamp(Utc::now()),
            )?;
        }
        lease_repo::set_job(&self.db, PROCESSOR_LEASE, &owner, Some(&job.id))?;

        let pending = item_repo::pending_ids(&self.db, &job.id)?;
        log::info!(
            "Processing job {}: {} pending items, concurrency {}",
            job.id,
            pending.len(),
            self.config.concurrency
        );

        let mut outcomes = stream::iter(pending)
            .map(|item_id| {
                let span = tracing::info_span!("identify_item", job_id = %job.id, item_id = %item_id);
                self.process_item(item_id).instrument(span)
            })
            .buffer_unordered(self.config.concurrency.max(1));

        loop {
            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => {
                    summary.cancelled = true;
                    break;
                }
                next = outcomes.next() => match next {
                    Some(outcome) => outcome,
                    None => break,
                },
            };
            match outcome {
                ItemOutcome::Identified => summary.identified += 1,
                ItemOutcome::Failed => summary.failed += 1,
                ItemOutcome::Untouched => {}
            }
            let expires = format_timestamp(Utc::now() + self.config.lease_ttl);
            if let Err(e) = lease_repo::renew(&self.db, PROCESSOR_LEASE, &owner, &expires) {
                log::warn!("Failed to renew processor lease: {}", e);
            }
        }
        // Dropping the stream abandons whatever was still in flight.
        drop(outcomes);

        if summary.cancelled {
            let abandoned = item_repo::fail_in_flight(
                &self.db,
                &job.id,
                "Identification was cancelled by shutdown",
                &format_timestamp(Utc::now()),
            )?;
            summary.failed += abandoned;
            log::info!(
                "Job {} pass cancelled, {} in-flight items failed",
                job.id,
                abandoned
            );
        }

        summary.job_completed =
            job_repo::complete_if_settled(&self.db, &job.id, &format_timestamp(Utc::now()))?;
        log::info!(
            "Job {} pass finished: {} identified, {} failed{}",
            job.id,
            summary.identified,
            summary.failed,
            if summary.job_completed { ", job completed" } else { "" }
        );
        Ok(summary)
    }

    /// Deletes jobs past the retention window with their images, and
    /// purges expired cache entries. The job a live lease is working on is
    /// left alone.
    pub async fn cleanup_expired(&self) -> Result<CleanupSummary> {
        let now = Utc::now();
        let mut summary = CleanupSummary::default();
        let held_job = lease_repo::find_live(&self.db, PROCESSOR_LEASE, &format_timestamp(now))?
            .and_then(|lease| lease.job_id);

        let expired =
            job_repo::find_created_before(&self.db, &format_timestamp(now - self.config.retention))?;
        for job in expired {
            if held_job.as_deref() == Some(job.id.as_str()) {
                log::debug!("Keeping expired job {} while it is being processed", job.id);
                continue;
            }
            let paths = item_repo::image_paths_for_job(&self.db, &job.id)?;
            if job_repo::delete(&self.db, &job.id)? {
                delete_images(self.images.as_ref(), &paths).await;
                summary.jobs_deleted += 1;
                summary.images_deleted += paths.len();
            }
        }

        summary.cache_entries_purged = self.resolver.cache().purge_expired()?;
        if summary.jobs_deleted > 0 {
            log::info!(
                "Cleanup removed {} jobs and {} images",
                summary.jobs_deleted,
                summary.images_deleted
            );
        }
        Ok(summary)
    }

    async fn process_item(&self, item_id: String) -> ItemOutcome {
        match item_repo::claim(&self.db, &item_id, &format_timestamp(Utc::now())) {
            Ok(true) => {}
            Ok(false) => return ItemOutcome::Untouched,
            Err(e) => {
                log::error!("Failed to claim item {}: {}", item_id, e);
                return ItemOutcome::Untouched;
            }
        }

        let item = match item_repo::find_by_id(&self.db, &item_id) {
            Ok(Some(row)) => ImportItem::from(row),
            Ok(None) => return ItemOutcome::Untouched,
            Err(e) => {
                log::error!("Failed to load item {}: {}", item_id, e);
                return self.write_failure(
                    &item_id,
                    ItemFailure::new(ErrorCode::Internal, e.to_string()),
                );
            }
        };

        match tokio::time::timeout(self.config.item_timeout, self.identify(&item)).await {
            Ok(Ok(fields)) => self.write_identified(&item_id, &fields),
            Ok(Err(failure)) => self.write_failure(&item_id, failure),
            Err(_) => {
                log::warn!(
                    "Item {} timed out after {}s",
                    item_id,
                    self.config.item_timeout.as_secs()
                );
                self.write_failure(
                    &item_id,
                    ItemFailure::new(
                        ErrorCode::Timeout,
                        format!(
                            "Identification took longer than {}s",
                            self.config.item_timeout.as_secs()
                        ),
                    ),
                )
            }
        }
    }

    fn write_identified(&self, item_id: &str, fields: &ItemFields) -> ItemOutcome {
        let now = format_timestamp(Utc::now());
        match item_repo::record_identified(&self.db, item_id, fields, &now) {
            Ok(true) => {
                log::debug!(
                    "Item {} identified as {:?} via {:?}",
                    item_id,
                    fields.card_name,
                    fields.source
                );
                ItemOutcome::Identified
            }
            Ok(false) => {
                log::warn!("Item {} left processing before its result was written", item_id);
                ItemOutcome::Untouched
            }
            Err(e) => {
                log::error!("Failed to write result for item {}: {}", item_id, e);
                ItemOutcome::Untouched
            }
        }
    }

    fn write_failure(&self, item_id: &str, failure: ItemFailure) -> ItemOutcome {
        let now = format_timestamp(Utc::now());
        log::info!("Item {} failed ({}): {}", item_id, failure.code, failure.message);
        match item_repo::record_failed(
            &self.db,
            item_id,
            failure.code.as_str(),
            &failure.message,
            failure.partial.as_ref(),
            &now,
        ) {
            Ok(true) => ItemOutcome::Failed,
            Ok(false) => ItemOutcome::Untouched,
            Err(e) => {
                log::error!("Failed to record failure for item {}: {}", item_id, e);
                ItemOutcome::Untouched
            }
        }
    }

    async fn identify(&self, item: &ImportItem) -> std::result::Result<ItemFields, ItemFailure> {
        let image = match &item.image_path {
            Some(path) => Some(
                self.images
                    .read(path)
                    .await
                    .map_err(|e| ItemFailure::new(e.code(), e.to_string()))?,
            ),
            None => None,
        };
        let text = item.ocr_text.as_deref().filter(|t| !t.trim().is_empty());
        if text.is_none() && image.is_none() {
            return Err(ItemFailure::new(
                ErrorCode::InvalidInput,
                "Item has neither an image nor OCR text",
            ));
        }

        let extracted = self
            .extractor
            .extract(text.unwrap_or_default(), item.game, item.image_hints.as_ref());

        if let Some(card) = self.direct_match(item, &extracted).await {
            log::debug!("Item {} matched catalog card {} directly", item.id, card.id);
            return Ok(fields_from_card(&card, &extracted, extracted.confidence, "catalog", &[]));
        }

        let resolution = match text {
            Some(text) => {
                let prior = (extracted.confidence * 1000.0).round() as u32;
                match self.resolver.resolve(text, item.language, prior).await {
                    Ok(resolution) => Ok(resolution),
                    Err(failure) => match &image {
                        Some(bytes) if self.resolver.has_identifier() => {
                            log::debug!(
                                "Text identification failed for item {} ({}), trying the image",
                                item.id,
                                failure.code
                            );
                            self.resolver
                                .identify_image(bytes, &mime_for(item), item.game)
                                .await
                                .map_err(|image_failure| {
                                    // Keep the text failure's guess when the image gave none.
                                    if image_failure.candidates.is_empty() {
                                        failure
                                    } else {
                                        image_failure
                                    }
                                })
                        }
                        _ => Err(failure),
                    },
                }
            }
            None => {
                let bytes = image.as_deref().unwrap_or_default();
                self.resolver
                    .identify_image(bytes, &mime_for(item), item.game)
                    .await
            }
        };

        let resolution = resolution.map_err(|failure| ItemFailure {
            code: failure.code,
            message: failure.message,
            partial: Some(partial_fields(
                failure.best_guess.as_ref(),
                &failure.candidates,
                &extracted,
            )),
        })?;

        if let Some(card_id) = &resolution.card_id {
            return Ok(self.confirmed_identity(card_id, &resolution, &extracted).await);
        }

        let guess = self
            .best_guess(item.game, &resolution, &extracted)
            .ok_or_else(|| ItemFailure {
            code: ErrorCode::NoMatch,
            message: "No card name could be read from the scan".to_string(),
            partial: Some(partial_fields(None, &resolution.candidates, &extracted)),
        })?;

        Ok(self
            .enrich(item, image.as_deref(), &guess, &resolution, &extracted)
            .await)
    }

    /// Catalog lookup by set code and collector number when extraction
    /// read both. Only a single hit counts.
    async fn direct_match(&self, item: &ImportItem, extracted: &ExtractedFields) -> Option<CardRecord> {
        let catalog = self.catalog.as_ref()?;
        let (set_code, number) = (extracted.set_code.as_ref()?, extracted.card_number.as_ref()?);
        let query = CardQuery {
            game: Some(item.game),
            set_code: Some(set_code.clone()),
            number: Some(number.clone()),
            limit: Some(2),
            ..Default::default()
        };
        match catalog.search(&query).await {
            Ok(mut cards) if cards.len() == 1 => cards.pop(),
            Ok(_) => None,
            Err(e) => {
                log::warn!("Catalog pre-match failed for item {}: {}", item.id, e);
                None
            }
        }
    }

    /// The resolver's best candidate, or one built from the extracted
    /// fields when the chain was skipped or produced only text.
    fn best_guess(
        &self,
        game: Game,
        resolution: &Resolution,
        extracted: &ExtractedFields,
    ) -> Option<IdentificationCandidate> {
        if let Some(best) = resolution.best_guess() {
            return Some(best.clone());
        }

        let name = match resolution.source {
            ResolutionSource::Skipped => extracted.card_name.clone(),
            _ => {
                let translated = self.extractor.extract(&resolution.translated_text, game, None);
                translated
                    .card_name
                    .or_else(|| first_line(&resolution.translated_text))
            }
        }?;

        Some(IdentificationCandidate {
            name,
            set_name: extracted.set_name.clone(),
            set_code: extracted.set_code.clone(),
            number: extracted.card_number.clone(),
            confidence: extracted.confidence,
            ..Default::default()
        })
    }

    async fn confirmed_identity(
        &self,
        card_id: &str,
        resolution: &Resolution,
        extracted: &ExtractedFields,
    ) -> ItemFields {
        let card = match &self.catalog {
            Some(catalog) => catalog.get_card(card_id).await.unwrap_or_else(|e| {
                log::warn!("Catalog lookup for confirmed card {} failed: {}", card_id, e);
                None
            }),
            None => None,
        };
        match card {
            Some(card) => fields_from_card(&card, extracted, 1.0, "cache", &resolution.candidates),
            None => ItemFields {
                card_name: extracted.card_name.clone(),
                card_number: extracted.card_number.clone(),
                set_code: extracted.set_code.clone(),
                set_name: extracted.set_name.clone(),
                card_id: Some(card_id.to_string()),
                is_foil: extracted.is_foil,
                confidence: Some(1.0),
                source: Some(ResolutionSource::Cache.as_str().to_string()),
                candidates: encode(&resolution.candidates),
                extracted_fields: encode(extracted),
            },
        }
    }

    /// Attaches a catalog identity to the guess. Several cards sharing the
    /// name are told apart visually when the guess is weak; otherwise the
    /// catalog's first hit is used.
    async fn enrich(
        &self,
        item: &ImportItem,
        image: Option<&[u8]>,
        guess: &IdentificationCandidate,
        resolution: &Resolution,
        extracted: &ExtractedFields,
    ) -> ItemFields {
        let source = resolution.source.as_str();
        let unenriched = || ItemFields {
            card_name: Some(guess.name.clone()),
            card_number: guess.number.clone().or_else(|| extracted.card_number.clone()),
            set_code: guess.set_code.clone().or_else(|| extracted.set_code.clone()),
            set_name: guess.set_name.clone().or_else(|| extracted.set_name.clone()),
            card_id: None,
            is_foil: extracted.is_foil,
            confidence: Some(guess.confidence),
            source: Some(source.to_string()),
            candidates: encode(&resolution.candidates),
            extracted_fields: encode(extracted),
        };

        let Some(catalog) = &self.catalog else {
            return unenriched();
        };

        let query = CardQuery {
            game: Some(item.game),
            name: Some(guess.name.clone()),
            set_code: guess.set_code.clone().or_else(|| extracted.set_code.clone()),
            number: guess.number.clone().or_else(|| extracted.card_number.clone()),
            limit: Some(ENRICH_LIMIT),
        };
        let mut cards = match catalog.search(&query).await {
            Ok(cards) => cards,
            Err(e) => {
                log::warn!("Catalog enrichment failed for item {}: {}", item.id, e);
                return unenriched();
            }
        };
        if cards.is_empty() && (query.set_code.is_some() || query.number.is_some()) {
            // Printed set or number may be misread; retry on the name alone.
            let by_name = CardQuery {
                set_code: None,
                number: None,
                ..query
            };
            cards = catalog.search(&by_name).await.unwrap_or_else(|e| {
                log::warn!("Catalog name search failed for item {}: {}", item.id, e);
                Vec::new()
            });
        }
        if cards.is_empty() {
            return unenriched();
        }

        if cards.len() > 1 && guess.confidence < self.config.weak_confidence {
            if let (Some(visual), Some(bytes)) = (&self.visual, image) {
                match visual.select_best_match(bytes, &cards).await {
                    Ok(Some(picked)) => {
                        if let Some(card) = cards.iter().find(|c| c.id == picked.selected_id) {
                            log::debug!(
                                "Visual comparison picked {} for item {} ({:.2})",
                                card.id,
                                item.id,
                                picked.confidence
                            );
                            let confidence = guess.confidence.max(picked.confidence);
                            return fields_from_card(
                                card,
                                extracted,
                                confidence,
                                "visual",
                                &resolution.candidates,
                            );
                        }
                    }
                    Ok(None) => log::debug!("Visual comparison found no match for item {}", item.id),
                    Err(e) => log::warn!("Visual comparison failed for item {}: {}", item.id, e),
                }
            }
        }

        fields_from_card(&cards[0], extracted, guess.confidence, source, &resolution.candidates)
    }
}

fn fields_from_card(
    card: &CardRecord,
    extracted: &ExtractedFields,
    confidence: f64,
    source: &str,
    candidates: &[IdentificationCandidate],
) -> ItemFields {
    ItemFields {
        card_name: Some(card.name.clone()),
        card_number: card.number.clone().or_else(|| extracted.card_number.clone()),
        set_code: card.set_code.clone().or_else(|| extracted.set_code.clone()),
        set_name: card.set_name.clone().or_else(|| extracted.set_name.clone()),
        card_id: Some(card.id.clone()),
        is_foil: extracted.is_foil,
        confidence: Some(confidence.clamp(0.0, 1.0)),
        source: Some(source.to_string()),
        candidates: encode(&candidates),
        extracted_fields: encode(extracted),
    }
}

fn partial_fields(
    best_guess: Option<&IdentificationCandidate>,
    candidates: &[IdentificationCandidate],
    extracted: &ExtractedFields,
) -> ItemFields {
    ItemFields {
        card_name: best_guess
            .map(|c| c.name.clone())
            .or_else(|| extracted.card_name.clone()),
        confidence: best_guess.map(|c| c.confidence),
        source: Some(ResolutionSource::Failed.as_str().to_string()),
        candidates: encode(&candidates),
        extracted_fields: encode(extracted),
        ..Default::default()
    }
}

fn encode<T: Serialize + ?Sized>(value: &T) -> Option<String> {
    serde_json::to_string(value)
        .map_err(|e| log::warn!("Failed to encode item field: {}", e))
        .ok()
}

fn first_line(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}

fn mime_for(item: &ImportItem) -> String {
    item.image_path
        .as_deref()
        .map(|p| mime_guess::from_path(p).first_or_octet_stream().essence_str().to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string())
}
