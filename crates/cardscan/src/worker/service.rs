//! Job lifecycle operations exposed to the outer (CLI/HTTP) layer.
//!
//! Submission is synchronous: images are stored, then the job and all its
//! items are inserted in one transaction that also re-checks that no other
//! job is active. Identification itself happens later in the
//! [`JobProcessor`](super::JobProcessor).

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::job::{
    ConfirmOutcome, ImportItem, ImportJob, ItemSelection, ItemStatus, JobDetail, JobStatus,
};
use super::sink::{CollectionSink, ConfirmedCard};
use super::PROCESSOR_LEASE;
use crate::cache::{CacheStats, TranslationCache};
use crate::catalog::{CardCatalog, MAX_SEARCH_LIMIT};
use crate::db::item_repo::{self, ItemFields, ItemRow};
use crate::db::job_repo::{self, JobFilter, JobRow};
use crate::db::{format_timestamp, lease_repo, Database};
use crate::error::{CardscanError, ErrorCode, IdentifyError, Result, WorkerError};
use crate::identify::QuotaStatus;
use crate::identify::TranslationQuota;
use crate::storage::ImageStore;
use crate::types::{CardQuery, CardRecord, Game, Language, RawScan};

const USER_SOURCE: &str = "user";

/// Which optional collaborators are wired in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfiguredServices {
    pub identifier: bool,
    pub translator: bool,
    pub catalog: bool,
    pub visual: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaseInfo {
    pub owner: String,
    pub job_id: Option<String>,
    pub expires_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub active_job: Option<ImportJob>,
    pub pending_items: u64,
    /// Items in processing across every job, stale ones included.
    pub processing_items: u64,
    pub lease: Option<LeaseInfo>,
    pub cache: CacheStats,
    pub quota: Option<QuotaStatus>,
    pub services: ConfiguredServices,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobQuery {
    pub status: Option<JobStatus>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPage {
    pub jobs: Vec<ImportJob>,
    pub total: u64,
}

/// A scan after validation and image storage, ready to become a row.
struct PreparedScan {
    game: Game,
    language: Language,
    image_path: Option<String>,
    ocr_text: Option<String>,
    image_hints: Option<String>,
    rejection: Option<String>,
}

pub struct ImportService {
    db: Database,
    images: Arc<dyn ImageStore>,
    cache: Arc<TranslationCache>,
    sink: Arc<dyn CollectionSink>,
    catalog: Option<Arc<dyn CardCatalog>>,
    quota: Option<Arc<TranslationQuota>>,
    services: ConfiguredServices,
}

impl ImportService {
    pub fn new(
        db: Database,
        images: Arc<dyn ImageStore>,
        cache: Arc<TranslationCache>,
        sink: Arc<dyn CollectionSink>,
    ) -> Self {
        Self {
            db,
            images,
            cache,
            sink,
            catalog: None,
            quota: None,
            services: ConfiguredServices::default(),
        }
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn CardCatalog>) -> Self {
        self.catalog = Some(catalog);
        self.services.catalog = true;
        self
    }

    pub fn with_quota(mut self, quota: Arc<TranslationQuota>) -> Self {
        self.quota = Some(quota);
        self
    }

    /// Records which identification services the processor has. Catalog
    /// presence is taken from [`ImportService::with_catalog`].
    pub fn with_services(mut self, services: ConfiguredServices) -> Self {
        let catalog = self.services.catalog;
        self.services = ConfiguredServices { catalog, ..services };
        self
    }

    /// Creates a job from `scans`.
    ///
    /// Fails with `Conflict` while another job is pending or processing.
    /// Scans without content or with an unsupported image become failed
    /// items; when every scan is rejected the job itself is failed.
    pub async fn create_job(
        &self,
        game: Game,
        language: Language,
        scans: Vec<RawScan>,
    ) -> Result<JobDetail> {
        if scans.is_empty() {
            return Err(CardscanError::InvalidInput(
                "A job needs at least one scan".to_string(),
            ));
        }
        if let Some(active) = job_repo::find_active(&self.db)? {
            return Err(CardscanError::Conflict {
                active_job_id: active.id,
            });
        }

        let mut prepared = Vec::with_capacity(scans.len());
        for scan in scans {
            match self.prepare(scan).await {
                Ok(p) => prepared.push(p),
                Err(e) => {
                    self.discard_images(&prepared).await;
                    return Err(e);
                }
            }
        }

        let now = format_timestamp(Utc::now());
        let job_id = uuid::Uuid::new_v4().to_string();
        let accepted = prepared.iter().filter(|p| p.rejection.is_none()).count();
        let (status, error) = if accepted == 0 {
            (
                JobStatus::Failed,
                Some("No scan had usable content".to_string()),
            )
        } else {
            (JobStatus::Pending, None)
        };
        let job = JobRow {
            id: job_id.clone(),
            status: status.as_str().to_string(),
            game: game.as_str().to_string(),
            language: language.as_str().to_string(),
            item_count: prepared.len() as i64,
            error,
            created_at: now.clone(),
            updated_at: now.clone(),
            completed_at: None,
        };

        let inserted = self.db.with_transaction(|conn| {
            if let Some(active) = job_repo::find_active_with(conn)? {
                return Ok(Err(active.id));
            }
            job_repo::insert_with(conn, &job)?;
            for (position, scan) in prepared.iter().enumerate() {
                item_repo::insert_with(conn, &item_row(&job_id, position as i64, scan, &now))?;
            }
            Ok(Ok(()))
        });

        match inserted {
            Ok(Ok(())) => {}
            Ok(Err(active_job_id)) => {
                self.discard_images(&prepared).await;
                return Err(CardscanError::Conflict { active_job_id });
            }
            Err(e) => {
                self.discard_images(&prepared).await;
                return Err(e.into());
            }
        }

        log::info!(
            "Created import job {} with {} items ({} rejected)",
            job_id,
            prepared.len(),
            prepared.len() - accepted
        );
        self.get_job(&job_id)
    }

    /// Appends a scan to an active job.
    pub async fn add_item(&self, job_id: &str, scan: RawScan) -> Result<ImportItem> {
        let job = self.find_job(job_id)?;
        if !JobStatus::parse(&job.status).is_some_and(|s| s.is_active()) {
            return Err(CardscanError::InvalidInput(format!(
                "Job '{}' is {} and no longer accepts items",
                job_id, job.status
            )));
        }

        let prepared = self.prepare(scan).await?;
        let item_id = uuid::Uuid::new_v4().to_string();
        let now = format_timestamp(Utc::now());

        let inserted = self.db.with_transaction(|conn| {
            let active = job_repo::find_by_id_with(conn, job_id)?
                .and_then(|j| JobStatus::parse(&j.status))
                .is_some_and(|s| s.is_active());
            if !active {
                return Ok(false);
            }
            let position = item_repo::next_position(conn, job_id)?;
            let mut row = item_row(job_id, position, &prepared, &now);
            row.id = item_id.clone();
            item_repo::insert_with(conn, &row)?;
            job_repo::increment_item_count(conn, job_id, 1, &now)?;
            Ok(true)
        });

        match inserted {
            Ok(true) => {}
            Ok(false) => {
                self.discard_images(std::slice::from_ref(&prepared)).await;
                return Err(CardscanError::InvalidInput(format!(
                    "Job '{}' finished before the item could be added",
                    job_id
                )));
            }
            Err(e) => {
                self.discard_images(std::slice::from_ref(&prepared)).await;
                return Err(e.into());
            }
        }

        log::debug!("Added item {} to job {}", item_id, job_id);
        self.find_item(&item_id)
    }

    pub fn list_jobs(&self, query: &JobQuery) -> Result<JobPage> {
        let filter = JobFilter {
            status: query.status.map(|s| s.as_str().to_string()),
            limit: query.limit,
            offset: query.offset,
        };
        let (rows, total) = job_repo::query(&self.db, &filter)?;
        Ok(JobPage {
            jobs: rows.into_iter().map(ImportJob::from).collect(),
            total,
        })
    }

    pub fn get_job(&self, job_id: &str) -> Result<JobDetail> {
        let job = self.find_job(job_id)?;
        let items = item_repo::list_for_job(&self.db, job_id)?;
        Ok(JobDetail {
            job: job.into(),
            items: items.into_iter().map(ImportItem::from).collect(),
        })
    }

    /// Sets the identity a user picked for an item.
    ///
    /// Failed items become identified, identified items stay identified.
    /// The choice is remembered for the item's OCR text so the same text
    /// resolves to the same card next time.
    pub async fn update_item_selection(
        &self,
        item_id: &str,
        selection: ItemSelection,
    ) -> Result<ImportItem> {
        let card_id = selection.card_id.trim().to_string();
        if card_id.is_empty() {
            return Err(CardscanError::InvalidInput(
                "A selection needs a card id".to_string(),
            ));
        }

        let item = self.find_item(item_id)?;
        if !item.status.can_transition_to(ItemStatus::Identified) {
            return Err(WorkerError::InvalidTransition {
                from: item.status.to_string(),
                to: ItemStatus::Identified.to_string(),
            }
            .into());
        }

        let card = self.lookup_selected_card(&card_id).await?;
        let fields = ItemFields {
            card_name: selection
                .card_name
                .or_else(|| card.as_ref().map(|c| c.name.clone())),
            card_number: selection
                .card_number
                .or_else(|| card.as_ref().and_then(|c| c.number.clone())),
            set_code: selection
                .set_code
                .or_else(|| card.as_ref().and_then(|c| c.set_code.clone())),
            set_name: selection
                .set_name
                .or_else(|| card.as_ref().and_then(|c| c.set_name.clone())),
            card_id: Some(card_id.clone()),
            is_foil: selection.is_foil,
            confidence: Some(1.0),
            source: Some(USER_SOURCE.to_string()),
            ..Default::default()
        };

        let now = format_timestamp(Utc::now());
        if !item_repo::apply_selection(&self.db, item_id, &fields, &now)? {
            // Status moved between the read and the write.
            let current = self.find_item(item_id)?;
            return Err(WorkerError::InvalidTransition {
                from: current.status.to_string(),
                to: ItemStatus::Identified.to_string(),
            }
            .into());
        }

        if let Some(text) = item.ocr_text.as_deref().filter(|t| !t.trim().is_empty()) {
            if let Err(e) = self.cache.set_identity(text, &card_id) {
                log::warn!("Failed to remember selection for item {}: {}", item_id, e);
            }
        }

        log::info!("Item {} set to card {} by user", item_id, card_id);
        self.find_item(item_id)
    }

    /// Hands identified items to the collection and marks them confirmed.
    ///
    /// An empty `item_ids` confirms every identified item of the job.
    /// Items that are not identified, have no card id or belong to another
    /// job are reported as skipped.
    pub async fn confirm_items(&self, job_id: &str, item_ids: &[String]) -> Result<ConfirmOutcome> {
        self.find_job(job_id)?;
        let items: Vec<ImportItem> = item_repo::list_for_job(&self.db, job_id)?
            .into_iter()
            .map(ImportItem::from)
            .collect();

        let mut outcome = ConfirmOutcome::default();
        let mut cards = Vec::new();
        let requested: Vec<&str> = if item_ids.is_empty() {
            items
                .iter()
                .filter(|i| i.status == ItemStatus::Identified)
                .map(|i| i.id.as_str())
                .collect()
        } else {
            item_ids.iter().map(String::as_str).collect()
        };

        for id in requested {
            let confirmable = items.iter().find(|i| i.id == id).and_then(|item| {
                let card_id = item.card_id.clone()?;
                (item.status == ItemStatus::Identified).then(|| ConfirmedCard {
                    item_id: item.id.clone(),
                    card_id,
                    game: item.game,
                    card_name: item.card_name.clone(),
                    set_code: item.set_code.clone(),
                    card_number: item.card_number.clone(),
                    is_foil: item.is_foil,
                })
            });
            match confirmable {
                Some(card) => cards.push(card),
                None => outcome.skipped.push(id.to_string()),
            }
        }

        if cards.is_empty() {
            return Ok(outcome);
        }

        self.sink.add_cards(&cards).await?;

        let now = format_timestamp(Utc::now());
        let from = ItemStatus::sources_of(ItemStatus::Confirmed);
        for card in cards {
            if item_repo::transition(
                &self.db,
                &card.item_id,
                &from,
                ItemStatus::Confirmed.as_str(),
                &now,
            )? {
                outcome.confirmed.push(card.item_id);
            } else {
                log::warn!(
                    "Item {} changed while being confirmed; it was added to the collection \
                     but left in its current status",
                    card.item_id
                );
                outcome.skipped.push(card.item_id);
            }
        }

        log::info!(
            "Confirmed {} items of job {} ({} skipped)",
            outcome.confirmed.len(),
            job_id,
            outcome.skipped.len()
        );
        Ok(outcome)
    }

    /// Deletes a job, its items and their stored images.
    pub async fn delete_job(&self, job_id: &str) -> Result<()> {
        self.find_job(job_id)?;
        let paths = item_repo::image_paths_for_job(&self.db, job_id)?;
        job_repo::delete(&self.db, job_id)?;
        delete_images(self.images.as_ref(), &paths).await;
        log::info!("Deleted job {} and {} images", job_id, paths.len());
        Ok(())
    }

    /// Manual search fallback through the catalog.
    pub async fn search_cards(&self, query: &CardQuery) -> Result<Vec<CardRecord>> {
        let catalog = self
            .catalog
            .as_ref()
            .ok_or(IdentifyError::NotConfigured("card catalog"))?;
        let has_terms = [&query.name, &query.set_code, &query.number]
            .iter()
            .any(|term| term.as_deref().is_some_and(|t| !t.trim().is_empty()));
        if !has_terms {
            return Err(CardscanError::InvalidInput(
                "Search needs a name, set code or number".to_string(),
            ));
        }

        let mut query = query.clone();
        query.limit = query.limit.map(|l| l.clamp(1, MAX_SEARCH_LIMIT));
        Ok(catalog.search(&query).await?)
    }

    pub fn status(&self) -> Result<ServiceStatus> {
        let active = job_repo::find_active(&self.db)?;
        let pending_items = match &active {
            Some(job) => {
                item_repo::count_in_statuses(&self.db, &job.id, &[ItemStatus::Pending.as_str()])?
            }
            None => 0,
        };
        let processing_items = item_repo::count_processing(&self.db)?;
        let now = format_timestamp(Utc::now());
        let lease = lease_repo::find_live(&self.db, PROCESSOR_LEASE, &now)?.map(|l| LeaseInfo {
            owner: l.owner,
            job_id: l.job_id,
            expires_at: l.expires_at,
        });
        let quota = match &self.quota {
            Some(quota) => Some(quota.status()?),
            None => None,
        };

        Ok(ServiceStatus {
            active_job: active.map(ImportJob::from),
            pending_items,
            processing_items,
            lease,
            cache: self.cache.stats()?,
            quota,
            services: self.services,
        })
    }

    async fn prepare(&self, scan: RawScan) -> Result<PreparedScan> {
        let image_hints = scan
            .hints
            .as_ref()
            .and_then(|h| serde_json::to_string(h).ok());
        let ocr_text = scan.ocr_text.filter(|t| !t.trim().is_empty());
        let mut prepared = PreparedScan {
            game: scan.game,
            language: scan.language,
            image_path: None,
            ocr_text,
            image_hints,
            rejection: None,
        };

        if let Some(image) = scan.image.filter(|i| !i.bytes.is_empty()) {
            match self.images.save(&image.bytes, &image.extension).await {
                Ok(path) => prepared.image_path = Some(path),
                Err(e) if e.code() == ErrorCode::InvalidInput => {
                    prepared.rejection = Some(e.to_string());
                }
                Err(e) => return Err(e.into()),
            }
        }

        if prepared.rejection.is_none()
            && prepared.image_path.is_none()
            && prepared.ocr_text.is_none()
        {
            prepared.rejection = Some("Scan has neither an image nor OCR text".to_string());
        }
        Ok(prepared)
    }

    async fn discard_images(&self, prepared: &[PreparedScan]) {
        let paths: Vec<String> = prepared
            .iter()
            .filter_map(|p| p.image_path.clone())
            .collect();
        delete_images(self.images.as_ref(), &paths).await;
    }

    async fn lookup_selected_card(&self, card_id: &str) -> Result<Option<CardRecord>> {
        let Some(catalog) = &self.catalog else {
            return Ok(None);
        };
        match catalog.get_card(card_id).await {
            Ok(Some(card)) => Ok(Some(card)),
            Ok(None) => Err(CardscanError::NotFound {
                kind: "Card",
                id: card_id.to_string(),
            }),
            Err(e) => {
                log::warn!("Catalog lookup for selected card {} failed: {}", card_id, e);
                Ok(None)
            }
        }
    }

    fn find_job(&self, job_id: &str) -> Result<JobRow> {
        job_repo::find_by_id(&self.db, job_id)?.ok_or_else(|| CardscanError::NotFound {
            kind: "Job",
            id: job_id.to_string(),
        })
    }

    fn find_item(&self, item_id: &str) -> Result<ImportItem> {
        item_repo::find_by_id(&self.db, item_id)?
            .map(ImportItem::from)
            .ok_or_else(|| CardscanError::NotFound {
                kind: "Item",
                id: item_id.to_string(),
            })
    }
}

fn item_row(job_id: &str, position: i64, scan: &PreparedScan, now: &str) -> ItemRow {
    let (status, error_code) = match scan.rejection {
        Some(_) => (ItemStatus::Failed, Some(ErrorCode::InvalidInput.as_str().to_string())),
        None => (ItemStatus::Pending, None),
    };
    ItemRow {
        id: uuid::Uuid::new_v4().to_string(),
        job_id: job_id.to_string(),
        position,
        game: scan.game.as_str().to_string(),
        language: scan.language.as_str().to_string(),
        image_path: scan.image_path.clone(),
        ocr_text: scan.ocr_text.clone(),
        status: status.as_str().to_string(),
        error_code,
        error_message: scan.rejection.clone(),
        image_hints: scan.image_hints.clone(),
        created_at: now.to_string(),
        updated_at: now.to_string(),
        ..Default::default()
    }
}

/// Deletes stored images, logging failures instead of returning them.
pub(crate) async fn delete_images(images: &dyn ImageStore, paths: &[String]) {
    for path in paths {
        if let Err(e) = images.delete(path).await {
            log::warn!("Failed to delete image {}: {}", path, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FileImageStore;
    use crate::types::{ImageHints, ScanImage};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        received: Mutex<Vec<ConfirmedCard>>,
    }

    #[async_trait::async_trait]
    impl CollectionSink for RecordingSink {
        async fn add_cards(&self, cards: &[ConfirmedCard]) -> std::result::Result<(), WorkerError> {
            self.received.lock().unwrap().extend_from_slice(cards);
            Ok(())
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        db: Database,
        cache: Arc<TranslationCache>,
        sink: Arc<RecordingSink>,
        service: ImportService,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        let cache = Arc::new(TranslationCache::new(db.clone(), chrono::Duration::days(30)));
        let sink = Arc::new(RecordingSink::default());
        let service = ImportService::new(
            db.clone(),
            Arc::new(FileImageStore::new(dir.path())),
            cache.clone(),
            sink.clone(),
        );
        Fixture {
            _dir: dir,
            db,
            cache,
            sink,
            service,
        }
    }

    fn text_scan(text: &str) -> RawScan {
        RawScan::from_text(text, Game::Pokemon, Language::Ja)
    }

    fn image_scan(bytes: &[u8], extension: &str) -> RawScan {
        RawScan {
            image: Some(ScanImage {
                bytes: bytes.to_vec(),
                extension: extension.to_string(),
            }),
            ocr_text: None,
            game: Game::Pokemon,
            language: Language::Ja,
            hints: None,
        }
    }

    fn stored_files(dir: &tempfile::TempDir) -> usize {
        std::fs::read_dir(dir.path()).map(|d| d.count()).unwrap_or(0)
    }

    fn force_status(db: &Database, item_id: &str, status: &str) {
        db.with_conn(|conn| {
            conn.execute(
                "UPDATE import_items SET status = ?2 WHERE id = ?1",
                rusqlite::params![item_id, status],
            )?;
            Ok(())
        })
        .unwrap();
    }

    #[tokio::test]
    async fn test_create_job_stores_items_in_order() {
        let f = fixture();
        let mut scan = image_scan(b"png-bytes", "PNG");
        scan.hints = Some(ImageHints {
            is_foil: Some(true),
            condition_hints: vec![],
            confidence: 0.9,
        });
        let detail = f
            .service
            .create_job(
                Game::Pokemon,
                Language::Ja,
                vec![text_scan("リザードン"), scan],
            )
            .await
            .unwrap();

        assert_eq!(detail.job.status, JobStatus::Pending);
        assert_eq!(detail.job.item_count, 2);
        assert_eq!(detail.items[0].ocr_text.as_deref(), Some("リザードン"));
        assert_eq!(detail.items[1].position, 1);
        assert!(detail.items[1].image_path.as_deref().unwrap().ends_with(".png"));
        assert_eq!(detail.items[1].image_hints.as_ref().unwrap().is_foil, Some(true));
        assert!(detail.items.iter().all(|i| i.status == ItemStatus::Pending));
        assert_eq!(stored_files(&f._dir), 1);
    }

    #[tokio::test]
    async fn test_second_job_conflicts_until_first_settles() {
        let f = fixture();
        let first = f
            .service
            .create_job(Game::Pokemon, Language::Ja, vec![text_scan("ピカチュウ")])
            .await
            .unwrap();

        let err = f
            .service
            .create_job(Game::Pokemon, Language::Ja, vec![text_scan("ミュウ")])
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Conflict);
        assert!(matches!(err, CardscanError::Conflict { ref active_job_id } if *active_job_id == first.job.id));

        job_repo::update_status(&f.db, &first.job.id, "completed", "2026-01-01T00:00:00.000Z")
            .unwrap();
        assert!(f
            .service
            .create_job(Game::Pokemon, Language::Ja, vec![text_scan("ミュウ")])
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_invalid_scans_fail_their_item_only() {
        let f = fixture();
        let detail = f
            .service
            .create_job(
                Game::Pokemon,
                Language::Ja,
                vec![
                    text_scan("   "),
                    image_scan(b"tiff", "tiff"),
                    text_scan("フシギダネ"),
                ],
            )
            .await
            .unwrap();

        assert_eq!(detail.job.status, JobStatus::Pending);
        assert_eq!(detail.items[0].status, ItemStatus::Failed);
        assert_eq!(detail.items[0].error_code, Some(ErrorCode::InvalidInput));
        assert_eq!(detail.items[1].status, ItemStatus::Failed);
        assert!(detail.items[1].error_message.as_deref().unwrap().contains("tiff"));
        assert_eq!(detail.items[2].status, ItemStatus::Pending);
    }

    #[tokio::test]
    async fn test_job_with_only_invalid_scans_is_failed() {
        let f = fixture();
        let detail = f
            .service
            .create_job(Game::Magic, Language::De, vec![text_scan("")])
            .await
            .unwrap();
        assert_eq!(detail.job.status, JobStatus::Failed);
        assert!(detail.job.error.is_some());

        // A failed job does not block the next submission.
        assert!(f
            .service
            .create_job(Game::Magic, Language::De, vec![text_scan("Blitz")])
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_empty_submission_is_rejected() {
        let f = fixture();
        let err = f
            .service
            .create_job(Game::Pokemon, Language::Ja, vec![])
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidInput);
    }

    #[tokio::test]
    async fn test_add_item_requires_active_job() {
        let f = fixture();
        let detail = f
            .service
            .create_job(Game::Pokemon, Language::Ja, vec![text_scan("ピカチュウ")])
            .await
            .unwrap();

        let item = f
            .service
            .add_item(&detail.job.id, text_scan("ライチュウ"))
            .await
            .unwrap();
        assert_eq!(item.position, 1);
        assert_eq!(f.service.get_job(&detail.job.id).unwrap().job.item_count, 2);

        job_repo::update_status(&f.db, &detail.job.id, "completed", "2026-01-01T00:00:00.000Z")
            .unwrap();
        let err = f
            .service
            .add_item(&detail.job.id, text_scan("ミュウ"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidInput);

        let err = f
            .service
            .add_item("missing", text_scan("ミュウ"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn test_selection_identifies_failed_item_and_is_remembered() {
        let f = fixture();
        let detail = f
            .service
            .create_job(Game::Pokemon, Language::Ja, vec![text_scan("ゲンガー\nHP 130")])
            .await
            .unwrap();
        let item_id = detail.items[0].id.clone();
        force_status(&f.db, &item_id, "failed");

        let updated = f
            .service
            .update_item_selection(
                &item_id,
                ItemSelection {
                    card_id: "swsh8-157".into(),
                    card_name: Some("Gengar".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.status, ItemStatus::Identified);
        assert_eq!(updated.card_id.as_deref(), Some("swsh8-157"));
        assert_eq!(updated.source.as_deref(), Some("user"));
        assert_eq!(
            f.cache.get_identity("HP 130\nゲンガー").unwrap().as_deref(),
            Some("swsh8-157")
        );
    }

    #[tokio::test]
    async fn test_selection_never_regresses_status() {
        let f = fixture();
        let detail = f
            .service
            .create_job(Game::Pokemon, Language::Ja, vec![text_scan("ゲンガー")])
            .await
            .unwrap();
        let item_id = detail.items[0].id.clone();

        let selection = ItemSelection {
            card_id: "swsh8-157".into(),
            ..Default::default()
        };
        let err = f
            .service
            .update_item_selection(&item_id, selection.clone())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CardscanError::Worker(WorkerError::InvalidTransition { .. })
        ));

        force_status(&f.db, &item_id, "confirmed");
        assert!(f
            .service
            .update_item_selection(&item_id, selection)
            .await
            .is_err());
        assert_eq!(
            f.service.get_job(&detail.job.id).unwrap().items[0].status,
            ItemStatus::Confirmed
        );
    }

    #[tokio::test]
    async fn test_confirm_items_hands_identified_cards_to_sink() {
        let f = fixture();
        let detail = f
            .service
            .create_job(
                Game::Pokemon,
                Language::Ja,
                vec![text_scan("ゲンガー"), text_scan("ピカチュウ")],
            )
            .await
            .unwrap();
        let (first, second) = (detail.items[0].id.clone(), detail.items[1].id.clone());
        force_status(&f.db, &first, "failed");
        f.service
            .update_item_selection(
                &first,
                ItemSelection {
                    card_id: "swsh8-157".into(),
                    is_foil: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let outcome = f
            .service
            .confirm_items(&detail.job.id, &[first.clone(), second.clone()])
            .await
            .unwrap();

        assert_eq!(outcome.confirmed, vec![first.clone()]);
        assert_eq!(outcome.skipped, vec![second]);
        let received = f.sink.received.lock().unwrap().clone();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].card_id, "swsh8-157");
        assert!(received[0].is_foil);

        let items = f.service.get_job(&detail.job.id).unwrap().items;
        assert_eq!(items[0].status, ItemStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_delete_job_removes_images() {
        let f = fixture();
        let detail = f
            .service
            .create_job(
                Game::Pokemon,
                Language::Ja,
                vec![image_scan(b"a", "jpg"), image_scan(b"b", "webp")],
            )
            .await
            .unwrap();
        assert_eq!(stored_files(&f._dir), 2);

        f.service.delete_job(&detail.job.id).await.unwrap();

        assert_eq!(stored_files(&f._dir), 0);
        assert_eq!(
            f.service.get_job(&detail.job.id).unwrap_err().code(),
            ErrorCode::NotFound
        );
    }

    #[tokio::test]
    async fn test_search_without_catalog_is_configuration_error() {
        let f = fixture();
        let err = f
            .service
            .search_cards(&CardQuery {
                name: Some("Pikachu".into()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConfigurationError);
    }

    #[tokio::test]
    async fn test_status_reports_active_job() {
        let f = fixture();
        let idle = f.service.status().unwrap();
        assert!(idle.active_job.is_none());
        assert!(idle.quota.is_none());

        let detail = f
            .service
            .create_job(Game::Pokemon, Language::Ja, vec![text_scan("ピカチュウ")])
            .await
            .unwrap();
        let status = f.service.status().unwrap();
        assert_eq!(status.active_job.unwrap().id, detail.job.id);
        assert_eq!(status.pending_items, 1);
        assert_eq!(status.processing_items, 0);
        assert!(status.lease.is_none());

        force_status(&f.db, &detail.items[0].id, "processing");
        let status = f.service.status().unwrap();
        assert_eq!(status.pending_items, 0);
        assert_eq!(status.processing_items, 1);
    }

    #[tokio::test]
    async fn test_list_jobs_filters_by_status() {
        let f = fixture();
        let failed = f
            .service
            .create_job(Game::Pokemon, Language::Ja, vec![text_scan("")])
            .await
            .unwrap();
        f.service
            .create_job(Game::Pokemon, Language::Ja, vec![text_scan("ピカチュウ")])
            .await
            .unwrap();

        let all = f.service.list_jobs(&JobQuery::default()).unwrap();
        assert_eq!(all.total, 2);

        let only_failed = f
            .service
            .list_jobs(&JobQuery {
                status: Some(JobStatus::Failed),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(only_failed.total, 1);
        assert_eq!(only_failed.jobs[0].id, failed.job.id);
    }
}
