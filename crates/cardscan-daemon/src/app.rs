//! Builds the library collaborators from a loaded [`Config`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use cardscan::identify::{TokenProvider, TranslationQuota, VisualMatcherConfig};
use cardscan::worker::{
    ConfiguredServices, LoggingSink, ProcessorConfig, SchedulerConfig, TaskKind, TaskQueue,
    TaskRecord, TaskStatus,
};
use cardscan::{
    CardCatalog, Config, Database, FileImageStore, Game, GeminiIdentifier, HttpCardCatalog,
    IdentificationResolver, ImageStore, ImportService, JobProcessor, Language, LiteralTranslator,
    RawScan, ResolverConfig, ScanImage, TranslationCache, VisualMatcher,
};
use tokio_util::sync::CancellationToken;

pub struct App {
    pub processor: Arc<JobProcessor>,
    pub service: ImportService,
    pub tasks: TaskQueue,
    pub scheduler: SchedulerConfig,
}

impl App {
    pub fn build(config: &Config, cancel: CancellationToken) -> anyhow::Result<Self> {
        let db_path = config
            .database_path()
            .ok_or_else(|| anyhow!("no database path configured and no home directory"))?;
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let db = Database::open(&db_path)
            .with_context(|| format!("opening database {}", db_path.display()))?;

        let image_dir = config
            .image_directory()
            .ok_or_else(|| anyhow!("no image directory configured and no home directory"))?;
        let images: Arc<dyn ImageStore> = Arc::new(FileImageStore::new(&image_dir));

        let cache = Arc::new(TranslationCache::new(db.clone(), config.cache.primary_ttl()));
        let mut resolver =
            IdentificationResolver::new(Arc::clone(&cache), ResolverConfig::from(&config.resolver));
        let mut services = ConfiguredServices::default();

        let gemini = match &config.gemini {
            Some(gemini) => {
                let api_key = gemini.api_key.resolve().context("resolving gemini api key")?;
                let identifier = Arc::new(GeminiIdentifier::new(
                    gemini.base_url.clone(),
                    gemini.model.clone(),
                    api_key,
                    Duration::from_secs(gemini.timeout_secs),
                )?);
                resolver = resolver.with_identifier(identifier.clone());
                services.identifier = true;
                Some(identifier)
            }
            None => None,
        };

        let mut quota = None;
        if let Some(translation) = &config.translation {
            let timeout = Duration::from_secs(translation.timeout_secs);
            let tokens = TokenProvider::new(
                translation.token_url.clone(),
                translation.client_id.resolve().context("resolving translation client id")?,
                translation
                    .client_secret
                    .resolve()
                    .context("resolving translation client secret")?,
                translation.scope.clone(),
                timeout,
            )?;
            let monthly = TranslationQuota::new(db.clone(), translation.monthly_char_quota);
            let translator = LiteralTranslator::new(
                translation.endpoint.clone(),
                tokens,
                monthly,
                timeout,
            )?;
            resolver = resolver.with_translator(Arc::new(translator));
            quota = Some(Arc::new(TranslationQuota::new(
                db.clone(),
                translation.monthly_char_quota,
            )));
            services.translator = true;
        }

        let catalog: Option<Arc<dyn CardCatalog>> = match &config.catalog {
            Some(catalog) => {
                let api_key = match &catalog.api_key {
                    Some(source) => source
                        .resolve_optional()
                        .context("resolving catalog api key")?,
                    None => None,
                };
                Some(Arc::new(HttpCardCatalog::new(
                    catalog.base_url.clone(),
                    api_key,
                    Duration::from_secs(catalog.timeout_secs),
                )?))
            }
            None => None,
        };

        let resolver = Arc::new(resolver);
        let mut processor = JobProcessor::new(
            db.clone(),
            Arc::clone(&images),
            resolver,
            ProcessorConfig::from(config),
        )
        .with_cancellation(cancel);

        if let Some(catalog) = &catalog {
            processor = processor.with_catalog(Arc::clone(catalog));
        }
        if let (true, Some(gemini)) = (config.visual.enabled, gemini) {
            let matcher = VisualMatcher::new(
                gemini,
                VisualMatcherConfig {
                    max_candidates: config.visual.max_candidates,
                    max_image_bytes: config.visual.max_image_bytes,
                    download_timeout: Duration::from_secs(config.visual.download_timeout_secs),
                    max_dimension: config.visual.max_dimension,
                },
            )?;
            processor = processor.with_visual(Arc::new(matcher));
            services.visual = true;
        }

        let mut service = ImportService::new(db, images, cache, Arc::new(LoggingSink))
            .with_services(services);
        if let Some(catalog) = catalog {
            service = service.with_catalog(catalog);
        }
        if let Some(quota) = quota {
            service = service.with_quota(quota);
        }

        log::info!(
            "Database {}, images in {}, services {:?}",
            db_path.display(),
            image_dir.display(),
            services
        );

        let processor = Arc::new(processor);
        Ok(Self {
            tasks: TaskQueue::new(Arc::clone(&processor)),
            processor,
            service,
            scheduler: SchedulerConfig::from(&config.worker),
        })
    }

    /// Submits `kind` to the task queue and polls until it finishes.
    pub async fn run_task(&self, kind: TaskKind) -> anyhow::Result<TaskRecord> {
        let id = self.tasks.submit(kind);
        let mut poll = tokio::time::interval(Duration::from_millis(50));
        loop {
            poll.tick().await;
            match self.tasks.status(&id) {
                Some(record) if record.status == TaskStatus::Failed => {
                    return Err(anyhow!(
                        "{} failed: {}",
                        kind,
                        record.error.unwrap_or_default()
                    ));
                }
                Some(record) if record.status.is_finished() => return Ok(record),
                Some(_) => {}
                None => return Err(anyhow!("task {} is no longer tracked", id)),
            }
        }
    }
}

/// Reads one scan from disk.
///
/// `.txt` files are OCR text. Anything else is an image; a sibling file
/// with the same stem and a `.txt` extension supplies its OCR text.
pub fn read_scan(path: &Path, game: Game, language: Language) -> anyhow::Result<RawScan> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    if extension == "txt" {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        return Ok(RawScan::from_text(text, game, language));
    }

    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let sidecar: PathBuf = path.with_extension("txt");
    let ocr_text = if sidecar.is_file() {
        Some(
            std::fs::read_to_string(&sidecar)
                .with_context(|| format!("reading {}", sidecar.display()))?,
        )
    } else {
        None
    };

    Ok(RawScan {
        image: Some(ScanImage { bytes, extension }),
        ocr_text,
        game,
        language,
        hints: None,
    })
}
