//! Isolated environment for driving the import pipeline end to end.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use cardscan::identify::{CardIdentifier, IdentificationResolver, ResolverConfig};
use cardscan::worker::{ImportService, JobProcessor, ProcessorConfig};
use cardscan::{CardCatalog, Database, FileImageStore, TranslationCache};

use super::fakes::RecordingSink;

pub struct TestHarness {
    temp_dir: TempDir,
    pub image_dir: PathBuf,
    pub db: Database,
    pub images: Arc<FileImageStore>,
    pub cache: Arc<TranslationCache>,
    pub sink: Arc<RecordingSink>,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let image_dir = temp_dir.path().join("images");
        std::fs::create_dir_all(&image_dir).expect("Failed to create image dir");
        let db = Database::open(&temp_dir.path().join("cardscan.db"))
            .expect("Failed to open database");

        Self {
            images: Arc::new(FileImageStore::new(&image_dir)),
            cache: Arc::new(TranslationCache::new(db.clone(), chrono::Duration::days(30))),
            sink: Arc::new(RecordingSink::default()),
            image_dir,
            db,
            temp_dir,
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn service(&self) -> ImportService {
        ImportService::new(
            self.db.clone(),
            self.images.clone(),
            self.cache.clone(),
            self.sink.clone(),
        )
    }

    pub fn service_with_catalog(&self, catalog: Arc<dyn CardCatalog>) -> ImportService {
        self.service().with_catalog(catalog)
    }

    pub fn resolver(&self, identifier: Option<Arc<dyn CardIdentifier>>) -> Arc<IdentificationResolver> {
        let resolver = IdentificationResolver::new(self.cache.clone(), ResolverConfig::default());
        Arc::new(match identifier {
            Some(identifier) => resolver.with_identifier(identifier),
            None => resolver,
        })
    }

    pub fn processor(
        &self,
        identifier: Option<Arc<dyn CardIdentifier>>,
        config: ProcessorConfig,
    ) -> JobProcessor {
        JobProcessor::new(
            self.db.clone(),
            self.images.clone(),
            self.resolver(identifier),
            config,
        )
    }

    /// Number of files currently in the image directory.
    pub fn stored_image_count(&self) -> usize {
        std::fs::read_dir(&self.image_dir)
            .expect("Failed to read image dir")
            .count()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
