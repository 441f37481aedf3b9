pub mod cache;
pub mod catalog;
pub mod config;
pub mod db;
pub mod dictionary;
pub mod error;
pub mod extract;
pub mod identify;
pub mod secrets;
pub mod storage;
pub mod types;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use cache::{CacheSource, CacheStats, CachedTranslation, TranslationCache};
pub use catalog::{CardCatalog, HttpCardCatalog};
pub use config::{load_config, Config};
pub use db::Database;
pub use dictionary::StaticDictionary;
pub use error::{
    CardscanError, ConfigError, ErrorCode, IdentifyError, Result, StorageError, WorkerError,
};
pub use extract::{ExtractedFields, FieldExtractor};
pub use identify::{
    CardIdentifier, GeminiIdentifier, IdentificationResolver, LiteralTranslator, ResolverConfig,
    Translator, VisualComparator, VisualMatcher,
};
pub use secrets::{resolve_secret, resolve_secret_optional, SecretError, SecretSource};
pub use storage::{FileImageStore, ImageStore};
pub use types::{
    CardQuery, CardRecord, Game, IdentificationCandidate, ImageHints, Language, RawScan,
    Resolution, ResolutionSource, ScanImage,
};
pub use worker::{
    CollectionSink, ImportService, JobProcessor, TaskKind, TaskQueue, WorkerService,
};
