//! Translation and identification cache.
//!
//! Entries are keyed by the SHA-256 of normalized OCR text (see
//! [`normalize`]) and stored in `translation_cache`. A row holds a
//! translated text (optionally with the identification candidate that
//! produced it) and, once a user has confirmed a match, a card id that
//! wins over the translation on lookup.
//!
//! Text with no letter at all has no key: lookups miss and writes are
//! dropped.

pub mod normalize;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::db::cache_repo::{self, CacheRow};
use crate::db::{format_timestamp, parse_timestamp, Database, DatabaseError};
use crate::types::IdentificationCandidate;

pub use normalize::{cache_key, normalize, text_hash};

/// Default lifetime of entries produced by the primary identifier.
pub const DEFAULT_PRIMARY_TTL_DAYS: i64 = 30;

/// Origin of a cache entry, in increasing order of trust.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheSource {
    Cache,
    Primary,
    Fallback,
    Static,
    UserConfirmed,
}

impl CacheSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheSource::Cache => "cache",
            CacheSource::Primary => "primary",
            CacheSource::Fallback => "fallback",
            CacheSource::Static => "static",
            CacheSource::UserConfirmed => "user_confirmed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cache" => Some(CacheSource::Cache),
            "primary" => Some(CacheSource::Primary),
            "fallback" => Some(CacheSource::Fallback),
            "static" => Some(CacheSource::Static),
            "user_confirmed" => Some(CacheSource::UserConfirmed),
            _ => None,
        }
    }
}

impl fmt::Display for CacheSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored translation value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedTranslation {
    pub translated_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate: Option<IdentificationCandidate>,
}

/// What a lookup found. A confirmed identity wins over a translation.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedValue {
    Identity {
        card_id: String,
        translation: Option<CachedTranslation>,
    },
    Translation(CachedTranslation),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheHit {
    pub value: CachedValue,
    pub source: CacheSource,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: u64,
    /// Hits recorded on rows, across restarts.
    pub stored_hits: u64,
    /// Hits and misses seen by this process.
    pub session_hits: u64,
    pub session_misses: u64,
}

pub struct TranslationCache {
    db: Database,
    primary_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl TranslationCache {
    pub fn new(db: Database, primary_ttl: Duration) -> Self {
        Self {
            db,
            primary_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Looks up `text`, returning the confirmed identity if there is one,
    /// otherwise the translation.
    pub fn get(&self, text: &str) -> Result<Option<CacheHit>, DatabaseError> {
        self.get_at(text, Utc::now())
    }

    pub fn get_at(
        &self,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CacheHit>, DatabaseError> {
        let Some((hash, _)) = cache_key(text) else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };
        let hit = match cache_repo::find(&self.db, &hash)? {
            Some(row) => self.decode_live(row, now)?,
            None => None,
        };

        match &hit {
            Some(_) => {
                cache_repo::increment_hit(&self.db, &hash)?;
                self.hits.fetch_add(1, Ordering::Relaxed);
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(hit)
    }

    /// Returns only the translation stored for `text`.
    pub fn get_translation(&self, text: &str) -> Result<Option<CachedTranslation>, DatabaseError> {
        Ok(self.get(text)?.and_then(|hit| match hit.value {
            CachedValue::Translation(t) => Some(t),
            CachedValue::Identity { translation, .. } => translation,
        }))
    }

    /// Returns only the confirmed card id stored for `text`.
    pub fn get_identity(&self, text: &str) -> Result<Option<String>, DatabaseError> {
        Ok(self.get(text)?.and_then(|hit| match hit.value {
            CachedValue::Identity { card_id, .. } => Some(card_id),
            CachedValue::Translation(_) => None,
        }))
    }

    /// Stores a translation. Primary entries expire after the configured
    /// TTL, every other source never expires. Returns false when a more
    /// trusted live entry kept its value.
    pub fn set(
        &self,
        text: &str,
        value: &CachedTranslation,
        source: CacheSource,
    ) -> Result<bool, DatabaseError> {
        let Some((hash, normalized)) = cache_key(text) else {
            log::debug!("Not caching {} value for letterless text", source);
            return Ok(false);
        };
        let now = Utc::now();
        let expires_at = match source {
            CacheSource::Primary => Some(format_timestamp(now + self.primary_ttl)),
            _ => None,
        };
        let encoded = serde_json::to_string(value).map_err(|e| DatabaseError::Json {
            column: "value",
            source: e,
        })?;
        let written = cache_repo::upsert_value(
            &self.db,
            &hash,
            &normalized,
            &encoded,
            source.as_str(),
            expires_at.as_deref(),
            &format_timestamp(now),
        )?;
        if !written {
            log::debug!("Cache kept a more trusted entry over {} value", source);
        }
        Ok(written)
    }

    /// Records a user-confirmed identity for `text`. It never expires.
    /// Returns false when the text has no key.
    pub fn set_identity(&self, text: &str, card_id: &str) -> Result<bool, DatabaseError> {
        let Some((hash, normalized)) = cache_key(text) else {
            log::debug!("Not remembering card {} for letterless text", card_id);
            return Ok(false);
        };
        cache_repo::set_identity(
            &self.db,
            &hash,
            &normalized,
            card_id,
            &format_timestamp(Utc::now()),
        )?;
        Ok(true)
    }

    /// Whether a stored row has expired at `now`. Rows without an expiry
    /// never expire; an unparseable expiry counts as expired.
    pub fn is_expired(row: &CacheRow, now: DateTime<Utc>) -> bool {
        match row.expires_at.as_deref() {
            None => false,
            Some(raw) => parse_timestamp(raw).map(|at| at <= now).unwrap_or(true),
        }
    }

    pub fn purge_expired(&self) -> Result<usize, DatabaseError> {
        let purged = cache_repo::purge_expired(&self.db, &format_timestamp(Utc::now()))?;
        if purged > 0 {
            log::info!("Purged {} expired cache entries", purged);
        }
        Ok(purged)
    }

    pub fn stats(&self) -> Result<CacheStats, DatabaseError> {
        let (entries, stored_hits) = cache_repo::totals(&self.db)?;
        Ok(CacheStats {
            entries,
            stored_hits,
            session_hits: self.hits.load(Ordering::Relaxed),
            session_misses: self.misses.load(Ordering::Relaxed),
        })
    }

    /// Decodes a row, deleting it when it is expired or unreadable.
    fn decode_live(
        &self,
        row: CacheRow,
        now: DateTime<Utc>,
    ) -> Result<Option<CacheHit>, DatabaseError> {
        if Self::is_expired(&row, now) {
            log::debug!("Cache entry {} expired", row.text_hash);
            cache_repo::delete(&self.db, &row.text_hash)?;
            return Ok(None);
        }

        let source = CacheSource::parse(&row.source).unwrap_or(CacheSource::Cache);
        let translation = match row.value.as_deref() {
            Some(raw) => match serde_json::from_str::<CachedTranslation>(raw) {
                Ok(t) => Some(t),
                Err(e) => {
                    log::warn!(
                        "Dropping unreadable cache entry {}: {}",
                        row.text_hash,
                        e
                    );
                    if row.card_id.is_none() {
                        cache_repo::delete(&self.db, &row.text_hash)?;
                        return Ok(None);
                    }
                    None
                }
            },
            None => None,
        };

        let value = match (row.card_id, translation) {
            (Some(card_id), translation) => CachedValue::Identity {
                card_id,
                translation,
            },
            (None, Some(t)) => CachedValue::Translation(t),
            (None, None) => return Ok(None),
        };
        Ok(Some(CacheHit { value, source }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> TranslationCache {
        TranslationCache::new(
            Database::open_in_memory().unwrap(),
            Duration::days(DEFAULT_PRIMARY_TTL_DAYS),
        )
    }

    fn translation(text: &str) -> CachedTranslation {
        CachedTranslation {
            translated_text: text.to_string(),
            candidate: None,
        }
    }

    #[test]
    fn test_set_then_get_round_trip() {
        let cache = cache();
        cache
            .set("リザードン", &translation("Charizard"), CacheSource::Fallback)
            .unwrap();
        let hit = cache.get("リザードン").unwrap().unwrap();
        assert_eq!(hit.source, CacheSource::Fallback);
        assert_eq!(hit.value, CachedValue::Translation(translation("Charizard")));
    }

    #[test]
    fn test_lookup_ignores_line_order_and_width() {
        let cache = cache();
        cache
            .set("リザードン\nＨＰ １７０", &translation("Charizard"), CacheSource::Static)
            .unwrap();
        assert!(cache.get("HP 170\nリザードン").unwrap().is_some());
    }

    #[test]
    fn test_primary_entry_expires_after_ttl() {
        let cache = cache();
        cache
            .set("ピカチュウ", &translation("Pikachu"), CacheSource::Primary)
            .unwrap();
        assert!(cache.get("ピカチュウ").unwrap().is_some());

        let later = Utc::now() + Duration::days(DEFAULT_PRIMARY_TTL_DAYS + 1);
        assert!(cache.get_at("ピカチュウ", later).unwrap().is_none());
        // The expired read deleted the row.
        assert_eq!(cache.stats().unwrap().entries, 0);
    }

    #[test]
    fn test_fallback_entry_never_expires() {
        let cache = cache();
        cache
            .set("ピカチュウ", &translation("Pikachu"), CacheSource::Fallback)
            .unwrap();
        let far = Utc::now() + Duration::days(3650);
        assert!(cache.get_at("ピカチュウ", far).unwrap().is_some());
    }

    #[test]
    fn test_identity_wins_over_translation() {
        let cache = cache();
        cache
            .set("リザードン", &translation("Charizard"), CacheSource::Primary)
            .unwrap();
        cache.set_identity("リザードン", "swsh4-25").unwrap();

        assert_eq!(
            cache.get_identity("リザードン").unwrap().as_deref(),
            Some("swsh4-25")
        );
        match cache.get("リザードン").unwrap().unwrap().value {
            CachedValue::Identity {
                card_id,
                translation: t,
            } => {
                assert_eq!(card_id, "swsh4-25");
                assert_eq!(t, Some(translation("Charizard")));
            }
            other => panic!("expected identity, got {:?}", other),
        }

        let far = Utc::now() + Duration::days(3650);
        assert!(cache.get_at("リザードン", far).unwrap().is_some());
    }

    #[test]
    fn test_more_trusted_source_overwrites() {
        let cache = cache();
        cache
            .set("ミュウ", &translation("Mew?"), CacheSource::Primary)
            .unwrap();
        assert!(cache
            .set("ミュウ", &translation("Mew"), CacheSource::Fallback)
            .unwrap());
        assert!(!cache
            .set("ミュウ", &translation("Mew!!"), CacheSource::Primary)
            .unwrap());
        assert_eq!(
            cache.get_translation("ミュウ").unwrap(),
            Some(translation("Mew"))
        );
    }

    #[test]
    fn test_corrupt_value_is_a_miss_and_deleted() {
        let cache = cache();
        cache_repo::upsert_value(
            &cache.db,
            &text_hash("ゲンガー"),
            "ゲンガー",
            "{not json",
            "fallback",
            None,
            "2026-01-01T00:00:00.000Z",
        )
        .unwrap();
        assert!(cache.get("ゲンガー").unwrap().is_none());
        assert!(cache_repo::find(&cache.db, &text_hash("ゲンガー"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_hit_counters() {
        let cache = cache();
        cache
            .set("イーブイ", &translation("Eevee"), CacheSource::Static)
            .unwrap();
        cache.get("イーブイ").unwrap();
        cache.get("イーブイ").unwrap();
        cache.get("unknown").unwrap();

        let stats = cache.stats().unwrap();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.stored_hits, 2);
        assert_eq!(stats.session_hits, 2);
        assert_eq!(stats.session_misses, 1);
    }

    #[test]
    fn test_letterless_texts_are_never_cached() {
        let cache = cache();
        assert!(!cache.set_identity("025/185", "swsh4-25").unwrap());
        assert!(!cache
            .set("025/185", &translation("Charizard"), CacheSource::Fallback)
            .unwrap());

        assert!(cache.get_identity("999/999\n---").unwrap().is_none());
        assert!(cache.get("025/185").unwrap().is_none());
        assert!(cache.get("").unwrap().is_none());

        let stats = cache.stats().unwrap();
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.session_misses, 3);
    }

    #[test]
    fn test_is_expired() {
        let now = Utc::now();
        let mut row = CacheRow {
            text_hash: "h".into(),
            source_text: "t".into(),
            value: None,
            card_id: None,
            source: "primary".into(),
            hit_count: 0,
            expires_at: None,
            created_at: format_timestamp(now),
            updated_at: format_timestamp(now),
        };
        assert!(!TranslationCache::is_expired(&row, now));
        row.expires_at = Some(format_timestamp(now - Duration::seconds(1)));
        assert!(TranslationCache::is_expired(&row, now));
        row.expires_at = Some(format_timestamp(now + Duration::hours(1)));
        assert!(!TranslationCache::is_expired(&row, now));
    }

    #[test]
    fn test_purge_expired() {
        let cache = TranslationCache::new(Database::open_in_memory().unwrap(), Duration::zero());
        cache
            .set("ルギア", &translation("Lugia"), CacheSource::Primary)
            .unwrap();
        cache
            .set("ホウオウ", &translation("Ho-Oh"), CacheSource::Fallback)
            .unwrap();
        assert_eq!(cache.purge_expired().unwrap(), 1);
        assert_eq!(cache.stats().unwrap().entries, 1);
    }
}
