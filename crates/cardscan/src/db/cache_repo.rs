//! Translation cache repository: operations on `translation_cache`.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// SQL expression ranking a source tag by trust. Higher wins on upsert.
const TRUST_RANK_SQL: &str = "CASE translation_cache.source
    WHEN 'user_confirmed' THEN 4
    WHEN 'static' THEN 3
    WHEN 'fallback' THEN 2
    WHEN 'primary' THEN 1
    ELSE 0 END";

/// Trust rank of a source tag, matching [`TRUST_RANK_SQL`].
pub fn trust_rank(source: &str) -> i64 {
    match source {
        "user_confirmed" => 4,
        "static" => 3,
        "fallback" => 2,
        "primary" => 1,
        _ => 0,
    }
}

/// A raw cache row from the database.
#[derive(Debug, Clone)]
pub struct CacheRow {
    pub text_hash: String,
    pub source_text: String,
    pub value: Option<String>,
    pub card_id: Option<String>,
    pub source: String,
    pub hit_count: i64,
    pub expires_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl CacheRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            text_hash: row.get("text_hash")?,
            source_text: row.get("source_text")?,
            value: row.get("value")?,
            card_id: row.get("card_id")?,
            source: row.get("source")?,
            hit_count: row.get("hit_count")?,
            expires_at: row.get("expires_at")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Finds a cache row by hash.
pub fn find(db: &Database, text_hash: &str) -> Result<Option<CacheRow>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM translation_cache WHERE text_hash = ?1",
                params![text_hash],
                CacheRow::from_row,
            )
            .optional()?)
    })
}

/// Inserts or overwrites a translation value.
///
/// An existing row is overwritten only when the incoming source is at
/// least as trusted as the stored one, or the stored row has expired.
/// A stored `card_id` is never cleared. Returns whether a row was written.
pub fn upsert_value(
    db: &Database,
    text_hash: &str,
    source_text: &str,
    value: &str,
    source: &str,
    expires_at: Option<&str>,
    now: &str,
) -> Result<bool, DatabaseError> {
    let sql = format!(
        "INSERT INTO translation_cache (text_hash, source_text, value, source, hit_count,
             expires_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6, ?6)
         ON CONFLICT(text_hash) DO UPDATE SET
             source_text = excluded.source_text,
             value = excluded.value,
             source = excluded.source,
             expires_at = excluded.expires_at,
             updated_at = excluded.updated_at
         WHERE ?7 >= {rank}
            OR (translation_cache.expires_at IS NOT NULL AND translation_cache.expires_at <= ?6)",
        rank = TRUST_RANK_SQL
    );
    db.with_conn(|conn| {
        let changed = conn.execute(
            &sql,
            params![
                text_hash,
                source_text,
                value,
                source,
                expires_at,
                now,
                trust_rank(source)
            ],
        )?;
        Ok(changed == 1)
    })
}

/// Records a user-confirmed identity for a hash. The row becomes
/// `user_confirmed` and never expires.
pub fn set_identity(
    db: &Database,
    text_hash: &str,
    source_text: &str,
    card_id: &str,
    now: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO translation_cache (text_hash, source_text, card_id, source, hit_count,
                 expires_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, 'user_confirmed', 0, NULL, ?4, ?4)
             ON CONFLICT(text_hash) DO UPDATE SET
                 card_id = excluded.card_id,
                 source = 'user_confirmed',
                 expires_at = NULL,
                 updated_at = excluded.updated_at",
            params![text_hash, source_text, card_id, now],
        )?;
        Ok(())
    })
}

/// Increments the hit counter of a row.
pub fn increment_hit(db: &Database, text_hash: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE translation_cache SET hit_count = hit_count + 1 WHERE text_hash = ?1",
            params![text_hash],
        )?;
        Ok(())
    })
}

/// Deletes a row by hash.
pub fn delete(db: &Database, text_hash: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "DELETE FROM translation_cache WHERE text_hash = ?1",
            params![text_hash],
        )?;
        Ok(changed == 1)
    })
}

/// Deletes every row whose expiry is at or before `now`.
pub fn purge_expired(db: &Database, now: &str) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn.execute(
            "DELETE FROM translation_cache WHERE expires_at IS NOT NULL AND expires_at <= ?1",
            params![now],
        )?)
    })
}

/// Returns (row count, total hits).
pub fn totals(db: &Database) -> Result<(u64, u64), DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(hit_count), 0) FROM translation_cache",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: &str = "2026-01-10T00:00:00.000Z";
    const LATER: &str = "2026-02-10T00:00:00.000Z";

    fn test_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn test_less_trusted_source_does_not_overwrite() {
        let db = test_db();
        assert!(upsert_value(&db, "h", "text", "static value", "static", None, NOW).unwrap());
        assert!(!upsert_value(&db, "h", "text", "ai value", "primary", Some(LATER), NOW).unwrap());

        let row = find(&db, "h").unwrap().unwrap();
        assert_eq!(row.value.as_deref(), Some("static value"));
        assert_eq!(row.source, "static");
        assert!(row.expires_at.is_none());
    }

    #[test]
    fn test_equal_or_more_trusted_source_overwrites() {
        let db = test_db();
        upsert_value(&db, "h", "text", "first", "primary", Some(LATER), NOW).unwrap();
        assert!(upsert_value(&db, "h", "text", "second", "primary", Some(LATER), NOW).unwrap());
        assert!(upsert_value(&db, "h", "text", "third", "fallback", None, NOW).unwrap());

        let row = find(&db, "h").unwrap().unwrap();
        assert_eq!(row.value.as_deref(), Some("third"));
        assert!(row.expires_at.is_none());
    }

    #[test]
    fn test_expired_row_is_overwritten_by_any_source() {
        let db = test_db();
        upsert_value(
            &db,
            "h",
            "text",
            "old",
            "fallback",
            Some("2026-01-01T00:00:00.000Z"),
            "2025-12-01T00:00:00.000Z",
        )
        .unwrap();
        assert!(upsert_value(&db, "h", "text", "new", "primary", Some(LATER), NOW).unwrap());
        assert_eq!(find(&db, "h").unwrap().unwrap().value.as_deref(), Some("new"));
    }

    #[test]
    fn test_identity_survives_value_updates() {
        let db = test_db();
        upsert_value(&db, "h", "text", "v", "primary", Some(LATER), NOW).unwrap();
        set_identity(&db, "h", "text", "swsh4-25", NOW).unwrap();

        let row = find(&db, "h").unwrap().unwrap();
        assert_eq!(row.card_id.as_deref(), Some("swsh4-25"));
        assert_eq!(row.source, "user_confirmed");
        assert!(row.expires_at.is_none());

        assert!(!upsert_value(&db, "h", "text", "v2", "static", None, NOW).unwrap());
        assert_eq!(
            find(&db, "h").unwrap().unwrap().card_id.as_deref(),
            Some("swsh4-25")
        );
    }

    #[test]
    fn test_hits_and_purge() {
        let db = test_db();
        upsert_value(&db, "a", "a", "v", "primary", Some("2026-01-05T00:00:00.000Z"), NOW).unwrap();
        upsert_value(&db, "b", "b", "v", "fallback", None, NOW).unwrap();
        increment_hit(&db, "b").unwrap();
        increment_hit(&db, "b").unwrap();

        assert_eq!(totals(&db).unwrap(), (2, 2));
        assert_eq!(purge_expired(&db, NOW).unwrap(), 1);
        assert!(find(&db, "a").unwrap().is_none());
        assert!(delete(&db, "b").unwrap());
        assert_eq!(totals(&db).unwrap(), (0, 0));
    }
}
