//! Schema migrations, tracked in SQLite's `user_version` header field.

use rusqlite::Connection;

use super::error::DatabaseError;

/// `(version, name, sql)` in apply order. Versions are contiguous from 1.
const MIGRATIONS: &[(u32, &str, &str)] = &[
    (1, "import_jobs", include_str!("sql/001_create_import_jobs.sql")),
    (2, "import_items", include_str!("sql/002_create_import_items.sql")),
    (3, "translation_cache", include_str!("sql/003_create_translation_cache.sql")),
    (4, "worker_leases", include_str!("sql/004_create_worker_leases.sql")),
    (5, "translation_usage", include_str!("sql/005_create_translation_usage.sql")),
];

/// Schema version the database is at.
pub fn schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    Ok(conn.query_row("PRAGMA user_version", [], |r| r.get(0))?)
}

/// Applies every migration newer than the stored version. Each one runs
/// in its own transaction together with the version bump.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    let current = schema_version(conn)?;
    for &(version, name, sql) in MIGRATIONS.iter().filter(|(v, _, _)| *v > current) {
        log::info!("Applying schema v{} ({})", version, name);
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(sql)
            .and_then(|()| tx.execute_batch(&format!("PRAGMA user_version = {}", version)))
            .map_err(|e| DatabaseError::Migration {
                version,
                reason: e.to_string(),
            })?;
        tx.commit()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        conn
    }

    fn latest() -> u32 {
        MIGRATIONS.last().map(|(v, _, _)| *v).unwrap()
    }

    #[test]
    fn test_versions_are_contiguous() {
        for (i, (version, _, _)) in MIGRATIONS.iter().enumerate() {
            assert_eq!(*version as usize, i + 1);
        }
    }

    #[test]
    fn test_fresh_db_reaches_latest_version() {
        let conn = fresh();
        assert_eq!(schema_version(&conn).unwrap(), 0);
        run_all(&conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), latest());
        run_all(&conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), latest());
    }

    #[test]
    fn test_resumes_from_stored_version() {
        let conn = fresh();
        conn.execute_batch(MIGRATIONS[0].2).unwrap();
        conn.execute_batch("PRAGMA user_version = 1").unwrap();

        run_all(&conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), latest());
        conn.execute_batch("SELECT extracted_fields, image_hints FROM import_items")
            .unwrap();
    }

    #[test]
    fn test_failed_migration_keeps_previous_version() {
        let conn = fresh();
        conn.execute_batch("PRAGMA user_version = 1; CREATE TABLE import_items (id TEXT);")
            .unwrap();
        // Version 2 indexes columns the stray table lacks.
        let err = run_all(&conn).unwrap_err();
        assert!(matches!(err, DatabaseError::Migration { version: 2, .. }));
        assert_eq!(schema_version(&conn).unwrap(), 1);
    }

    #[test]
    fn test_cache_hash_is_unique() {
        let conn = fresh();
        run_all(&conn).unwrap();
        let insert = "INSERT INTO translation_cache (text_hash, source_text, source, created_at, updated_at)
                      VALUES ('h1', 'text', 'primary', '2026-01-01', '2026-01-01')";
        conn.execute(insert, []).unwrap();
        assert!(conn.execute(insert, []).is_err());
    }

    #[test]
    fn test_deleting_job_cascades_to_items() {
        let conn = fresh();
        run_all(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO import_jobs (id, game, language, created_at, updated_at)
                 VALUES ('j1', 'pokemon', 'ja', '2026-01-01', '2026-01-01');
             INSERT INTO import_items (id, job_id, position, game, language, created_at, updated_at)
                 VALUES ('i1', 'j1', 0, 'pokemon', 'ja', '2026-01-01', '2026-01-01');
             DELETE FROM import_jobs WHERE id = 'j1';",
        )
        .unwrap();
        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM import_items", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
