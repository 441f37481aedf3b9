//! Monthly translation usage counters.

use rusqlite::{params, Connection};

use super::{Database, DatabaseError};

/// Returns (characters, requests) recorded for `month` (`YYYY-MM`).
pub fn get(db: &Database, month: &str) -> Result<(u64, u64), DatabaseError> {
    db.with_conn(|conn| usage_with(conn, month))
}

fn usage_with(conn: &Connection, month: &str) -> Result<(u64, u64), DatabaseError> {
    Ok(conn.query_row(
        "SELECT COALESCE(SUM(characters), 0), COALESCE(SUM(requests), 0)
         FROM translation_usage WHERE month = ?1",
        params![month],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?)
}

/// Counts one request of `characters` against `month` unless that would
/// take the month past `limit` (zero is unlimited). The check and the
/// write share a transaction.
///
/// Returns the characters used before the call and whether the request
/// was counted.
pub fn reserve(
    db: &Database,
    month: &str,
    characters: u64,
    limit: u64,
) -> Result<(u64, bool), DatabaseError> {
    db.with_transaction(|conn| {
        let (used, _) = usage_with(conn, month)?;
        if limit > 0 && used + characters > limit {
            return Ok((used, false));
        }
        conn.execute(
            "INSERT INTO translation_usage (month, characters, requests) VALUES (?1, ?2, 1)
             ON CONFLICT(month) DO UPDATE SET
                 characters = characters + excluded.characters,
                 requests = requests + 1",
            params![month, characters as i64],
        )?;
        Ok((used, true))
    })
}

/// Takes back one counted request of `characters`.
pub fn release(db: &Database, month: &str, characters: u64) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE translation_usage
             SET characters = MAX(characters - ?2, 0), requests = MAX(requests - 1, 0)
             WHERE month = ?1",
            params![month, characters as i64],
        )?;
        Ok(())
    })
}
