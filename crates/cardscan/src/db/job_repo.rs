//! Rows of `import_jobs`.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DatabaseError};

#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: String,
    pub status: String,
    pub game: String,
    pub language: String,
    pub item_count: i64,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            status: row.get("status")?,
            game: row.get("game")?,
            language: row.get("language")?,
            item_count: row.get("item_count")?,
            error: row.get("error")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            completed_at: row.get("completed_at")?,
        })
    }
}

#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub status: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Inserts a job inside a caller's transaction.
pub fn insert_with(conn: &Connection, job: &JobRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO import_jobs (id, status, game, language, item_count, error,
         created_at, updated_at, completed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            job.id,
            job.status,
            job.game,
            job.language,
            job.item_count,
            job.error,
            job.created_at,
            job.updated_at,
            job.completed_at,
        ],
    )?;
    Ok(())
}

/// Inserts a new job row.
pub fn insert(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| insert_with(conn, job))
}

pub fn find_by_id_with(conn: &Connection, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT * FROM import_jobs WHERE id = ?1",
            params![id],
            JobRow::from_row,
        )
        .optional()?)
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| find_by_id_with(conn, id))
}

/// Oldest pending or processing job.
pub fn find_active_with(conn: &Connection) -> Result<Option<JobRow>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT * FROM import_jobs WHERE status IN ('pending', 'processing')
             ORDER BY created_at ASC LIMIT 1",
            [],
            JobRow::from_row,
        )
        .optional()?)
}

pub fn find_active(db: &Database) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(find_active_with)
}

/// One page of jobs, newest first, plus the total matching `filter`.
pub fn query(db: &Database, filter: &JobFilter) -> Result<(Vec<JobRow>, u64), DatabaseError> {
    let limit = filter.limit.unwrap_or(100) as i64;
    let offset = filter.offset.unwrap_or(0) as i64;
    db.with_conn(|conn| {
        let total: u64 = conn.query_row(
            "SELECT COUNT(*) FROM import_jobs WHERE ?1 IS NULL OR status = ?1",
            params![filter.status],
            |r| r.get(0),
        )?;
        let mut stmt = conn.prepare(
            "SELECT * FROM import_jobs WHERE ?1 IS NULL OR status = ?1
             ORDER BY created_at DESC LIMIT ?2 OFFSET ?3",
        )?;
        let rows = stmt
            .query_map(params![filter.status, limit, offset], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok((rows, total))
    })
}

/// Updates only the status and updated_at of a job.
pub fn update_status(
    db: &Database,
    id: &str,
    status: &str,
    updated_at: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE import_jobs SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, status, updated_at],
        )?;
        Ok(())
    })
}

/// Increments the recorded item count of a job.
pub fn increment_item_count(
    conn: &Connection,
    id: &str,
    by: i64,
    updated_at: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE import_jobs SET item_count = item_count + ?2, updated_at = ?3 WHERE id = ?1",
        params![id, by, updated_at],
    )?;
    Ok(())
}

/// Marks an active job completed when none of its items are still pending
/// or processing. Returns whether the job transitioned.
///
/// The check and the update run as one statement so a concurrent item
/// write cannot slip between them.
pub fn complete_if_settled(db: &Database, id: &str, now: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE import_jobs SET status = 'completed', updated_at = ?2, completed_at = ?2
             WHERE id = ?1
               AND status IN ('pending', 'processing')
               AND NOT EXISTS (
                   SELECT 1 FROM import_items
                   WHERE job_id = ?1 AND status IN ('pending', 'processing')
               )",
            params![id, now],
        )?;
        Ok(changed == 1)
    })
}

/// Returns jobs created before `cutoff`.
pub fn find_created_before(db: &Database, cutoff: &str) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM import_jobs WHERE created_at < ?1 ORDER BY created_at ASC",
        )?;
        let rows = stmt
            .query_map(params![cutoff], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Deletes a job. Items are removed by the foreign key cascade.
pub fn delete(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute("DELETE FROM import_jobs WHERE id = ?1", params![id])?;
        Ok(changed == 1)
    })
}
