//! Item repository: row-granular operations on `import_items`.
//!
//! Every status change is a conditional UPDATE on a single row, so
//! concurrent workers writing different items never contend on anything
//! wider than that row.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw item row from the database.
#[derive(Debug, Clone, Default)]
pub struct ItemRow {
    pub id: String,
    pub job_id: String,
    pub position: i64,
    pub game: String,
    pub language: String,
    pub image_path: Option<String>,
    pub ocr_text: Option<String>,
    pub status: String,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub card_name: Option<String>,
    pub card_number: Option<String>,
    pub set_code: Option<String>,
    pub set_name: Option<String>,
    pub card_id: Option<String>,
    pub is_foil: bool,
    pub confidence: Option<f64>,
    pub source: Option<String>,
    pub candidates: Option<String>,
    pub extracted_fields: Option<String>,
    pub image_hints: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ItemRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            position: row.get("position")?,
            game: row.get("game")?,
            language: row.get("language")?,
            image_path: row.get("image_path")?,
            ocr_text: row.get("ocr_text")?,
            status: row.get("status")?,
            error_code: row.get("error_code")?,
            error_message: row.get("error_message")?,
            card_name: row.get("card_name")?,
            card_number: row.get("card_number")?,
            set_code: row.get("set_code")?,
            set_name: row.get("set_name")?,
            card_id: row.get("card_id")?,
            is_foil: row.get("is_foil")?,
            confidence: row.get("confidence")?,
            source: row.get("source")?,
            candidates: row.get("candidates")?,
            extracted_fields: row.get("extracted_fields")?,
            image_hints: row.get("image_hints")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Identification fields written onto an item.
#[derive(Debug, Clone, Default)]
pub struct ItemFields {
    pub card_name: Option<String>,
    pub card_number: Option<String>,
    pub set_code: Option<String>,
    pub set_name: Option<String>,
    pub card_id: Option<String>,
    pub is_foil: bool,
    pub confidence: Option<f64>,
    pub source: Option<String>,
    pub candidates: Option<String>,
    pub extracted_fields: Option<String>,
}

/// Inserts a new item row using an already-locked connection.
pub fn insert_with(conn: &Connection, item: &ItemRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO import_items (id, job_id, position, game, language, image_path, ocr_text,
         status, error_code, error_message, image_hints, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            item.id,
            item.job_id,
            item.position,
            item.game,
            item.language,
            item.image_path,
            item.ocr_text,
            item.status,
            item.error_code,
            item.error_message,
            item.image_hints,
            item.created_at,
            item.updated_at,
        ],
    )?;
    Ok(())
}

/// Returns the next free position within a job.
pub fn next_position(conn: &Connection, job_id: &str) -> Result<i64, DatabaseError> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(position) + 1, 0) FROM import_items WHERE job_id = ?1",
        params![job_id],
        |r| r.get(0),
    )?)
}

/// Finds an item by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<ItemRow>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM import_items WHERE id = ?1",
                params![id],
                ItemRow::from_row,
            )
            .optional()?)
    })
}

/// Lists all items of a job in submission order.
pub fn list_for_job(db: &Database, job_id: &str) -> Result<Vec<ItemRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM import_items WHERE job_id = ?1 ORDER BY position ASC")?;
        let rows = stmt
            .query_map(params![job_id], ItemRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Lists the IDs of a job's pending items in submission order.
pub fn pending_ids(db: &Database, job_id: &str) -> Result<Vec<String>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id FROM import_items WHERE job_id = ?1 AND status = 'pending'
             ORDER BY position ASC",
        )?;
        let ids = stmt
            .query_map(params![job_id], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    })
}

/// Moves an item from pending to processing. Returns false when another
/// worker already claimed it or it left pending for any other reason.
pub fn claim(db: &Database, id: &str, now: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE import_items SET status = 'processing', updated_at = ?2
             WHERE id = ?1 AND status = 'pending'",
            params![id, now],
        )?;
        Ok(changed == 1)
    })
}

/// Writes identification results and moves a processing item to identified.
pub fn record_identified(
    db: &Database,
    id: &str,
    fields: &ItemFields,
    now: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE import_items SET status = 'identified', error_code = NULL, error_message = NULL,
             card_name = ?2, card_number = ?3, set_code = ?4, set_name = ?5, card_id = ?6,
             is_foil = ?7, confidence = ?8, source = ?9, candidates = ?10,
             extracted_fields = ?11, updated_at = ?12
             WHERE id = ?1 AND status = 'processing'",
            params![
                id,
                fields.card_name,
                fields.card_number,
                fields.set_code,
                fields.set_name,
                fields.card_id,
                fields.is_foil,
                fields.confidence,
                fields.source,
                fields.candidates,
                fields.extracted_fields,
                now,
            ],
        )?;
        Ok(changed == 1)
    })
}

/// Marks a pending or processing item failed, keeping any partial result
/// (best guess candidates, extracted fields) for manual resolution.
pub fn record_failed(
    db: &Database,
    id: &str,
    code: &str,
    message: &str,
    partial: Option<&ItemFields>,
    now: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = match partial {
            Some(fields) => conn.execute(
                "UPDATE import_items SET status = 'failed', error_code = ?2, error_message = ?3,
                 card_name = ?4, confidence = ?5, source = ?6, candidates = ?7,
                 extracted_fields = ?8, updated_at = ?9
                 WHERE id = ?1 AND status IN ('pending', 'processing')",
                params![
                    id,
                    code,
                    message,
                    fields.card_name,
                    fields.confidence,
                    fields.source,
                    fields.candidates,
                    fields.extracted_fields,
                    now,
                ],
            )?,
            None => conn.execute(
                "UPDATE import_items SET status = 'failed', error_code = ?2, error_message = ?3,
                 updated_at = ?4
                 WHERE id = ?1 AND status IN ('pending', 'processing')",
                params![id, code, message, now],
            )?,
        };
        Ok(changed == 1)
    })
}

/// Applies a user-selected identity. Failed items move to identified,
/// identified items keep their status.
pub fn apply_selection(
    db: &Database,
    id: &str,
    fields: &ItemFields,
    now: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE import_items SET status = 'identified', error_code = NULL, error_message = NULL,
             card_name = ?2, card_number = ?3, set_code = ?4, set_name = ?5, card_id = ?6,
             is_foil = ?7, confidence = ?8, source = ?9, updated_at = ?10
             WHERE id = ?1 AND status IN ('identified', 'failed')",
            params![
                id,
                fields.card_name,
                fields.card_number,
                fields.set_code,
                fields.set_name,
                fields.card_id,
                fields.is_foil,
                fields.confidence,
                fields.source,
                now,
            ],
        )?;
        Ok(changed == 1)
    })
}

/// Conditionally moves an item to `to` when its current status is one of
/// `from`.
pub fn transition(
    db: &Database,
    id: &str,
    from: &[&str],
    to: &str,
    now: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let placeholders = (0..from.len())
            .map(|i| format!("?{}", i + 4))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE import_items SET status = ?2, updated_at = ?3 WHERE id = ?1 AND status IN ({})",
            placeholders
        );
        let mut values: Vec<&dyn rusqlite::types::ToSql> = vec![&id, &to, &now];
        for status in from {
            values.push(status);
        }
        let changed = conn.execute(&sql, values.as_slice())?;
        Ok(changed == 1)
    })
}

/// Counts a job's items whose status is one of `statuses`.
pub fn count_in_statuses(
    db: &Database,
    job_id: &str,
    statuses: &[&str],
) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let placeholders = (0..statuses.len())
            .map(|i| format!("?{}", i + 2))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT COUNT(*) FROM import_items WHERE job_id = ?1 AND status IN ({})",
            placeholders
        );
        let mut values: Vec<&dyn rusqlite::types::ToSql> = vec![&job_id];
        for status in statuses {
            values.push(status);
        }
        Ok(conn.query_row(&sql, values.as_slice(), |r| r.get(0))?)
    })
}

/// Counts items in `processing` across all jobs.
pub fn count_processing(db: &Database) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM import_items WHERE status = 'processing'",
            [],
            |r| r.get(0),
        )?)
    })
}

/// Fails items that have been processing since before `cutoff`.
///
/// Recovers items a crashed or cancelled worker left behind.
pub fn reclaim_stale(db: &Database, cutoff: &str, now: &str) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn.execute(
            "UPDATE import_items SET status = 'failed', error_code = 'timeout',
             error_message = 'Identification was abandoned before it finished', updated_at = ?2
             WHERE status = 'processing' AND updated_at < ?1",
            params![cutoff, now],
        )?)
    })
}

/// Fails every item of a job that is still processing. Used when a pass
/// is cancelled with identifications in flight.
pub fn fail_in_flight(
    db: &Database,
    job_id: &str,
    message: &str,
    now: &str,
) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn.execute(
            "UPDATE import_items SET status = 'failed', error_code = 'timeout',
             error_message = ?2, updated_at = ?3
             WHERE job_id = ?1 AND status = 'processing'",
            params![job_id, message, now],
        )?)
    })
}

/// Returns the stored image paths of a job's items.
pub fn image_paths_for_job(db: &Database, job_id: &str) -> Result<Vec<String>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT image_path FROM import_items WHERE job_id = ?1 AND image_path IS NOT NULL",
        )?;
        let paths = stmt
            .query_map(params![job_id], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(paths)
    })
}
