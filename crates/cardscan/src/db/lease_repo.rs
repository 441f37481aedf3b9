//! Worker lease repository: the exclusive "current job" marker.
//!
//! A lease is a single row keyed by name. Acquisition is one atomic
//! upsert that only takes over a row whose lease has expired or that the
//! caller already owns.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DatabaseError};

#[derive(Debug, Clone)]
pub struct LeaseRow {
    pub name: String,
    pub owner: String,
    pub job_id: Option<String>,
    pub acquired_at: String,
    pub expires_at: String,
}

impl LeaseRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            name: row.get("name")?,
            owner: row.get("owner")?,
            job_id: row.get("job_id")?,
            acquired_at: row.get("acquired_at")?,
            expires_at: row.get("expires_at")?,
        })
    }
}

/// Tries to acquire (or renew) the named lease for `owner`.
pub fn try_acquire(
    db: &Database,
    name: &str,
    owner: &str,
    now: &str,
    expires_at: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "INSERT INTO worker_leases (name, owner, job_id, acquired_at, expires_at)
             VALUES (?1, ?2, NULL, ?3, ?4)
             ON CONFLICT(name) DO UPDATE SET
                 owner = excluded.owner,
                 job_id = NULL,
                 acquired_at = excluded.acquired_at,
                 expires_at = excluded.expires_at
             WHERE worker_leases.expires_at <= excluded.acquired_at
                OR worker_leases.owner = excluded.owner",
            params![name, owner, now, expires_at],
        )?;
        Ok(changed == 1)
    })
}

/// Records which job the lease holder is working on.
pub fn set_job(
    db: &Database,
    name: &str,
    owner: &str,
    job_id: Option<&str>,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE worker_leases SET job_id = ?3 WHERE name = ?1 AND owner = ?2",
            params![name, owner, job_id],
        )?;
        Ok(changed == 1)
    })
}

/// Pushes the expiry of a lease `owner` still holds, keeping its job.
pub fn renew(db: &Database, name: &str, owner: &str, expires_at: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE worker_leases SET expires_at = ?3 WHERE name = ?1 AND owner = ?2",
            params![name, owner, expires_at],
        )?;
        Ok(changed == 1)
    })
}

/// Releases the lease if `owner` still holds it.
pub fn release(db: &Database, name: &str, owner: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "DELETE FROM worker_leases WHERE name = ?1 AND owner = ?2",
            params![name, owner],
        )?;
        Ok(changed == 1)
    })
}

/// Returns the lease row when it exists and has not expired at `now`.
pub fn find_live(db: &Database, name: &str, now: &str) -> Result<Option<LeaseRow>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM worker_leases WHERE name = ?1 AND expires_at > ?2",
                params![name, now],
                LeaseRow::from_row,
            )
            .optional()?)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: &str = "2026-01-01T00:00:00.000Z";
    const T1: &str = "2026-01-01T00:05:00.000Z";
    const T2: &str = "2026-01-01T00:10:00.000Z";
    const T3: &str = "2026-01-01T00:15:00.000Z";

    #[test]
    fn test_second_owner_is_rejected_while_live() {
        let db = Database::open_in_memory().unwrap();
        assert!(try_acquire(&db, "import", "a", T0, T2).unwrap());
        assert!(!try_acquire(&db, "import", "b", T1, T3).unwrap());
        assert_eq!(find_live(&db, "import", T1).unwrap().unwrap().owner, "a");
    }

    #[test]
    fn test_owner_can_renew() {
        let db = Database::open_in_memory().unwrap();
        assert!(try_acquire(&db, "import", "a", T0, T1).unwrap());
        assert!(try_acquire(&db, "import", "a", T0, T3).unwrap());
        assert_eq!(find_live(&db, "import", T2).unwrap().unwrap().expires_at, T3);
    }

    #[test]
    fn test_expired_lease_is_taken_over() {
        let db = Database::open_in_memory().unwrap();
        assert!(try_acquire(&db, "import", "a", T0, T1).unwrap());
        assert!(find_live(&db, "import", T2).unwrap().is_none());
        assert!(try_acquire(&db, "import", "b", T2, T3).unwrap());
        assert!(!release(&db, "import", "a").unwrap());
        assert!(release(&db, "import", "b").unwrap());
    }

    #[test]
    fn test_renew_keeps_job() {
        let db = Database::open_in_memory().unwrap();
        try_acquire(&db, "import", "a", T0, T1).unwrap();
        set_job(&db, "import", "a", Some("job-1")).unwrap();
        assert!(renew(&db, "import", "a", T3).unwrap());
        assert!(!renew(&db, "import", "b", T3).unwrap());
        let lease = find_live(&db, "import", T2).unwrap().unwrap();
        assert_eq!(lease.job_id.as_deref(), Some("job-1"));
    }

    #[test]
    fn test_set_job_only_for_owner() {
        let db = Database::open_in_memory().unwrap();
        try_acquire(&db, "import", "a", T0, T2).unwrap();
        assert!(!set_job(&db, "import", "b", Some("job-1")).unwrap());
        assert!(set_job(&db, "import", "a", Some("job-1")).unwrap());
        let lease = find_live(&db, "import", T1).unwrap().unwrap();
        assert_eq!(lease.job_id.as_deref(), Some("job-1"));
    }
}
