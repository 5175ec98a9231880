//! Queue repository: dispatch bookkeeping for the `job_queue` table.
//!
//! A row exists from enqueue until the owning worker acknowledges it. A claim
//! is a single `UPDATE ... RETURNING`, so two workers never get the same row,
//! even from different processes. `claimed_at` is a lease that the owning
//! pool renews while it runs the job.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw queue row from the database.
#[derive(Debug, Clone)]
pub struct QueueRow {
    pub id: String,
    pub job_type: String,
    pub course_id: String,
    pub payload: String,
    pub created_at: String,
    pub available_at: String,
    pub attempts: u32,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<String>,
}

impl QueueRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            job_type: row.get("job_type")?,
            course_id: row.get("course_id")?,
            payload: row.get("payload")?,
            created_at: row.get("created_at")?,
            available_at: row.get("available_at")?,
            attempts: row.get("attempts")?,
            claimed_by: row.get("claimed_by")?,
            claimed_at: row.get("claimed_at")?,
        })
    }
}

/// Inserts a new queue row on an already-locked connection.
pub fn insert_on(conn: &Connection, row: &QueueRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO job_queue (id, job_type, course_id, payload, created_at,
         available_at, attempts, claimed_by, claimed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            row.id,
            row.job_type,
            row.course_id,
            row.payload,
            row.created_at,
            row.available_at,
            row.attempts,
            row.claimed_by,
            row.claimed_at,
        ],
    )?;
    Ok(())
}

/// Claims the oldest available, unclaimed row for `worker`.
///
/// Increments `attempts` on the claimed row and returns it with the new
/// count. Returns `None` when nothing is due.
pub fn claim_next(
    db: &Database,
    worker: &str,
    now: &str,
) -> Result<Option<QueueRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "UPDATE job_queue SET claimed_by = ?1, claimed_at = ?2, attempts = attempts + 1
                 WHERE id = (
                     SELECT id FROM job_queue
                     WHERE claimed_by IS NULL AND available_at <= ?2
                     ORDER BY available_at ASC, created_at ASC
                     LIMIT 1
                 ) AND claimed_by IS NULL
                 RETURNING *",
                params![worker, now],
                QueueRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Removes a row once its job has reached a resting state.
pub fn delete(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let affected = conn.execute("DELETE FROM job_queue WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    })
}

/// Releases a claimed row so it becomes available again at `available_at`.
pub fn release(db: &Database, id: &str, available_at: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE job_queue SET claimed_by = NULL, claimed_at = NULL, available_at = ?2
             WHERE id = ?1",
            params![id, available_at],
        )?;
        Ok(())
    })
}

/// Extends the lease on every row claimed by a worker whose label starts
/// with `claimant_prefix`.
pub fn renew_claims(db: &Database, claimant_prefix: &str, now: &str) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let affected = conn.execute(
            "UPDATE job_queue SET claimed_at = ?2
             WHERE claimed_by IS NOT NULL AND substr(claimed_by, 1, length(?1)) = ?1",
            params![claimant_prefix, now],
        )?;
        Ok(affected)
    })
}

/// Releases claims whose lease was last renewed before `cutoff`. Their
/// owner stopped renewing, so it is gone.
pub fn release_expired(db: &Database, cutoff: &str) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let affected = conn.execute(
            "UPDATE job_queue SET claimed_by = NULL, claimed_at = NULL
             WHERE claimed_by IS NOT NULL AND claimed_at < ?1",
            params![cutoff],
        )?;
        Ok(affected)
    })
}

/// Finds a queue row by ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<QueueRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM job_queue WHERE id = ?1",
                params![id],
                QueueRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Counts unclaimed rows (due or scheduled for later).
pub fn count_pending(db: &Database) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM job_queue WHERE claimed_by IS NULL",
            [],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

/// Deletes every row. Status history lives elsewhere and is untouched.
pub fn clear(db: &Database) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| Ok(conn.execute("DELETE FROM job_queue", [])?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn sample_row(id: &str, available_at: &str) -> QueueRow {
        QueueRow {
            id: id.to_string(),
            job_type: "TEST_JOB".to_string(),
            course_id: "course-1".to_string(),
            payload: "{}".to_string(),
            created_at: available_at.to_string(),
            available_at: available_at.to_string(),
            attempts: 0,
            claimed_by: None,
            claimed_at: None,
        }
    }

    fn insert(db: &Database, row: &QueueRow) {
        db.with_conn(|conn| insert_on(conn, row)).unwrap();
    }

    #[test]
    fn test_claim_oldest_first() {
        let db = test_db();
        insert(&db, &sample_row("later", "2026-01-01T00:00:02.000Z"));
        insert(&db, &sample_row("first", "2026-01-01T00:00:01.000Z"));

        let now = "2026-01-01T00:01:00.000Z";
        let claimed = claim_next(&db, "worker-0", now).unwrap().unwrap();
        assert_eq!(claimed.id, "first");
        assert_eq!(claimed.attempts, 1);
        assert_eq!(claimed.claimed_by.as_deref(), Some("worker-0"));

        let claimed = claim_next(&db, "worker-1", now).unwrap().unwrap();
        assert_eq!(claimed.id, "later");

        assert!(claim_next(&db, "worker-2", now).unwrap().is_none());
    }

    #[test]
    fn test_claim_respects_available_at() {
        let db = test_db();
        insert(&db, &sample_row("future", "2026-01-01T00:10:00.000Z"));

        assert!(claim_next(&db, "w", "2026-01-01T00:05:00.000Z")
            .unwrap()
            .is_none());
        assert!(claim_next(&db, "w", "2026-01-01T00:10:00.000Z")
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_release_and_reclaim_counts_attempts() {
        let db = test_db();
        insert(&db, &sample_row("j", "2026-01-01T00:00:00.000Z"));
        let now = "2026-01-01T00:00:00.000Z";

        claim_next(&db, "w", now).unwrap().unwrap();
        release(&db, "j", now).unwrap();
        let again = claim_next(&db, "w", now).unwrap().unwrap();
        assert_eq!(again.attempts, 2);
    }

    #[test]
    fn test_expired_claims_are_released() {
        let db = test_db();
        insert(&db, &sample_row("stale", "2026-01-01T00:00:00.000Z"));
        insert(&db, &sample_row("live", "2026-01-01T00:00:00.000Z"));
        claim_next(&db, "dead-pool/worker-0", "2026-01-01T00:00:00.000Z").unwrap();
        claim_next(&db, "live-pool/worker-0", "2026-01-01T00:00:00.000Z").unwrap();

        assert_eq!(
            renew_claims(&db, "live-pool/", "2026-01-01T00:09:00.000Z").unwrap(),
            1
        );
        assert_eq!(release_expired(&db, "2026-01-01T00:05:00.000Z").unwrap(), 1);

        assert!(find_by_id(&db, "stale").unwrap().unwrap().claimed_by.is_none());
        assert_eq!(
            find_by_id(&db, "live").unwrap().unwrap().claimed_by.as_deref(),
            Some("live-pool/worker-0")
        );
        assert_eq!(count_pending(&db).unwrap(), 1);
    }

    #[test]
    fn test_claimed_row_is_not_claimed_again() {
        let db = test_db();
        insert(&db, &sample_row("only", "2026-01-01T00:00:00.000Z"));
        let now = "2026-01-01T00:00:00.000Z";

        let first = claim_next(&db, "a/worker-0", now).unwrap().unwrap();
        assert_eq!(first.claimed_by.as_deref(), Some("a/worker-0"));
        assert!(claim_next(&db, "b/worker-0", now).unwrap().is_none());
        assert_eq!(
            find_by_id(&db, "only").unwrap().unwrap().claimed_by.as_deref(),
            Some("a/worker-0")
        );
    }

    #[test]
    fn test_delete_and_clear() {
        let db = test_db();
        insert(&db, &sample_row("a", "2026-01-01T00:00:00.000Z"));
        insert(&db, &sample_row("b", "2026-01-01T00:00:00.000Z"));

        assert!(delete(&db, "a").unwrap());
        assert!(!delete(&db, "a").unwrap());
        assert!(find_by_id(&db, "a").unwrap().is_none());

        assert_eq!(clear(&db).unwrap(), 1);
        assert_eq!(count_pending(&db).unwrap(), 0);
    }
}
