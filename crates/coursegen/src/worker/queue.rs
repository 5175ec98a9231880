//! Durable job queue.
//!
//! Rows live in `job_queue` from enqueue until a worker acknowledges them.
//! The queue has no externally visible state of its own: callers read job
//! progress from the [`JobStatusStore`], which is written in the same
//! transaction as the queue row.

use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, info, warn};
use uuid::Uuid;

use crate::db::queue_repo::{self, QueueRow};
use crate::db::{format_timestamp, Database};
use crate::error::WorkerError;
use crate::store::JobStatusStore;
use crate::worker::job::{Job, JobPayload};

#[derive(Clone)]
pub struct JobQueue {
    db: Database,
    statuses: JobStatusStore,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
}

impl JobQueue {
    pub fn new(db: Database) -> Self {
        // One pending wake is enough: an idle worker polls the table anyway.
        let (wake_tx, wake_rx) = bounded(1);
        Self {
            statuses: JobStatusStore::new(db.clone()),
            db,
            wake_tx,
            wake_rx,
        }
    }

    /// Validates and durably stores a job. Returns its id once both the queue
    /// row and its `queued` status record are committed.
    pub fn enqueue(&self, payload: JobPayload) -> Result<String, WorkerError> {
        payload.validate()?;

        let job_id = Uuid::new_v4().to_string();
        let course_id = payload.course_id.to_string();
        let now = Utc::now();
        let row = QueueRow {
            id: job_id.clone(),
            job_type: payload.job_type.as_str().to_string(),
            course_id: course_id.clone(),
            payload: serde_json::to_string(&payload).map_err(crate::db::DatabaseError::from)?,
            created_at: format_timestamp(now),
            available_at: format_timestamp(now),
            attempts: 0,
            claimed_by: None,
            claimed_at: None,
        };

        self.db.with_transaction(|conn| {
            queue_repo::insert_on(conn, &row)?;
            JobStatusStore::record_queued(conn, &job_id, payload.job_type, &course_id, now)
        })?;

        let _ = self.wake_tx.try_send(());
        info!(
            "Enqueued {} job {} for course {}",
            payload.job_type, job_id, course_id
        );
        Ok(job_id)
    }

    /// Claims the next due job for `worker`.
    ///
    /// A row whose payload no longer decodes can never run; it is marked
    /// failed and dropped, and the next row is tried.
    pub fn claim_next(&self, worker: &str) -> Result<Option<Job>, WorkerError> {
        loop {
            let now = format_timestamp(Utc::now());
            let Some(row) = queue_repo::claim_next(&self.db, worker, &now)? else {
                return Ok(None);
            };

            match serde_json::from_str::<JobPayload>(&row.payload) {
                Ok(payload) => {
                    debug!("{} claimed job {} (attempt {})", worker, row.id, row.attempts);
                    return Ok(Some(Job {
                        id: row.id,
                        attempt: row.attempts,
                        payload,
                    }));
                }
                Err(source) => {
                    let err = WorkerError::CorruptPayload {
                        job_id: row.id.clone(),
                        source,
                    };
                    warn!("Dropping job {}: {}", row.id, err);
                    if let Err(e) = self.statuses.mark_failed(&row.id, &err.to_string()) {
                        warn!("Could not record failure for job {}: {}", row.id, e);
                    }
                    queue_repo::delete(&self.db, &row.id)?;
                }
            }
        }
    }

    /// Removes a job from the queue. Status must already be recorded.
    pub fn ack(&self, job_id: &str) -> Result<(), WorkerError> {
        if !queue_repo::delete(&self.db, job_id)? {
            debug!("Ack for job {} found no queue row", job_id);
        }
        Ok(())
    }

    /// Makes a claimed job available again after `delay`.
    pub fn reschedule(&self, job_id: &str, delay: Duration) -> Result<(), WorkerError> {
        let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
        let available_at = format_timestamp(Utc::now() + delay);
        queue_repo::release(&self.db, job_id, &available_at)?;
        Ok(())
    }

    /// Extends the lease of every job claimed by a worker whose label starts
    /// with `claimant_prefix`.
    pub fn renew_leases(&self, claimant_prefix: &str) -> Result<usize, WorkerError> {
        let now = format_timestamp(Utc::now());
        Ok(queue_repo::renew_claims(&self.db, claimant_prefix, &now)?)
    }

    /// Releases claims whose lease has not been renewed for `lease`: their
    /// worker died mid-job, possibly in another process.
    pub fn requeue_abandoned(&self, lease: Duration) -> Result<usize, WorkerError> {
        let lease = chrono::Duration::from_std(lease).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(lease)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
        let released = queue_repo::release_expired(&self.db, &format_timestamp(cutoff))?;
        if released > 0 {
            info!("Requeued {} abandoned job(s)", released);
        }
        Ok(released)
    }

    /// Drops all queue bookkeeping. Status history is kept.
    pub fn clear(&self) -> Result<usize, WorkerError> {
        let cleared = queue_repo::clear(&self.db)?;
        warn!("Cleared {} queued job(s)", cleared);
        Ok(cleared)
    }

    /// Unclaimed rows, due now or later.
    pub fn depth(&self) -> Result<u64, WorkerError> {
        Ok(queue_repo::count_pending(&self.db)?)
    }

    pub(crate) fn wake_receiver(&self) -> Receiver<()> {
        self.wake_rx.clone()
    }

    pub fn statuses(&self) -> &JobStatusStore {
        &self.statuses
    }
}
