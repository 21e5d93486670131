//! Dispatch Scheduler
//!
//! Deferred multi-recipient sends. Jobs sit in a registry until a tick finds
//! them due, get flipped to `Firing` under the registry lock, and are then
//! delivered recipient by recipient on their own task.

mod job;

pub use job::{DispatchJob, JobId, JobStatus, RecipientFailure};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::channels::Payload;
use crate::contacts::RecipientAddress;
use crate::error::{MessengerError, Result};
use crate::session::SessionManager;
use crate::utils::truncate_str;

/// Where firing jobs deliver their messages.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, to: &RecipientAddress, payload: &Payload) -> Result<()>;
}

#[async_trait]
impl MessageSender for SessionManager {
    async fn send(&self, to: &RecipientAddress, payload: &Payload) -> Result<()> {
        SessionManager::send(self, to, payload).await
    }
}

/// Deliver `payload` to each recipient in order, one at a time.
///
/// A failing recipient never stops the others; every failure is returned.
pub async fn fan_out(
    sender: &dyn MessageSender,
    recipients: &[RecipientAddress],
    payload: &Payload,
) -> Vec<RecipientFailure> {
    let mut failures = Vec::new();
    for recipient in recipients {
        if let Err(e) = sender.send(recipient, payload).await {
            tracing::warn!("Delivery to {} failed: {}", recipient, e);
            failures.push(RecipientFailure {
                recipient: recipient.clone(),
                reason: e.to_string(),
            });
        }
    }
    failures
}

/// Registry and firing loop for deferred sends.
pub struct DispatchScheduler {
    jobs: Mutex<BTreeMap<JobId, DispatchJob>>,
    next_id: AtomicU64,
    sender: Arc<dyn MessageSender>,
    history_limit: usize,
}

impl DispatchScheduler {
    pub fn new(sender: Arc<dyn MessageSender>, history_limit: usize) -> Self {
        Self {
            jobs: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            sender,
            history_limit,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<JobId, DispatchJob>> {
        // A panic while holding the lock cannot leave a job half-updated
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a job. Fails with `InThePast` unless `fire_at` is later than now.
    pub fn schedule(
        &self,
        recipients: Vec<RecipientAddress>,
        payload: Payload,
        fire_at: DateTime<Utc>,
    ) -> Result<JobId> {
        self.insert(recipients, payload, fire_at, Utc::now(), false)
    }

    /// Like [`schedule`](Self::schedule), but the payload's media file belongs
    /// to the job and is deleted once the job is finished or cancelled.
    pub fn schedule_owning_media(
        &self,
        recipients: Vec<RecipientAddress>,
        payload: Payload,
        fire_at: DateTime<Utc>,
    ) -> Result<JobId> {
        let owns_media = payload.media().is_some();
        self.insert(recipients, payload, fire_at, Utc::now(), owns_media)
    }

    fn insert(
        &self,
        recipients: Vec<RecipientAddress>,
        payload: Payload,
        fire_at: DateTime<Utc>,
        now: DateTime<Utc>,
        owns_media: bool,
    ) -> Result<JobId> {
        if fire_at <= now {
            return Err(MessengerError::InThePast);
        }
        if recipients.is_empty() {
            return Err(MessengerError::InvalidRecipient(
                "at least one recipient is required".to_string(),
            ));
        }

        let id = JobId::from(self.next_id.fetch_add(1, Ordering::SeqCst));
        tracing::info!(
            "Scheduled job {} for {} recipient(s) at {}: {}",
            id,
            recipients.len(),
            fire_at,
            truncate_str(payload.body(), 50)
        );

        self.lock().insert(
            id,
            DispatchJob {
                id,
                recipients,
                payload,
                fire_at,
                status: JobStatus::Pending,
                created_at: now,
                completed_at: None,
                failures: Vec::new(),
                owns_media,
            },
        );
        Ok(id)
    }

    /// Cancel a pending job.
    pub async fn cancel(&self, id: JobId) -> Result<DispatchJob> {
        let (job, media) = {
            let mut jobs = self.lock();
            let job = jobs.get_mut(&id).ok_or(MessengerError::JobNotFound(id))?;
            if job.status != JobStatus::Pending {
                return Err(MessengerError::JobNotCancellable {
                    id,
                    status: job.status,
                });
            }
            job.status = JobStatus::Cancelled;
            job.completed_at = Some(Utc::now());
            let snapshot = job.clone();
            let media = owned_media(&snapshot);
            self.prune_history(&mut jobs);
            (snapshot, media)
        };

        tracing::info!("Cancelled job {}", id);
        remove_media(media).await;
        Ok(job)
    }

    pub fn get(&self, id: JobId) -> Option<DispatchJob> {
        self.lock().get(&id).cloned()
    }

    /// Snapshot of all jobs in firing order.
    pub fn list_jobs(&self) -> Vec<DispatchJob> {
        let mut jobs: Vec<DispatchJob> = self.lock().values().cloned().collect();
        jobs.sort_by_key(|j| (j.fire_at, j.id));
        jobs
    }

    /// Start every pending job due at `now`.
    ///
    /// Due jobs are marked `Firing` in one pass under the lock, in
    /// `(fire_at, id)` order, and each is delivered on its own task.
    pub fn fire_due(self: &Arc<Self>, now: DateTime<Utc>) -> Vec<(JobId, JoinHandle<()>)> {
        let due: Vec<(JobId, Vec<RecipientAddress>, Payload)> = {
            let mut jobs = self.lock();
            let mut due: Vec<&mut DispatchJob> = jobs
                .values_mut()
                .filter(|j| j.status == JobStatus::Pending && j.fire_at <= now)
                .collect();
            due.sort_by_key(|j| (j.fire_at, j.id));
            due.into_iter()
                .map(|job| {
                    job.status = JobStatus::Firing;
                    (job.id, job.recipients.clone(), job.payload.clone())
                })
                .collect()
        };

        due.into_iter()
            .map(|(id, recipients, payload)| {
                tracing::info!("Firing job {} ({} recipient(s))", id, recipients.len());
                let scheduler = Arc::clone(self);
                let handle = tokio::spawn(async move {
                    let failures = fan_out(scheduler.sender.as_ref(), &recipients, &payload).await;
                    scheduler.finish(id, failures).await;
                });
                (id, handle)
            })
            .collect()
    }

    async fn finish(&self, id: JobId, failures: Vec<RecipientFailure>) {
        let media = {
            let mut jobs = self.lock();
            let Some(job) = jobs.get_mut(&id) else {
                return;
            };
            job.status = if failures.is_empty() {
                JobStatus::Sent
            } else {
                JobStatus::Failed
            };
            job.completed_at = Some(Utc::now());
            job.failures = failures;
            tracing::info!("Job {} finished: {}", id, job.summary());
            let media = owned_media(job);
            self.prune_history(&mut jobs);
            media
        };
        remove_media(media).await;
    }

    /// Drop the oldest terminal jobs beyond the history limit.
    fn prune_history(&self, jobs: &mut BTreeMap<JobId, DispatchJob>) {
        let mut terminal: Vec<(Option<DateTime<Utc>>, JobId)> = jobs
            .values()
            .filter(|j| j.status.is_terminal())
            .map(|j| (j.completed_at, j.id))
            .collect();
        if terminal.len() <= self.history_limit {
            return;
        }
        terminal.sort();
        let excess = terminal.len() - self.history_limit;
        for (_, id) in terminal.into_iter().take(excess) {
            jobs.remove(&id);
        }
        tracing::debug!("Pruned {} finished job(s) from history", excess);
    }

    /// Tick until `cancel` fires.
    pub async fn run(self: Arc<Self>, tick: Duration, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!("Dispatch scheduler running (tick {:?})", tick);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    // Delivery runs detached; the tick never waits on it
                    let _ = self.fire_due(Utc::now());
                }
            }
        }
        tracing::info!("Dispatch scheduler stopped");
    }
}

fn owned_media(job: &DispatchJob) -> Option<PathBuf> {
    if !job.owns_media {
        return None;
    }
    job.payload.media().map(|m| m.path.clone())
}

async fn remove_media(path: Option<PathBuf>) {
    let Some(path) = path else {
        return;
    };
    match tokio::fs::remove_file(&path).await {
        Ok(()) => tracing::debug!("Removed job media {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove job media {}: {}", path.display(), e),
    }
}
