//! Timer queue that drives deliveries through their stages.
//!
//! Nothing here is authoritative: every deadline is derived from the
//! delivery row (creation time plus the stage table), so a restarted
//! process reloads the in-progress deliveries and carries on from the
//! stored step.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::delivery_service::DeliveryService;
use super::run_blocking;
use crate::domain::errors::DomainError;
use crate::domain::ports::DeliveryRepository;

/// Upper bound on a single idle wait, so clock drift is noticed.
const MAX_IDLE: Duration = Duration::from_secs(60);
/// Delay before retrying a stage whose write failed.
const RETRY_DELAY_SECS: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scheduled {
    pub delivery_id: Uuid,
    pub due_at: DateTime<Utc>,
}

/// Cheap, cloneable registration side of the scheduler. Registering never
/// blocks the caller.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<Scheduled>,
}

impl SchedulerHandle {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Scheduled>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn register(&self, delivery_id: Uuid, due_at: DateTime<Utc>) {
        if self.tx.send(Scheduled { delivery_id, due_at }).is_err() {
            // The row is persisted; a restart will pick it up.
            warn!("Scheduler stopped; delivery {delivery_id} will resume on restart");
        }
    }
}

pub struct ProgressScheduler<R> {
    service: Arc<DeliveryService<R>>,
    rx: mpsc::UnboundedReceiver<Scheduled>,
    queue: BinaryHeap<Reverse<(DateTime<Utc>, Uuid)>>,
    /// Earliest live due time per delivery; heap entries that disagree are stale.
    queued: HashMap<Uuid, DateTime<Utc>>,
}

impl<R: DeliveryRepository> ProgressScheduler<R> {
    pub fn new(service: Arc<DeliveryService<R>>, rx: mpsc::UnboundedReceiver<Scheduled>) -> Self {
        Self {
            service,
            rx,
            queue: BinaryHeap::new(),
            queued: HashMap::new(),
        }
    }

    /// Deliveries waiting for their next stage.
    pub fn pending(&self) -> usize {
        self.queued.len()
    }

    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.queue.peek().map(|Reverse((due, _))| *due)
    }

    /// Queue `delivery_id`, keeping one entry per delivery. A registration
    /// that is not earlier than the one already queued is dropped.
    fn push(&mut self, delivery_id: Uuid, due_at: DateTime<Utc>) {
        if matches!(self.queued.get(&delivery_id), Some(queued) if *queued <= due_at) {
            return;
        }
        self.queued.insert(delivery_id, due_at);
        self.queue.push(Reverse((due_at, delivery_id)));
        self.discard_stale();
    }

    /// Pop superseded entries off the top of the heap.
    fn discard_stale(&mut self) {
        while let Some(Reverse((due, id))) = self.queue.peek() {
            if self.queued.get(id) == Some(due) {
                break;
            }
            self.queue.pop();
        }
    }

    /// Load every unfinished delivery from storage.
    pub async fn resume(&mut self) -> Result<usize, DomainError> {
        let service = self.service.clone();
        let entries = run_blocking(move || service.resumable()).await?;
        let count = entries.len();
        for (id, due) in entries {
            self.push(id, due);
        }
        info!("Resumed {count} in-progress deliveries");
        Ok(count)
    }

    /// Drain registrations that are already waiting in the channel.
    pub fn accept_registrations(&mut self) -> usize {
        let mut accepted = 0;
        while let Ok(s) = self.rx.try_recv() {
            self.push(s.delivery_id, s.due_at);
            accepted += 1;
        }
        accepted
    }

    /// Apply every stage whose deadline is at or before `now`. Overdue
    /// deliveries step through each stage in turn, one event per stage.
    /// Returns how many queue entries were processed.
    pub async fn fire_due(&mut self, now: DateTime<Utc>) -> usize {
        let mut processed = 0;
        self.discard_stale();
        while let Some(Reverse((due, delivery_id))) = self.queue.peek().copied() {
            if due > now {
                break;
            }
            self.queue.pop();
            self.queued.remove(&delivery_id);

            let service = self.service.clone();
            let outcome =
                tokio::task::spawn_blocking(move || service.advance(delivery_id, now)).await;
            match outcome {
                Ok(Ok(Some(next_due))) => {
                    processed += 1;
                    self.push(delivery_id, next_due);
                }
                Ok(Ok(None)) => {
                    processed += 1;
                    info!("Delivery {delivery_id} completed its progression");
                    self.discard_stale();
                }
                Ok(Err(e)) if e.is_retryable() => {
                    warn!("Delivery {delivery_id} stage failed, retrying: {e}");
                    self.push(delivery_id, now + chrono::Duration::seconds(RETRY_DELAY_SECS));
                    // Leave the remaining due work for the next tick.
                    break;
                }
                Ok(Err(e)) => {
                    error!("Dropping delivery {delivery_id} from schedule: {e}");
                    self.discard_stale();
                }
                Err(e) => {
                    error!("Advance task for {delivery_id} panicked: {e}");
                    self.push(delivery_id, now + chrono::Duration::seconds(RETRY_DELAY_SECS));
                    break;
                }
            }
        }
        processed
    }

    /// Runs for the life of the process.
    pub async fn run(mut self) {
        while let Err(e) = self.resume().await {
            error!("Failed to load in-progress deliveries, retrying in {RETRY_DELAY_SECS}s: {e}");
            tokio::time::sleep(Duration::from_secs(RETRY_DELAY_SECS as u64)).await;
        }
        let mut open = true;

        loop {
            let wait = self
                .next_due()
                .map(|due| (due - Utc::now()).to_std().unwrap_or(Duration::ZERO))
                .unwrap_or(MAX_IDLE)
                .min(MAX_IDLE);

            tokio::select! {
                msg = self.rx.recv(), if open => match msg {
                    Some(s) => self.push(s.delivery_id, s.due_at),
                    None => {
                        warn!("Scheduler registrations closed; serving queued deliveries only");
                        open = false;
                    }
                },
                _ = tokio::time::sleep(wait) => {
                    self.fire_due(Utc::now()).await;
                }
            }
        }
    }
}
