//! Temporal replay: releases scheduled commentary rows once their time has
//! come, spreading each poll's batch across the poll window.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use matchfeed_core::Commentary;
use matchfeed_store::{CommentarySource, StoreError};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::broadcast::Broadcaster;

/// A row and its offset from the start of the poll that selected it.
#[derive(Clone, Debug, PartialEq)]
pub struct Release {
    pub delay: Duration,
    pub row: Commentary,
}

/// One poll's releases, timed from the instant that poll started.
#[derive(Debug)]
pub struct Batch {
    pub started: Instant,
    pub releases: Vec<Release>,
}

const DELIVERY_QUEUE: usize = 64;

pub struct ReplayEngine {
    source: Arc<dyn CommentarySource>,
    broadcaster: Broadcaster,
    /// Upper bound of the last window that was read successfully.
    checkpoint: Mutex<DateTime<Utc>>,
    poll_interval: Duration,
    window: Duration,
}

impl ReplayEngine {
    /// Rows scheduled at or before `start` are never replayed.
    pub fn new(
        source: Arc<dyn CommentarySource>,
        broadcaster: Broadcaster,
        poll_interval: Duration,
        window: Duration,
        start: DateTime<Utc>,
    ) -> Self {
        Self {
            source,
            broadcaster,
            checkpoint: Mutex::new(start),
            poll_interval,
            window,
        }
    }

    pub fn checkpoint(&self) -> DateTime<Utc> {
        *self.checkpoint.lock()
    }

    /// Read `(checkpoint, now]` and move the checkpoint to `now`. On error
    /// the checkpoint stays put so the next poll retries the same range.
    ///
    /// The checkpoint lock is held across the read, so overlapping polls
    /// cannot select the same row twice.
    pub fn poll_at(&self, now: DateTime<Utc>) -> Result<Vec<Release>, StoreError> {
        let mut checkpoint = self.checkpoint.lock();
        let since = *checkpoint;
        if now <= since {
            return Ok(Vec::new());
        }
        let rows = self.source.eligible(since, now)?;
        *checkpoint = now;
        Ok(spread(rows, self.window))
    }

    /// Broadcast each release at `started + delay`, in order. Stops early on
    /// shutdown. Returns how many rows were released.
    pub async fn deliver(
        broadcaster: &Broadcaster,
        releases: Vec<Release>,
        started: Instant,
        shutdown: &CancellationToken,
    ) -> usize {
        let mut released = 0;
        for Release { delay, row } in releases {
            tokio::select! {
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep_until(started + delay) => {}
            }
            let recipients = broadcaster.commentary(&row);
            tracing::debug!(
                match_id = %row.match_id,
                sequence = row.sequence,
                delay_ms = delay.as_millis() as u64,
                recipients,
                "released commentary"
            );
            released += 1;
        }
        released
    }

    /// Start the single task that releases batches in the order they were
    /// queued. A batch begins only after the previous one is fully released,
    /// so a late poll whose spread overruns the next poll cannot reorder a
    /// match's rows.
    pub fn spawn_delivery(
        broadcaster: Broadcaster,
        shutdown: CancellationToken,
    ) -> (mpsc::Sender<Batch>, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Batch>(DELIVERY_QUEUE);
        let handle = tokio::spawn(async move {
            loop {
                let batch = tokio::select! {
                    () = shutdown.cancelled() => break,
                    batch = rx.recv() => match batch {
                        Some(batch) => batch,
                        None => break,
                    },
                };
                let queued = batch.releases.len();
                let released =
                    Self::deliver(&broadcaster, batch.releases, batch.started, &shutdown).await;
                if released < queued {
                    tracing::debug!(released, dropped = queued - released, "replay delivery cancelled");
                    break;
                }
            }
        });
        (tx, handle)
    }

    /// Poll every interval until `shutdown` fires. Polling never waits on a
    /// spread; batches queue up for the delivery task instead.
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let (batches, delivery) =
                Self::spawn_delivery(self.broadcaster.clone(), shutdown.clone());
            let first = Instant::now() + self.poll_interval;
            let mut ticker = tokio::time::interval_at(first, self.poll_interval);
            tracing::info!(
                poll_ms = self.poll_interval.as_millis() as u64,
                window_ms = self.window.as_millis() as u64,
                "replay engine started"
            );
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(batch) = self.tick() else { continue };
                        if batches.send(batch).await.is_err() {
                            break;
                        }
                    }
                }
            }
            drop(batches);
            let _ = delivery.await;
            tracing::info!("replay engine stopped");
        })
    }

    fn tick(&self) -> Option<Batch> {
        let started = Instant::now();
        let now = Utc::now();
        match self.poll_at(now) {
            Ok(releases) if releases.is_empty() => None,
            Ok(releases) => {
                tracing::debug!(rows = releases.len(), until = %now, "replay batch");
                Some(Batch { started, releases })
            }
            Err(e) => {
                tracing::error!(error = %e, since = %self.checkpoint(), "replay poll failed, will retry");
                None
            }
        }
    }
}

/// The i-th of n rows is released at `(window / n) * i`.
pub fn release_delays(n: usize, window: Duration) -> Vec<Duration> {
    let Ok(count) = u32::try_from(n) else {
        return vec![Duration::ZERO; n];
    };
    if count == 0 {
        return Vec::new();
    }
    let step = window / count;
    (0..count).map(|i| step * i).collect()
}

fn spread(rows: Vec<Commentary>, window: Duration) -> Vec<Release> {
    release_delays(rows.len(), window)
        .into_iter()
        .zip(rows)
        .map(|(delay, row)| Release { delay, row })
        .collect()
}
