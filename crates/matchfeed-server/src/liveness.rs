use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::connection::SendError;
use crate::hub::ConnectionHub;

/// Outcome of one heartbeat sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub pinged: usize,
    pub terminated: usize,
}

/// Two-phase mark/sweep over open connections. A connection that has not
/// answered the previous sweep's ping is terminated on this one.
pub struct LivenessMonitor {
    hub: Arc<ConnectionHub>,
    interval: Duration,
}

impl LivenessMonitor {
    pub fn new(hub: Arc<ConnectionHub>, interval: Duration) -> Self {
        Self { hub, interval }
    }

    pub fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        for conn in self.hub.open_connections() {
            if !conn.take_alive() {
                self.hub.terminate(&conn, "heartbeat timeout");
                report.terminated += 1;
                continue;
            }
            match conn.ping() {
                Ok(()) | Err(SendError::QueueFull) => report.pinged += 1,
                Err(SendError::Disconnected) => {
                    self.hub.terminate(&conn, "send failed");
                    report.terminated += 1;
                }
                Err(SendError::NotOpen | SendError::Encode) => {}
            }
        }
        report
    }

    /// Sweep every interval until `shutdown` fires. The first sweep happens
    /// one full interval after start.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + self.interval;
            let mut ticker = tokio::time::interval_at(start, self.interval);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let report = self.sweep();
                        if report.terminated > 0 {
                            tracing::info!(terminated = report.terminated, pinged = report.pinged, "heartbeat sweep");
                        } else {
                            tracing::trace!(pinged = report.pinged, "heartbeat sweep");
                        }
                    }
                }
            }
            tracing::debug!("liveness monitor stopped");
        })
    }
}
