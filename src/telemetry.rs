//! Telemetry Hub (spec §4.9), grounded on `original_source/app/api/ws_log.py`'s
//! `snapshot()`/heartbeat shape, rebuilt on `tokio::sync::broadcast` instead
//! of per-connection asyncio queues: a bounded broadcast channel already
//! drops the oldest message and tells lagging receivers so via
//! `RecvError::Lagged`, which is exactly the "drop-oldest, inject a lag
//! marker" contract spec.md asks for.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::job::{Job, JobStatus};
use crate::store::JobStore;

/// Per-subscription channel depth before the broadcast channel starts
/// dropping the oldest unread message.
pub const CHANNEL_CAPACITY: usize = 256;
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(500);

/// The fields every message carries, matching the `<tick fields>` spec.md
/// says both `tick` and `log` messages share.
#[derive(Debug, Clone, Serialize)]
pub struct TickFields {
    pub progress: u8,
    pub step_progress: u8,
    pub title_progress: u8,
    pub status: JobStatus,
    pub step_description: String,
    pub output_path: std::path::PathBuf,
    pub output_locked: bool,
}

impl TickFields {
    pub fn of(job: &Job) -> Self {
        TickFields {
            progress: job.total_progress,
            step_progress: job.step_progress,
            title_progress: job.title_progress,
            status: job.status,
            step_description: job.step_description.clone(),
            output_path: job.output_path.clone(),
            output_locked: job.output_locked,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TelemetryMessage {
    Tick(TickFields),
    Log {
        line: String,
        #[serde(flatten)]
        fields: TickFields,
    },
    /// Synthetic marker a subscriber sees in place of messages the broadcast
    /// channel already dropped because the subscriber fell behind.
    Lag {
        dropped: u64,
    },
}

/// Per-job pub/sub broker (spec §4.9). One broadcast sender per job,
/// created lazily on first `subscribe`/`publish` and torn down in `close`.
pub struct TelemetryHub {
    channels: Mutex<HashMap<Uuid, broadcast::Sender<TelemetryMessage>>>,
}

impl TelemetryHub {
    pub fn new() -> Self {
        TelemetryHub { channels: Mutex::new(HashMap::new()) }
    }

    fn sender(&self, job_id: Uuid) -> broadcast::Sender<TelemetryMessage> {
        let mut channels = self.channels.lock().expect("telemetry hub lock");
        channels
            .entry(job_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    pub fn subscribe(&self, job_id: Uuid) -> broadcast::Receiver<TelemetryMessage> {
        self.sender(job_id).subscribe()
    }

    /// Fan out a progress snapshot. Best-effort: a job with no current
    /// subscribers still gets a sender allocated, and `send` erroring with
    /// no receivers is silently ignored (spec §7: telemetry publish
    /// failures are swallowed).
    pub fn publish_tick(&self, job: &Job) {
        let _ = self.sender(job.id).send(TelemetryMessage::Tick(TickFields::of(job)));
    }

    pub fn publish_log(&self, job: &Job, line: impl Into<String>) {
        let _ = self.sender(job.id).send(TelemetryMessage::Log { line: line.into(), fields: TickFields::of(job) });
    }

    /// Sends a final tick reflecting the terminal status, then drops the
    /// channel so no further subscriptions can be created for this job.
    pub fn close(&self, job: &Job) {
        self.publish_tick(job);
        self.channels.lock().expect("telemetry hub lock").remove(&job.id);
    }
}

impl Default for TelemetryHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Translates a lagged receiver into the synthetic `Lag` marker instead of
/// surfacing `RecvError` to callers; returns `None` once the channel closes
/// (terminal status reached and `close()` ran).
pub async fn recv_lossy(rx: &mut broadcast::Receiver<TelemetryMessage>) -> Option<TelemetryMessage> {
    match rx.recv().await {
        Ok(msg) => Some(msg),
        Err(broadcast::error::RecvError::Lagged(dropped)) => Some(TelemetryMessage::Lag { dropped }),
        Err(broadcast::error::RecvError::Closed) => None,
    }
}

/// Spawns the per-job heartbeat (spec §4.7/§4.9: "a periodic heartbeat every
/// 500 ms publishes a progress snapshot"), stopping and closing the broker
/// once the job's status is terminal.
pub fn spawn_heartbeat(hub: std::sync::Arc<TelemetryHub>, store: std::sync::Arc<JobStore>, job_id: Uuid) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(HEARTBEAT_INTERVAL).await;
            let Some(job) = store.get(job_id) else {
                return;
            };
            if job.status.is_terminal() {
                hub.close(&job);
                return;
            }
            hub.publish_tick(&job);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::DiscKind;
    use std::path::PathBuf;

    fn sample_job() -> Job {
        Job::new(DiscKind::CdRom, Some("DRIVE0".into()), "Disc".into(), std::path::Path::new("/tmp/spindle"), PathBuf::from("/out/Disc.iso"))
    }

    #[test]
    fn publish_tick_is_delivered_to_subscriber() {
        let hub = TelemetryHub::new();
        let job = sample_job();
        let mut rx = hub.subscribe(job.id);
        hub.publish_tick(&job);
        let msg = rx.try_recv().expect("message should be queued");
        assert!(matches!(msg, TelemetryMessage::Tick(_)));
    }

    #[test]
    fn close_removes_the_channel_so_new_subscribers_get_nothing_future() {
        let hub = TelemetryHub::new();
        let mut job = sample_job();
        job.status = JobStatus::Finished;
        let mut rx = hub.subscribe(job.id);
        hub.close(&job);
        assert!(rx.try_recv().is_ok()); // the final tick sent before closing
        // channel is gone; a fresh subscribe gets a brand new, independent sender
        assert!(hub.channels.lock().unwrap().is_empty());
    }
}
