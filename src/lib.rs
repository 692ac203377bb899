//! Core library for the ripping service (spec §1-§9). The `Service` facade
//! is the one entry point collaborators (a future HTTP/WS adapter, a CLI) are
//! meant to hold; everything else in this crate is an implementation detail
//! reached only through it or through `main.rs`'s wiring.

pub mod config;
pub mod drive;
pub mod error;
pub mod host;
pub mod job;
pub mod mkv;
pub mod planner;
pub mod progress;
pub mod registry;
pub mod runner;
pub mod sanitize;
pub mod step;
pub mod store;
pub mod telemetry;
pub mod watcher;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

use config::Config;
use drive::{classify, Drive, DiscKind};
use error::{CoreError, CoreResult};
use job::Job;
use registry::DriveRegistry;
use runner::{RunnerContext, RunnerHandle};
use store::JobStore;
use telemetry::{TelemetryHub, TelemetryMessage};
use watcher::WatcherEvent;

/// Snapshot of one drive exposed to collaborators (spec §6: "Per-drive list
/// snapshot available on demand").
#[derive(Debug, Clone, serde::Serialize)]
pub struct DriveSnapshot {
    pub path: Option<String>,
    pub logical_id: String,
    pub model: String,
    pub capability: Vec<drive::Capability>,
    pub job_id: Option<Uuid>,
    pub disc_label: Option<String>,
    pub blacklisted: bool,
}

impl From<Drive> for DriveSnapshot {
    fn from(drive: Drive) -> Self {
        DriveSnapshot {
            path: drive.device_path,
            logical_id: drive.logical_id,
            model: drive.model,
            capability: drive.capability.into_iter().collect(),
            job_id: drive.job_id,
            disc_label: drive.disc_label,
            blacklisted: drive.blacklisted,
        }
    }
}

/// Bundles the Drive Registry, Job Store, Telemetry Hub, Platform Probe and
/// configuration, and exposes the operations spec §6 lists. One instance per
/// running process; `main.rs` owns it and also drives the Watcher Loop that
/// calls back into it via [`Service::handle_watcher_event`].
pub struct Service {
    config: Arc<Config>,
    registry: Arc<DriveRegistry>,
    store: Arc<JobStore>,
    hub: Arc<TelemetryHub>,
    host: Arc<dyn host::HostOps>,
    runners: Mutex<HashMap<Uuid, RunnerHandle>>,
}

impl Service {
    pub fn new(config: Config, host: Arc<dyn host::HostOps>) -> Self {
        let store = JobStore::new(config.general.tempdirectory.clone());
        Service {
            config: Arc::new(config),
            registry: Arc::new(DriveRegistry::new()),
            store: Arc::new(store),
            hub: Arc::new(TelemetryHub::new()),
            host,
            runners: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn host(&self) -> Arc<dyn host::HostOps> {
        self.host.clone()
    }

    pub fn registry(&self) -> Arc<DriveRegistry> {
        self.registry.clone()
    }

    fn runner_context(&self) -> RunnerContext {
        RunnerContext {
            store: self.store.clone(),
            registry: self.registry.clone(),
            hub: self.hub.clone(),
            config: self.config.clone(),
        }
    }

    /// spec §6: `create_job(disc_kind, drive_id, label, temp_dir_root, output_root)`.
    /// Assigns the drive in the Registry (failing if it is already taken),
    /// creates the Job Store record, then spawns the Runner at step 1.
    pub fn create_job(&self, disc_kind: DiscKind, drive_id: Option<String>, label: String) -> CoreResult<Job> {
        if let Some(logical_id) = drive_id.as_deref() {
            let drive = self.registry.get(logical_id)?;
            if !drive.is_available() {
                return Err(CoreError::precondition(format!("drive {logical_id} is not available")));
            }
        }

        let output_root = self.config.output_root_for(disc_kind);
        let output_path = initial_output_path(disc_kind, &output_root, &label);
        let job = self.store.create_job(disc_kind, drive_id.clone(), label, output_path);

        if let Some(logical_id) = drive_id.as_deref() {
            self.registry.assign_job(logical_id, job.id);
        }

        self.spawn_runner(job.id, 1, 0.0);
        Ok(job)
    }

    fn spawn_runner(&self, job_id: Uuid, start_index: usize, total_done_weight: f64) {
        let handle = runner::spawn(self.runner_context(), self.host.clone(), job_id, start_index, total_done_weight);
        self.runners.lock().expect("runner table lock").insert(job_id, handle);
    }

    pub fn get_job(&self, id: Uuid) -> CoreResult<Job> {
        self.store.get(id).ok_or_else(|| CoreError::not_found(format!("no job with id {id}")))
    }

    pub fn list_jobs(&self) -> Vec<Job> {
        self.store.list()
    }

    /// spec §6: `cancel_job`. Signals the owning Runner if one is tracked
    /// (the common case); falls back to marking the Job Store record
    /// Cancelled directly for a job that was bootstrapped Paused and never
    /// got a Runner spawned for it.
    pub fn cancel_job(&self, id: Uuid) -> CoreResult<Job> {
        let handle = self.runners.lock().expect("runner table lock").get(&id).cloned();
        match handle {
            Some(handle) => {
                handle.cancel();
                self.get_job(id)
            }
            None => self.store.cancel(id),
        }
    }

    pub fn remove_job(&self, id: Uuid, nuke_temp: bool) -> CoreResult<()> {
        let job = self.get_job(id)?;
        if !job.is_terminal() {
            return Err(CoreError::precondition("job must reach a terminal state before it can be removed"));
        }
        self.runners.lock().expect("runner table lock").remove(&id);
        self.store.remove(id, nuke_temp)
    }

    /// spec §6: `set_output(job, new_path)`.
    pub fn set_output(&self, id: Uuid, new_path: PathBuf) -> CoreResult<Job> {
        let mut job = self.get_job(id)?;
        job.set_output(new_path)?;
        self.store.update(job.clone());
        self.hub.publish_tick(&job);
        Ok(job)
    }

    /// spec §6: `retry(job)` — legal only if `job.step >= 2` and not
    /// currently Running.
    pub fn retry(&self, id: Uuid) -> CoreResult<Job> {
        let job = self.get_job(id)?;
        if !job.can_retry() {
            return Err(CoreError::precondition("job must have completed at least one step and not be running to retry"));
        }
        let start_index = job.retry_start_index();
        let total_done_weight = planner::plan(&job, &self.config).iter().take(start_index - 1).map(|s| s.weight).sum();
        self.spawn_runner(id, start_index, total_done_weight);
        Ok(job)
    }

    /// spec §6: `subscribe(job) -> telemetry stream`.
    pub fn subscribe(&self, id: Uuid) -> tokio::sync::broadcast::Receiver<TelemetryMessage> {
        self.hub.subscribe(id)
    }

    /// spec §6: per-drive list snapshot.
    pub fn list_drives(&self) -> Vec<DriveSnapshot> {
        self.registry.all().into_iter().map(DriveSnapshot::from).collect()
    }

    /// Consumes one event from the Watcher Loop (spec §4.4), turning a
    /// `DiscInserted` into an auto-created job and a `DriveDetached` into a
    /// cancellation of whatever job was bound to that drive.
    pub fn handle_watcher_event(&self, event: WatcherEvent) {
        match event {
            WatcherEvent::DiscInserted { logical_id, snapshot } => {
                let kind = classify(&snapshot);
                if kind == DiscKind::Unknown {
                    log::warn!("watcher: disc in {logical_id} could not be classified, skipping");
                    return;
                }
                let label = snapshot.label.clone().unwrap_or_else(|| logical_id.clone());
                log::info!("auto-creating {kind} job for drive {logical_id} (label {label:?})");
                if let Err(err) = self.create_job(kind, Some(logical_id.clone()), label) {
                    log::error!("could not auto-create job for drive {logical_id}: {err}");
                }
            }
            WatcherEvent::DiscRemoved { logical_id } => {
                log::info!("disc removed from drive {logical_id}");
            }
            WatcherEvent::DriveDetached { logical_id, job_id } => {
                // The watcher already unregistered the drive by the time this
                // event is handled, so the bound job id travels with the
                // event itself rather than being looked up in the Registry.
                if let Some(job_id) = job_id {
                    log::warn!("drive {logical_id} detached while job {job_id} was active, cancelling");
                    let _ = self.cancel_job(job_id);
                }
            }
        }
    }

    /// Cancels every Runner with a live handle and closes their Telemetry
    /// brokers (spec §5: "Graceful shutdown of the whole service cancels all
    /// Runners and closes all Telemetry brokers").
    pub fn shutdown(&self) {
        let handles: Vec<RunnerHandle> = self.runners.lock().expect("runner table lock").values().cloned().collect();
        for handle in handles {
            handle.cancel();
        }
    }

    pub fn job_is_terminal(&self, id: Uuid) -> bool {
        self.store.get(id).map(|job| job.is_terminal()).unwrap_or(true)
    }
}

/// Drains watcher events and applies them to `service` until the channel
/// closes (i.e. the Watcher Loop task was aborted). Kept separate from
/// `watcher::run` so the event-consumption policy lives with the `Service`
/// that owns the side effects, not with the polling loop itself.
pub async fn drive_watcher_events(service: Arc<Service>, mut events: UnboundedReceiver<WatcherEvent>) {
    while let Some(event) = events.recv().await {
        service.handle_watcher_event(event);
    }
}

/// The `output_path` a freshly created job starts with, before any step has
/// run or any rename has been applied (spec §4.5, scenarios 1-2). ROM/other
/// kinds resolve to a single final *file* named from the label, so
/// `output_path` starts at the output root itself — `planner::resolve_rom_destination`
/// treats an extension-less `output_path` as the base directory it builds
/// `<label>.iso[.zst|.bz2]` under, and a `<label>` path component here would
/// introduce a spurious extra directory level. Video/audio kinds land in a
/// directory named after the label instead.
fn initial_output_path(disc_kind: DiscKind, output_root: &std::path::Path, label: &str) -> PathBuf {
    if disc_kind.is_rom_like() {
        output_root.to_path_buf()
    } else {
        output_root.join(sanitize::sanitize(label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_output_path_for_rom_kind_is_the_output_root_itself() {
        let root = PathBuf::from("/out");
        assert_eq!(initial_output_path(DiscKind::DvdRom, &root, "MyDisc"), root);
    }

    #[test]
    fn initial_output_path_for_video_kind_appends_the_sanitized_label() {
        let root = PathBuf::from("/out");
        assert_eq!(initial_output_path(DiscKind::DvdVideo, &root, "My:Disc"), root.join("MyDisc"));
    }

    #[test]
    fn initial_output_path_for_audio_kind_appends_the_sanitized_label() {
        let root = PathBuf::from("/out");
        assert_eq!(initial_output_path(DiscKind::CdAudio, &root, "My Disc"), root.join("My Disc"));
    }
}
