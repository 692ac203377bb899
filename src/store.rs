//! Job Store (spec §4.8, §2 item 5), grounded on
//! `original_source/app/core/job/tracker.py::JobTracker` for the
//! create/get/list/cancel/remove/bootstrap shape and on
//! `job.py::save_state`/`load_state` for the `state.json` schema. Uses the
//! single-mutex-per-collection style `registry.rs` already established in
//! this crate rather than the teacher's `Vec<Arc<RwLock<Job>>>`
//! (`state/background_process_state.rs`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use uuid::Uuid;

use crate::drive::DiscKind;
use crate::error::CoreError;
use crate::job::{Job, JobStatus};

pub const STATE_FILENAME: &str = "state.json";

/// On-disk shape of `state.json` (spec §4.8). A superset of `Job`'s fields;
/// anything this crate doesn't interpret round-trips through `extras`
/// (§SUPPLEMENTED FEATURES: "state.json extra fields preserved verbatim").
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct PersistedState {
    job_id: Uuid,
    disc_type: DiscKind,
    disc_label: String,
    drive: Option<String>,
    status: JobStatus,
    progress: u8,
    step: usize,
    steps_total: usize,
    step_description: String,
    step_progress: u8,
    title_progress: u8,
    output_path: PathBuf,
    override_filename: Option<String>,
    output_locked: bool,
    imdb_id: Option<String>,
    season: Option<u32>,
    created_at: u64,
    timestamp: u64,
    #[serde(default)]
    extras: serde_json::Map<String, serde_json::Value>,
}

impl PersistedState {
    fn from_job(job: &Job) -> Self {
        PersistedState {
            job_id: job.id,
            disc_type: job.disc_kind,
            disc_label: job.disc_label.clone(),
            drive: job.drive_id.clone(),
            status: job.status,
            progress: job.total_progress,
            step: job.step,
            steps_total: job.steps_total,
            step_description: job.step_description.clone(),
            step_progress: job.step_progress,
            title_progress: job.title_progress,
            output_path: job.output_path.clone(),
            override_filename: job.override_filename.clone(),
            output_locked: job.output_locked,
            imdb_id: job.imdb_id.clone(),
            season: job.season,
            created_at: job.created_at,
            timestamp: job.updated_at,
            extras: job.metadata.clone(),
        }
    }

    fn into_job(self, temp_path: PathBuf) -> Job {
        Job {
            id: self.job_id,
            disc_kind: self.disc_type,
            drive_id: self.drive,
            disc_label: self.disc_label,
            temp_path,
            output_path: self.output_path,
            override_filename: self.override_filename,
            steps_total: self.steps_total,
            step: self.step,
            step_description: self.step_description,
            step_progress: self.step_progress,
            title_progress: self.title_progress,
            total_progress: self.progress,
            status: self.status,
            output_locked: self.output_locked,
            imdb_id: self.imdb_id,
            metadata: self.extras,
            season: self.season,
            created_at: self.created_at,
            updated_at: self.timestamp,
            recent_log: std::collections::VecDeque::new(),
        }
    }
}

pub struct JobStore {
    temp_root: PathBuf,
    jobs: Mutex<HashMap<Uuid, Job>>,
}

impl JobStore {
    /// Opens the store and runs bootstrap (spec §4.8): each subdirectory of
    /// `temp_root` with a parseable `state.json` becomes a resurrected job,
    /// demoted to `Paused` if it was `Running`/`Queued` when last written;
    /// subdirectories with an unparseable `state.json` are deleted.
    pub fn new(temp_root: PathBuf) -> Self {
        let store = JobStore { temp_root, jobs: Mutex::new(HashMap::new()) };
        store.bootstrap();
        store
    }

    fn bootstrap(&self) {
        let Ok(entries) = std::fs::read_dir(&self.temp_root) else {
            return;
        };

        let mut jobs = self.jobs.lock().expect("job store lock");
        for entry in entries.flatten() {
            let dir = entry.path();
            if !dir.is_dir() {
                continue;
            }
            let state_path = dir.join(STATE_FILENAME);
            if !state_path.exists() {
                continue;
            }

            let parsed = std::fs::read_to_string(&state_path).ok().and_then(|text| serde_json::from_str::<PersistedState>(&text).ok());

            match parsed {
                Some(mut state) => {
                    if matches!(state.status, JobStatus::Running | JobStatus::Queued) {
                        log::info!("bootstrap: demoting job {} from {:?} to Paused", state.job_id, state.status);
                        state.status = JobStatus::Paused;
                    }
                    let job = state.into_job(dir.clone());
                    jobs.insert(job.id, job);
                }
                None => {
                    log::warn!("bootstrap: removing unparseable job directory {}", dir.display());
                    let _ = std::fs::remove_dir_all(&dir);
                }
            }
        }
    }

    pub fn create_job(&self, disc_kind: DiscKind, drive_id: Option<String>, disc_label: String, output_path: PathBuf) -> Job {
        let job = Job::new(disc_kind, drive_id, disc_label, &self.temp_root, output_path);
        if let Err(err) = self.persist(&job) {
            log::warn!("could not persist new job {}: {err}", job.id);
        }
        self.jobs.lock().expect("job store lock").insert(job.id, job.clone());
        job
    }

    pub fn get(&self, id: Uuid) -> Option<Job> {
        self.jobs.lock().expect("job store lock").get(&id).cloned()
    }

    pub fn list(&self) -> Vec<Job> {
        self.jobs.lock().expect("job store lock").values().cloned().collect()
    }

    /// Replaces the in-memory record and persists it. The owning Runner is
    /// the only expected caller for a non-terminal job (spec §5).
    pub fn update(&self, job: Job) {
        if let Err(err) = self.persist(&job) {
            log::warn!("could not persist job {}: {err}", job.id);
        }
        self.jobs.lock().expect("job store lock").insert(job.id, job);
    }

    pub fn cancel(&self, id: Uuid) -> Result<Job, CoreError> {
        let mut jobs = self.jobs.lock().expect("job store lock");
        let job = jobs.get_mut(&id).ok_or_else(|| CoreError::not_found(format!("no job with id {id}")))?;
        job.status = JobStatus::Cancelled;
        job.touch();
        let snapshot = job.clone();
        drop(jobs);
        if let Err(err) = self.persist(&snapshot) {
            log::warn!("could not persist cancelled job {id}: {err}");
        }
        Ok(snapshot)
    }

    pub fn remove(&self, id: Uuid, nuke_temp: bool) -> Result<(), CoreError> {
        let job = self.jobs.lock().expect("job store lock").remove(&id).ok_or_else(|| CoreError::not_found(format!("no job with id {id}")))?;
        if nuke_temp {
            let _ = std::fs::remove_dir_all(&job.temp_path);
        }
        Ok(())
    }

    /// Write-then-rename (spec §4.8): the writer never leaves a partial file
    /// that fails to parse, since the rename is atomic on the same filesystem.
    pub fn persist(&self, job: &Job) -> std::io::Result<()> {
        std::fs::create_dir_all(&job.temp_path)?;
        let state = PersistedState::from_job(job);
        let json = serde_json::to_string_pretty(&state).map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
        let tmp_path = job.temp_path.join(format!("{STATE_FILENAME}.tmp"));
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, job.temp_path.join(STATE_FILENAME))?;
        Ok(())
    }

    pub fn temp_root(&self) -> &Path {
        &self.temp_root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_job_writes_a_parseable_state_file() {
        let dir = tempdir().unwrap();
        let store = JobStore::new(dir.path().to_path_buf());
        let job = store.create_job(DiscKind::DvdVideo, Some("DRIVE0".into()), "MyDisc".into(), PathBuf::from("/out/MyDisc"));
        let state_path = job.temp_path.join(STATE_FILENAME);
        assert!(state_path.exists());
        let text = std::fs::read_to_string(state_path).unwrap();
        let parsed: PersistedState = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.job_id, job.id);
        assert_eq!(parsed.status, JobStatus::Queued);
    }

    #[test]
    fn bootstrap_demotes_running_and_queued_jobs_to_paused() {
        let dir = tempdir().unwrap();
        let job_id = Uuid::new_v4();
        let job_dir = dir.path().join(job_id.to_string());
        std::fs::create_dir_all(&job_dir).unwrap();
        let state = PersistedState {
            job_id,
            disc_type: DiscKind::DvdRom,
            disc_label: "MyDisc".into(),
            drive: Some("DRIVE0".into()),
            status: JobStatus::Running,
            progress: 45,
            step: 1,
            steps_total: 2,
            step_description: "Creating ISO image".into(),
            step_progress: 70,
            title_progress: 0,
            output_path: PathBuf::from("/out/MyDisc.iso"),
            override_filename: None,
            output_locked: false,
            imdb_id: None,
            season: None,
            created_at: 0,
            timestamp: 0,
            extras: serde_json::Map::new(),
        };
        std::fs::write(job_dir.join(STATE_FILENAME), serde_json::to_string(&state).unwrap()).unwrap();

        let store = JobStore::new(dir.path().to_path_buf());
        let job = store.get(job_id).expect("bootstrapped job");
        assert_eq!(job.status, JobStatus::Paused);
        assert_eq!(job.step_progress, 70);
    }

    #[test]
    fn bootstrap_removes_a_directory_whose_state_json_does_not_parse() {
        let dir = tempdir().unwrap();
        let job_dir = dir.path().join("corrupt-job");
        std::fs::create_dir_all(&job_dir).unwrap();
        std::fs::write(job_dir.join(STATE_FILENAME), b"not json").unwrap();

        let _store = JobStore::new(dir.path().to_path_buf());
        assert!(!job_dir.exists());
    }

    #[test]
    fn cancel_sets_terminal_status_and_persists() {
        let dir = tempdir().unwrap();
        let store = JobStore::new(dir.path().to_path_buf());
        let job = store.create_job(DiscKind::CdRom, None, "Disc".into(), PathBuf::from("/out/Disc.iso"));
        let cancelled = store.cancel(job.id).unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
        assert_eq!(store.get(job.id).unwrap().status, JobStatus::Cancelled);
    }

    #[test]
    fn remove_deletes_temp_tree_when_nuke_requested() {
        let dir = tempdir().unwrap();
        let store = JobStore::new(dir.path().to_path_buf());
        let job = store.create_job(DiscKind::CdRom, None, "Disc".into(), PathBuf::from("/out/Disc.iso"));
        assert!(job.temp_path.exists());
        store.remove(job.id, true).unwrap();
        assert!(!job.temp_path.exists());
        assert!(store.get(job.id).is_none());
    }
}
