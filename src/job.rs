//! `Job` entity and state machine (spec §3, §4.7). Grounded on the shape of
//! the teacher's `state/job_state.rs::Job` (the `is_*()` predicate style, a
//! `Display` impl on the status enum, a bounded log ring) but built against
//! spec's six-state machine instead of the teacher's four-state
//! pending/processing/finished/error one, and without the TV/Movie
//! title-matching fields that belong to the (out-of-scope) metadata layer.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::SystemTime;
use uuid::Uuid;

use crate::drive::DiscKind;
use crate::error::CoreError;

pub const LOG_RING_CAPACITY: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum JobStatus {
    Queued,
    Running,
    Paused,
    Cancelled,
    Failed,
    Finished,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Finished | JobStatus::Failed | JobStatus::Cancelled)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Queued => "Queued",
            JobStatus::Running => "Running",
            JobStatus::Paused => "Paused",
            JobStatus::Cancelled => "Cancelled",
            JobStatus::Failed => "Failed",
            JobStatus::Finished => "Finished",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub disc_kind: DiscKind,
    pub drive_id: Option<String>,
    pub disc_label: String,
    pub temp_path: PathBuf,
    pub output_path: PathBuf,
    pub override_filename: Option<String>,
    pub steps_total: usize,
    pub step: usize,
    pub step_description: String,
    pub step_progress: u8,
    pub title_progress: u8,
    pub total_progress: u8,
    pub status: JobStatus,
    pub output_locked: bool,

    /// Opaque to the core; carried through for collaborators (metadata
    /// lookup, NFO writers) the way `imdb_id`/`metadata`/`season` were in
    /// the original `job.py` dataclass.
    #[serde(default)]
    pub imdb_id: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub season: Option<u32>,

    pub created_at: u64,
    pub updated_at: u64,

    #[serde(skip)]
    pub recent_log: VecDeque<String>,
}

impl Job {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        disc_kind: DiscKind,
        drive_id: Option<String>,
        disc_label: String,
        temp_root: &std::path::Path,
        output_path: PathBuf,
    ) -> Self {
        let id = Uuid::new_v4();
        let now = unix_now();
        Job {
            id,
            disc_kind,
            drive_id,
            disc_label,
            temp_path: temp_root.join(id.to_string()),
            output_path,
            override_filename: None,
            steps_total: 1,
            step: 1,
            step_description: "Initializing".to_string(),
            step_progress: 0,
            title_progress: 0,
            total_progress: 0,
            status: JobStatus::Queued,
            output_locked: false,
            imdb_id: None,
            metadata: serde_json::Map::new(),
            season: None,
            created_at: now,
            updated_at: now,
            recent_log: VecDeque::with_capacity(LOG_RING_CAPACITY),
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = unix_now();
    }

    pub fn append_log(&mut self, line: impl Into<String>) {
        if self.recent_log.len() == LOG_RING_CAPACITY {
            self.recent_log.pop_front();
        }
        self.recent_log.push_back(line.into());
    }

    /// Recomputes `total_progress` from `total_done_weight` (sum of weights
    /// of fully-completed steps) plus the in-flight step's weighted
    /// contribution, per spec §3's invariant formula.
    pub fn recompute_total_progress(&mut self, total_done_weight: f64, current_step_weight: f64) {
        let fraction = total_done_weight + current_step_weight * (self.step_progress as f64 / 100.0);
        self.total_progress = (fraction * 100.0).floor().clamp(0.0, 100.0) as u8;
    }

    pub fn set_output(&mut self, new_path: PathBuf) -> Result<(), CoreError> {
        if self.output_locked {
            return Err(CoreError::precondition("output path is locked for this job"));
        }
        self.output_path = new_path;
        self.touch();
        Ok(())
    }

    pub fn lock_output(&mut self) {
        self.output_locked = true;
        self.touch();
    }

    pub fn is_modifiable(&self) -> bool {
        matches!(self.status, JobStatus::Queued | JobStatus::Paused)
    }

    pub fn is_running(&self) -> bool {
        self.status == JobStatus::Running
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn can_retry(&self) -> bool {
        self.step >= 2 && !self.is_running()
    }

    /// spec §4.7: `max(1, step if step_progress < 100 else step + 1)`.
    pub fn retry_start_index(&self) -> usize {
        if self.step_progress < 100 {
            self.step.max(1)
        } else {
            self.step + 1
        }
    }
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job() -> Job {
        Job::new(
            DiscKind::DvdVideo,
            Some("DRIVE0".into()),
            "MyDisc".into(),
            std::path::Path::new("/tmp/spindle"),
            PathBuf::from("/out/MyDisc"),
        )
    }

    #[test]
    fn new_job_starts_queued_and_unlocked() {
        let job = sample_job();
        assert_eq!(job.status, JobStatus::Queued);
        assert!(!job.output_locked);
        assert!(job.is_modifiable());
    }

    #[test]
    fn set_output_fails_once_locked() {
        let mut job = sample_job();
        job.lock_output();
        let err = job.set_output(PathBuf::from("/out/Other")).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Precondition);
    }

    #[test]
    fn recompute_total_progress_matches_weighted_formula() {
        let mut job = sample_job();
        job.step_progress = 50;
        job.recompute_total_progress(0.60, 0.40);
        assert_eq!(job.total_progress, 80); // 0.60 + 0.40*0.5 = 0.80
    }

    #[test]
    fn retry_start_index_resumes_current_step_when_incomplete() {
        let mut job = sample_job();
        job.step = 2;
        job.step_progress = 45;
        assert_eq!(job.retry_start_index(), 2);
    }

    #[test]
    fn retry_start_index_advances_when_step_fully_done() {
        let mut job = sample_job();
        job.step = 1;
        job.step_progress = 100;
        assert_eq!(job.retry_start_index(), 2);
    }

    #[test]
    fn can_retry_requires_step_at_least_two_and_not_running() {
        let mut job = sample_job();
        job.step = 1;
        assert!(!job.can_retry());
        job.step = 2;
        job.status = JobStatus::Paused;
        assert!(job.can_retry());
        job.status = JobStatus::Running;
        assert!(!job.can_retry());
    }

    #[test]
    fn log_ring_drops_oldest_past_capacity() {
        let mut job = sample_job();
        for i in 0..(LOG_RING_CAPACITY + 10) {
            job.append_log(format!("line {i}"));
        }
        assert_eq!(job.recent_log.len(), LOG_RING_CAPACITY);
        assert_eq!(job.recent_log.front().unwrap(), "line 10");
    }
}
