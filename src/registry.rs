//! Drive Registry (spec §4.2), grounded on `original_source/app/core/drive/manager.py`'s
//! `DriveTracker` for the resolve-by-either-id-or-path contract, and on the
//! teacher's single-mutex-per-collection style (`state/background_process_state.rs`)
//! rather than its scattered mutex-per-field `OpticalDiskInfo`.

use crate::drive::{Capability, Drive};
use crate::error::CoreError;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use uuid::Uuid;

pub struct DriveRegistry {
    drives: Mutex<HashMap<String, Drive>>,
}

impl DriveRegistry {
    pub fn new() -> Self {
        DriveRegistry {
            drives: Mutex::new(HashMap::new()),
        }
    }

    /// Upserts a drive record, preserving `job_id` and `blacklisted` across
    /// re-registration (a drive reappearing on a later poll keeps its
    /// assignment, per spec §4.2).
    pub fn register(
        &self,
        logical_id: &str,
        device_path: Option<String>,
        model: String,
        capability: HashSet<Capability>,
    ) -> Drive {
        let mut drives = self.drives.lock().expect("drive registry lock");
        let entry = drives
            .entry(logical_id.to_string())
            .or_insert_with(|| Drive::new(logical_id, device_path.clone(), model.clone(), capability.clone()));
        entry.device_path = device_path;
        entry.model = model;
        entry.capability = capability;
        entry.clone()
    }

    /// Accepts either a logical id or an OS device path, matching
    /// `DriveTracker._resolve_key` in the original. Per spec §9's open
    /// question, collaborators are expected to send logical ids; this
    /// fallback exists only for the Registry's own internal bookkeeping
    /// (e.g. resolving an eject target), never to let a caller skip
    /// specifying which form they mean.
    pub fn resolve(&self, identifier: &str) -> Option<Drive> {
        let drives = self.drives.lock().expect("drive registry lock");
        if let Some(drive) = drives.get(identifier) {
            return Some(drive.clone());
        }
        drives
            .values()
            .find(|d| d.device_path.as_deref() == Some(identifier))
            .cloned()
    }

    pub fn assign_job(&self, logical_id: &str, job_id: Uuid) -> bool {
        let mut drives = self.drives.lock().expect("drive registry lock");
        match drives.get_mut(logical_id) {
            Some(drive) if drive.is_available() => {
                drive.job_id = Some(job_id);
                true
            }
            _ => false,
        }
    }

    pub fn release(&self, logical_id: &str) {
        let mut drives = self.drives.lock().expect("drive registry lock");
        if let Some(drive) = drives.get_mut(logical_id) {
            drive.job_id = None;
        }
    }

    pub fn blacklist(&self, logical_id: &str, blacklisted: bool) {
        let mut drives = self.drives.lock().expect("drive registry lock");
        if let Some(drive) = drives.get_mut(logical_id) {
            drive.blacklisted = blacklisted;
        }
    }

    pub fn unregister(&self, logical_id: &str) -> Option<Drive> {
        self.drives
            .lock()
            .expect("drive registry lock")
            .remove(logical_id)
    }

    pub fn set_disc_label(&self, logical_id: &str, label: Option<String>) {
        let mut drives = self.drives.lock().expect("drive registry lock");
        if let Some(drive) = drives.get_mut(logical_id) {
            drive.disc_label = label;
        }
    }

    pub fn all(&self) -> Vec<Drive> {
        self.drives
            .lock()
            .expect("drive registry lock")
            .values()
            .cloned()
            .collect()
    }

    pub fn contains(&self, logical_id: &str) -> bool {
        self.drives.lock().expect("drive registry lock").contains_key(logical_id)
    }

    pub fn get(&self, logical_id: &str) -> Result<Drive, CoreError> {
        self.resolve(logical_id)
            .ok_or_else(|| CoreError::not_found(format!("no drive registered with id {logical_id}")))
    }
}

impl Default for DriveRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assign_job_fails_when_drive_already_assigned() {
        let registry = DriveRegistry::new();
        registry.register("DRIVE0", Some("/dev/sr0".into()), "Test Drive".into(), HashSet::new());
        let job_a = Uuid::new_v4();
        let job_b = Uuid::new_v4();
        assert!(registry.assign_job("DRIVE0", job_a));
        assert!(!registry.assign_job("DRIVE0", job_b));
    }

    #[test]
    fn resolve_accepts_device_path_as_well_as_logical_id() {
        let registry = DriveRegistry::new();
        registry.register("DRIVE0", Some("/dev/sr0".into()), "Test Drive".into(), HashSet::new());
        assert!(registry.resolve("DRIVE0").is_some());
        assert!(registry.resolve("/dev/sr0").is_some());
        assert!(registry.resolve("/dev/sr9").is_none());
    }

    #[test]
    fn register_preserves_job_assignment_across_reregistration() {
        let registry = DriveRegistry::new();
        registry.register("DRIVE0", None, "Test Drive".into(), HashSet::new());
        let job = Uuid::new_v4();
        registry.assign_job("DRIVE0", job);
        registry.register("DRIVE0", Some("/dev/sr0".into()), "Test Drive".into(), HashSet::new());
        assert_eq!(registry.resolve("DRIVE0").unwrap().job_id, Some(job));
    }

    #[test]
    fn unregister_removes_drive() {
        let registry = DriveRegistry::new();
        registry.register("DRIVE0", None, "Test Drive".into(), HashSet::new());
        assert!(registry.unregister("DRIVE0").is_some());
        assert!(!registry.contains("DRIVE0"));
    }
}
