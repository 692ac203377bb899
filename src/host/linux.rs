//! Linux `HostOps`. Not present in the teacher crate at all (its
//! `services::drive_info` only ships macOS/Windows variants) — built fresh,
//! grounded on `original_source`'s Linux raw-copy tooling
//! (`app/core/integration/dd/linux.py`, `rippers/other/linux.py`) for the
//! `/dev/srN` device-path convention, and on `discdetection/macos.py`'s
//! overall probe shape (list candidate indices, then query each).
//!
//! Per SPEC_FULL.md's module note, Linux has a stable OS device path, so
//! `logical_id` is the device path itself rather than a synthesized index.

use std::collections::HashSet;
use std::path::Path;
use std::process::Command;

use crate::drive::{Capability, DiscSnapshot, ProbeDrive};
use crate::error::CoreError;
use crate::host::HostOps;

#[derive(Default)]
pub struct LinuxHost;

fn run(cmd: &str, args: &[&str]) -> String {
    Command::new(cmd)
        .args(args)
        .output()
        .map(|out| String::from_utf8_lossy(&out.stdout).to_string())
        .unwrap_or_default()
}

impl HostOps for LinuxHost {
    fn list_drives(&self) -> Vec<ProbeDrive> {
        let Ok(entries) = std::fs::read_dir("/dev") else {
            log::warn!("could not read /dev to enumerate optical drives");
            return Vec::new();
        };

        let mut devices: Vec<String> = entries
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                (name.starts_with("sr") && name[2..].chars().all(|c| c.is_ascii_digit())).then_some(name)
            })
            .collect();
        devices.sort();

        devices
            .into_iter()
            .map(|name| {
                let device_path = format!("/dev/{name}");
                let model = run("lsblk", &["-ndo", "MODEL", &device_path]).trim().to_string();
                ProbeDrive {
                    logical_id: device_path.clone(),
                    device_path: Some(device_path),
                    model: if model.is_empty() { "Unknown optical drive".to_string() } else { model },
                    capability: HashSet::from([Capability::Cd, Capability::Dvd, Capability::Bluray]),
                }
            })
            .collect()
    }

    fn probe_media(&self, drive: &ProbeDrive) -> DiscSnapshot {
        let Some(device) = drive.device_path.as_deref() else {
            return DiscSnapshot::default();
        };

        let blkid = run("blkid", &["-o", "export", device]);
        if blkid.trim().is_empty() {
            return DiscSnapshot { media_present: false, ..Default::default() };
        }

        let mut fs_type = String::new();
        let mut label = None;
        for line in blkid.lines() {
            if let Some(value) = line.strip_prefix("TYPE=") {
                fs_type = value.to_string();
            }
            if let Some(value) = line.strip_prefix("LABEL=") {
                label = Some(value.to_string());
            }
        }

        let mount_point = run("findmnt", &["-n", "-o", "TARGET", device]).trim().to_string();
        let (has_video_ts, has_bdmv) = if mount_point.is_empty() {
            (false, false)
        } else {
            let root = Path::new(&mount_point);
            (root.join("VIDEO_TS").is_dir(), root.join("BDMV").is_dir())
        };

        let size_bytes = crate::host::device_size_blocking(device).unwrap_or(0);
        let is_audio_cd = fs_type.is_empty();

        DiscSnapshot {
            media_present: true,
            type_hint: fs_type.to_uppercase(),
            has_video_ts,
            has_bdmv,
            is_audio_cd,
            size_bytes,
            label,
        }
    }

    fn eject(&self, drive: &ProbeDrive) -> Result<(), CoreError> {
        let Some(device) = drive.device_path.as_deref() else {
            return Err(CoreError::dependency("drive has no device path to eject"));
        };
        let status = Command::new("eject")
            .arg(device)
            .status()
            .map_err(|err| CoreError::dependency(format!("failed to spawn eject: {err}")))?;
        if status.success() {
            Ok(())
        } else {
            Err(CoreError::dependency(format!("eject {device} exited with {status}")))
        }
    }
}
