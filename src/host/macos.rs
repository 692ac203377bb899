//! macOS `HostOps`, replacing `services::drive_info::macos::opticals` (which
//! only ever saw mounted, non-empty drives via `sysinfo::Disks`). Grounded on
//! `original_source/app/core/discdetection/macos.py`: probe `drutil status
//! -drive N` across a small index range, since `drutil list` is unreliable
//! with some USB enclosures (their words, kept here because it's still true).
//!
//! Per SPEC_FULL.md's module note, macOS has no persistent device path for
//! an empty drive, so `logical_id` is synthesized as `DRIVE{N}` from the
//! probe index, matching the original's `drive_id_for`.

use std::collections::HashSet;
use std::path::Path;
use std::process::Command;

use crate::drive::{Capability, DiscSnapshot, ProbeDrive};
use crate::error::CoreError;
use crate::host::HostOps;

const PROBE_RANGE: std::ops::Range<u32> = 0..12;

#[derive(Default)]
pub struct MacosHost;

fn safe_run(cmd: &str, args: &[&str]) -> String {
    Command::new(cmd)
        .args(args)
        .output()
        .map(|out| String::from_utf8_lossy(&out.stdout).to_string())
        .unwrap_or_default()
}

/// Runs `drutil status -drive N`, returning `(type_line, device_path)`.
fn drutil_status(index: u32) -> (Option<String>, Option<String>) {
    let out = if index == 0 {
        let first = safe_run("drutil", &["status"]);
        if first.trim().is_empty() {
            safe_run("drutil", &["status", "-drive", "0"])
        } else {
            first
        }
    } else {
        safe_run("drutil", &["status", "-drive", &index.to_string()])
    };

    if out.is_empty() {
        return (None, None);
    }

    let mut type_str = None;
    let mut dev_path = None;
    for line in out.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("Type:") {
            type_str = Some(rest.trim().to_string());
        }
        if let Some(idx) = line.find("/dev/disk") {
            dev_path = line[idx..].split_whitespace().next().map(|s| s.to_string());
        }
    }
    (type_str, dev_path)
}

fn diskutil_content(device: &str) -> String {
    let out = safe_run("diskutil", &["info", device]);
    for line in out.lines() {
        if let Some((_, value)) = line.split_once("Content") {
            if let Some((_, value)) = value.split_once(':') {
                return value.trim().to_lowercase();
            }
        }
    }
    String::new()
}

fn mount_point(device: &str) -> Option<String> {
    let out = safe_run("diskutil", &["info", device]);
    out.lines().find_map(|line| line.split_once("Mount Point:").map(|(_, v)| v.trim().to_string())).filter(|s| !s.is_empty())
}

impl HostOps for MacosHost {
    fn list_drives(&self) -> Vec<ProbeDrive> {
        PROBE_RANGE
            .filter_map(|idx| {
                let (type_str, device_path) = drutil_status(idx);
                if type_str.is_none() && device_path.is_none() {
                    return None;
                }
                Some(ProbeDrive {
                    logical_id: format!("DRIVE{idx}"),
                    device_path,
                    model: "Unknown optical drive".to_string(),
                    capability: HashSet::from([Capability::Cd, Capability::Dvd, Capability::Bluray]),
                })
            })
            .collect()
    }

    fn probe_media(&self, drive: &ProbeDrive) -> DiscSnapshot {
        let index: u32 = drive.logical_id.trim_start_matches("DRIVE").parse().unwrap_or(0);
        let (type_str, device_path) = drutil_status(index);
        let Some(type_str) = type_str else {
            return DiscSnapshot::default();
        };
        let has_media = !type_str.to_lowercase().contains("no media");
        if !has_media {
            return DiscSnapshot { media_present: false, ..Default::default() };
        }

        let content = device_path.as_deref().map(diskutil_content).unwrap_or_default();
        let is_audio_cd = type_str.to_lowercase().contains("cd-da") || content.contains("audio") || content.contains("cdda");

        let (has_video_ts, has_bdmv) = match device_path.as_deref().and_then(mount_point) {
            Some(mp) => {
                let root = Path::new(&mp);
                (root.join("VIDEO_TS").is_dir(), root.join("BDMV").is_dir())
            }
            None => (false, false),
        };

        let size_bytes = device_path.as_deref().and_then(crate::host::device_size_blocking).unwrap_or(0);

        DiscSnapshot {
            media_present: true,
            type_hint: type_str.to_uppercase(),
            has_video_ts,
            has_bdmv,
            is_audio_cd,
            size_bytes,
            label: None,
        }
    }

    fn eject(&self, drive: &ProbeDrive) -> Result<(), CoreError> {
        let target = drive.device_path.as_deref().unwrap_or(&drive.logical_id);
        let status = Command::new("drutil")
            .args(["eject", "-drive", drive.logical_id.trim_start_matches("DRIVE")])
            .status()
            .map_err(|err| CoreError::dependency(format!("failed to spawn drutil eject: {err}")))?;
        if status.success() {
            Ok(())
        } else {
            Err(CoreError::dependency(format!("drutil eject {target} exited with {status}")))
        }
    }
}
