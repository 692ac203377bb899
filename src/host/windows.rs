//! Windows `HostOps`, grounded on `services::drive_info::windows::opticals`
//! (the `Win32_CDROMDrive` WMI query, kept almost verbatim for enumeration)
//! plus a second WMI query against `Win32_LogicalDisk` for per-drive media
//! state, replacing the teacher's unconditional
//! `wmi_con.query().expect(...)` with propagated-but-swallowed errors (spec
//! §4.1: probe failures are non-fatal).

use std::collections::HashSet;
use std::process::Command;

use serde::Deserialize;
use wmi::{COMLibrary, WMIConnection};

use crate::drive::{Capability, DiscSnapshot, ProbeDrive};
use crate::error::CoreError;
use crate::host::HostOps;

#[derive(Deserialize)]
#[allow(non_snake_case)]
struct Win32CdromDrive {
    Drive: Option<String>,
    Caption: String,
}

#[derive(Deserialize)]
#[allow(non_snake_case)]
struct Win32LogicalDisk {
    FileSystem: Option<String>,
    VolumeName: Option<String>,
    Size: Option<u64>,
}

#[derive(Default)]
pub struct WindowsHost;

fn connection() -> Option<WMIConnection> {
    let com = COMLibrary::new().ok()?;
    WMIConnection::with_namespace_path("ROOT\\CIMV2", com.into()).ok()
}

impl HostOps for WindowsHost {
    fn list_drives(&self) -> Vec<ProbeDrive> {
        let Some(wmi_con) = connection() else {
            log::warn!("could not open a WMI connection to enumerate optical drives");
            return Vec::new();
        };

        let results: Vec<Win32CdromDrive> = match wmi_con.query() {
            Ok(r) => r,
            Err(err) => {
                log::warn!("WMI query for Win32_CDROMDrive failed: {err}");
                return Vec::new();
            }
        };

        results
            .into_iter()
            .filter_map(|drive| {
                let letter = drive.Drive?;
                Some(ProbeDrive {
                    logical_id: letter.clone(),
                    device_path: Some(letter),
                    model: drive.Caption,
                    capability: HashSet::from([Capability::Cd, Capability::Dvd, Capability::Bluray]),
                })
            })
            .collect()
    }

    fn probe_media(&self, drive: &ProbeDrive) -> DiscSnapshot {
        let Some(wmi_con) = connection() else {
            return DiscSnapshot::default();
        };
        let letter = drive.logical_id.trim_end_matches('\\').to_string();
        let query = format!(
            "SELECT FileSystem, VolumeName, Size FROM Win32_LogicalDisk WHERE DeviceID = '{}'",
            letter.replace('\'', "")
        );
        let rows: Vec<Win32LogicalDisk> = match wmi_con.raw_query(&query) {
            Ok(r) => r,
            Err(_) => return DiscSnapshot { media_present: false, ..Default::default() },
        };
        let Some(row) = rows.into_iter().next() else {
            return DiscSnapshot { media_present: false, ..Default::default() };
        };

        let fs_type = row.FileSystem.unwrap_or_default();
        let mount_point = format!("{letter}\\");
        let root = std::path::Path::new(&mount_point);

        DiscSnapshot {
            media_present: true,
            type_hint: fs_type.to_uppercase(),
            has_video_ts: root.join("VIDEO_TS").is_dir(),
            has_bdmv: root.join("BDMV").is_dir(),
            is_audio_cd: fs_type.is_empty(),
            size_bytes: row.Size.unwrap_or(0),
            label: row.VolumeName,
        }
    }

    fn eject(&self, drive: &ProbeDrive) -> Result<(), CoreError> {
        let letter = drive.logical_id.trim_end_matches('\\');
        let script = format!(
            "(New-Object -ComObject Shell.Application).Namespace(17).ParseName('{letter}').InvokeVerb('Eject')"
        );
        let status = Command::new("powershell")
            .args(["-NoProfile", "-Command", &script])
            .status()
            .map_err(|err| CoreError::dependency(format!("failed to spawn powershell eject: {err}")))?;
        if status.success() {
            Ok(())
        } else {
            Err(CoreError::dependency(format!("powershell eject {letter} exited with {status}")))
        }
    }
}
