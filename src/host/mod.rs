//! Platform Probe (spec §4.1) behind one `HostOps` interface with a
//! per-OS implementation selected at startup, per spec §9's design note.
//! Replaces the teacher's split `services::drive_info::{macos,windows}`
//! (each exposing a free `opticals()` function keyed to `OpticalDiskInfo`)
//! plus the standalone `services::disk_manager::eject` with one trait the
//! Watcher Loop and Runner both hold a `Box<dyn HostOps>` to.

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "macos")]
mod macos;
#[cfg(target_os = "windows")]
mod windows;

use crate::drive::{DiscSnapshot, ProbeDrive};
use crate::error::CoreError;

/// OS-specific adapter producing the current set of optical drives and,
/// per drive, a media snapshot (spec §4.1). Implementations must not block
/// more than a few seconds and must treat tool failures as "unknown", never
/// propagate them as fatal (the Watcher Loop's miss-counter handles churn).
pub trait HostOps: Send + Sync {
    fn list_drives(&self) -> Vec<ProbeDrive>;
    fn probe_media(&self, drive: &ProbeDrive) -> DiscSnapshot;
    fn eject(&self, drive: &ProbeDrive) -> Result<(), CoreError>;
}

/// Selects the `HostOps` implementation for the host this binary was built
/// for. Called once at startup (`main.rs`); the Watcher Loop and Runner
/// share the resulting box behind an `Arc`.
pub fn current() -> Box<dyn HostOps> {
    #[cfg(target_os = "linux")]
    {
        Box::new(linux::LinuxHost::default())
    }
    #[cfg(target_os = "macos")]
    {
        Box::new(macos::MacosHost::default())
    }
    #[cfg(target_os = "windows")]
    {
        Box::new(windows::WindowsHost::default())
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        Box::new(UnsupportedHost)
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
struct UnsupportedHost;

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
impl HostOps for UnsupportedHost {
    fn list_drives(&self) -> Vec<ProbeDrive> {
        log::warn!("no Platform Probe implementation for this host OS");
        Vec::new()
    }

    fn probe_media(&self, _drive: &ProbeDrive) -> DiscSnapshot {
        DiscSnapshot::default()
    }

    fn eject(&self, _drive: &ProbeDrive) -> Result<(), CoreError> {
        Err(CoreError::dependency("eject is not supported on this host OS"))
    }
}

/// One-off blocking device byte-size query, used by `step::RawCopyAdapter::on_start`
/// (spec §4.7 step 7: "expected bytes obtained once via OS-specific size call").
/// Grounded on `original_source/app/core/rippers/other/linux.py::DdProgressAdapter.on_start`'s
/// `blockdev --getsize64` probe; mirrored with the nearest equivalent per OS.
pub fn device_size_blocking(device: &str) -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        let output = std::process::Command::new("blockdev")
            .arg("--getsize64")
            .arg(device)
            .output()
            .ok()?;
        String::from_utf8_lossy(&output.stdout).trim().parse().ok()
    }
    #[cfg(target_os = "macos")]
    {
        let output = std::process::Command::new("diskutil").arg("info").arg(device).output().ok()?;
        let text = String::from_utf8_lossy(&output.stdout);
        text.lines().find_map(|line| {
            let (_, rest) = line.split_once("Disk Size")?;
            let digits: String = rest.chars().skip_while(|c| !c.is_ascii_digit()).take_while(|c| c.is_ascii_digit()).collect();
            digits.parse().ok()
        })
    }
    #[cfg(target_os = "windows")]
    {
        let _ = device;
        None
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        let _ = device;
        None
    }
}
