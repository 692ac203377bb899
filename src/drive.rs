//! Drive / disc data model (spec §3) and the Disc Classifier (spec §4.3).

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Capability {
    Cd,
    Dvd,
    Bluray,
}

/// One physical optical drive, as tracked by the Drive Registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Drive {
    pub logical_id: String,
    pub device_path: Option<String>,
    pub model: String,
    pub capability: HashSet<Capability>,
    pub disc_label: Option<String>,
    pub job_id: Option<uuid::Uuid>,
    pub blacklisted: bool,
}

impl Drive {
    pub fn new(logical_id: impl Into<String>, device_path: Option<String>, model: impl Into<String>, capability: HashSet<Capability>) -> Self {
        Drive {
            logical_id: logical_id.into(),
            device_path,
            model: model.into(),
            capability,
            disc_label: None,
            job_id: None,
            blacklisted: false,
        }
    }

    pub fn is_available(&self) -> bool {
        self.job_id.is_none() && !self.blacklisted
    }
}

/// A drive snapshot as returned by a Platform Probe, before it is merged
/// into the Registry (spec §4.1).
#[derive(Debug, Clone)]
pub struct ProbeDrive {
    pub logical_id: String,
    pub device_path: Option<String>,
    pub model: String,
    pub capability: HashSet<Capability>,
}

/// What the Platform Probe sees when it reads a drive's media state
/// (spec §4.1, §3).
#[derive(Debug, Clone, Default)]
pub struct DiscSnapshot {
    pub media_present: bool,
    pub type_hint: String,
    pub has_video_ts: bool,
    pub has_bdmv: bool,
    pub is_audio_cd: bool,
    pub size_bytes: u64,
    pub label: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscKind {
    CdAudio,
    CdRom,
    DvdVideo,
    DvdRom,
    BlurayVideo,
    BlurayRom,
    OtherDisc,
    Unknown,
}

impl DiscKind {
    /// True for the kinds whose pipeline produces a single final *file*
    /// (spec §4.5's "ROM/other" pipelines) rather than a directory of
    /// titles/tracks. `create_job` uses this to decide whether the initial
    /// `output_path` is the output root itself (the Planner names the file)
    /// or `<output root>/<label>` (a directory the job's own outputs land in).
    pub fn is_rom_like(&self) -> bool {
        matches!(self, DiscKind::CdRom | DiscKind::DvdRom | DiscKind::BlurayRom | DiscKind::OtherDisc | DiscKind::Unknown)
    }
}

impl std::fmt::Display for DiscKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DiscKind::CdAudio => "cd_audio",
            DiscKind::CdRom => "cd_rom",
            DiscKind::DvdVideo => "dvd_video",
            DiscKind::DvdRom => "dvd_rom",
            DiscKind::BlurayVideo => "bluray_video",
            DiscKind::BlurayRom => "bluray_rom",
            DiscKind::OtherDisc => "other_disc",
            DiscKind::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

const GIB: u64 = 1024 * 1024 * 1024;

/// Pure classifier, spec §4.3. Priority order matters: directory presence
/// always wins over the size fallback.
pub fn classify(snapshot: &DiscSnapshot) -> DiscKind {
    let type_hint = snapshot.type_hint.to_uppercase();

    if snapshot.is_audio_cd && !type_hint.contains("ISO") {
        return DiscKind::CdAudio;
    }

    if type_hint.contains("BD") || type_hint.contains("BLU") {
        return if snapshot.has_bdmv {
            DiscKind::BlurayVideo
        } else {
            DiscKind::BlurayRom
        };
    }

    if type_hint.contains("DVD") {
        return if snapshot.has_video_ts {
            DiscKind::DvdVideo
        } else {
            DiscKind::DvdRom
        };
    }

    if type_hint.contains("CD") {
        return DiscKind::CdRom;
    }

    if snapshot.has_bdmv {
        return DiscKind::BlurayVideo;
    }
    if snapshot.has_video_ts {
        return DiscKind::DvdVideo;
    }

    if snapshot.size_bytes >= 25 * GIB {
        return DiscKind::BlurayRom;
    }
    if snapshot.size_bytes >= GIB {
        return DiscKind::DvdRom;
    }
    if snapshot.size_bytes > 0 {
        return DiscKind::CdRom;
    }
    if snapshot.is_audio_cd {
        return DiscKind::CdAudio;
    }

    if snapshot.media_present {
        // Media is in the drive but we could read nothing useful about it;
        // spec §4.3 rule 6 treats "no filesystem, media present" as audio.
        return DiscKind::CdAudio;
    }

    DiscKind::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap() -> DiscSnapshot {
        DiscSnapshot {
            media_present: true,
            ..Default::default()
        }
    }

    #[test]
    fn audio_cd_without_iso_fs_classifies_as_cd_audio() {
        let mut s = snap();
        s.is_audio_cd = true;
        assert_eq!(classify(&s), DiscKind::CdAudio);
    }

    #[test]
    fn bluray_type_hint_with_bdmv_is_video() {
        let mut s = snap();
        s.type_hint = "BD-ROM".into();
        s.has_bdmv = true;
        assert_eq!(classify(&s), DiscKind::BlurayVideo);
    }

    #[test]
    fn bluray_type_hint_without_bdmv_is_rom() {
        let mut s = snap();
        s.type_hint = "BLU-RAY".into();
        assert_eq!(classify(&s), DiscKind::BlurayRom);
    }

    #[test]
    fn dvd_type_hint_with_video_ts_is_video() {
        let mut s = snap();
        s.type_hint = "DVD-ROM".into();
        s.has_video_ts = true;
        assert_eq!(classify(&s), DiscKind::DvdVideo);
    }

    #[test]
    fn directory_presence_wins_over_size_fallback() {
        let mut s = snap();
        // No type hint at all, but VIDEO_TS present and a CD-sized image.
        s.has_video_ts = true;
        s.size_bytes = 600 * 1024 * 1024;
        assert_eq!(classify(&s), DiscKind::DvdVideo);
    }

    #[test]
    fn size_fallback_picks_bluray_above_25gib() {
        let mut s = snap();
        s.size_bytes = 26 * GIB;
        assert_eq!(classify(&s), DiscKind::BlurayRom);
    }

    #[test]
    fn size_fallback_picks_dvd_above_1gib() {
        let mut s = snap();
        s.size_bytes = 2 * GIB;
        assert_eq!(classify(&s), DiscKind::DvdRom);
    }

    #[test]
    fn no_media_and_no_hints_is_unknown() {
        let s = DiscSnapshot {
            media_present: false,
            ..Default::default()
        };
        assert_eq!(classify(&s), DiscKind::Unknown);
    }

    #[test]
    fn media_present_with_no_fs_info_falls_back_to_cd_audio() {
        let s = snap();
        assert_eq!(classify(&s), DiscKind::CdAudio);
    }
}
