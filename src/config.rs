//! Keyed configuration store (spec §6), loaded from a TOML file the way
//! `ferrex-config` in the examples pack loads its daemon config: a
//! `serde`-derived struct tree with `Default` fallbacks, read once at
//! startup via `toml::from_str`. The teacher itself only ever persisted a
//! single UI-editable blob through `tauri-plugin-store`; this replaces that
//! with the section/key table spec.md lays out.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_output_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join("Rips")
}

fn default_temp_dir() -> PathBuf {
    dirs::cache_dir().unwrap_or_else(|| PathBuf::from("/tmp")).join("spindle")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub tempdirectory: PathBuf,
    pub outputdirectory: PathBuf,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        GeneralConfig {
            tempdirectory: default_temp_dir(),
            outputdirectory: default_output_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CdConfig {
    pub outputdirectory: Option<PathBuf>,
    pub outputformat: String,
    pub configpath: Option<PathBuf>,
    pub additionaloptions: String,
}

impl Default for CdConfig {
    fn default() -> Self {
        CdConfig {
            outputdirectory: None,
            outputformat: "flac".to_string(),
            configpath: None,
            additionaloptions: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub outputdirectory: Option<PathBuf>,
    pub usehandbrake: bool,
    pub handbrakepreset_path: Option<PathBuf>,
    pub handbrakepreset_name: String,
    pub handbrakeformat: String,
}

impl Default for VideoConfig {
    fn default() -> Self {
        VideoConfig {
            outputdirectory: None,
            usehandbrake: true,
            handbrakepreset_path: None,
            handbrakepreset_name: "Fast 1080p30".to_string(),
            handbrakeformat: "mkv".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    Zstd,
    #[serde(alias = "bzip2")]
    Bz2,
}

impl Compression {
    pub fn extension(&self) -> &'static str {
        match self {
            Compression::Zstd => "zst",
            Compression::Bz2 => "bz2",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OtherConfig {
    pub outputdirectory: Option<PathBuf>,
    pub usecompression: bool,
    pub compression: Compression,
}

impl Default for OtherConfig {
    fn default() -> Self {
        OtherConfig {
            outputdirectory: None,
            usecompression: true,
            compression: Compression::Zstd,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub cd: CdConfig,
    pub dvd: VideoConfig,
    pub bluray: VideoConfig,
    pub other: OtherConfig,
    pub auth: AuthConfig,
}

impl Config {
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))
    }

    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                log::warn!("could not load config from {}: {err}; using defaults", path.display());
                Config::default()
            }
        }
    }

    pub fn output_root_for(&self, kind: crate::drive::DiscKind) -> PathBuf {
        use crate::drive::DiscKind::*;
        match kind {
            CdAudio | CdRom => self.cd.outputdirectory.clone(),
            DvdVideo | DvdRom => self.dvd.outputdirectory.clone(),
            BlurayVideo | BlurayRom => self.bluray.outputdirectory.clone(),
            OtherDisc | Unknown => self.other.outputdirectory.clone(),
        }
        .unwrap_or_else(|| self.general.outputdirectory.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_toml_document() {
        let toml_str = r#"
            [general]
            tempdirectory = "/tmp/spindle"
            outputdirectory = "/media/rips"

            [other]
            usecompression = true
            compression = "zstd"
        "#;
        let cfg: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.general.tempdirectory, PathBuf::from("/tmp/spindle"));
        assert_eq!(cfg.other.compression, Compression::Zstd);
        assert!(cfg.dvd.usehandbrake); // falls back to section default
    }

    #[test]
    fn output_root_for_falls_back_to_general_when_section_unset() {
        let cfg = Config::default();
        assert_eq!(cfg.output_root_for(crate::drive::DiscKind::DvdVideo), cfg.general.outputdirectory);
    }
}
