//! Pipeline Planner (spec §4.5, §4.6), grounded on
//! `original_source/app/core/job/runner.py`'s `ROM_WEIGHTS`/`VIDEO_WEIGHTS`
//! tables and `rip_runner`'s kind dispatch, and on
//! `rippers/other/linux.py::rip_generic_disc` for the ROM final-path
//! resolution logic (suffix-chain handling, uniquification). Per spec §9's
//! design note, this is a pure function of `(DiscKind, &Job, &Config)`: it
//! reads the job's current `output_path` rather than caching a
//! previously-chosen destination, so re-running it after a rename (or after
//! step 1 creates the real file on disk) naturally picks up the change.

use std::path::{Path, PathBuf};

use crate::config::{Compression, Config};
use crate::drive::DiscKind;
use crate::job::Job;
use crate::sanitize;
use crate::step::{AudioRipAdapter, CompressAdapter, HandBrakeAdapter, RawCopyAdapter, Step, StepKind};

/// Where `output_locked` flips to `true` relative to step execution
/// (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockPoint {
    Never,
    BeforeStep(usize),
    AfterStep(usize),
}

/// spec §4.5 weight table, one entry per `DiscKind`.
fn raw_weights(kind: DiscKind) -> Vec<f64> {
    match kind {
        DiscKind::CdRom => vec![0.50, 0.50],
        DiscKind::BlurayRom => vec![0.70, 0.30],
        DiscKind::DvdVideo => vec![0.60, 0.40],
        DiscKind::BlurayVideo => vec![0.70, 0.30],
        DiscKind::CdAudio => vec![1.00],
        // dvd_rom / other_disc / unknown share the ROM table.
        DiscKind::DvdRom | DiscKind::OtherDisc | DiscKind::Unknown => vec![0.60, 0.40],
    }
}

/// Normalizes a weight list to sum to 1.0 (spec §4.5: "if a pipeline has >
/// 2 steps, weights are normalized"); a no-op for the fixed 1- and 2-step
/// tables above, kept general in case a kind ever grows a third step.
fn normalize(weights: Vec<f64>) -> Vec<f64> {
    let sum: f64 = weights.iter().sum();
    if sum <= 0.0 {
        return weights;
    }
    weights.into_iter().map(|w| w / sum).collect()
}

pub fn lock_point(kind: DiscKind, steps_total: usize) -> LockPoint {
    match kind {
        DiscKind::CdAudio => LockPoint::Never,
        DiscKind::DvdVideo | DiscKind::BlurayVideo => LockPoint::BeforeStep(2),
        _ => {
            if steps_total >= 2 {
                LockPoint::BeforeStep(2)
            } else {
                LockPoint::AfterStep(1)
            }
        }
    }
}

fn label_or_disc(label: &str) -> String {
    let sanitized = sanitize::sanitize(label);
    if sanitized.is_empty() {
        "DISC".to_string()
    } else {
        sanitized
    }
}

/// Resolves the final ROM/other-disc destination file from the job's
/// current `output_path`, applying (or stripping) the configured
/// compression suffix and uniquifying against what's already on disk.
/// Mirrors `rip_generic_disc`'s suffix-chain juggling.
fn resolve_rom_destination(job: &Job, config: &Config) -> (PathBuf, bool, Compression) {
    let other = &config.other;
    let label = label_or_disc(&job.disc_label);
    let use_comp = other.usecompression;
    let comp = other.compression;

    let configured = &job.output_path;
    let (base_dir, filename) = if configured.extension().is_some() {
        (configured.parent().unwrap_or_else(|| Path::new(".")).to_path_buf(), configured.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default())
    } else {
        (configured.clone(), String::new())
    };

    let filename = if filename.is_empty() {
        match (use_comp, comp) {
            (true, Compression::Zstd) => format!("{label}.iso.zst"),
            (true, Compression::Bz2) => format!("{label}.iso.bz2"),
            _ => format!("{label}.iso"),
        }
    } else {
        let mut name = filename;
        if use_comp {
            let suffix = format!(".{}", comp.extension());
            if !name.ends_with(&suffix) {
                name.push_str(&suffix);
            }
        } else {
            for ext in [".zst", ".bz2"] {
                if let Some(stripped) = name.strip_suffix(ext) {
                    name = stripped.to_string();
                    break;
                }
            }
        }
        name
    };

    let destination = sanitize::unique(&base_dir.join(filename));
    (destination, use_comp, comp)
}

fn raw_copy_argv(device: &str, dest: &Path) -> Vec<String> {
    let dest = dest.to_string_lossy();
    #[cfg(target_os = "linux")]
    {
        vec!["bash".into(), "-lc".into(), format!("dd if={device} of={dest} bs=2048 status=progress conv=fsync 2>&1")]
    }
    #[cfg(target_os = "macos")]
    {
        vec!["bash".into(), "-lc".into(), format!("hdiutil create -srcdevice {device} -format UDTO -o {dest} 2>&1")]
    }
    #[cfg(target_os = "windows")]
    {
        vec![
            "powershell".into(),
            "-NoProfile".into(),
            "-Command".into(),
            format!("Get-Content -Path {device} -Raw -Encoding Byte | Set-Content -Path {dest} -Encoding Byte"),
        ]
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        vec!["cp".into(), device.into(), dest.into_owned()]
    }
}

fn rom_steps(job: &Job, config: &Config, weights: &[f64]) -> Vec<Step> {
    let label = label_or_disc(&job.disc_label);
    let temp_iso = job.temp_path.join(format!("{label}.iso"));
    let (final_path, use_comp, comp) = resolve_rom_destination(job, config);

    let step1 = if temp_iso.exists() {
        Step::new(
            vec!["bash".into(), "-lc".into(), format!("echo 'Reusing existing ISO image: {}'", temp_iso.display())],
            "Reusing existing ISO image",
            StepKind::Generic,
            weights[0],
        )
    } else {
        let device = job.drive_id.clone().unwrap_or_default();
        Step::new(raw_copy_argv(&device, &temp_iso), "Creating ISO image", StepKind::RawCopy, weights[0])
            .release_after(true)
            .with_adapter(Box::new(RawCopyAdapter::new(device)))
    };

    let step2 = if use_comp && comp == Compression::Zstd {
        Step::new(
            vec!["zstd".into(), "-v".into(), "-T0".into(), temp_iso.to_string_lossy().into_owned(), "-o".into(), final_path.to_string_lossy().into_owned()],
            "Compressing ISO (zstd)",
            StepKind::Compress,
            weights[1],
        )
        .with_dest(final_path.clone())
        .with_adapter(Box::new(CompressAdapter::default()))
    } else if use_comp && comp == Compression::Bz2 {
        Step::new(
            vec![
                "bash".into(),
                "-lc".into(),
                format!("bzip2 -v -k -f {src} && mv {src}.bz2 {dst}", src = temp_iso.display(), dst = final_path.display()),
            ],
            "Compressing ISO (bzip2)",
            StepKind::Compress,
            weights[1],
        )
        .with_dest(final_path.clone())
        .with_adapter(Box::new(CompressAdapter::default()))
    } else {
        Step::new(
            vec!["cp".into(), "-f".into(), temp_iso.to_string_lossy().into_owned(), final_path.to_string_lossy().into_owned()],
            "Copying ISO to final destination",
            StepKind::Generic,
            weights[1],
        )
        .with_dest(final_path.clone())
    };

    vec![step1, step2]
}

fn video_steps(job: &Job, config: &Config, weights: &[f64], use_handbrake: bool, handbrake_format: &str, handbrake_preset: &str) -> Vec<Step> {
    let _ = config;
    let output_dir = job.output_path.clone();

    let progress_file = job.temp_path.join("makemkv_progress.txt");
    let step1 = Step::new(
        vec![
            "makemkvcon".into(),
            "--robot".into(),
            format!("--progress={}", progress_file.display()),
            "mkv".into(),
            "disc:0".into(),
            "all".into(),
            job.temp_path.to_string_lossy().into_owned(),
        ],
        "Extracting titles",
        StepKind::MakeMkv,
        weights[0],
    )
    .release_after(true);

    let step2 = if use_handbrake {
        let script = format!(
            "for f in \"{temp}\"/*.mkv; do HandBrakeCLI -i \"$f\" -o \"{out}/$(basename \"${{f%.mkv}}\").{fmt}\" -Z {preset}; done",
            temp = job.temp_path.display(),
            out = output_dir.display(),
            fmt = handbrake_format,
            preset = handbrake_preset,
        );
        Step::new(vec!["bash".into(), "-lc".into(), script], "Transcoding titles", StepKind::HandBrake, weights[1])
            .with_dest(output_dir)
            .with_adapter(Box::new(HandBrakeAdapter::default()))
    } else {
        let script = format!(
            "for f in \"{temp}\"/*.mkv; do cp \"$f\" \"{out}/$(basename \"$f\")\"; done",
            temp = job.temp_path.display(),
            out = output_dir.display(),
        );
        Step::new(vec!["bash".into(), "-lc".into(), script], "Copying titles", StepKind::Generic, weights[1]).with_dest(output_dir)
    };

    vec![step1, step2]
}

fn audio_steps(job: &Job, config: &Config, weights: &[f64]) -> Vec<Step> {
    let cd = &config.cd;
    let output_dir = job.output_path.clone();
    let device = job.drive_id.clone().unwrap_or_default();
    let mut argv = vec!["abcde".into(), "-d".into(), device, "-o".into(), cd.outputformat.clone(), "-N".into()];
    if !cd.additionaloptions.is_empty() {
        argv.extend(cd.additionaloptions.split_whitespace().map(|s| s.to_string()));
    }

    vec![Step::new(argv, "Ripping audio CD", StepKind::AudioRip, weights[0])
        .release_after(true)
        .with_dest(output_dir)
        .with_adapter(Box::new(AudioRipAdapter::default()))]
}

/// Produces the ordered `Step[]` for `job` (spec §4.5). Deterministic for a
/// fixed `config` and `job.output_path`; re-running it after `output_path`
/// changes (or after step 1 creates the file `unique()` checked against)
/// yields the same list modulo that uniquification.
pub fn plan(job: &Job, config: &Config) -> Vec<Step> {
    let weights = normalize(raw_weights(job.disc_kind));

    match job.disc_kind {
        DiscKind::CdAudio => audio_steps(job, config, &weights),
        DiscKind::DvdVideo => video_steps(job, config, &weights, config.dvd.usehandbrake, &config.dvd.handbrakeformat, &config.dvd.handbrakepreset_name),
        DiscKind::BlurayVideo => video_steps(job, config, &weights, config.bluray.usehandbrake, &config.bluray.handbrakeformat, &config.bluray.handbrakepreset_name),
        DiscKind::CdRom | DiscKind::DvdRom | DiscKind::BlurayRom | DiscKind::OtherDisc | DiscKind::Unknown => rom_steps(job, config, &weights),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_job(kind: DiscKind, output_path: PathBuf) -> (Job, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let mut job = Job::new(kind, Some("DRIVE0".into()), "MyDisc".into(), dir.path(), output_path);
        std::fs::create_dir_all(&job.temp_path).unwrap();
        job.touch();
        (job, dir)
    }

    #[test]
    fn weights_sum_to_one_for_every_kind() {
        for kind in [
            DiscKind::CdRom,
            DiscKind::DvdRom,
            DiscKind::BlurayRom,
            DiscKind::DvdVideo,
            DiscKind::BlurayVideo,
            DiscKind::CdAudio,
            DiscKind::OtherDisc,
            DiscKind::Unknown,
        ] {
            let sum: f64 = normalize(raw_weights(kind)).iter().sum();
            assert!((sum - 1.0).abs() < 1e-6, "{kind:?} weights sum to {sum}");
        }
    }

    #[test]
    fn rom_pipeline_has_two_steps_with_spec_weights() {
        let (job, _dir) = sample_job(DiscKind::DvdRom, PathBuf::from("/out/MyDisc"));
        let config = Config::default();
        let steps = plan(&job, &config);
        assert_eq!(steps.len(), 2);
        assert!((steps[0].weight - 0.60).abs() < 1e-9);
        assert!((steps[1].weight - 0.40).abs() < 1e-9);
    }

    #[test]
    fn rom_destination_gets_the_configured_compression_suffix() {
        let (job, _dir) = sample_job(DiscKind::CdRom, PathBuf::from("/out/MyDisc"));
        let mut config = Config::default();
        config.other.usecompression = true;
        config.other.compression = Compression::Zstd;
        let steps = plan(&job, &config);
        let dest = steps[1].final_dest.as_ref().unwrap();
        assert_eq!(dest.file_name().unwrap().to_string_lossy(), "MyDisc.iso.zst");
    }

    #[test]
    fn audio_pipeline_is_a_single_full_weight_step() {
        let (job, _dir) = sample_job(DiscKind::CdAudio, PathBuf::from("/out"));
        let config = Config::default();
        let steps = plan(&job, &config);
        assert_eq!(steps.len(), 1);
        assert!((steps[0].weight - 1.0).abs() < 1e-9);
        assert!(steps[0].release_drive_after);
    }

    #[test]
    fn lock_point_is_never_for_audio_and_before_step_two_for_video_and_rom() {
        assert_eq!(lock_point(DiscKind::CdAudio, 1), LockPoint::Never);
        assert_eq!(lock_point(DiscKind::DvdVideo, 2), LockPoint::BeforeStep(2));
        assert_eq!(lock_point(DiscKind::DvdRom, 2), LockPoint::BeforeStep(2));
        assert_eq!(lock_point(DiscKind::DvdRom, 1), LockPoint::AfterStep(1));
    }

    #[test]
    fn rom_step_one_reuses_an_existing_temp_iso_instead_of_reimaging() {
        let (job, _dir) = sample_job(DiscKind::CdRom, PathBuf::from("/out/MyDisc"));
        std::fs::write(job.temp_path.join("MyDisc.iso"), b"partial").unwrap();
        let config = Config::default();
        let steps = plan(&job, &config);
        assert_eq!(steps[0].description, "Reusing existing ISO image");
        assert!(!steps[0].release_drive_after);
    }
}
