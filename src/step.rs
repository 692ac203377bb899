//! `Step` descriptor and progress adapters (spec §3, §4.7, §9 design notes).
//!
//! The original source passed heterogeneous tuples around and inspected
//! their length/shape at runtime to figure out what kind of step it was
//! dealing with (`original_source/app/core/rippers/other/linux.py` returns
//! 3-, 4-, and 5-element tuples from the same function depending on
//! branch). Per spec §9 this is replaced with one tagged `Step` struct and
//! an explicit `StepKind` the Runner matches on instead of sniffing argv.

use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    MakeMkv,
    HandBrake,
    Compress,
    AudioRip,
    RawCopy,
    Generic,
}

/// A per-tool object that consumes log lines and yields optional step/title
/// percentages, grounded on `original_source/app/core/rippers/other/linux.py::DdProgressAdapter`'s
/// `on_start`/`on_line` shape.
pub trait ProgressAdapter: Send {
    /// Called once before the child process is spawned; lets the adapter
    /// capture anything it needs up front (e.g. the raw device's byte size).
    fn on_start(&mut self, _argv: &[String]) {}

    /// Called for every line read from the child's combined stdout/stderr.
    /// Returns `(step_progress, title_progress)`, either of which may be
    /// `None` to mean "no change".
    fn on_line(&mut self, line: &str) -> (Option<u8>, Option<u8>);
}

/// `dd`/`hdiutil`/PowerShell raw-copy progress: `done_bytes / expected_bytes`.
/// `expected_bytes` is unknown until `on_start` runs the OS-specific size
/// query (spec §4.7 step 7), so lines are ignored until then.
pub struct RawCopyAdapter {
    device: String,
    expected_bytes: Option<u64>,
    bytes_re: regex::Regex,
}

impl RawCopyAdapter {
    pub fn new(device: impl Into<String>) -> Self {
        RawCopyAdapter {
            device: device.into(),
            expected_bytes: None,
            bytes_re: regex::Regex::new(r"(\d+)\s+bytes").expect("static regex"),
        }
    }

    #[cfg(test)]
    fn with_expected_bytes(expected_bytes: u64) -> Self {
        let mut adapter = Self::new("test-device");
        adapter.expected_bytes = Some(expected_bytes.max(1));
        adapter
    }
}

impl ProgressAdapter for RawCopyAdapter {
    fn on_start(&mut self, _argv: &[String]) {
        self.expected_bytes = crate::host::device_size_blocking(&self.device);
    }

    fn on_line(&mut self, line: &str) -> (Option<u8>, Option<u8>) {
        let Some(expected) = self.expected_bytes.filter(|bytes| *bytes > 0) else {
            return (None, None);
        };
        let Some(caps) = self.bytes_re.captures(line) else {
            return (None, None);
        };
        let Ok(done) = caps[1].parse::<u64>() else {
            return (None, None);
        };
        let pct = ((done as f64 / expected as f64) * 100.0).clamp(0.0, 100.0) as u8;
        (Some(pct), None)
    }
}

/// Compress-step progress (zstd/bzip2 typically print a bare `NN%`).
pub struct CompressAdapter {
    percent_re: regex::Regex,
}

impl Default for CompressAdapter {
    fn default() -> Self {
        CompressAdapter {
            percent_re: regex::Regex::new(r"\b(\d{1,3}(?:\.\d+)?)\s*%").expect("static regex"),
        }
    }
}

impl ProgressAdapter for CompressAdapter {
    fn on_line(&mut self, line: &str) -> (Option<u8>, Option<u8>) {
        let Some(caps) = self.percent_re.captures(line) else {
            return (None, None);
        };
        let pct: f64 = caps[1].parse().unwrap_or(0.0);
        (Some(pct.clamp(0.0, 100.0) as u8), None)
    }
}

/// Audio-rip progress, counting "track N of M" lines (abcde/freac-style tools).
pub struct AudioRipAdapter {
    track_re: regex::Regex,
}

impl Default for AudioRipAdapter {
    fn default() -> Self {
        AudioRipAdapter {
            track_re: regex::Regex::new(r"(?i)track\s+(\d+)\s+of\s+(\d+)").expect("static regex"),
        }
    }
}

impl ProgressAdapter for AudioRipAdapter {
    fn on_line(&mut self, line: &str) -> (Option<u8>, Option<u8>) {
        let Some(caps) = self.track_re.captures(line) else {
            return (None, None);
        };
        let current: f64 = caps[1].parse().unwrap_or(0.0);
        let total: f64 = caps[2].parse().unwrap_or(1.0).max(1.0);
        let pct = ((current / total) * 100.0).clamp(0.0, 100.0) as u8;
        (Some(pct), None)
    }
}

/// HandBrake progress: `task N of M, P.PP %` gives `title_progress`;
/// `step_progress` is derived from counting produced output files against
/// the total `.mkv` count, which the Runner supplies since it knows both
/// directories — this adapter only tracks the in-flight title's fraction.
pub struct HandBrakeAdapter {
    task_re: regex::Regex,
}

impl Default for HandBrakeAdapter {
    fn default() -> Self {
        HandBrakeAdapter {
            task_re: regex::Regex::new(r"[Tt]ask\s+\d+\s+of\s+\d+,\s+([\d.]+)\s*%").expect("static regex"),
        }
    }
}

impl ProgressAdapter for HandBrakeAdapter {
    fn on_line(&mut self, line: &str) -> (Option<u8>, Option<u8>) {
        let Some(caps) = self.task_re.captures(line) else {
            return (None, None);
        };
        let pct: f64 = caps[1].parse().unwrap_or(0.0);
        (None, Some(pct.clamp(0.0, 100.0) as u8))
    }
}

pub struct Step {
    pub argv: Vec<String>,
    pub description: String,
    pub release_drive_after: bool,
    pub weight: f64,
    pub final_dest: Option<PathBuf>,
    pub kind: StepKind,
    pub adapter: Option<Box<dyn ProgressAdapter>>,
}

impl Step {
    pub fn new(argv: Vec<String>, description: impl Into<String>, kind: StepKind, weight: f64) -> Self {
        Step {
            argv,
            description: description.into(),
            release_drive_after: false,
            weight,
            final_dest: None,
            kind,
            adapter: None,
        }
    }

    pub fn release_after(mut self, release: bool) -> Self {
        self.release_drive_after = release;
        self
    }

    pub fn with_dest(mut self, dest: PathBuf) -> Self {
        self.final_dest = Some(dest);
        self
    }

    pub fn with_adapter(mut self, adapter: Box<dyn ProgressAdapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("argv", &self.argv)
            .field("description", &self.description)
            .field("release_drive_after", &self.release_drive_after)
            .field("weight", &self.weight)
            .field("final_dest", &self.final_dest)
            .field("kind", &self.kind)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_copy_adapter_computes_fraction_of_expected_bytes() {
        let mut adapter = RawCopyAdapter::with_expected_bytes(1000);
        let (step, title) = adapter.on_line("500 bytes copied, 1.0 s, 500 B/s");
        assert_eq!(step, Some(50));
        assert_eq!(title, None);
    }

    #[test]
    fn raw_copy_adapter_saturates_at_100() {
        let mut adapter = RawCopyAdapter::with_expected_bytes(1000);
        let (step, _) = adapter.on_line("5000 bytes copied");
        assert_eq!(step, Some(100));
    }

    #[test]
    fn raw_copy_adapter_reports_no_change_before_on_start_runs() {
        let mut adapter = RawCopyAdapter::new("/dev/sr0");
        assert_eq!(adapter.on_line("500 bytes copied"), (None, None));
    }

    #[test]
    fn handbrake_adapter_extracts_task_percentage() {
        let mut adapter = HandBrakeAdapter::default();
        let (step, title) = adapter.on_line("Encoding: task 1 of 1, 42.50 %");
        assert_eq!(step, None);
        assert_eq!(title, Some(42));
    }

    #[test]
    fn audio_rip_adapter_computes_track_fraction() {
        let mut adapter = AudioRipAdapter::default();
        let (step, _) = adapter.on_line("ripping track 3 of 12");
        assert_eq!(step, Some(25));
    }

    #[test]
    fn compress_adapter_reads_bare_percentage() {
        let mut adapter = CompressAdapter::default();
        let (step, _) = adapter.on_line("63.2%");
        assert_eq!(step, Some(63));
    }

    #[test]
    fn lines_without_a_match_report_no_change() {
        let mut adapter = CompressAdapter::default();
        assert_eq!(adapter.on_line("nothing to see here"), (None, None));
    }
}
