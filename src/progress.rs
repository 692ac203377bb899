//! Elapsed/remaining-time tracking used by the Runner to annotate its log
//! lines with a smoothed ETA. This does not feed the telemetry tick (that
//! carries only the fields spec'd in the Telemetry Hub) — it is a logging aid,
//! same role it played in the teacher crate, just made `Send` so it can live
//! inside a real tokio task instead of assuming a single-threaded executor.

use std::sync::{Arc, Mutex};
use std::time::SystemTime;

#[derive(Debug)]
pub struct Progress {
    pub total: usize,
    pub progress: usize,
    pub starting_position: usize,
}

impl Progress {
    pub fn new(total: Option<usize>) -> Self {
        let total = total.unwrap_or(100);
        let starting_position = 0;
        Progress {
            total,
            progress: starting_position,
            starting_position,
        }
    }

    pub fn start(&mut self, at: Option<usize>) {
        let pos = at.unwrap_or(self.progress);
        self.starting_position = pos;
        self.progress = pos;
    }

    pub fn finish(&mut self) {
        self.progress = self.total;
    }

    pub fn finished(&self) -> bool {
        self.progress == self.total
    }

    pub fn set_progress(&mut self, new_progress: usize) {
        self.progress = new_progress.min(self.total);
    }

    pub fn set_total(&mut self, new_total: usize) {
        self.total = new_total.max(self.progress);
    }

    pub fn percentage_completed(&self) -> usize {
        if self.total == 0 {
            100
        } else {
            (self.progress * 100) / self.total
        }
    }

    pub fn absolute(&self) -> isize {
        self.progress as isize - self.starting_position as isize
    }

    pub fn none(&self) -> bool {
        self.progress == 0
    }
}

#[derive(Debug)]
pub struct Timer {
    pub started_at: Option<SystemTime>,
    pub stopped_at: Option<SystemTime>,
}

impl Timer {
    pub fn new() -> Self {
        Timer {
            started_at: None,
            stopped_at: None,
        }
    }

    pub fn start(&mut self) {
        let now = SystemTime::now();
        if self.stopped() {
            if let (Some(started), Some(stopped)) = (self.started_at, self.stopped_at) {
                if let Ok(paused_duration) = stopped.duration_since(started) {
                    self.started_at = Some(now - paused_duration);
                } else {
                    self.started_at = Some(now);
                }
            } else {
                self.started_at = Some(now);
            }
        } else {
            self.started_at = Some(now);
        }
        self.stopped_at = None;
    }

    pub fn stop(&mut self) {
        if self.started() {
            self.stopped_at = Some(SystemTime::now());
        }
    }

    pub fn started(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn stopped(&self) -> bool {
        self.stopped_at.is_some()
    }

    pub fn is_reset(&self) -> bool {
        self.started_at.is_none()
    }

    pub fn elapsed_seconds(&self) -> f64 {
        if let Some(started) = self.started_at {
            let end = self.stopped_at.unwrap_or_else(SystemTime::now);
            end.duration_since(started)
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0)
        } else {
            0.0
        }
    }

    pub fn elapsed_whole_seconds(&self) -> u64 {
        self.elapsed_seconds().floor() as u64
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

/// Smooths a stream of progress samples into a less jittery rate estimate,
/// same weighting scheme as the teacher's `SmoothedAverage`.
pub struct SmoothedAverage {
    samples: [f64; 2],
    projection: f64,
    strength: f64,
}

impl SmoothedAverage {
    pub const DEFAULT_STRENGTH: f64 = 0.1;

    pub fn new(strength: Option<f64>, at: Option<f64>) -> Self {
        let strength = strength.unwrap_or(Self::DEFAULT_STRENGTH);
        let mut projector = SmoothedAverage {
            samples: [0.0, 0.0],
            projection: 0.0,
            strength,
        };
        projector.start(at);
        projector
    }

    fn absolute(&self) -> f64 {
        self.samples[1] - self.samples[0]
    }

    pub fn start(&mut self, at: Option<f64>) {
        self.projection = 0.0;
        let initial = at.unwrap_or(self.get_progress());
        self.samples[0] = initial;
        self.samples[1] = initial;
    }

    pub fn set_progress(&mut self, new_progress: f64) {
        self.samples[1] = new_progress;
        let rate = self.strength;
        self.projection = self.absolute() * (1.0 - rate) + self.projection * rate;
    }

    pub fn get_progress(&self) -> f64 {
        self.samples[1]
    }

    pub fn none(&self) -> bool {
        self.projection == 0.0
    }
}

const OOB_UNKNOWN_TIME_TEXT: &str = "??:??:??";
pub const NO_TIME_ELAPSED_TEXT: &str = "--:--:--";

/// Ties a [`Timer`], a [`Progress`] and a [`SmoothedAverage`] together to
/// produce a human-readable "estimated time remaining" string, the way the
/// teacher's `components::TimeComponent` did.
pub struct TimeComponent {
    timer: Arc<Mutex<Timer>>,
    progress: Arc<Mutex<Progress>>,
    projector: Arc<Mutex<SmoothedAverage>>,
}

impl TimeComponent {
    pub fn new(
        timer: Arc<Mutex<Timer>>,
        progress: Arc<Mutex<Progress>>,
        projector: Arc<Mutex<SmoothedAverage>>,
    ) -> Self {
        TimeComponent {
            timer,
            progress,
            projector,
        }
    }

    pub fn estimated(&self) -> String {
        match self.estimated_seconds_remaining() {
            Some(secs) => humantime::format_duration(std::time::Duration::from_secs(secs)).to_string(),
            None => OOB_UNKNOWN_TIME_TEXT.to_string(),
        }
    }

    pub fn elapsed(&self) -> String {
        let timer = self.timer.lock().expect("timer lock");
        if !timer.started() {
            return NO_TIME_ELAPSED_TEXT.to_string();
        }
        humantime::format_duration(std::time::Duration::from_secs(timer.elapsed_whole_seconds()))
            .to_string()
    }

    fn estimated_seconds_remaining(&self) -> Option<u64> {
        let progress = self.progress.lock().expect("progress lock");
        let projector = self.projector.lock().expect("projector lock");
        let timer = self.timer.lock().expect("timer lock");
        if projector.none() || progress.none() || timer.stopped() || timer.is_reset() {
            return None;
        }
        let elapsed = timer.elapsed_seconds();
        let projector_progress = projector.get_progress();
        if elapsed <= 0.0 || projector_progress == 0.0 {
            return None;
        }
        let total = progress.total as f64;
        let remaining = elapsed * ((total / projector_progress) - 1.0);
        Some(remaining.round().max(0.0) as u64)
    }
}

/// Bundles timer + progress + smoothing projector for one step's lifetime.
pub struct StepTimer {
    pub timer: Arc<Mutex<Timer>>,
    pub progress: Arc<Mutex<Progress>>,
    pub projector: Arc<Mutex<SmoothedAverage>>,
    pub time_component: TimeComponent,
}

impl StepTimer {
    pub fn start(total: usize) -> Self {
        let timer = Arc::new(Mutex::new(Timer::new()));
        let progress = Arc::new(Mutex::new(Progress::new(Some(total))));
        let projector = Arc::new(Mutex::new(SmoothedAverage::new(None, Some(0.0))));
        timer.lock().expect("timer lock").start();
        let time_component = TimeComponent::new(timer.clone(), progress.clone(), projector.clone());
        StepTimer {
            timer,
            progress,
            projector,
            time_component,
        }
    }

    /// Record a new absolute progress value (0..=total) and update the ETA projector.
    pub fn update(&self, value: usize) {
        self.progress.lock().expect("progress lock").set_progress(value);
        self.projector
            .lock()
            .expect("projector lock")
            .set_progress(value as f64);
    }

    pub fn finish(&self) {
        self.progress.lock().expect("progress lock").finish();
        self.timer.lock().expect("timer lock").stop();
    }

    pub fn estimated(&self) -> String {
        self.time_component.estimated()
    }

    pub fn elapsed(&self) -> String {
        self.time_component.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_percentage_completed_handles_zero_total() {
        let p = Progress::new(Some(0));
        assert_eq!(p.percentage_completed(), 100);
    }

    #[test]
    fn progress_clamps_set_progress_to_total() {
        let mut p = Progress::new(Some(10));
        p.set_progress(999);
        assert_eq!(p.progress, 10);
    }

    #[test]
    fn smoothed_average_none_until_progress_recorded() {
        let projector = SmoothedAverage::new(None, Some(0.0));
        assert!(projector.none());
    }

    #[test]
    fn step_timer_reports_no_eta_before_any_progress() {
        let timer = StepTimer::start(100);
        assert_eq!(timer.estimated(), OOB_UNKNOWN_TIME_TEXT);
    }
}
