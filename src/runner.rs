//! Runner / process supervisor (spec §4.7), grounded on
//! `original_source/app/core/job/runner.py::rip_runner`'s step loop (re-plan
//! before step ≥ 2, lock at the configured point, credit weight on success)
//! and on the teacher's own child-process handling in
//! `services/makemkvcon.rs` for combined stdout/stderr streaming into a
//! single channel. Unlike the teacher (and the Python original), the child
//! is spawned into its own process group so cancellation can kill a whole
//! `bash -lc "... | ..."` pipeline, not just the shell itself.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Child;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::config::Config;
use crate::drive::ProbeDrive;
use crate::host::HostOps;
use crate::job::{Job, JobStatus};
use crate::mkv::{self, MkvMessage};
use crate::planner::{self, LockPoint};
use crate::progress::StepTimer;
use crate::registry::DriveRegistry;
use crate::step::{Step, StepKind};
use crate::store::JobStore;
use crate::telemetry::{self, TelemetryHub};

/// Everything a running job needs besides the platform probe, which is
/// passed separately since it's the one piece `watcher.rs` also holds.
pub struct RunnerContext {
    pub store: Arc<JobStore>,
    pub registry: Arc<DriveRegistry>,
    pub hub: Arc<TelemetryHub>,
    pub config: Arc<Config>,
}

/// A handle the owner (`Service` in `lib.rs`) keeps per active job so
/// `cancel_job` can reach a Runner it doesn't otherwise touch.
#[derive(Clone)]
pub struct RunnerHandle {
    job_id: Uuid,
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl RunnerHandle {
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Signals the step loop to stop at the next safe point and kill the
    /// in-flight child's process group. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

enum StepOutcome {
    Completed,
    Failed,
    Cancelled,
}

enum StreamEvent {
    Line(String),
    MakeMkvProgress(u8),
}

/// Spawns the job's step loop as a background task and returns a handle to
/// it. `start_index`/`total_done_weight` let a retry resume partway through
/// a pipeline instead of restarting at step 1 (spec §4.7's retry path).
pub fn spawn(ctx: RunnerContext, host: Arc<dyn HostOps>, job_id: Uuid, start_index: usize, total_done_weight: f64) -> RunnerHandle {
    let cancelled = Arc::new(AtomicBool::new(false));
    let notify = Arc::new(Notify::new());
    let handle = RunnerHandle { job_id, cancelled: cancelled.clone(), notify: notify.clone() };
    tokio::spawn(run_job(ctx, host, job_id, start_index, total_done_weight, cancelled, notify));
    handle
}

async fn run_job(ctx: RunnerContext, host: Arc<dyn HostOps>, job_id: Uuid, start_index: usize, mut total_done_weight: f64, cancelled: Arc<AtomicBool>, notify: Arc<Notify>) {
    let Some(mut job) = ctx.store.get(job_id) else {
        log::error!("runner started for unknown job {job_id}");
        return;
    };

    job.status = JobStatus::Running;
    job.touch();
    ctx.store.update(job.clone());
    ctx.hub.publish_tick(&job);

    let heartbeat = telemetry::spawn_heartbeat(ctx.hub.clone(), ctx.store.clone(), job_id);

    let mut initial_plan = planner::plan(&job, &ctx.config);
    job.steps_total = initial_plan.len();
    let weights: Vec<f64> = initial_plan.iter().map(|s| s.weight).collect();
    let lock_point = planner::lock_point(job.disc_kind, job.steps_total);
    let mut first_step = if initial_plan.is_empty() { None } else { Some(initial_plan.remove(0)) };

    let mut log_file = match tokio::fs::OpenOptions::new().create(true).append(true).open(job.temp_path.join("log.txt")).await {
        Ok(file) => file,
        Err(err) => {
            log::error!("could not open log.txt for job {job_id}: {err}");
            job.status = JobStatus::Failed;
            ctx.store.update(job.clone());
            ctx.hub.close(&job);
            heartbeat.abort();
            return;
        }
    };

    for idx in 1..=job.steps_total {
        if idx < start_index {
            continue;
        }
        if cancelled.load(Ordering::SeqCst) {
            job.status = JobStatus::Cancelled;
            job.touch();
            break;
        }

        let step = if idx == 1 {
            match first_step.take() {
                Some(step) => step,
                None => {
                    log::error!("job {job_id}: step 1 requested twice");
                    break;
                }
            }
        } else {
            let mut fresh = planner::plan(&job, &ctx.config);
            if idx - 1 >= fresh.len() {
                log::error!("job {job_id}: planner returned fewer steps than expected at step {idx}");
                job.status = JobStatus::Failed;
                break;
            }
            fresh.remove(idx - 1)
        };

        let release_drive_after = step.release_drive_after;
        let final_dest = step.final_dest.clone();
        let step_weight = weights.get(idx - 1).copied().unwrap_or(step.weight);

        job.step = idx;
        job.step_description = step.description.clone();
        job.step_progress = 0;
        job.title_progress = 0;
        job.touch();

        if lock_point == LockPoint::BeforeStep(idx) && !job.output_locked {
            if let Err(err) = apply_lock(&mut job, final_dest.as_deref()) {
                log::error!("job {job_id}: could not prepare destination: {err}");
                job.status = JobStatus::Failed;
                ctx.store.update(job.clone());
                ctx.hub.publish_tick(&job);
                break;
            }
        }

        ctx.store.update(job.clone());
        ctx.hub.publish_tick(&job);

        let outcome = execute_step(&mut job, step, &ctx, &cancelled, &notify, &mut log_file, total_done_weight).await;

        match outcome {
            StepOutcome::Completed => {
                total_done_weight += step_weight;
                job.step_progress = 100;
                job.touch();
                job.recompute_total_progress(total_done_weight, 0.0);

                if release_drive_after {
                    release_and_eject(&job, &ctx.registry, host.as_ref());
                    job.drive_id = None;
                }

                if lock_point == LockPoint::AfterStep(idx) && !job.output_locked {
                    if let Err(err) = apply_lock(&mut job, final_dest.as_deref()) {
                        log::error!("job {job_id}: could not prepare destination after step {idx}: {err}");
                        job.status = JobStatus::Failed;
                    }
                }

                ctx.store.update(job.clone());
                ctx.hub.publish_tick(&job);

                if job.status == JobStatus::Failed {
                    break;
                }
            }
            StepOutcome::Failed => {
                job.status = JobStatus::Failed;
                job.touch();
                ctx.store.update(job.clone());
                ctx.hub.publish_tick(&job);
                break;
            }
            StepOutcome::Cancelled => {
                job.status = JobStatus::Cancelled;
                job.touch();
                ctx.store.update(job.clone());
                ctx.hub.publish_tick(&job);
                break;
            }
        }
    }

    if !job.status.is_terminal() {
        job.status = JobStatus::Finished;
        job.step_progress = 100;
        job.total_progress = 100;
    }
    if job.drive_id.is_some() {
        release_and_eject(&job, &ctx.registry, host.as_ref());
        job.drive_id = None;
    }
    job.touch();
    ctx.store.update(job.clone());
    ctx.hub.close(&job);
    heartbeat.abort();
}

/// Creates the destination directory (video/audio kinds) or its parent
/// (ROM/other file targets), then marks the job's output as locked.
fn apply_lock(job: &mut Job, final_dest: Option<&Path>) -> std::io::Result<()> {
    if let Some(dest) = final_dest {
        job.output_path = dest.to_path_buf();
    }
    ensure_destination_exists(job)?;
    job.lock_output();
    Ok(())
}

fn ensure_destination_exists(job: &Job) -> std::io::Result<()> {
    use crate::drive::DiscKind::*;
    match job.disc_kind {
        CdRom | DvdRom | BlurayRom | OtherDisc | Unknown => {
            if let Some(parent) = job.output_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            Ok(())
        }
        DvdVideo | BlurayVideo | CdAudio => std::fs::create_dir_all(&job.output_path),
    }
}

fn release_and_eject(job: &Job, registry: &DriveRegistry, host: &dyn HostOps) {
    let Some(logical_id) = job.drive_id.as_deref() else {
        return;
    };
    registry.release(logical_id);
    let Ok(drive) = registry.get(logical_id) else {
        return;
    };
    let probe = ProbeDrive {
        logical_id: drive.logical_id,
        device_path: drive.device_path,
        model: drive.model,
        capability: drive.capability,
    };
    if let Err(err) = host.eject(&probe) {
        log::warn!("eject failed for drive {logical_id}: {err}");
    }
}

/// Runs one `Step` to completion: spawns its argv in its own process group,
/// streams combined stdout/stderr line by line, feeds each line to the
/// step's progress adapter (or the MakeMKV progress-file poller), persists
/// and publishes after every line, and reacts to `cancelled` at the top of
/// every iteration of the read loop.
async fn execute_step(
    job: &mut Job,
    mut step: Step,
    ctx: &RunnerContext,
    cancelled: &Arc<AtomicBool>,
    notify: &Arc<Notify>,
    log_file: &mut tokio::fs::File,
    total_done_weight: f64,
) -> StepOutcome {
    if let Some(adapter) = step.adapter.as_mut() {
        adapter.on_start(&step.argv);
    }

    let step_timer = StepTimer::start(100);
    let mut total_titles_cache: Option<usize> = None;

    let mut child = match spawn_child(&step.argv, &job.temp_path) {
        Ok(child) => child,
        Err(err) => {
            log::error!("job {}: could not spawn step {:?}: {err}", job.id, step.argv);
            return StepOutcome::Failed;
        }
    };

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let (tx, mut rx) = mpsc::unbounded_channel::<StreamEvent>();

    if let Some(stdout) = stdout {
        tokio::spawn(stream_lines(stdout, tx.clone()));
    }
    if let Some(stderr) = stderr {
        tokio::spawn(stream_lines(stderr, tx.clone()));
    }

    let mkv_poller = if step.kind == StepKind::MakeMkv {
        let progress_path = job.temp_path.join("makemkv_progress.txt");
        Some(spawn_makemkv_poller(progress_path, tx.clone()))
    } else {
        None
    };
    drop(tx);

    // `child.wait()` races directly against line/poller events rather than
    // waiting for the channel to close: the MakeMKV poller holds its own
    // sender for as long as the step runs, so the channel never closes on
    // its own while that task is alive.
    let outcome = loop {
        tokio::select! {
            _ = notify.notified() => {
                if cancelled.load(Ordering::SeqCst) {
                    kill_process_group(&mut child);
                    break StepOutcome::Cancelled;
                }
            }
            event = rx.recv() => {
                match event {
                    Some(StreamEvent::Line(line)) => {
                        handle_line(job, &mut step, &line, log_file, ctx, total_done_weight, &mut total_titles_cache).await;
                        step_timer.update(job.step_progress as usize);
                    }
                    Some(StreamEvent::MakeMkvProgress(pct)) => {
                        job.step_progress = pct;
                        job.touch();
                        job.recompute_total_progress(total_done_weight, step.weight);
                        ctx.store.update(job.clone());
                        ctx.hub.publish_tick(job);
                        step_timer.update(pct as usize);
                    }
                    None => {}
                }
            }
            status = child.wait() => {
                while let Ok(event) = rx.try_recv() {
                    match event {
                        StreamEvent::Line(line) => handle_line(job, &mut step, &line, log_file, ctx, total_done_weight, &mut total_titles_cache).await,
                        StreamEvent::MakeMkvProgress(pct) => job.step_progress = pct,
                    }
                }
                break match status {
                    Ok(status) if status.success() => StepOutcome::Completed,
                    Ok(status) => {
                        log::warn!("job {}: step exited with {status}", job.id);
                        StepOutcome::Failed
                    }
                    Err(err) => {
                        log::error!("job {}: wait() failed: {err}", job.id);
                        StepOutcome::Failed
                    }
                };
            }
        }
    };

    if let Some(poller) = mkv_poller {
        poller.abort();
    }

    step_timer.finish();
    log::debug!("job {}: step {:?} took {}", job.id, step.kind, step_timer.elapsed());

    outcome
}

fn spawn_child(argv: &[String], cwd: &Path) -> std::io::Result<Child> {
    let (program, args) = argv.split_first().ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty argv"))?;

    let mut cmd = std::process::Command::new(program);
    cmd.args(args);
    cmd.current_dir(cwd);
    cmd.stdin(std::process::Stdio::null());
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
        cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
    }

    let mut tokio_cmd = tokio::process::Command::from(cmd);
    tokio_cmd.kill_on_drop(true);
    tokio_cmd.spawn()
}

#[cfg(unix)]
fn kill_process_group(child: &mut Child) {
    if let Some(pid) = child.id() {
        let _ = nix::sys::signal::kill(nix::unistd::Pid::from_raw(-(pid as i32)), nix::sys::signal::Signal::SIGTERM);
    }
}

#[cfg(windows)]
fn kill_process_group(child: &mut Child) {
    // TODO: terminate the whole process tree via a Job Object; today only
    // the direct child is killed, so a `HandBrakeCLI` launched from a batch
    // wrapper could outlive cancellation on Windows.
    let _ = child.start_kill();
}

#[cfg(not(any(unix, windows)))]
fn kill_process_group(child: &mut Child) {
    let _ = child.start_kill();
}

async fn stream_lines<R>(reader: R, tx: UnboundedSender<StreamEvent>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let clean = line.rsplit('\r').next().unwrap_or(&line).to_string();
                if tx.send(StreamEvent::Line(clean)).is_err() {
                    return;
                }
            }
            Ok(None) => return,
            Err(err) => {
                log::warn!("error reading child output: {err}");
                return;
            }
        }
    }
}

/// Polls `makemkv_progress.txt` at ~5 Hz for the last `PRGV` line (spec
/// §4.7 step 6: "the primary source; stdout % is fallback").
fn spawn_makemkv_poller(path: PathBuf, tx: UnboundedSender<StreamEvent>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_seen: Option<String> = None;
        loop {
            tokio::time::sleep(Duration::from_millis(200)).await;
            if tx.is_closed() {
                return;
            }
            let Ok(text) = tokio::fs::read_to_string(&path).await else {
                continue;
            };
            let Some(line) = text.lines().rev().find(|l| l.starts_with("PRGV")) else {
                continue;
            };
            if last_seen.as_deref() == Some(line) {
                continue;
            }
            last_seen = Some(line.to_string());
            if let Some(MkvMessage::Prgv(prgv)) = mkv::parse_line(line) {
                let pct = ((prgv.current as f64 / prgv.max as f64) * 100.0).clamp(0.0, 100.0) as u8;
                let _ = tx.send(StreamEvent::MakeMkvProgress(pct));
            }
        }
    })
}

async fn handle_line(job: &mut Job, step: &mut Step, line: &str, log_file: &mut tokio::fs::File, ctx: &RunnerContext, total_done_weight: f64, total_titles_cache: &mut Option<usize>) {
    job.append_log(line.to_string());
    if let Err(err) = log_file.write_all(format!("{line}\n").as_bytes()).await {
        log::warn!("job {}: could not append to log.txt: {err}", job.id);
    }

    if step.kind == StepKind::HandBrake {
        if let Some(pct) = handbrake_step_progress(job, step, line, &ctx.config, total_titles_cache) {
            job.step_progress = pct;
        }
    } else if let Some(adapter) = step.adapter.as_mut() {
        let (step_pct, title_pct) = adapter.on_line(line);
        if let Some(pct) = step_pct {
            job.step_progress = pct;
        }
        if let Some(pct) = title_pct {
            job.title_progress = pct;
        }
    }

    job.touch();
    job.recompute_total_progress(total_done_weight, step.weight);
    ctx.store.update(job.clone());
    ctx.hub.publish_log(job, line.to_string());
}

/// HandBrake reports per-title percentage only; the overall step fraction
/// is `(produced_titles * 100/total_titles + P * (100/total_titles)/100)`,
/// where `total_titles` is the number of `.mkv` files MakeMKV produced and
/// `produced_titles` is how many already landed in the destination
/// (matching the configured container extension). `total_titles` is counted
/// once per step and cached (spec §4.7 step 8: "lazy, cached") since it
/// can't change once title extraction has finished.
fn handbrake_step_progress(job: &Job, step: &mut Step, line: &str, config: &Config, total_titles_cache: &mut Option<usize>) -> Option<u8> {
    let adapter = step.adapter.as_mut()?;
    let (_, title_pct) = adapter.on_line(line);
    let title_pct = title_pct?;

    let format = match job.disc_kind {
        crate::drive::DiscKind::BlurayVideo => config.bluray.handbrakeformat.as_str(),
        _ => config.dvd.handbrakeformat.as_str(),
    };
    let total = *total_titles_cache.get_or_insert_with(|| count_entries_with_extension(&job.temp_path, "mkv").max(1));
    let produced = step.final_dest.as_deref().map(|dir| count_entries_with_extension(dir, format)).unwrap_or(0);

    let fraction = (produced as f64 + title_pct as f64 / 100.0) / total as f64;
    Some((fraction * 100.0).clamp(0.0, 100.0) as u8)
}

fn count_entries_with_extension(dir: &Path, ext: &str) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| entries.flatten().filter(|entry| entry.path().extension().map(|e| e.eq_ignore_ascii_case(ext)).unwrap_or(false)).count())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::DiscKind;
    use tempfile::tempdir;

    #[test]
    fn cancel_flips_the_shared_atomic_and_notifies() {
        let cancelled = Arc::new(AtomicBool::new(false));
        let notify = Arc::new(Notify::new());
        let handle = RunnerHandle { job_id: Uuid::new_v4(), cancelled: cancelled.clone(), notify };
        assert!(!cancelled.load(Ordering::SeqCst));
        handle.cancel();
        assert!(cancelled.load(Ordering::SeqCst));
    }

    #[test]
    fn ensure_destination_exists_creates_parent_for_rom_file_targets() {
        let dir = tempdir().unwrap();
        let mut job = Job::new(DiscKind::CdRom, None, "Disc".into(), dir.path(), dir.path().join("nested").join("Disc.iso"));
        job.temp_path = dir.path().to_path_buf();
        ensure_destination_exists(&job).unwrap();
        assert!(dir.path().join("nested").is_dir());
    }

    #[test]
    fn ensure_destination_exists_creates_the_directory_itself_for_video_targets() {
        let dir = tempdir().unwrap();
        let mut job = Job::new(DiscKind::DvdVideo, None, "Disc".into(), dir.path(), dir.path().join("movies").join("Disc"));
        job.temp_path = dir.path().to_path_buf();
        ensure_destination_exists(&job).unwrap();
        assert!(dir.path().join("movies").join("Disc").is_dir());
    }

    #[test]
    fn count_entries_with_extension_ignores_other_files() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.mkv"), b"").unwrap();
        std::fs::write(dir.path().join("b.mkv"), b"").unwrap();
        std::fs::write(dir.path().join("c.txt"), b"").unwrap();
        assert_eq!(count_entries_with_extension(dir.path(), "mkv"), 2);
    }
}
