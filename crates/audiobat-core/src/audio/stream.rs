//! Playback and capture tasks
//!
//! Each task runs on its own OS thread, owns its endpoint, buffer and file,
//! and reports exactly one [`TaskExit`] through a result channel. Resources
//! are released by their destructors whichever way the loop ends.
//!
//! Transient endpoint conditions ([`Transfer::WouldBlock`], [`Transfer::Xrun`])
//! are absorbed here and never reach the orchestrator.

use crate::audio::endpoint::{
    check_rate_drift, Direction, EndpointError, Negotiated, PcmBackend, PcmEndpoint,
    StreamParams, Transfer, MAX_WAIT,
};
use crate::audio::pcm::PcmBuffer;
use crate::audio::signal::SineGenerator;
use crate::audio::wav::{ContainerError, FramePolicy, WavFormat, WavReader, WavWriter};
use crate::config::TestConfig;
use crossbeam_channel::{bounded, Receiver};
use serde::Serialize;
use std::fs::File;
use std::io::BufReader;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;

/// Errors fatal to a single streaming task
#[derive(Error, Debug)]
pub enum TaskError {
    #[error(transparent)]
    Endpoint(#[from] EndpointError),

    #[error("container error: {0}")]
    Container(#[from] ContainerError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to spawn {task} task: {reason}")]
    Spawn { task: Direction, reason: String },

    #[error("{task} task panicked: {message}")]
    Panicked { task: Direction, message: String },
}

/// Cooperative cancellation flag
///
/// A child token is cancelled when either it or its parent is, so a
/// run-wide token (Ctrl-C) reaches every task while the orchestrator can
/// still stop one task alone.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    parent: Option<Arc<AtomicBool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that also observes this one
    pub fn child(&self) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            parent: Some(Arc::clone(&self.flag)),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
            || self
                .parent
                .as_ref()
                .map(|p| p.load(Ordering::Acquire))
                .unwrap_or(false)
    }
}

/// Lifecycle of a streaming task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    NotStarted,
    Running,
    Completed,
    Cancelled,
    Failed,
}

/// Buffer counters kept by a running task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Tally {
    frames: u64,
    periods: u64,
    recoveries: u64,
}

/// Terminal report of one task
#[derive(Debug)]
pub struct TaskExit {
    pub direction: Direction,
    pub state: TaskState,
    /// Frames moved through the endpoint
    pub frames: u64,
    /// Buffers moved through the endpoint
    pub periods: u64,
    /// Underruns or overruns recovered
    pub recoveries: u64,
    pub error: Option<TaskError>,
}

impl TaskExit {
    fn new(direction: Direction, tally: Tally, outcome: Result<TaskState, TaskError>) -> Self {
        let (state, error) = match outcome {
            Ok(state) => (state, None),
            Err(e) => (TaskState::Failed, Some(e)),
        };
        Self {
            direction,
            state,
            frames: tally.frames,
            periods: tally.periods,
            recoveries: tally.recoveries,
            error,
        }
    }

    fn failed(direction: Direction, error: TaskError) -> Self {
        Self::new(direction, Tally::default(), Err(error))
    }

    /// Exit for a task whose thread went away without reporting
    pub(crate) fn lost(direction: Direction) -> Self {
        Self::failed(
            direction,
            TaskError::Panicked {
                task: direction,
                message: "exited without reporting".into(),
            },
        )
    }

    pub fn is_failure(&self) -> bool {
        self.state == TaskState::Failed
    }

    pub fn summary(&self) -> TaskSummary {
        TaskSummary {
            direction: self.direction,
            state: self.state,
            frames: self.frames,
            periods: self.periods,
            recoveries: self.recoveries,
            error: self.error.as_ref().map(|e| e.to_string()),
        }
    }
}

/// Serializable view of a task for reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskSummary {
    pub direction: Direction,
    pub state: TaskState,
    pub frames: u64,
    pub periods: u64,
    pub recoveries: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskSummary {
    pub fn not_started(direction: Direction) -> Self {
        Self {
            direction,
            state: TaskState::NotStarted,
            frames: 0,
            periods: 0,
            recoveries: 0,
            error: None,
        }
    }
}

/// Where playback audio comes from
pub enum PlaybackSource {
    Sine(SineGenerator),
    File(WavReader<BufReader<File>>),
}

impl PlaybackSource {
    /// The input file when one is configured, the sine generator otherwise
    pub fn from_config(config: &TestConfig) -> Result<Self, ContainerError> {
        match &config.input_file {
            Some(path) => Ok(Self::File(WavReader::open(path, FramePolicy::KeepAll)?)),
            None => Ok(Self::Sine(SineGenerator::from_config(config))),
        }
    }

    /// Fill `buf`, returning the frames produced; 0 means the source ended
    fn fill(&mut self, buf: &mut PcmBuffer) -> Result<usize, ContainerError> {
        match self {
            Self::Sine(gen) => {
                gen.fill(buf);
                Ok(buf.frames())
            }
            Self::File(reader) => reader.read_frames(buf),
        }
    }
}

fn open_negotiated<B: PcmBackend>(
    backend: &B,
    direction: Direction,
    config: &TestConfig,
) -> Result<(B::Endpoint, Negotiated), EndpointError> {
    let device = match direction {
        Direction::Playback => config.playback_device.as_ref(),
        Direction::Capture => config.capture_device.as_ref(),
    };
    let mut endpoint = backend.open(direction, device)?;
    let negotiated = endpoint.negotiate(&StreamParams {
        sample_rate: config.sample_rate,
        channels: config.channels,
        depth: config.depth,
    })?;
    check_rate_drift(config.sample_rate, negotiated.sample_rate)?;

    tracing::info!(
        task = %direction,
        backend = backend.name(),
        rate = negotiated.sample_rate,
        period = negotiated.period_frames,
        "Endpoint negotiated"
    );
    Ok((endpoint, negotiated))
}

fn period_cap_reached(config: &TestConfig, tally: &Tally) -> bool {
    config
        .period_limit
        .map(|limit| tally.periods >= limit)
        .unwrap_or(false)
}

/// Write all of `bytes`, absorbing transient conditions
///
/// Returns `false` if cancellation was observed while waiting.
fn write_period<E: PcmEndpoint>(
    endpoint: &mut E,
    bytes: &[u8],
    frame_size: usize,
    cancel: &CancelToken,
    tally: &mut Tally,
) -> Result<bool, EndpointError> {
    let frames = bytes.len() / frame_size;
    let mut done = 0;
    while done < frames {
        match endpoint.write(&bytes[done * frame_size..], frames - done)? {
            Transfer::Frames(0) | Transfer::WouldBlock => {
                if cancel.is_cancelled() {
                    return Ok(false);
                }
                tracing::trace!("Playback endpoint busy");
                endpoint.wait(MAX_WAIT);
            }
            Transfer::Frames(n) => done += n,
            Transfer::Xrun => {
                tracing::warn!(frames = tally.frames, "Playback underrun, recovering");
                tally.recoveries += 1;
                endpoint.recover()?;
            }
        }
    }
    Ok(true)
}

fn playback_loop<B: PcmBackend>(
    backend: &B,
    config: &TestConfig,
    cancel: &CancelToken,
    tally: &mut Tally,
) -> Result<TaskState, TaskError> {
    let mut source = PlaybackSource::from_config(config)?;
    let (mut endpoint, negotiated) = open_negotiated(backend, Direction::Playback, config)?;
    let mut buf = PcmBuffer::new(negotiated.period_frames, config.channels, config.depth);
    let frame_size = buf.frame_size();

    tracing::info!(frames = ?config.playback_frames, "Playback started");

    loop {
        if cancel.is_cancelled() {
            return Ok(TaskState::Cancelled);
        }
        if period_cap_reached(config, tally) {
            break;
        }

        let want = match config.playback_frames {
            Some(total) => (total.saturating_sub(tally.frames)).min(negotiated.period_frames as u64) as usize,
            None => negotiated.period_frames,
        };
        if want == 0 {
            break;
        }
        buf.resize(want);

        let produced = source.fill(&mut buf)?;
        if produced == 0 {
            tracing::debug!("Playback source exhausted");
            break;
        }
        if !write_period(&mut endpoint, buf.frames_bytes(produced), frame_size, cancel, tally)? {
            return Ok(TaskState::Cancelled);
        }
        tally.frames += produced as u64;
        tally.periods += 1;
    }

    endpoint.drain()?;
    Ok(TaskState::Completed)
}

fn capture_loop<B: PcmBackend>(
    backend: &B,
    config: &TestConfig,
    cancel: &CancelToken,
    tally: &mut Tally,
) -> Result<TaskState, TaskError> {
    if let Some(parent) = config.capture_file.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let (mut endpoint, negotiated) = open_negotiated(backend, Direction::Capture, config)?;
    let format = WavFormat::from_config(config);
    let mut writer = WavWriter::create(&config.capture_file, format, config.frames)?;
    let mut buf = PcmBuffer::new(negotiated.period_frames, config.channels, config.depth);
    let frame_size = buf.frame_size();

    tracing::info!(
        frames = config.frames,
        path = %config.capture_file.display(),
        "Capture started"
    );

    let state = 'capture: loop {
        if tally.frames >= config.frames || period_cap_reached(config, tally) {
            break TaskState::Completed;
        }
        // Only between whole buffers, never mid-write
        if cancel.is_cancelled() {
            break TaskState::Cancelled;
        }

        let want = (config.frames - tally.frames).min(negotiated.period_frames as u64) as usize;
        let mut filled = 0;
        while filled < want {
            let region = &mut buf.as_bytes_mut()[filled * frame_size..want * frame_size];
            match endpoint.read(region, want - filled)? {
                Transfer::Frames(0) | Transfer::WouldBlock => {
                    if cancel.is_cancelled() {
                        writer.write_first_frames(&buf, filled)?;
                        tally.frames += filled as u64;
                        break 'capture TaskState::Cancelled;
                    }
                    tracing::trace!("Capture endpoint empty");
                    endpoint.wait(MAX_WAIT);
                }
                Transfer::Frames(n) => filled += n,
                Transfer::Xrun => {
                    tracing::warn!(frames = tally.frames + filled as u64, "Capture overrun, recovering");
                    tally.recoveries += 1;
                    endpoint.recover()?;
                }
            }
        }

        writer.write_first_frames(&buf, filled)?;
        tally.frames += filled as u64;
        tally.periods += 1;
    };

    let written = writer.finalize()?;
    tracing::debug!(frames = written, "Capture container finalized");
    Ok(state)
}

/// Run a playback task to its end on the current thread
pub fn run_playback<B: PcmBackend>(backend: &B, config: &TestConfig, cancel: &CancelToken) -> TaskExit {
    let mut tally = Tally::default();
    let outcome = playback_loop(backend, config, cancel, &mut tally);
    log_exit(Direction::Playback, &tally, &outcome);
    TaskExit::new(Direction::Playback, tally, outcome)
}

/// Run a capture task to its end on the current thread
pub fn run_capture<B: PcmBackend>(backend: &B, config: &TestConfig, cancel: &CancelToken) -> TaskExit {
    let mut tally = Tally::default();
    let outcome = capture_loop(backend, config, cancel, &mut tally);
    log_exit(Direction::Capture, &tally, &outcome);
    TaskExit::new(Direction::Capture, tally, outcome)
}

fn log_exit(direction: Direction, tally: &Tally, outcome: &Result<TaskState, TaskError>) {
    match outcome {
        Ok(state) => tracing::info!(
            task = %direction,
            state = ?state,
            frames = tally.frames,
            periods = tally.periods,
            recoveries = tally.recoveries,
            "Task finished"
        ),
        Err(e) => tracing::error!(task = %direction, error = %e, "Task failed"),
    }
}

/// A task running on its own thread
///
/// Dropping the handle cancels the task and joins its thread.
pub struct TaskHandle {
    direction: Direction,
    cancel: CancelToken,
    result: Receiver<TaskExit>,
    thread: Option<JoinHandle<()>>,
}

impl TaskHandle {
    /// Spawn `task` on a named thread; its exit is delivered through [`Self::result`]
    pub fn spawn<F>(direction: Direction, cancel: CancelToken, task: F) -> Result<Self, TaskError>
    where
        F: FnOnce(&CancelToken) -> TaskExit + Send + 'static,
    {
        let (tx, rx) = bounded(1);
        let token = cancel.clone();

        let thread = std::thread::Builder::new()
            .name(format!("audiobat-{}", direction))
            .spawn(move || {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| task(&token)));
                let exit = match result {
                    Ok(exit) => exit,
                    Err(panic_info) => {
                        let message = if let Some(s) = panic_info.downcast_ref::<&str>() {
                            s.to_string()
                        } else if let Some(s) = panic_info.downcast_ref::<String>() {
                            s.clone()
                        } else {
                            "unknown panic".to_string()
                        };
                        tracing::error!(task = %direction, panic = %message, "Task thread PANICKED");
                        TaskExit::failed(direction, TaskError::Panicked { task: direction, message })
                    }
                };
                // The receiver may be gone if the handle was dropped
                let _ = tx.send(exit);
            })
            .map_err(|e| TaskError::Spawn {
                task: direction,
                reason: e.to_string(),
            })?;

        Ok(Self {
            direction,
            cancel,
            result: rx,
            thread: Some(thread),
        })
    }

    /// Spawn a playback task over `backend`
    pub fn playback<B: PcmBackend>(
        backend: B,
        config: Arc<TestConfig>,
        cancel: CancelToken,
    ) -> Result<Self, TaskError> {
        Self::spawn(Direction::Playback, cancel, move |token| {
            run_playback(&backend, &config, token)
        })
    }

    /// Spawn a capture task over `backend`
    pub fn capture<B: PcmBackend>(
        backend: B,
        config: Arc<TestConfig>,
        cancel: CancelToken,
    ) -> Result<Self, TaskError> {
        Self::spawn(Direction::Capture, cancel, move |token| {
            run_capture(&backend, &config, token)
        })
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Request cooperative cancellation
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Channel carrying the task's single exit report
    pub fn result(&self) -> &Receiver<TaskExit> {
        &self.result
    }

    /// Wait for the exit report and join the thread
    pub fn join(mut self) -> TaskExit {
        let exit = self
            .result
            .recv()
            .unwrap_or_else(|_| TaskExit::lost(self.direction));
        self.join_thread();
        exit
    }

    /// Join after an exit report already taken from [`Self::result`]
    pub fn finish(mut self) {
        self.join_thread();
    }

    fn join_thread(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!(task = %self.direction, "Task thread join failed");
            }
        }
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.cancel();
            self.join_thread();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::virtual_loop::VirtualLoopback;
    use crate::audio::wav::WavReader;
    use crate::config::{BackendKind, RunOptions};
    use std::time::Duration;

    fn options(dir: &tempfile::TempDir) -> RunOptions {
        RunOptions {
            sample_rate: 8000,
            frames: Some("800".into()),
            frequencies: Some("1000".into()),
            backend: BackendKind::Virtual,
            capture_file: Some(dir.path().join("capture.wav")),
            ..Default::default()
        }
    }

    fn playback_only(dir: &tempfile::TempDir) -> TestConfig {
        TestConfig::resolve(&RunOptions {
            playback_device: Some("virtual".into()),
            ..options(dir)
        })
        .unwrap()
    }

    fn capture_only(dir: &tempfile::TempDir) -> TestConfig {
        TestConfig::resolve(&RunOptions {
            capture_device: Some("virtual".into()),
            ..options(dir)
        })
        .unwrap()
    }

    #[test]
    fn test_cancel_token_child() {
        let parent = CancelToken::new();
        let child = parent.child();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());

        let other = parent.child();
        parent.cancel();
        assert!(other.is_cancelled());
    }

    #[test]
    fn test_playback_completes() {
        let dir = tempfile::tempdir().unwrap();
        let config = playback_only(&dir);
        let backend = VirtualLoopback::new().with_speed(20.0);

        let exit = run_playback(&backend, &config, &CancelToken::new());
        assert_eq!(exit.state, TaskState::Completed);
        assert_eq!(exit.frames, 800);
        assert_eq!(exit.periods, 4);
        assert_eq!(backend.open_endpoints(), 0);
    }

    #[test]
    fn test_period_limit() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = playback_only(&dir);
        config.period_limit = Some(2);
        let backend = VirtualLoopback::new().with_speed(20.0);

        let exit = run_playback(&backend, &config, &CancelToken::new());
        assert_eq!(exit.state, TaskState::Completed);
        assert_eq!(exit.periods, 2);
        assert_eq!(exit.frames, 400);
    }

    #[test]
    fn test_open_failure_reported() {
        let dir = tempfile::tempdir().unwrap();
        let config = capture_only(&dir);
        let backend = VirtualLoopback::new().failing_open(Direction::Capture);

        let exit = run_capture(&backend, &config, &CancelToken::new());
        assert!(exit.is_failure());
        assert!(matches!(
            exit.error,
            Some(TaskError::Endpoint(EndpointError::Open { .. }))
        ));
        assert_eq!(backend.open_endpoints(), 0);
    }

    #[test]
    fn test_rate_drift_fails_task() {
        let dir = tempfile::tempdir().unwrap();
        let config = playback_only(&dir);
        let backend = VirtualLoopback::new().with_native_rate(16000);

        let exit = run_playback(&backend, &config, &CancelToken::new());
        assert!(matches!(
            exit.error,
            Some(TaskError::Endpoint(EndpointError::RateDrift { .. }))
        ));
        assert_eq!(backend.closed(), 1);
    }

    #[test]
    fn test_cancel_capture_releases_once() {
        let dir = tempfile::tempdir().unwrap();
        // Ten seconds of idle input, cancelled long before the end
        let config = Arc::new(TestConfig::resolve(&RunOptions {
            capture_device: Some("virtual".into()),
            frames: Some("10s".into()),
            ..options(&dir)
        })
        .unwrap());
        let backend = VirtualLoopback::new();

        let handle =
            TaskHandle::capture(backend.clone(), Arc::clone(&config), CancelToken::new()).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        handle.cancel();
        let exit = handle.join();

        assert_eq!(exit.state, TaskState::Cancelled);
        assert!(exit.frames < config.frames);
        assert_eq!(backend.opened(), 1);
        assert_eq!(backend.closed(), 1);

        // Whatever was captured before the cancel is in a valid container
        let reader = WavReader::open(&config.capture_file, FramePolicy::KeepAll).unwrap();
        assert_eq!(reader.info().frames, exit.frames);
    }

    #[test]
    fn test_dropping_handle_cancels() {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(capture_only(&dir));
        let backend = VirtualLoopback::new();

        let handle = TaskHandle::capture(backend.clone(), config, CancelToken::new()).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        drop(handle);
        assert_eq!(backend.open_endpoints(), 0);
        assert_eq!(backend.closed(), backend.opened());
    }

    #[test]
    fn test_playback_feeds_capture() {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(capture_only(&dir));
        let backend = VirtualLoopback::new().with_speed(4.0);

        let mut source = (*config).clone();
        source.playback_frames = Some(4000);
        let playback = TaskHandle::playback(backend.clone(), Arc::new(source), CancelToken::new()).unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let capture =
            TaskHandle::capture(backend.clone(), Arc::clone(&config), CancelToken::new()).unwrap();

        let exit = capture.join();
        assert_eq!(exit.state, TaskState::Completed);
        assert_eq!(exit.frames, 800);
        assert_eq!(playback.join().state, TaskState::Completed);

        let mut reader = WavReader::open(&config.capture_file, FramePolicy::KeepAll).unwrap();
        let buf = reader.read_exact_frames(800).unwrap();
        assert!(buf.channel_samples(0).iter().any(|&s| s.abs() > 1000.0));
    }

    #[test]
    fn test_panicking_task_reported() {
        let handle = TaskHandle::spawn(Direction::Playback, CancelToken::new(), |_| {
            panic!("boom");
        })
        .unwrap();
        let exit = handle.join();
        assert!(matches!(exit.error, Some(TaskError::Panicked { .. })));
    }

    #[test]
    fn test_summary() {
        let exit = TaskExit::failed(Direction::Capture, TaskError::Endpoint(EndpointError::NotNegotiated));
        let summary = exit.summary();
        assert_eq!(summary.state, TaskState::Failed);
        assert!(summary.error.unwrap().contains("negotiation"));
        assert_eq!(TaskSummary::not_started(Direction::Playback).state, TaskState::NotStarted);
    }
}
