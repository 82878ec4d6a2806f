//! Run sequencing
//!
//! The orchestrator owns both streaming tasks of a run. In loopback mode it
//! starts playback, waits the settle delay, starts capture, and stops
//! capture once playback is done. A fatal error in either task cancels the
//! other and fails the run before analysis.

use crate::audio::analyzer::{analyze_capture, AnalysisError};
use crate::audio::endpoint::{Direction, PcmBackend};
use crate::audio::stream::{CancelToken, TaskError, TaskExit, TaskHandle, TaskState, TaskSummary};
use crate::config::{ConfigError, RunMode, TestConfig};
use crate::report::RunReport;
use crossbeam_channel::{never, select, RecvTimeoutError};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("{task} task failed: {source}")]
    Task {
        task: Direction,
        #[source]
        source: TaskError,
    },

    #[error("playback ended during the settle delay, nothing to capture")]
    PlaybackEndedEarly,

    #[error("analysis failed: {0}")]
    Analysis(#[from] AnalysisError),

    #[error("run cancelled")]
    Cancelled,
}

/// Where the run currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Setup,
    SinglePlayback,
    SingleCapture,
    Loopback,
    Analyze,
    Done,
    Failed,
}

/// Drives one run of a [`TestConfig`] over a backend
pub struct Orchestrator<B: PcmBackend> {
    backend: B,
    config: Arc<TestConfig>,
    cancel: CancelToken,
    phase: RunPhase,
}

impl<B: PcmBackend> Orchestrator<B> {
    pub fn new(backend: B, config: TestConfig) -> Self {
        Self {
            backend,
            config: Arc::new(config),
            cancel: CancelToken::new(),
            phase: RunPhase::Setup,
        }
    }

    /// Use `cancel` as the run-wide cancellation token
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that stops every task of the run
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn config(&self) -> &TestConfig {
        &self.config
    }

    fn enter(&mut self, phase: RunPhase) {
        tracing::info!(from = ?self.phase, to = ?phase, "Run phase");
        self.phase = phase;
    }

    /// Execute the run to a report, or fail
    pub fn run(&mut self) -> Result<RunReport, RunError> {
        let mut report = RunReport::new(&self.config, self.backend.name());
        self.enter(RunPhase::Setup);
        tracing::info!(
            mode = %self.config.mode,
            backend = self.backend.name(),
            rate = self.config.sample_rate,
            channels = self.config.channels,
            frames = self.config.frames,
            "Starting run"
        );

        match self.execute(&mut report) {
            Ok(()) => {
                report.finish();
                self.enter(RunPhase::Done);
                Ok(report)
            }
            Err(e) => {
                self.enter(RunPhase::Failed);
                tracing::error!(error = %e, "Run failed");
                Err(e)
            }
        }
    }

    fn execute(&mut self, report: &mut RunReport) -> Result<(), RunError> {
        match self.config.mode {
            RunMode::PlaybackOnly => {
                self.enter(RunPhase::SinglePlayback);
                let handle = self.spawn(Direction::Playback, report)?;
                settle_exit(report, handle.join())?;
                // No capture to analyse
                return Ok(());
            }
            RunMode::CaptureOnly => {
                self.enter(RunPhase::SingleCapture);
                let handle = self.spawn(Direction::Capture, report)?;
                settle_exit(report, handle.join())?;
            }
            RunMode::Loopback => {
                self.enter(RunPhase::Loopback);
                self.loopback(report)?;
            }
            RunMode::Local => {}
        }

        if self.cancel.is_cancelled() {
            return Err(RunError::Cancelled);
        }

        self.enter(RunPhase::Analyze);
        report.verdicts = analyze_capture(&self.config)?;
        Ok(())
    }

    fn spawn(&self, direction: Direction, report: &mut RunReport) -> Result<TaskHandle, RunError> {
        let backend = self.backend.clone();
        let config = Arc::clone(&self.config);
        let cancel = self.cancel.child();
        let handle = match direction {
            Direction::Playback => TaskHandle::playback(backend, config, cancel),
            Direction::Capture => TaskHandle::capture(backend, config, cancel),
        }
        .map_err(|source| RunError::Task {
            task: direction,
            source,
        })?;

        let mut running = TaskSummary::not_started(direction);
        running.state = TaskState::Running;
        report.record_task(running);
        Ok(handle)
    }

    fn loopback(&mut self, report: &mut RunReport) -> Result<(), RunError> {
        let playback = self.spawn(Direction::Playback, report)?;

        // Hardware output needs to reach steady state before capturing
        let settled = playback.result().recv_timeout(self.config.settle);
        match settled {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(exit) => {
                playback.finish();
                settle_exit(report, exit)?;
                return Err(self.ended_early());
            }
            Err(RecvTimeoutError::Disconnected) => {
                settle_exit(report, playback.join())?;
                return Err(self.ended_early());
            }
        }

        let capture = self.spawn(Direction::Capture, report)?;
        tracing::debug!(settle = ?self.config.settle, "Capture started after settle delay");

        let mut playback_exit: Option<TaskExit> = None;
        let mut capture_exit: Option<TaskExit> = None;

        while playback_exit.is_none() || capture_exit.is_none() {
            let playback_rx = match playback_exit {
                None => playback.result().clone(),
                Some(_) => never(),
            };
            let capture_rx = match capture_exit {
                None => capture.result().clone(),
                Some(_) => never(),
            };

            select! {
                recv(playback_rx) -> msg => {
                    let exit = msg.unwrap_or_else(|_| TaskExit::lost(Direction::Playback));
                    // Capture has no natural end of its own once playback stops
                    tracing::debug!(state = ?exit.state, "Playback finished, stopping capture");
                    capture.cancel();
                    playback_exit = Some(exit);
                }
                recv(capture_rx) -> msg => {
                    let exit = msg.unwrap_or_else(|_| TaskExit::lost(Direction::Capture));
                    if exit.is_failure() {
                        playback.cancel();
                    }
                    capture_exit = Some(exit);
                }
            }
        }

        playback.finish();
        capture.finish();

        // Both are Some once the loop ends
        if let (Some(p), Some(c)) = (playback_exit, capture_exit) {
            let playback_result = settle_exit(report, p);
            let capture_result = settle_exit(report, c);
            playback_result?;
            capture_result?;
        }
        Ok(())
    }

    /// Why a loopback stopped before capture could start
    fn ended_early(&self) -> RunError {
        if self.cancel.is_cancelled() {
            RunError::Cancelled
        } else {
            RunError::PlaybackEndedEarly
        }
    }
}

/// Record a task exit, turning a failure into a run error
fn settle_exit(report: &mut RunReport, mut exit: TaskExit) -> Result<(), RunError> {
    report.record_task(exit.summary());
    match exit.error.take() {
        Some(source) => Err(RunError::Task {
            task: exit.direction,
            source,
        }),
        None => Ok(()),
    }
}
