//! Run outcome, as printed to the user or serialized with `--json`

use crate::audio::analyzer::{ChannelVerdict, PeakClass};
use crate::audio::endpoint::Direction;
use crate::audio::stream::{TaskState, TaskSummary};
use crate::config::{RunMode, TestConfig};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write;
use std::path::PathBuf;

/// Everything known about one run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub version: String,
    pub build_date: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub mode: RunMode,
    pub backend: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub frames: u64,
    pub capture_file: Option<PathBuf>,
    pub tasks: Vec<TaskSummary>,
    pub verdicts: Vec<ChannelVerdict>,
}

impl RunReport {
    /// Empty report for a run about to start
    pub fn new(config: &TestConfig, backend: &str) -> Self {
        let mut tasks = Vec::new();
        if matches!(config.mode, RunMode::Loopback | RunMode::PlaybackOnly) {
            tasks.push(TaskSummary::not_started(Direction::Playback));
        }
        if matches!(config.mode, RunMode::Loopback | RunMode::CaptureOnly) {
            tasks.push(TaskSummary::not_started(Direction::Capture));
        }

        Self {
            version: crate::VERSION.to_string(),
            build_date: crate::BUILD_DATE.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            mode: config.mode,
            backend: backend.to_string(),
            sample_rate: config.sample_rate,
            channels: config.channels,
            bits_per_sample: config.depth.bits(),
            frames: config.frames,
            capture_file: (config.mode != RunMode::PlaybackOnly).then(|| config.capture_file.clone()),
            tasks,
            verdicts: Vec::new(),
        }
    }

    /// Replace the summary of the task in the same direction
    pub fn record_task(&mut self, summary: TaskSummary) {
        match self.tasks.iter_mut().find(|t| t.direction == summary.direction) {
            Some(slot) => *slot = summary,
            None => self.tasks.push(summary),
        }
    }

    pub fn task(&self, direction: Direction) -> Option<&TaskSummary> {
        self.tasks.iter().find(|t| t.direction == direction)
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// No task failed and every analysed channel passed
    pub fn passed(&self) -> bool {
        self.tasks.iter().all(|t| t.state != TaskState::Failed)
            && self.verdicts.iter().all(|v| v.verdict.passed())
    }

    /// Process exit status for this report: 0 passed, 1 negative verdict
    pub fn exit_code(&self) -> i32 {
        if self.passed() {
            0
        } else {
            1
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Human-readable per-channel listing
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "audiobat {} ({}): {} run, {} backend, {} Hz, {} ch, {} bit",
            self.version, self.build_date, self.mode, self.backend, self.sample_rate, self.channels, self.bits_per_sample
        );
        for task in &self.tasks {
            let _ = write!(
                out,
                "  {} task: {:?}, {} frames in {} periods",
                task.direction, task.state, task.frames, task.periods
            );
            if task.recoveries > 0 {
                let _ = write!(out, ", {} xruns recovered", task.recoveries);
            }
            if let Some(error) = &task.error {
                let _ = write!(out, " ({})", error);
            }
            out.push('\n');
        }

        for verdict in &self.verdicts {
            let _ = writeln!(
                out,
                "Channel {}: target {:.2} Hz, {} frames analysed",
                verdict.channel + 1,
                verdict.target_hz,
                self.frames
            );
            for (i, cluster) in verdict.clusters.iter().enumerate() {
                let class = match cluster.class {
                    PeakClass::NearDc => "near DC",
                    PeakClass::TooLow => "too low",
                    PeakClass::TooHigh => "too high",
                    PeakClass::OnTarget => "on target",
                };
                let _ = writeln!(
                    out,
                    "  peak {}: {:.2} Hz, {:.1} dB (cluster {:.1} dB, bins {}-{}) {}",
                    i + 1,
                    cluster.peak_hz,
                    cluster.peak_db,
                    cluster.total_db,
                    cluster.start_bin,
                    cluster.end_bin,
                    class
                );
            }
            if let Some(hz) = verdict.peak_hz {
                let _ = writeln!(out, "  detected {:.2} Hz", hz);
            }
            let _ = writeln!(out, "  Verdict: {}", verdict.verdict);
        }

        if !self.verdicts.is_empty() {
            let _ = writeln!(out, "Result: {}", if self.passed() { "PASS" } else { "FAIL" });
        }
        out
    }
}
