//! Run and step state for the scan orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lifecycle of a whole run.
///
/// # State Machine
///
/// ```text
/// Idle ──run()──> Connecting ──> Running ──> Complete
///                     │             │
///                     └─────────────┴──> Error
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    /// No run started
    Idle,
    /// Acquiring hardware and configuring devices
    Connecting,
    /// Sweeping the grid
    Running,
    /// Sweep finished and hardware released
    Complete,
    /// Run aborted; see `RunStatus::last_error`
    Error,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Idle => write!(f, "Idle"),
            RunState::Connecting => write!(f, "Connecting"),
            RunState::Running => write!(f, "Running"),
            RunState::Complete => write!(f, "Complete"),
            RunState::Error => write!(f, "Error"),
        }
    }
}

impl RunState {
    /// Check if the state allows starting a new run.
    pub fn can_begin(&self) -> bool {
        matches!(self, RunState::Idle | RunState::Complete | RunState::Error)
    }

    /// True while connecting or sweeping.
    pub fn is_active(&self) -> bool {
        matches!(self, RunState::Connecting | RunState::Running)
    }
}

/// Where the rig is within a single grid point.
///
/// Every point walks `Safe → Positioned → Armed → Acquired → Safe`; a routine
/// with several phases repeats `Armed → Acquired → Safe` per phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepState {
    /// All lines in the safe state
    Safe,
    /// Stage moved to the point
    Positioned,
    /// Phase lines armed
    Armed,
    /// Phase samples read
    Acquired,
}

impl std::fmt::Display for StepState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepState::Safe => write!(f, "SAFE"),
            StepState::Positioned => write!(f, "POSITIONED"),
            StepState::Armed => write!(f, "ARMED"),
            StepState::Acquired => write!(f, "ACQUIRED"),
        }
    }
}

/// Snapshot of orchestrator progress.
#[derive(Debug, Clone, PartialEq)]
pub struct RunStatus {
    /// Lifecycle state
    pub state: RunState,
    /// Unique run identifier (None before the first run)
    pub run_id: Option<String>,
    /// Position within the current grid point
    pub step: Option<StepState>,
    /// Grid points completed in the current run
    pub iteration: usize,
    /// Grid points in the current run
    pub total: usize,
    /// When the current run started
    pub started_at: Option<DateTime<Utc>>,
    /// Message of the error that ended the last run
    pub last_error: Option<String>,
}

impl Default for RunStatus {
    fn default() -> Self {
        Self {
            state: RunState::Idle,
            run_id: None,
            step: None,
            iteration: 0,
            total: 0,
            started_at: None,
            last_error: None,
        }
    }
}

/// Delivered after every completed grid point.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressReport {
    /// Grid points completed, 1-based
    pub iteration: usize,
    /// Grid points in the run
    pub total: usize,
    /// Wall time of the point just completed
    pub cycle_duration: Duration,
}

impl ProgressReport {
    /// Completion in percent.
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            100.0 * self.iteration as f64 / self.total as f64
        }
    }
}

impl std::fmt::Display for ProgressReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} of {}: {:.2}% complete",
            self.iteration,
            self.total,
            self.percent()
        )
    }
}
