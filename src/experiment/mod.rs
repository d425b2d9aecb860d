//! Scan planning and execution.
//!
//! - `grid` - target positions and their visiting order
//! - `phase` - what is armed and read at each point
//! - `session` - scoped connect / disconnect of the rig's adapters
//! - `state` - run and step state, progress reports
//! - `orchestrator` - the per-point state machine

pub mod grid;
pub mod orchestrator;
pub mod phase;
pub mod session;
pub mod state;

pub use grid::{GridPoint, ScanGrid};
pub use orchestrator::{reset_triggers, ProgressObserver, ScanOrchestrator, ScanPlan};
pub use phase::{Phase, Routine, RoutinePreset, RoutineSpec};
pub use session::HardwareSession;
pub use state::{ProgressReport, RunState, RunStatus, StepState};
