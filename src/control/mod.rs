//! Controllers composing device adapters into rig-level operations.
//!
//! - `trigger` - digital trigger lines, arm / reset-to-safe
//! - `position` - XYZ facade over the stage adapters
//! - `acquisition` - timed analog capture with optional spectrometer read

pub mod acquisition;
pub mod position;
pub mod trigger;

pub use acquisition::{AcquisitionController, AcquisitionHandle, AcquisitionParams, SpectrumParams};
pub use position::{Axis, PositionController, PositionReadback, PositionVector};
pub use trigger::{TriggerLineController, TriggerVector};
