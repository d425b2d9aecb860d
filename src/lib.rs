//! # scimitar
//!
//! Grid-scan orchestration for optical measurement rigs: move an XYZ stage
//! through a grid, arm a subset of digital trigger lines at each point, run a
//! timed analog acquisition (optionally alongside a spectrometer exposure) and
//! return the lines to a safe state before moving on.
//!
//! ## Crate Structure
//!
//! - **`hardware`**: capability traits, the device registry, unit conversion,
//!   simulated adapters and the serial-command drivers (laser, function
//!   generator).
//! - **`control`**: trigger, position and acquisition controllers built on
//!   the capability traits.
//! - **`experiment`**: scan grid, routines and phases, the hardware session
//!   and the scan orchestrator.
//! - **`data`**: measurement records and result writers.
//! - **`rig`**: assembles controllers and adapters from configuration.
//! - **`config`**: Figment-based configuration (TOML + environment).
//! - **`logging`**: `tracing-subscriber` setup.
//! - **`error`**: the `ScanError` taxonomy.

pub mod config;
pub mod control;
pub mod data;
pub mod error;
pub mod experiment;
pub mod hardware;
pub mod logging;
pub mod rig;

pub use error::{ScanError, ScanResult};
