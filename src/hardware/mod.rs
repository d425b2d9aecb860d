//! Hardware Abstraction Layer
//!
//! Capability traits, device adapters and the descriptor registry.
//!
//! # Modules
//!
//! - `capabilities` - Atomic capability traits (Movable, DigitalOutputPort, ...)
//! - `mock` - Simulated devices for tests and dry runs
//! - `registry` - Static catalogue of devices wired to the DAQ card
//! - `units` - Length and velocity units understood by the stages
//! - `transport` - Line-oriented command channel for ASCII instruments
//! - `vortran` - Vortran Stradus laser driver
//! - `function_generator` - Agilent 33220A function generator driver

pub mod capabilities;
pub mod function_generator;
pub mod mock;
pub mod registry;
pub mod transport;
pub mod units;
pub mod vortran;

pub use capabilities::{
    AnalogInput, Connectable, DigitalOutputPort, Movable, Spectrometer, TravelLimits,
};
pub use registry::{ActiveSet, DeviceDescriptor, DeviceFamily, DeviceRegistry};
pub use units::{LengthUnit, VelocityUnit};
