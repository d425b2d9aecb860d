//! Atomic Hardware Capabilities
//!
//! Every device on the rig is reached through one or more small capability
//! traits instead of a per-vendor class hierarchy:
//!
//! - The XY and Z stages implement `Connectable + Movable`
//! - The DAQ digital-output port implements `Connectable + DigitalOutputPort`
//! - The DAQ analog-input task implements `Connectable + AnalogInput`
//! - The spectrometer implements `Connectable + Spectrometer`
//!
//! Concrete types are chosen when the rig is assembled from configuration;
//! the controllers only ever see trait objects.
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Takes `&self` and uses interior mutability for device state
//! - Returns typed [`ScanError`](crate::error::ScanError)s so callers can tell a
//!   rejected command (`OutOfRange`, `Configuration`) from a failed one
//!   (`HardwareIo`, `Connection`)

use crate::data::Spectrum;
use crate::error::ScanResult;
use crate::hardware::units::LengthUnit;
use async_trait::async_trait;

/// Capability: Connection Lifecycle
///
/// Each adapter owns exactly one physical connection. `connect` acquires it,
/// `disconnect` releases it and must be safe to call on an adapter that never
/// connected.
#[async_trait]
pub trait Connectable: Send + Sync {
    /// Human-readable device name used in logs and errors
    fn name(&self) -> &str;

    /// Open the hardware link
    ///
    /// # Returns
    /// - Ok(()) once the device is ready for commands
    /// - Err(Connection) if the link cannot be established
    async fn connect(&self) -> ScanResult<()>;

    /// Release the hardware link
    async fn disconnect(&self) -> ScanResult<()>;

    /// True between a successful `connect` and `disconnect`
    fn is_connected(&self) -> bool;
}

/// Inclusive travel range of a bounded axis, in the stage's working unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TravelLimits {
    /// Lowest reachable position
    pub lower: f64,
    /// Highest reachable position
    pub upper: f64,
}

impl TravelLimits {
    /// Range from `lower` to `upper`, inclusive.
    pub fn new(lower: f64, upper: f64) -> Self {
        Self { lower, upper }
    }

    /// True when `value` lies within the range.
    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }
}

/// Capability: Motion Control
///
/// Single-axis stage. Multi-axis controllers expose one adapter per axis.
///
/// # Contract
/// - `working_unit()` is the unit the axis is configured and bounded in
/// - `move_abs` and `move_rel` reject targets outside `travel_limits()` with
///   `OutOfRange` before any command reaches the controller
/// - `move_abs` and `move_rel` return once the command is accepted;
///   `wait_settled` blocks until the controller reports on-target
#[async_trait]
pub trait Movable: Send + Sync {
    /// Unit positions are reported in when none is requested
    fn working_unit(&self) -> LengthUnit;

    /// Steps per millimetre, for axes whose working unit is `Native`
    fn native_per_mm(&self) -> Option<f64> {
        None
    }

    /// Configured travel range in the working unit, `None` if unbounded
    fn travel_limits(&self) -> Option<TravelLimits>;

    /// Move to absolute position
    async fn move_abs(&self, target: f64, unit: LengthUnit) -> ScanResult<()>;

    /// Move relative to current position
    async fn move_rel(&self, delta: f64, unit: LengthUnit) -> ScanResult<()>;

    /// Get current position
    async fn position(&self, unit: LengthUnit) -> ScanResult<f64>;

    /// Wait for motion to settle
    ///
    /// Should have an internal timeout to prevent infinite blocking.
    async fn wait_settled(&self) -> ScanResult<()>;

    /// Find the mechanical reference
    async fn home(&self) -> ScanResult<()> {
        Ok(())
    }

    /// True once a homing cycle has completed
    async fn is_homed(&self) -> ScanResult<bool> {
        Ok(true)
    }
}

/// Capability: Digital Output Lines
///
/// A port of digital lines committed as one vector. Each write opens a
/// short-lived output task on the card, so writes are valid before and after
/// the adapter's own connection lifetime.
#[async_trait]
pub trait DigitalOutputPort: Send + Sync {
    /// Number of physical lines on the port
    fn line_count(&self) -> usize;

    /// Commit every line in a single write
    ///
    /// # Returns
    /// - Ok(()) once the card has latched the new state
    /// - Err(Configuration) if `lines.len()` differs from `line_count()`
    /// - Err(HardwareIo) if the write was issued and failed
    async fn write_lines(&self, lines: &[bool]) -> ScanResult<()>;
}

/// Capability: Timed Analog Acquisition
///
/// Finite, hardware-clocked capture on a subset of analog input channels.
#[async_trait]
pub trait AnalogInput: Send + Sync {
    /// Set up the sample clock and channel list for the next acquisition
    async fn configure(
        &self,
        channels: &[u32],
        sample_rate_hz: f64,
        samples_per_channel: usize,
    ) -> ScanResult<()>;

    /// Start the configured task and block until every sample is in
    ///
    /// # Returns
    /// One row per configured channel, in configuration order, samples in
    /// acquisition order.
    async fn read(&self) -> ScanResult<Vec<Vec<f64>>>;
}

/// Capability: Spectrometer Exposure
#[async_trait]
pub trait Spectrometer: Send + Sync {
    /// Set integration time per spectrum in seconds
    async fn set_integration_time(&self, seconds: f64) -> ScanResult<()>;

    /// Take `count` consecutive spectra and return them with the wavelength axis
    async fn acquire(&self, count: usize) -> ScanResult<Spectrum>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScanError;
    use std::sync::Mutex;

    struct BareStage {
        position: Mutex<f64>,
    }

    #[async_trait]
    impl Movable for BareStage {
        fn working_unit(&self) -> LengthUnit {
            LengthUnit::Millimetres
        }

        fn travel_limits(&self) -> Option<TravelLimits> {
            None
        }

        async fn move_abs(&self, target: f64, unit: LengthUnit) -> ScanResult<()> {
            *self.position.lock().unwrap() = unit.convert(target, LengthUnit::Millimetres, None)?;
            Ok(())
        }

        async fn move_rel(&self, delta: f64, unit: LengthUnit) -> ScanResult<()> {
            let delta = unit.convert(delta, LengthUnit::Millimetres, None)?;
            *self.position.lock().unwrap() += delta;
            Ok(())
        }

        async fn position(&self, unit: LengthUnit) -> ScanResult<f64> {
            LengthUnit::Millimetres.convert(*self.position.lock().unwrap(), unit, None)
        }

        async fn wait_settled(&self) -> ScanResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_movable_defaults() {
        let stage = BareStage {
            position: Mutex::new(0.0),
        };
        stage.move_abs(1500.0, LengthUnit::Micrometres).await.unwrap();
        stage.move_rel(0.5, LengthUnit::Millimetres).await.unwrap();
        let pos = stage.position(LengthUnit::Millimetres).await.unwrap();
        assert!((pos - 2.0).abs() < 1e-12);
        assert!(stage.is_homed().await.unwrap());
        stage.home().await.unwrap();
    }

    #[tokio::test]
    async fn test_native_without_scale_is_rejected() {
        let stage = BareStage {
            position: Mutex::new(0.0),
        };
        let err = stage.move_abs(10.0, LengthUnit::Native).await.unwrap_err();
        assert!(matches!(err, ScanError::Configuration(_)));
    }

    #[test]
    fn test_travel_limits_inclusive() {
        let limits = TravelLimits::new(-6.5, 6.5);
        assert!(limits.contains(6.5));
        assert!(limits.contains(-6.5));
        assert!(!limits.contains(6.50001));
    }
}
