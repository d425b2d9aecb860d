//! Mock Hardware Implementations
//!
//! Simulated rig devices for tests and for dry runs of a routine without the
//! bench powered up. All mock devices use async-safe operations
//! (tokio::time::sleep, not std::thread::sleep).
//!
//! # Available Mocks
//!
//! - `MockDigitalOutput` - DO port that records every committed line vector
//! - `MockAnalogInput` - finite AI task producing deterministic waveforms
//! - `SimulatedStage` - bounded single-axis stage with speed-based timing
//! - `MockSpectrometer` - CCS200-like spectrometer (200-1000 nm, 3648 px)
//!
//! Every mock supports failure injection through [`FaultInjector`] and writes
//! its calls to a [`CallLog`], which may be shared between devices so tests
//! can assert the order of operations across the whole rig.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::RwLock;
use tokio::time::{sleep, Duration};

use crate::data::Spectrum;
use crate::error::{ScanError, ScanResult};
use crate::hardware::capabilities::{
    AnalogInput, Connectable, DigitalOutputPort, Movable, Spectrometer, TravelLimits,
};
use crate::hardware::units::LengthUnit;

// =============================================================================
// Test plumbing shared by the mocks
// =============================================================================

/// Ordered record of calls made against one or more mock devices.
///
/// Entries look like `"<device>.<method>"` or `"<device>.<method>(<args>)"`.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, Vec<String>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append an entry.
    pub fn record(&self, entry: impl Into<String>) {
        self.guard().push(entry.into());
    }

    /// Get a copy of the call log for verification
    pub fn entries(&self) -> Vec<String> {
        self.guard().clone()
    }

    /// Number of entries starting with `prefix`
    pub fn count(&self, prefix: &str) -> usize {
        self.guard().iter().filter(|e| e.starts_with(prefix)).count()
    }

    /// Forget every entry.
    pub fn clear(&self) {
        self.guard().clear();
    }
}

/// Arms a one-shot failure on a mock device.
///
/// Disarmed by default. Once armed with `fail_after(n)`, the next `n`
/// operations succeed and the one after that fails.
#[derive(Debug)]
pub struct FaultInjector {
    countdown: AtomicI64,
}

impl FaultInjector {
    const DISARMED: i64 = -1;

    /// Disarmed injector.
    pub fn new() -> Self {
        Self {
            countdown: AtomicI64::new(Self::DISARMED),
        }
    }

    /// Fail the next operation
    pub fn trigger_failure(&self) {
        self.fail_after(0);
    }

    /// Let `operations` succeed, then fail once
    pub fn fail_after(&self, operations: u32) {
        self.countdown.store(i64::from(operations), Ordering::SeqCst);
    }

    /// Cancel a pending failure.
    pub fn disarm(&self) {
        self.countdown.store(Self::DISARMED, Ordering::SeqCst);
    }

    /// Consume one operation; true when this one must fail.
    pub fn should_fail(&self) -> bool {
        let previous = self
            .countdown
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match n {
                Self::DISARMED => None,
                0 => Some(Self::DISARMED),
                n => Some(n - 1),
            });
        matches!(previous, Ok(0))
    }
}

impl Default for FaultInjector {
    fn default() -> Self {
        Self::new()
    }
}

fn not_connected(device: &str) -> ScanError {
    ScanError::connection(device, "not connected")
}

// =============================================================================
// MockDigitalOutput - Simulated DO port
// =============================================================================

/// Mock digital-output port
///
/// Keeps every committed vector so tests can inspect the full trigger history.
/// Writes are accepted whether or not the port is connected, matching the
/// task-per-write behaviour of the real card.
pub struct MockDigitalOutput {
    name: String,
    line_count: usize,
    connected: AtomicBool,
    writes: Mutex<Vec<Vec<bool>>>,
    faults: FaultInjector,
    log: CallLog,
}

impl MockDigitalOutput {
    /// Port `name` with `line_count` lines, disconnected.
    pub fn new(name: impl Into<String>, line_count: usize) -> Self {
        Self {
            name: name.into(),
            line_count,
            connected: AtomicBool::new(false),
            writes: Mutex::new(Vec::new()),
            faults: FaultInjector::new(),
            log: CallLog::new(),
        }
    }

    /// Record calls into a shared log.
    pub fn with_call_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }

    /// Failure injection for writes.
    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    fn history(&self) -> MutexGuard<'_, Vec<Vec<bool>>> {
        self.writes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Every vector latched so far, oldest first
    pub fn writes(&self) -> Vec<Vec<bool>> {
        self.history().clone()
    }

    /// Most recent latched vector.
    pub fn last_written(&self) -> Option<Vec<bool>> {
        self.history().last().cloned()
    }
}

#[async_trait]
impl Connectable for MockDigitalOutput {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> ScanResult<()> {
        self.log.record(format!("{}.connect", self.name));
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> ScanResult<()> {
        self.log.record(format!("{}.disconnect", self.name));
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DigitalOutputPort for MockDigitalOutput {
    fn line_count(&self) -> usize {
        self.line_count
    }

    async fn write_lines(&self, lines: &[bool]) -> ScanResult<()> {
        let rendered: String = lines.iter().map(|&l| if l { '1' } else { '0' }).collect();
        self.log.record(format!("{}.write({})", self.name, rendered));

        if lines.len() != self.line_count {
            return Err(ScanError::configuration(format!(
                "{} has {} lines, got a vector of {}",
                self.name,
                self.line_count,
                lines.len()
            )));
        }
        if self.faults.should_fail() {
            return Err(ScanError::hardware_io(&self.name, "simulated write failure"));
        }

        self.history().push(lines.to_vec());
        Ok(())
    }
}

// =============================================================================
// MockAnalogInput - Simulated AI task
// =============================================================================

#[derive(Debug, Clone)]
struct AiTask {
    channels: Vec<u32>,
    sample_rate_hz: f64,
    samples_per_channel: usize,
}

/// Mock analog-input device
///
/// Channel `c` reads a DC level of `0.1 * (c + 1)` volts with a small ripple,
/// unless overridden with [`MockAnalogInput::with_channel_level`]. With
/// `realtime` enabled the read sleeps for the configured acquisition window.
pub struct MockAnalogInput {
    name: String,
    connected: AtomicBool,
    task: Mutex<Option<AiTask>>,
    levels: Mutex<Vec<(u32, f64)>>,
    realtime: bool,
    faults: FaultInjector,
    log: CallLog,
}

impl MockAnalogInput {
    /// Analog input `name`, disconnected, with no task configured.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connected: AtomicBool::new(false),
            task: Mutex::new(None),
            levels: Mutex::new(Vec::new()),
            realtime: false,
            faults: FaultInjector::new(),
            log: CallLog::new(),
        }
    }

    /// Record calls into a shared log.
    pub fn with_call_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }

    /// Sleep for the acquisition window on each read.
    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    /// Override the DC level of one channel
    pub fn with_channel_level(self, channel: u32, volts: f64) -> Self {
        self.levels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((channel, volts));
        self
    }

    /// Failure injection for reads.
    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    fn level(&self, channel: u32) -> f64 {
        self.levels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .rev()
            .find(|(ch, _)| *ch == channel)
            .map(|(_, v)| *v)
            .unwrap_or(0.1 * f64::from(channel + 1))
    }

    fn current_task(&self) -> Option<AiTask> {
        self.task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl Connectable for MockAnalogInput {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> ScanResult<()> {
        self.log.record(format!("{}.connect", self.name));
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> ScanResult<()> {
        self.log.record(format!("{}.disconnect", self.name));
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnalogInput for MockAnalogInput {
    async fn configure(
        &self,
        channels: &[u32],
        sample_rate_hz: f64,
        samples_per_channel: usize,
    ) -> ScanResult<()> {
        self.log.record(format!(
            "{}.configure({:?}, {}, {})",
            self.name, channels, sample_rate_hz, samples_per_channel
        ));
        if !self.is_connected() {
            return Err(not_connected(&self.name));
        }
        if channels.is_empty() || sample_rate_hz <= 0.0 || samples_per_channel == 0 {
            return Err(ScanError::configuration(format!(
                "{}: invalid task (channels {:?}, rate {}, samples {})",
                self.name, channels, sample_rate_hz, samples_per_channel
            )));
        }
        *self.task.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(AiTask {
            channels: channels.to_vec(),
            sample_rate_hz,
            samples_per_channel,
        });
        Ok(())
    }

    async fn read(&self) -> ScanResult<Vec<Vec<f64>>> {
        self.log.record(format!("{}.read", self.name));
        if !self.is_connected() {
            return Err(not_connected(&self.name));
        }
        let task = self
            .current_task()
            .ok_or_else(|| ScanError::configuration(format!("{}: read before configure", self.name)))?;

        if self.realtime {
            let window = task.samples_per_channel as f64 / task.sample_rate_hz;
            sleep(Duration::from_secs_f64(window)).await;
        }
        if self.faults.should_fail() {
            return Err(ScanError::hardware_io(&self.name, "simulated acquisition timeout"));
        }

        let n = task.samples_per_channel;
        let data = task
            .channels
            .iter()
            .map(|&ch| {
                let level = self.level(ch);
                (0..n)
                    .map(|k| {
                        let phase = 2.0 * std::f64::consts::PI * k as f64 / n as f64;
                        level + 0.001 * phase.sin()
                    })
                    .collect()
            })
            .collect();
        Ok(data)
    }
}

// =============================================================================
// SimulatedStage - Bounded single-axis stage
// =============================================================================

/// Simulated linear stage
///
/// Simulates one stage axis with:
/// - a working unit (mm for the piezo, encoder steps for the XY stage)
/// - optional inclusive travel limits, checked before any motion
/// - speed-based move timing and a settle delay when `realtime` is enabled
/// - optional park position applied on disconnect
///
/// # Example
///
/// ```rust,ignore
/// let z = SimulatedStage::new("z_stage", LengthUnit::Millimetres)
///     .with_limits(TravelLimits::new(-6.5, 6.5))
///     .with_park_position(0.0);
/// z.connect().await?;
/// z.move_abs(6.5, LengthUnit::Millimetres).await?;
/// ```
pub struct SimulatedStage {
    name: String,
    unit: LengthUnit,
    native_per_mm: Option<f64>,
    limits: Option<TravelLimits>,
    position: RwLock<f64>,
    speed_mm_per_sec: f64,
    settle: Duration,
    park_position: Option<f64>,
    realtime: bool,
    connected: AtomicBool,
    homed: AtomicBool,
    faults: FaultInjector,
    log: CallLog,
}

impl SimulatedStage {
    /// Stage `name` working in `unit`, at 0 and not homed.
    pub fn new(name: impl Into<String>, unit: LengthUnit) -> Self {
        Self {
            name: name.into(),
            unit,
            native_per_mm: None,
            limits: None,
            position: RwLock::new(0.0),
            speed_mm_per_sec: 10.0,
            settle: Duration::from_millis(50),
            park_position: None,
            realtime: false,
            connected: AtomicBool::new(false),
            homed: AtomicBool::new(false),
            faults: FaultInjector::new(),
            log: CallLog::new(),
        }
    }

    /// Encoder steps per millimetre, needed for native units.
    pub fn with_native_scale(mut self, native_per_mm: f64) -> Self {
        self.native_per_mm = Some(native_per_mm);
        self
    }

    /// Reject moves outside `limits`.
    pub fn with_limits(mut self, limits: TravelLimits) -> Self {
        self.limits = Some(limits);
        self
    }

    /// Start at `position`, in the working unit
    pub fn with_position(mut self, position: f64) -> Self {
        self.position = RwLock::new(position);
        self
    }

    /// Move speed used for simulated travel time.
    pub fn with_speed(mut self, speed_mm_per_sec: f64) -> Self {
        self.speed_mm_per_sec = speed_mm_per_sec;
        self
    }

    /// Drive to `position` (working unit) when the stage is disconnected
    pub fn with_park_position(mut self, position: f64) -> Self {
        self.park_position = Some(position);
        self
    }

    /// Sleep for travel and settle times.
    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    /// Record calls into a shared log.
    pub fn with_call_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }

    /// Failure injection for connect and moves.
    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Position in the working unit without going through the capability
    pub async fn raw_position(&self) -> f64 {
        *self.position.read().await
    }

    fn to_working(&self, value: f64, unit: LengthUnit) -> ScanResult<f64> {
        unit.convert(value, self.unit, self.native_per_mm)
    }

    async fn travel_to(&self, target: f64) -> ScanResult<()> {
        if !self.is_connected() {
            return Err(not_connected(&self.name));
        }
        if let Some(limits) = self.limits {
            if !limits.contains(target) {
                return Err(ScanError::out_of_range(
                    format!("{} position ({})", self.name, self.unit),
                    target,
                    limits.lower,
                    limits.upper,
                ));
            }
        }
        if self.faults.should_fail() {
            return Err(ScanError::hardware_io(&self.name, "simulated motion error"));
        }

        let current = *self.position.read().await;
        if self.realtime {
            let distance_mm = self
                .unit
                .convert((target - current).abs(), LengthUnit::Millimetres, self.native_per_mm)
                .unwrap_or(0.0);
            if self.speed_mm_per_sec > 0.0 {
                sleep(Duration::from_secs_f64(distance_mm / self.speed_mm_per_sec)).await;
            }
        }

        *self.position.write().await = target;
        tracing::debug!(stage = %self.name, from = current, to = target, unit = %self.unit, "stage moved");
        Ok(())
    }
}

#[async_trait]
impl Connectable for SimulatedStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> ScanResult<()> {
        self.log.record(format!("{}.connect", self.name));
        if self.faults.should_fail() {
            return Err(ScanError::connection(&self.name, "simulated connection failure"));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> ScanResult<()> {
        self.log.record(format!("{}.disconnect", self.name));
        if !self.is_connected() {
            return Ok(());
        }
        let parked = match self.park_position {
            Some(park) => self.travel_to(park).await,
            None => Ok(()),
        };
        self.connected.store(false, Ordering::SeqCst);
        parked
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Movable for SimulatedStage {
    fn working_unit(&self) -> LengthUnit {
        self.unit
    }

    fn native_per_mm(&self) -> Option<f64> {
        self.native_per_mm
    }

    fn travel_limits(&self) -> Option<TravelLimits> {
        self.limits
    }

    async fn move_abs(&self, target: f64, unit: LengthUnit) -> ScanResult<()> {
        self.log.record(format!("{}.move_abs({} {})", self.name, target, unit));
        let target = self.to_working(target, unit)?;
        self.travel_to(target).await
    }

    async fn move_rel(&self, delta: f64, unit: LengthUnit) -> ScanResult<()> {
        self.log.record(format!("{}.move_rel({} {})", self.name, delta, unit));
        let delta = self.to_working(delta, unit)?;
        let current = *self.position.read().await;
        self.travel_to(current + delta).await
    }

    async fn position(&self, unit: LengthUnit) -> ScanResult<f64> {
        if !self.is_connected() {
            return Err(not_connected(&self.name));
        }
        let current = *self.position.read().await;
        self.unit.convert(current, unit, self.native_per_mm)
    }

    async fn wait_settled(&self) -> ScanResult<()> {
        if self.realtime {
            sleep(self.settle).await;
        }
        Ok(())
    }

    async fn home(&self) -> ScanResult<()> {
        self.log.record(format!("{}.home", self.name));
        let origin = match self.limits {
            Some(limits) if !limits.contains(0.0) => limits.lower,
            _ => 0.0,
        };
        self.travel_to(origin).await?;
        self.homed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn is_homed(&self) -> ScanResult<bool> {
        Ok(self.homed.load(Ordering::SeqCst))
    }
}

// =============================================================================
// MockSpectrometer - Simulated CCD spectrometer
// =============================================================================

/// Mock spectrometer modelled on a 3648-pixel CCD covering 200-1000 nm.
///
/// Each spectrum is a Gaussian line at 532 nm over a flat background; the peak
/// height scales with the integration time.
pub struct MockSpectrometer {
    name: String,
    wavelengths: Vec<f64>,
    integration_s: RwLock<f64>,
    realtime: bool,
    connected: AtomicBool,
    faults: FaultInjector,
    log: CallLog,
}

impl MockSpectrometer {
    /// Pixel count of a CCS200
    pub const PIXELS: usize = 3648;
    /// Wavelength range of a CCS200
    pub const RANGE_NM: (f64, f64) = (200.0, 1000.0);

    /// CCS200-like spectrometer `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_pixels(name, Self::PIXELS)
    }

    /// Spectrometer with `pixels` evenly spaced over [`Self::RANGE_NM`].
    pub fn with_pixels(name: impl Into<String>, pixels: usize) -> Self {
        let (lo, hi) = Self::RANGE_NM;
        let step = if pixels > 1 {
            (hi - lo) / (pixels - 1) as f64
        } else {
            0.0
        };
        Self {
            name: name.into(),
            wavelengths: (0..pixels).map(|i| lo + step * i as f64).collect(),
            integration_s: RwLock::new(0.01),
            realtime: false,
            connected: AtomicBool::new(false),
            faults: FaultInjector::new(),
            log: CallLog::new(),
        }
    }

    /// Sleep for the exposure on each acquire.
    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    /// Record calls into a shared log.
    pub fn with_call_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }

    /// Failure injection for acquire.
    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Current exposure time, in seconds.
    pub async fn integration_time(&self) -> f64 {
        *self.integration_s.read().await
    }
}

#[async_trait]
impl Connectable for MockSpectrometer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> ScanResult<()> {
        self.log.record(format!("{}.connect", self.name));
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> ScanResult<()> {
        self.log.record(format!("{}.disconnect", self.name));
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Spectrometer for MockSpectrometer {
    async fn set_integration_time(&self, seconds: f64) -> ScanResult<()> {
        self.log.record(format!("{}.set_integration_time({})", self.name, seconds));
        if !(seconds > 0.0 && seconds.is_finite()) {
            return Err(ScanError::configuration(format!(
                "{}: integration time must be positive, got {}",
                self.name, seconds
            )));
        }
        *self.integration_s.write().await = seconds;
        Ok(())
    }

    async fn acquire(&self, count: usize) -> ScanResult<Spectrum> {
        self.log.record(format!("{}.acquire({})", self.name, count));
        if !self.is_connected() {
            return Err(not_connected(&self.name));
        }
        let integration = *self.integration_s.read().await;
        if self.realtime {
            sleep(Duration::from_secs_f64(integration * count as f64)).await;
        }
        if self.faults.should_fail() {
            return Err(ScanError::hardware_io(&self.name, "simulated exposure failure"));
        }

        let peak = 1000.0 * integration;
        let line: Vec<f64> = self
            .wavelengths
            .iter()
            .map(|&nm| 0.02 + peak * (-((nm - 532.0) / 5.0).powi(2)).exp())
            .collect();
        Ok(Spectrum {
            wavelengths: self.wavelengths.clone(),
            spectra: vec![line; count],
        })
    }
}
