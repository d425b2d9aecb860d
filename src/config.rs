//! Scan configuration using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (base configuration)
//! 2. environment variables prefixed with `SCIMITAR_`, nested keys split on
//!    `__` (e.g. `SCIMITAR_ACQUISITION__REPEATS=5`)
//!
//! Everything that used to be a module-level constant in the lab scripts (the
//! device list, stage limits, sample rate, file prefix) lives here and is
//! passed explicitly into the constructors that need it.
//!
//! # Example
//! ```no_run
//! use scimitar::config::ScanConfig;
//!
//! let config = ScanConfig::load_from("config/scimitar.toml")?;
//! config.validate()?;
//! println!("Routine phases: {}", config.routine()?.phases().len());
//! # Ok::<(), scimitar::error::ScanError>(())
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::control::acquisition::{samples_per_channel, AcquisitionParams, SpectrumParams};
use crate::control::position::Axis;
use crate::error::{ScanError, ScanResult};
use crate::experiment::grid::ScanGrid;
use crate::experiment::phase::{Routine, RoutineSpec};
use crate::hardware::function_generator::Waveform;
use crate::hardware::registry::{DeviceDescriptor, DeviceFamily, DeviceRegistry};
use crate::hardware::units::{LengthUnit, VelocityUnit};
use crate::hardware::vortran::{LaserMode, VortranLaser};

/// Top-level scan configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Application name and log level
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Devices wired to the DAQ card, in declaration order
    #[serde(default = "reference_devices")]
    pub devices: Vec<DeviceDescriptor>,
    /// Digital trigger port layout
    #[serde(default)]
    pub triggers: TriggerConfig,
    /// Stage axes, each bound to one motion controller
    #[serde(default)]
    pub stages: Vec<StageConfig>,
    /// Grid of stage positions to visit
    pub grid: GridConfig,
    /// Default acquisition for every phase
    #[serde(default)]
    pub acquisition: AcquisitionParams,
    /// Spectrometer exposure, required by phases that take a spectrum
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spectrometer: Option<SpectrumParams>,
    /// Preset name or custom phase list
    #[serde(default)]
    pub routine: RoutineSpec,
    /// Result file settings
    #[serde(default)]
    pub storage: StorageConfig,
    /// Laser configured before the sweep
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub laser: Option<LaserConfig>,
    /// Function generator configured before the sweep
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_generator: Option<SignalGeneratorConfig>,
    /// Simulated device behaviour
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Name shown in logs and the CLI
    #[serde(default = "default_app_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            log_level: default_log_level(),
        }
    }
}

/// Digital trigger port layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Number of lines on the digital output port
    #[serde(default = "default_line_count")]
    pub line_count: usize,
    /// Name of the device whose line is wired inverted (high = dark)
    #[serde(default = "default_shutter")]
    pub shutter: Option<String>,
    /// Pause after each committed trigger vector
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            line_count: default_line_count(),
            shutter: default_shutter(),
            settle_ms: default_settle_ms(),
        }
    }
}

/// One stage axis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Axis this stage drives
    pub axis: Axis,
    /// Stage driver; only `simulated` is built in
    #[serde(default = "default_stage_driver")]
    pub driver: String,
    /// Device name used in logs; defaults to `<axis>_stage`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Working unit of the stage controller
    #[serde(default = "default_units")]
    pub units: LengthUnit,
    /// Encoder steps per millimetre when `units` is native
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native_per_mm: Option<f64>,
    /// Lower travel limit, in `units`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lower: Option<f64>,
    /// Upper travel limit, in `units`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper: Option<f64>,
    /// Power-on position, in `units`
    #[serde(default)]
    pub initial: f64,
    /// Move speed, in `speed_units`
    #[serde(default = "default_stage_speed")]
    pub speed: f64,
    /// Unit of `speed`
    #[serde(default = "default_speed_units")]
    pub speed_units: VelocityUnit,
    /// Position (in `units`) to drive to before disconnecting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub park: Option<f64>,
    /// Home the stage before the first move
    #[serde(default)]
    pub home_on_connect: bool,
}

impl StageConfig {
    /// Name used in logs and the call log.
    pub fn device_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("{}_stage", self.axis))
    }

    /// Move speed converted to mm/s.
    pub fn speed_mm_per_sec(&self) -> f64 {
        self.speed_units.to_mm_per_sec(self.speed)
    }

    /// Travel limits, open-ended where only one side is set.
    pub fn limits(&self) -> Option<(f64, f64)> {
        match (self.lower, self.upper) {
            (None, None) => None,
            (lower, upper) => Some((
                lower.unwrap_or(f64::NEG_INFINITY),
                upper.unwrap_or(f64::INFINITY),
            )),
        }
    }
}

/// Scan grid generated from origin, step and count per axis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridConfig {
    /// Position of the first point, per axis
    #[serde(default)]
    pub origin: [f64; 3],
    /// Spacing between points, per axis
    #[serde(default)]
    pub step: [f64; 3],
    /// Number of points per axis
    pub count: [usize; 3],
    /// Unit of origin and step
    #[serde(default = "default_units")]
    pub units: LengthUnit,
}

/// Result file settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory result files are written to, created if missing
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Prefix of the result file name
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
    /// Also write a per-channel CSV summary (needs the `storage_csv` feature)
    #[serde(default)]
    pub csv_summary: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            file_prefix: default_file_prefix(),
            csv_summary: false,
        }
    }
}

/// Laser set up before the sweep and switched off at teardown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaserConfig {
    /// Device name used in logs
    #[serde(default = "default_laser_name")]
    pub name: String,
    /// Serial port; the simulated transport is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    /// Serial baud rate
    #[serde(default = "default_laser_baud")]
    pub baud_rate: u32,
    /// Output power, 0 to 100 percent
    pub power_percent: f64,
    /// Modulation mode set before emission
    #[serde(default = "default_laser_mode")]
    pub mode: LaserMode,
}

/// Function generator set up with a gated burst before the sweep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalGeneratorConfig {
    /// Device name used in logs
    #[serde(default = "default_generator_name")]
    pub name: String,
    /// Serial port; the simulated transport is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    /// Serial baud rate
    #[serde(default = "default_generator_baud")]
    pub baud_rate: u32,
    /// Waveform applied before arming the burst
    #[serde(default)]
    pub waveform: Waveform,
}

/// Behaviour of the simulated devices
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Sleep for move, settle and acquisition times like the real rig
    #[serde(default)]
    pub realtime: bool,
}

// Default value functions
fn default_app_name() -> String {
    "Scimitar".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn reference_devices() -> Vec<DeviceDescriptor> {
    DeviceRegistry::reference().devices().to_vec()
}

fn default_line_count() -> usize {
    8
}

fn default_shutter() -> Option<String> {
    Some("SLS205".to_string())
}

fn default_settle_ms() -> u64 {
    100
}

fn default_stage_driver() -> String {
    "simulated".to_string()
}

fn default_units() -> LengthUnit {
    LengthUnit::Millimetres
}

fn default_stage_speed() -> f64 {
    10.0
}

fn default_speed_units() -> VelocityUnit {
    VelocityUnit::MillimetresPerSecond
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_file_prefix() -> String {
    "Scimitar".to_string()
}

fn default_laser_name() -> String {
    "Vortran".to_string()
}

fn default_laser_baud() -> u32 {
    115_200
}

fn default_laser_mode() -> LaserMode {
    LaserMode::Digital
}

fn default_generator_name() -> String {
    "Agilent33220A".to_string()
}

fn default_generator_baud() -> u32 {
    9600
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

const STAGE_DRIVERS: [&str; 1] = ["simulated"];

impl ScanConfig {
    /// Load from `path`, then apply `SCIMITAR_` environment overrides
    pub fn load_from<P: AsRef<Path>>(path: P) -> ScanResult<Self> {
        Ok(Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("SCIMITAR_").split("__"))
            .extract()?)
    }

    /// Parse a TOML document, then apply environment overrides
    pub fn from_toml_str(toml: &str) -> ScanResult<Self> {
        Ok(Figment::new()
            .merge(Toml::string(toml))
            .merge(Env::prefixed("SCIMITAR_").split("__"))
            .extract()?)
    }

    /// Layer a TOML file over the reference rig
    pub fn load_over_reference<P: AsRef<Path>>(path: P) -> ScanResult<Self> {
        Ok(Figment::from(Serialized::defaults(Self::reference()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("SCIMITAR_").split("__"))
            .extract()?)
    }

    /// The reference rig: 4 AO / 8 AI / 8 DO channels, an XY stage with
    /// 0-100 mm travel and a ±6.5 mm Z piezo that parks at zero.
    pub fn reference() -> Self {
        let stage = |axis: Axis, lower: f64, upper: f64| StageConfig {
            axis,
            driver: default_stage_driver(),
            name: None,
            units: LengthUnit::Millimetres,
            native_per_mm: None,
            lower: Some(lower),
            upper: Some(upper),
            initial: 0.0,
            speed: default_stage_speed(),
            speed_units: default_speed_units(),
            park: None,
            home_on_connect: false,
        };
        let mut z = stage(Axis::Z, -6.5, 6.5);
        z.speed = 1.0;
        z.park = Some(0.0);

        Self {
            application: ApplicationConfig::default(),
            devices: reference_devices(),
            triggers: TriggerConfig::default(),
            stages: vec![stage(Axis::X, 0.0, 100.0), stage(Axis::Y, 0.0, 100.0), z],
            grid: GridConfig {
                origin: [0.0; 3],
                step: [1.0, 1.0, 0.0],
                count: [2, 2, 1],
                units: LengthUnit::Millimetres,
            },
            acquisition: AcquisitionParams::default(),
            spectrometer: Some(SpectrumParams::default()),
            routine: RoutineSpec::default(),
            storage: StorageConfig::default(),
            laser: None,
            signal_generator: None,
            simulation: SimulationConfig::default(),
        }
    }

    /// Render as pretty TOML.
    pub fn to_toml(&self) -> ScanResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| ScanError::configuration(format!("Cannot render configuration: {}", e)))
    }

    /// Build the device registry from `devices`.
    pub fn registry(&self) -> ScanResult<DeviceRegistry> {
        DeviceRegistry::new(self.devices.clone())
    }

    /// Resolve the configured routine into phases.
    pub fn routine(&self) -> ScanResult<Routine> {
        Routine::from_spec(&self.routine)
    }

    /// Grid targets converted into millimetres.
    pub fn grid(&self) -> ScanResult<ScanGrid> {
        let mut origin = [0.0; 3];
        let mut step = [0.0; 3];
        for a in 0..3 {
            origin[a] = self.grid.units.convert(self.grid.origin[a], LengthUnit::Millimetres, None)?;
            step[a] = self.grid.units.convert(self.grid.step[a], LengthUnit::Millimetres, None)?;
        }
        ScanGrid::linspace(origin, step, self.grid.count)
    }

    /// Shutter channel on the trigger port, if one is configured
    pub fn shutter_channel(&self, registry: &DeviceRegistry) -> ScanResult<Option<u32>> {
        let Some(name) = &self.triggers.shutter else {
            return Ok(None);
        };
        let device = registry.get(name).ok_or_else(|| {
            ScanError::configuration(format!("Shutter device '{}' is not in the device list", name))
        })?;
        if device.family != DeviceFamily::DigitalOutput {
            return Err(ScanError::configuration(format!(
                "Shutter device '{}' must be a digital output, found {}",
                name, device.family
            )));
        }
        Ok(Some(device.channel))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> ScanResult<()> {
        if !LOG_LEVELS.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(ScanError::configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                LOG_LEVELS.join(", ")
            )));
        }

        let registry = self.registry()?;
        self.shutter_channel(&registry)?;
        for device in registry
            .devices()
            .iter()
            .filter(|d| d.family == DeviceFamily::DigitalOutput)
        {
            if device.channel as usize >= self.triggers.line_count {
                return Err(ScanError::configuration(format!(
                    "{} is outside the {}-line trigger port",
                    device, self.triggers.line_count
                )));
            }
        }

        self.validate_acquisition(&self.acquisition, "acquisition")?;
        if let Some(spectrometer) = &self.spectrometer {
            if !(spectrometer.integration_time_s > 0.0) || spectrometer.spectra_count == 0 {
                return Err(ScanError::configuration(
                    "Spectrometer needs a positive integration time and at least one spectrum",
                ));
            }
        }

        let routine = self.routine()?;
        routine.validate(&registry)?;
        for phase in routine.phases() {
            if let Some(params) = &phase.acquisition {
                self.validate_acquisition(params, &format!("phase '{}'", phase.label))?;
            }
        }
        if routine.needs_spectrometer() && self.spectrometer.is_none() {
            return Err(ScanError::configuration(
                "Routine takes spectra but no [spectrometer] section is configured",
            ));
        }

        self.validate_stages()?;

        if let Some(laser) = &self.laser {
            if !(0.0..=VortranLaser::MAX_POWER_PERCENT).contains(&laser.power_percent) {
                return Err(ScanError::configuration(format!(
                    "Laser power {}% must be between 0 and 100",
                    laser.power_percent
                )));
            }
        }
        if let Some(generator) = &self.signal_generator {
            generator.waveform.validate()?;
        }
        Ok(())
    }

    fn validate_acquisition(&self, params: &AcquisitionParams, context: &str) -> ScanResult<()> {
        if params.repeats == 0 {
            return Err(ScanError::configuration(format!(
                "{}: repeats must be at least 1",
                context
            )));
        }
        samples_per_channel(params.sample_rate_hz, params.duration_s())
            .map(|_| ())
            .map_err(|e| ScanError::configuration(format!("{}: {}", context, e)))
    }

    fn validate_stages(&self) -> ScanResult<()> {
        let grid = self.grid()?;
        let mut axes = HashSet::new();
        for stage in &self.stages {
            if !axes.insert(stage.axis) {
                return Err(ScanError::configuration(format!(
                    "Two stages claim axis {}",
                    stage.axis
                )));
            }
            if !STAGE_DRIVERS.contains(&stage.driver.as_str()) {
                return Err(ScanError::configuration(format!(
                    "Unknown stage driver '{}'. Must be one of: {}",
                    stage.driver,
                    STAGE_DRIVERS.join(", ")
                )));
            }
            if stage.units == LengthUnit::Native && stage.native_per_mm.is_none() {
                return Err(ScanError::configuration(format!(
                    "Stage {} uses native units but has no native_per_mm",
                    stage.device_name()
                )));
            }
            if !(stage.speed_mm_per_sec() > 0.0) {
                return Err(ScanError::configuration(format!(
                    "Stage {} speed must be positive",
                    stage.device_name()
                )));
            }
            let Some((lower, upper)) = stage.limits() else {
                continue;
            };
            if lower > upper {
                return Err(ScanError::configuration(format!(
                    "Stage {} lower limit {} is above upper limit {}",
                    stage.device_name(),
                    lower,
                    upper
                )));
            }
            let within = |v: f64| v >= lower && v <= upper;
            for (what, value) in [("initial", Some(stage.initial)), ("park", stage.park)] {
                if let Some(v) = value {
                    if !within(v) {
                        return Err(ScanError::configuration(format!(
                            "Stage {} {} position {} is outside [{}, {}]",
                            stage.device_name(),
                            what,
                            v,
                            lower,
                            upper
                        )));
                    }
                }
            }
            for &target in grid.axis(stage.axis) {
                let native = LengthUnit::Millimetres.convert(target, stage.units, stage.native_per_mm)?;
                if !within(native) {
                    return Err(ScanError::out_of_range(
                        format!("grid {} position ({})", stage.axis, stage.units),
                        native,
                        lower,
                        upper,
                    ));
                }
            }
        }
        for axis in Axis::ALL {
            if !axes.contains(&axis) && grid.axis(axis).iter().any(|&v| v != 0.0) {
                return Err(ScanError::configuration(format!(
                    "Grid moves axis {} but no stage is configured for it",
                    axis
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::experiment::phase::RoutinePreset;

    const MINIMAL: &str = r#"
        [grid]
        count = [2, 1, 1]
        step = [10.0, 0.0, 0.0]

        [[stages]]
        axis = "x"
        lower = 0.0
        upper = 50.0
    "#;

    #[test]
    fn test_reference_is_valid() {
        let config = ScanConfig::reference();
        config.validate().unwrap();
        assert_eq!(config.registry().unwrap().len(), 20);
        assert_eq!(config.grid().unwrap().len(), 4);
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = ScanConfig::from_toml_str(MINIMAL).unwrap();
        config.validate().unwrap();
        assert_eq!(config.triggers.line_count, 8);
        assert_eq!(config.triggers.shutter.as_deref(), Some("SLS205"));
        assert_eq!(config.storage.file_prefix, "Scimitar");
        assert_eq!(config.acquisition.sample_rate_hz, 100_000.0);
        assert_eq!(config.stages[0].driver, "simulated");
        assert_eq!(config.routine, RoutineSpec::Preset(RoutinePreset::ReadOnly));
    }

    #[test]
    fn test_grid_units_are_converted() {
        let mut config = ScanConfig::from_toml_str(MINIMAL).unwrap();
        config.grid.units = LengthUnit::Micrometres;
        config.grid.step = [500.0, 0.0, 0.0];
        let grid = config.grid().unwrap();
        assert_eq!(grid.axis(Axis::X), &[0.0, 0.5]);
    }

    #[test]
    fn test_rejects_unknown_units_string() {
        let toml = MINIMAL.replace("axis = \"x\"", "axis = \"x\"\nunits = \"furlong\"");
        assert!(ScanConfig::from_toml_str(&toml).is_err());
    }

    #[test]
    fn test_stage_speed_units() {
        let toml = MINIMAL.replace(
            "axis = \"x\"",
            "axis = \"x\"\nspeed = 500.0\nspeed_units = \"um/s\"",
        );
        let config = ScanConfig::from_toml_str(&toml).unwrap();
        assert!((config.stages[0].speed_mm_per_sec() - 0.5).abs() < 1e-12);

        let toml = MINIMAL.replace("axis = \"x\"", "axis = \"x\"\nspeed_units = \"knots\"");
        assert!(ScanConfig::from_toml_str(&toml).is_err());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = ScanConfig::reference();
        config.application.log_level = "loud".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_acquisition() {
        let mut config = ScanConfig::reference();
        config.acquisition.sample_rate_hz = 0.0;
        assert_eq!(config.validate().unwrap_err().kind(), ErrorKind::Configuration);

        let mut config = ScanConfig::reference();
        config.acquisition.integration_time_s = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_shutter_on_analog_channel() {
        let mut config = ScanConfig::reference();
        config.triggers.shutter = Some("Lamp".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_duplicate_axis_and_inverted_limits() {
        let mut config = ScanConfig::reference();
        let extra = config.stages[0].clone();
        config.stages.push(extra);
        assert!(config.validate().is_err());

        let mut config = ScanConfig::reference();
        config.stages[0].lower = Some(200.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_grid_outside_z_travel_is_out_of_range() {
        let mut config = ScanConfig::reference();
        config.grid.origin[2] = 6.0;
        config.grid.step[2] = 1.0;
        config.grid.count[2] = 2;
        assert_eq!(config.validate().unwrap_err().kind(), ErrorKind::OutOfRange);
    }

    #[test]
    fn test_spectrum_routine_needs_spectrometer() {
        let mut config = ScanConfig::reference();
        config.routine = RoutineSpec::Preset(RoutinePreset::ReferenceThenActive);
        config.validate().unwrap();
        config.spectrometer = None;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_laser_power_bounds() {
        let mut config = ScanConfig::reference();
        config.laser = Some(LaserConfig {
            name: "Vortran".into(),
            port: None,
            baud_rate: 115_200,
            power_percent: 120.0,
            mode: LaserMode::Digital,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reference_round_trips_through_toml() {
        let config = ScanConfig::reference();
        let text = config.to_toml().unwrap();
        let parsed: ScanConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_load_from_file_with_env_override() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("scan.toml", MINIMAL)?;
            jail.set_env("SCIMITAR_ACQUISITION__REPEATS", "4");
            let config = ScanConfig::load_from("scan.toml").map_err(|e| e.to_string())?;
            assert_eq!(config.acquisition.repeats, 4);
            Ok(())
        });
    }
}
