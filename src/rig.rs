//! Rig assembly.
//!
//! A [`Rig`] is the set of controllers one scan drives, plus the ordered list
//! of adapters the hardware session connects. [`Rig::simulated`] builds one
//! from a [`ScanConfig`] with simulated DAQ, stage and spectrometer adapters;
//! the returned [`SimulatedRig`] keeps typed handles to them so callers can
//! inspect what happened.

use std::sync::Arc;
use std::time::Duration;

use crate::config::{ScanConfig, StageConfig};
use crate::control::{AcquisitionController, Axis, PositionController, TriggerLineController};
use crate::error::ScanResult;
use crate::hardware::function_generator::{FunctionGenerator, Waveform};
use crate::hardware::mock::{
    CallLog, MockAnalogInput, MockDigitalOutput, MockSpectrometer, SimulatedStage,
};
use crate::hardware::transport::{LineTransport, MockTransport};
use crate::hardware::units::LengthUnit;
use crate::hardware::vortran::{LaserMode, VortranLaser};
use crate::hardware::{Connectable, DeviceRegistry, TravelLimits};

/// Laser state applied before the sweep.
pub struct LaserSetup {
    /// Laser driver, also in the connect list
    pub laser: Arc<VortranLaser>,
    /// Output power, 0 to 100 percent
    pub power_percent: f64,
    /// Modulation mode
    pub mode: LaserMode,
}

/// Signal generator state applied before the sweep.
pub struct GeneratorSetup {
    /// Generator driver, also in the connect list
    pub generator: Arc<FunctionGenerator>,
    /// Waveform applied before arming the burst
    pub waveform: Waveform,
}

/// Every controller and adapter a scan needs.
pub struct Rig {
    /// Devices wired to the DAQ card
    pub registry: DeviceRegistry,
    /// Digital trigger lines
    pub triggers: TriggerLineController,
    /// Stage axes
    pub positions: PositionController,
    /// Analog capture and spectrometer
    pub acquisition: AcquisitionController,
    /// Connected in this order, released in reverse
    pub devices: Vec<Arc<dyn Connectable>>,
    /// Laser set up before the sweep
    pub laser: Option<LaserSetup>,
    /// Generator set up before the sweep
    pub signal_generator: Option<GeneratorSetup>,
    /// Home every bound axis right after connecting
    pub home_on_connect: bool,
}

impl Rig {
    /// Rig with no adapters in the connect list.
    pub fn new(
        registry: DeviceRegistry,
        triggers: TriggerLineController,
        positions: PositionController,
        acquisition: AcquisitionController,
    ) -> Self {
        Self {
            registry,
            triggers,
            positions,
            acquisition,
            devices: Vec::new(),
            laser: None,
            signal_generator: None,
            home_on_connect: false,
        }
    }

    /// Append `device` to the connect list.
    pub fn with_device(mut self, device: Arc<dyn Connectable>) -> Self {
        self.devices.push(device);
        self
    }

    /// Configure a laser before the sweep.
    pub fn with_laser(mut self, setup: LaserSetup) -> Self {
        self.devices.push(setup.laser.clone());
        self.laser = Some(setup);
        self
    }

    /// Configure a function generator before the sweep.
    pub fn with_signal_generator(mut self, setup: GeneratorSetup) -> Self {
        self.devices.push(setup.generator.clone());
        self.signal_generator = Some(setup);
        self
    }

    /// Home every bound axis after connecting.
    pub fn with_homing(mut self, home: bool) -> Self {
        self.home_on_connect = home;
        self
    }
}

/// Command channel for a line instrument: serial when a port is given,
/// scripted otherwise.
fn line_transport(
    name: &str,
    port: Option<&str>,
    baud_rate: u32,
) -> ScanResult<Arc<dyn LineTransport>> {
    match port {
        None => Ok(Arc::new(
            MockTransport::new(name).with_reply("*IDN?", format!("SIMULATED,{},0,1.0", name)),
        )),
        #[cfg(feature = "tokio_serial")]
        Some(path) => Ok(Arc::new(crate::hardware::transport::SerialTransport::new(
            name, path, baud_rate,
        ))),
        #[cfg(not(feature = "tokio_serial"))]
        Some(path) => {
            let _ = baud_rate;
            Err(crate::error::ScanError::configuration(format!(
                "{} is configured on {} but serial support was not compiled in",
                name, path
            )))
        }
    }
}

/// Handles to the simulated adapters of a rig built by [`Rig::simulated`].
pub struct SimulatedRig {
    /// Shared by every simulated adapter
    pub call_log: CallLog,
    /// Trigger port
    pub port: Arc<MockDigitalOutput>,
    /// Analog input card
    pub analog: Arc<MockAnalogInput>,
    /// Stages by axis
    pub stages: Vec<(Axis, Arc<SimulatedStage>)>,
    /// Spectrometer, when configured
    pub spectrometer: Option<Arc<MockSpectrometer>>,
}

impl Rig {
    /// Build the configured rig on simulated DAQ, stages and spectrometer.
    ///
    /// Laser and signal generator use a serial port when one is configured.
    pub fn simulated(config: &ScanConfig) -> ScanResult<(Rig, SimulatedRig)> {
        let realtime = config.simulation.realtime;
        let call_log = CallLog::new();
        let registry = config.registry()?;

        let port = Arc::new(
            MockDigitalOutput::new("trigger_port", config.triggers.line_count)
                .with_call_log(call_log.clone()),
        );
        let settle = if realtime {
            Duration::from_millis(config.triggers.settle_ms)
        } else {
            Duration::ZERO
        };
        let triggers = TriggerLineController::new(
            port.clone(),
            config.triggers.line_count,
            config.shutter_channel(&registry)?,
        )?
        .with_settle(settle);

        let analog = Arc::new(
            MockAnalogInput::new("daq_ai")
                .with_realtime(realtime)
                .with_call_log(call_log.clone()),
        );
        let mut acquisition = AcquisitionController::new(analog.clone());
        let spectrometer = config.spectrometer.as_ref().map(|_| {
            Arc::new(
                MockSpectrometer::new("spectrometer")
                    .with_realtime(realtime)
                    .with_call_log(call_log.clone()),
            )
        });
        if let Some(spectrometer) = &spectrometer {
            acquisition = acquisition.with_spectrometer(spectrometer.clone());
        }

        let mut positions = PositionController::new();
        let mut stages = Vec::with_capacity(config.stages.len());
        for stage_config in &config.stages {
            let stage = Arc::new(build_stage(stage_config, realtime, &call_log));
            positions = positions.with_axis(stage_config.axis, stage.clone(), LengthUnit::Millimetres)?;
            stages.push((stage_config.axis, stage));
        }

        let mut rig = Rig::new(registry, triggers, positions, acquisition)
            .with_device(port.clone())
            .with_device(analog.clone())
            .with_homing(config.stages.iter().any(|s| s.home_on_connect));
        for (_, stage) in &stages {
            rig = rig.with_device(stage.clone());
        }
        if let Some(spectrometer) = &spectrometer {
            rig = rig.with_device(spectrometer.clone());
        }
        if let Some(laser) = &config.laser {
            let transport = line_transport(&laser.name, laser.port.as_deref(), laser.baud_rate)?;
            rig = rig.with_laser(LaserSetup {
                laser: Arc::new(VortranLaser::new(&laser.name, transport)),
                power_percent: laser.power_percent,
                mode: laser.mode,
            });
        }
        if let Some(generator) = &config.signal_generator {
            let transport =
                line_transport(&generator.name, generator.port.as_deref(), generator.baud_rate)?;
            rig = rig.with_signal_generator(GeneratorSetup {
                generator: Arc::new(FunctionGenerator::new(&generator.name, transport)),
                waveform: generator.waveform.clone(),
            });
        }

        Ok((
            rig,
            SimulatedRig {
                call_log,
                port,
                analog,
                stages,
                spectrometer,
            },
        ))
    }
}

impl SimulatedRig {
    /// Stage bound to `axis`.
    pub fn stage(&self, axis: Axis) -> Option<&Arc<SimulatedStage>> {
        self.stages.iter().find(|(a, _)| *a == axis).map(|(_, s)| s)
    }
}

fn build_stage(config: &StageConfig, realtime: bool, log: &CallLog) -> SimulatedStage {
    let mut stage = SimulatedStage::new(config.device_name(), config.units)
        .with_position(config.initial)
        .with_speed(config.speed_mm_per_sec())
        .with_realtime(realtime)
        .with_call_log(log.clone());
    if let Some(scale) = config.native_per_mm {
        stage = stage.with_native_scale(scale);
    }
    if let Some((lower, upper)) = config.limits() {
        stage = stage.with_limits(TravelLimits::new(lower, upper));
    }
    if let Some(park) = config.park {
        stage = stage.with_park_position(park);
    }
    stage
}
