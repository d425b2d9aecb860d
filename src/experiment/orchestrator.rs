//! Scan orchestrator.
//!
//! Drives one run: validate the plan against the rig, open a hardware
//! session, sweep the grid, tear down, and hand back a [`RunResult`].
//!
//! # Per-point sequence
//!
//! ```text
//! SAFE ──move──> POSITIONED ──arm──> ARMED ──acquire──> ACQUIRED ──┐
//!   ^                                  ^                          │
//!   │                                  └──── SAFE (next phase) <──┤
//!   └──────────────────────── next point ─────────────────────────┘
//! ```
//!
//! Any failure after the point's initial reset triggers one best-effort
//! reset to safe before the error is returned; the point's records are
//! discarded. Teardown drives the lines safe (if they are not already) and
//! releases every adapter in reverse order of connection.

use chrono::Utc;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::ScanConfig;
use crate::control::acquisition::{samples_per_channel, AcquisitionParams, SpectrumParams};
use crate::control::TriggerLineController;
use crate::data::record::MeasurementRecord;
use crate::data::storage::{PhaseResult, ResultWriter, RunParameters, RunResult};
use crate::error::{ScanError, ScanResult};
use crate::experiment::grid::{GridPoint, ScanGrid};
use crate::experiment::phase::{Phase, Routine};
use crate::experiment::session::HardwareSession;
use crate::experiment::state::{ProgressReport, RunState, RunStatus, StepState};
use crate::hardware::registry::{ActiveSet, DeviceFamily};
use crate::hardware::vortran::VortranLaser;
use crate::hardware::Connectable;
use crate::rig::Rig;

/// Callback invoked after every completed grid point.
pub type ProgressObserver = Box<dyn Fn(&ProgressReport) + Send + Sync>;

/// What to measure: where, which phases, with which acquisition settings.
#[derive(Debug, Clone)]
pub struct ScanPlan {
    /// Points to visit, in millimetres
    pub grid: ScanGrid,
    /// Phases run at every point
    pub routine: Routine,
    /// Used by phases without their own settings
    pub acquisition: AcquisitionParams,
    /// Spectrometer exposure for spectrum phases
    pub spectrum: Option<SpectrumParams>,
}

impl ScanPlan {
    /// Plan without spectrometer settings.
    pub fn new(grid: ScanGrid, routine: Routine, acquisition: AcquisitionParams) -> Self {
        Self {
            grid,
            routine,
            acquisition,
            spectrum: None,
        }
    }

    /// Set the spectrometer exposure.
    pub fn with_spectrum(mut self, params: SpectrumParams) -> Self {
        self.spectrum = Some(params);
        self
    }

    /// Plan from a loaded configuration.
    pub fn from_config(config: &ScanConfig) -> ScanResult<Self> {
        Ok(Self {
            grid: config.grid()?,
            routine: config.routine()?,
            acquisition: config.acquisition,
            spectrum: config.spectrometer,
        })
    }
}

/// A phase bound to the rig's registry.
struct PhasePlan<'r> {
    phase: &'r Phase,
    armed: ActiveSet<'r>,
    read: ActiveSet<'r>,
    params: AcquisitionParams,
}

/// Runs a [`ScanPlan`] on a [`Rig`].
///
/// One run at a time; [`ScanOrchestrator::status`] can be polled from
/// another task while it is in progress.
pub struct ScanOrchestrator {
    rig: Rig,
    plan: ScanPlan,
    status: Mutex<RunStatus>,
    observer: Option<ProgressObserver>,
}

impl ScanOrchestrator {
    /// Orchestrator for `plan` on `rig`.
    pub fn new(rig: Rig, plan: ScanPlan) -> Self {
        Self {
            rig,
            plan,
            status: Mutex::new(RunStatus::default()),
            observer: None,
        }
    }

    /// Call `observer` after every completed grid point.
    pub fn with_progress_observer(
        mut self,
        observer: impl Fn(&ProgressReport) + Send + Sync + 'static,
    ) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    /// The rig this orchestrator drives.
    pub fn rig(&self) -> &Rig {
        &self.rig
    }

    /// The plan this orchestrator runs.
    pub fn plan(&self) -> &ScanPlan {
        &self.plan
    }

    /// Snapshot of the current run status.
    pub fn status(&self) -> RunStatus {
        self.lock_status().clone()
    }

    fn lock_status(&self) -> MutexGuard<'_, RunStatus> {
        self.status.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_step(&self, step: StepState) {
        self.lock_status().step = Some(step);
    }

    /// Check the whole plan against the rig without touching hardware.
    ///
    /// # Errors
    /// `Configuration` for unknown devices, bad acquisition settings or a
    /// missing spectrometer; `OutOfRange` if any grid point leaves a stage's
    /// travel or the laser power is outside 0..=100.
    pub fn validate(&self) -> ScanResult<()> {
        self.resolve_phases().map(|_| ())
    }

    fn resolve_phases(&self) -> ScanResult<Vec<PhasePlan<'_>>> {
        let mut phases = Vec::with_capacity(self.plan.routine.phases().len());
        for phase in self.plan.routine.phases() {
            let (armed, read) = phase.resolve(&self.rig.registry)?;
            let params = phase.acquisition.unwrap_or(self.plan.acquisition);
            if params.repeats == 0 {
                return Err(ScanError::configuration(format!(
                    "Phase '{}': repeats must be at least 1",
                    phase.label
                )));
            }
            samples_per_channel(params.sample_rate_hz, params.duration_s())?;
            self.rig.triggers.vector_for(&armed)?;
            if phase.with_spectrum
                && (self.plan.spectrum.is_none() || !self.rig.acquisition.has_spectrometer())
            {
                return Err(ScanError::configuration(format!(
                    "Phase '{}' takes a spectrum but no spectrometer is configured",
                    phase.label
                )));
            }
            phases.push(PhasePlan {
                phase,
                armed,
                read,
                params,
            });
        }
        if phases.is_empty() {
            return Err(ScanError::configuration("Routine has no phases"));
        }

        for point in self.plan.grid.points() {
            self.rig.positions.check_bounds(&point.position)?;
        }
        if let Some(laser) = &self.rig.laser {
            if !(0.0..=VortranLaser::MAX_POWER_PERCENT).contains(&laser.power_percent) {
                return Err(ScanError::out_of_range(
                    "laser power (%)",
                    laser.power_percent,
                    0.0,
                    VortranLaser::MAX_POWER_PERCENT,
                ));
            }
        }
        if let Some(generator) = &self.rig.signal_generator {
            generator.waveform.validate()?;
        }
        Ok(phases)
    }

    /// Execute the plan once.
    ///
    /// Nothing is sent to the hardware if validation fails.
    pub async fn run(&self) -> ScanResult<RunResult> {
        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        {
            let mut status = self.lock_status();
            if !status.state.can_begin() {
                return Err(ScanError::configuration(format!(
                    "Cannot start a run while {}",
                    status.state
                )));
            }
            *status = RunStatus {
                state: RunState::Connecting,
                run_id: Some(run_id.clone()),
                step: None,
                iteration: 0,
                total: self.plan.grid.len(),
                started_at: Some(started_at),
                last_error: None,
            };
        }

        let span = info_span!("scan", run_id = %run_id);
        let result = self.execute(run_id, started_at).instrument(span).await;

        let mut status = self.lock_status();
        match &result {
            Ok(_) => status.state = RunState::Complete,
            Err(e) => {
                status.state = RunState::Error;
                status.last_error = Some(e.to_string());
            }
        }
        result
    }

    /// Run, then persist the result with every writer.
    ///
    /// Files are written only when the run completed.
    pub async fn run_and_save(
        &self,
        writers: &[&dyn ResultWriter],
    ) -> ScanResult<(RunResult, Vec<PathBuf>)> {
        let result = self.run().await?;
        let mut paths = Vec::with_capacity(writers.len());
        for writer in writers {
            paths.push(writer.write(&result).await?);
        }
        Ok((result, paths))
    }

    async fn execute(
        &self,
        run_id: String,
        started_at: chrono::DateTime<Utc>,
    ) -> ScanResult<RunResult> {
        let phases = self.resolve_phases()?;
        info!(
            points = self.plan.grid.len(),
            phases = phases.len(),
            "plan validated"
        );

        let session = match HardwareSession::open(&self.rig.devices).await {
            Ok(session) => session,
            Err(e) => {
                self.reset_after_failure(&e).await;
                return Err(e);
            }
        };
        let outcome = self.sweep(&phases).await;
        let teardown = self.teardown(session).await;

        let records = match (outcome, teardown) {
            (Ok(records), Ok(())) => records,
            (Ok(_), Err(e)) => return Err(e),
            (Err(e), Ok(())) => return Err(e),
            (Err(e), Err(teardown)) => {
                error!(error = %teardown, "teardown after failed run was incomplete");
                return Err(e);
            }
        };

        let phase_results = phases
            .iter()
            .zip(records)
            .map(|(plan, records)| PhaseResult {
                label: plan.phase.label.clone(),
                armed: plan.armed.names(),
                read: plan.read.names(),
                with_spectrum: plan.phase.with_spectrum,
                acquisition: plan.params,
                records,
            })
            .collect();

        Ok(RunResult {
            run_id,
            started_at,
            finished_at: Utc::now(),
            position_map: self.plan.grid.position_map(),
            phases: phase_results,
            parameters: RunParameters::new(&self.plan.acquisition, self.plan.spectrum),
            ai_devices: self
                .rig
                .registry
                .by_family(DeviceFamily::AnalogInput)
                .cloned()
                .collect(),
        })
    }

    /// Bring the line instruments up and sweep every grid point.
    ///
    /// Returns one record list per phase.
    async fn sweep(&self, phases: &[PhasePlan<'_>]) -> ScanResult<Vec<Vec<MeasurementRecord>>> {
        if let Err(e) = self.prepare().await {
            self.reset_after_failure(&e).await;
            return Err(e);
        }

        self.lock_status().state = RunState::Running;
        let total = self.plan.grid.len();
        let mut records: Vec<Vec<MeasurementRecord>> = phases.iter().map(|_| Vec::new()).collect();

        for point in self.plan.grid.points() {
            let cycle = Instant::now();
            self.rig.triggers.reset_to_safe().await?;
            self.set_step(StepState::Safe);

            let span = info_span!("grid_point", index = point.index, total);
            match self.visit(&point, phases).instrument(span).await {
                Ok(point_records) => {
                    for (n, record) in point_records.into_iter().enumerate() {
                        records[n].push(record);
                    }
                }
                Err(e) => {
                    self.reset_after_failure(&e).await;
                    return Err(e);
                }
            }
            self.report_progress(point.index, total, cycle.elapsed());
        }

        self.rig.triggers.reset_to_safe().await?;
        self.set_step(StepState::Safe);
        Ok(records)
    }

    async fn prepare(&self) -> ScanResult<()> {
        self.rig.triggers.reset_to_safe().await?;
        self.set_step(StepState::Safe);

        if self.rig.home_on_connect {
            self.rig.positions.home_all().await?;
        }
        if let Some(setup) = &self.rig.laser {
            setup.laser.set_mode(setup.mode).await?;
            setup.laser.set_power(setup.power_percent).await?;
            setup.laser.activate().await?;
        }
        if let Some(setup) = &self.rig.signal_generator {
            setup.generator.reset().await?;
            setup.generator.apply_waveform(&setup.waveform).await?;
            setup.generator.arm_gated_burst().await?;
            setup.generator.output(true).await?;
        }
        Ok(())
    }

    /// Position, then arm and acquire every phase in turn.
    async fn visit(
        &self,
        point: &GridPoint,
        phases: &[PhasePlan<'_>],
    ) -> ScanResult<Vec<MeasurementRecord>> {
        self.rig.positions.set_position(&point.position).await?;
        let readback = self.rig.positions.get_position().await;
        info!("Stage Position: {}", readback);
        readback.into_vector()?;
        self.set_step(StepState::Positioned);

        let mut records = Vec::with_capacity(phases.len());
        for (n, plan) in phases.iter().enumerate() {
            if n > 0 {
                self.rig.triggers.reset_to_safe().await?;
                self.set_step(StepState::Safe);
            }
            let vector = self.rig.triggers.arm(&plan.armed).await?;
            self.set_step(StepState::Armed);
            info!(phase = %plan.phase.label, lines = %vector, "armed");

            let handle = self
                .rig
                .acquisition
                .configure(&plan.read, plan.params.sample_rate_hz, plan.params.duration_s())
                .await?;
            let record = match (plan.phase.with_spectrum, &self.plan.spectrum) {
                (true, Some(params)) => {
                    let (buffers, spectrum) =
                        self.rig.acquisition.read_with_spectrum(&handle, params).await?;
                    MeasurementRecord::new(point.index, &plan.phase.label, point.position, buffers)
                        .with_spectrum(spectrum)
                }
                (true, None) => {
                    return Err(ScanError::configuration(format!(
                        "Phase '{}' takes a spectrum but no spectrometer settings are configured",
                        plan.phase.label
                    )));
                }
                (false, _) => {
                    let buffers = self.rig.acquisition.read(&handle).await?;
                    MeasurementRecord::new(point.index, &plan.phase.label, point.position, buffers)
                }
            };
            self.set_step(StepState::Acquired);
            records.push(record);
        }
        Ok(records)
    }

    /// Best-effort return to safe after `cause`; a reset failure is logged.
    async fn reset_after_failure(&self, cause: &ScanError) {
        warn!(error = %cause, "step failed, driving triggers safe");
        match self.rig.triggers.reset_to_safe().await {
            Ok(()) => self.set_step(StepState::Safe),
            Err(e) => error!(error = %e, "reset to safe after failure also failed"),
        }
    }

    fn report_progress(&self, iteration: usize, total: usize, cycle_duration: Duration) {
        let report = ProgressReport {
            iteration,
            total,
            cycle_duration,
        };
        self.lock_status().iteration = iteration;
        info!("{}", report);
        info!("Last cycle took {:.3} s", cycle_duration.as_secs_f64());
        if let Some(observer) = &self.observer {
            observer(&report);
        }
    }

    async fn teardown(&self, session: HardwareSession) -> ScanResult<()> {
        let mut errors = Vec::new();
        if !self.rig.triggers.is_safe().await {
            if let Err(e) = self.rig.triggers.reset_to_safe().await {
                errors.push(e);
            }
        }
        match session.close().await {
            Ok(()) => {}
            Err(ScanError::TeardownFailed(release)) => errors.extend(release),
            Err(other) => errors.push(other),
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ScanError::TeardownFailed(errors))
        }
    }
}

/// Standalone trigger reset: connect the port, commit the safe vector,
/// disconnect.
pub async fn reset_triggers(
    triggers: &TriggerLineController,
    port: Arc<dyn Connectable>,
) -> ScanResult<()> {
    let session = HardwareSession::open(&[port]).await?;
    let reset = triggers.reset_to_safe().await;
    let closed = session.close().await;
    reset.and(closed)
}
