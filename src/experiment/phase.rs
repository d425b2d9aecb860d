//! Phases and routines.
//!
//! A phase is one arm-and-acquire step performed at every grid point: which
//! trigger lines to raise, which analog inputs to read and whether the
//! spectrometer exposes alongside. A routine is the ordered list of phases
//! run at each point, with the trigger lines returned to safe in between.

use serde::{Deserialize, Serialize};

use crate::control::acquisition::AcquisitionParams;
use crate::error::{ScanError, ScanResult};
use crate::hardware::registry::{ActiveSet, DeviceFamily, DeviceRegistry};

/// One arm-then-read pass at a grid point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    /// Name in logs and the result file; unique within a routine
    pub label: String,
    /// Digital-output devices to arm
    #[serde(default)]
    pub arm: Vec<String>,
    /// Analog-input devices to read
    pub read: Vec<String>,
    /// Expose the spectrometer during the acquisition window
    #[serde(default)]
    pub with_spectrum: bool,
    /// Overrides the run-wide acquisition timing for this phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acquisition: Option<AcquisitionParams>,
}

impl Phase {
    /// Phase arming `arm` and reading `read`, without a spectrum.
    pub fn new<A: AsRef<str>, R: AsRef<str>>(label: impl Into<String>, arm: &[A], read: &[R]) -> Self {
        Self {
            label: label.into(),
            arm: arm.iter().map(|s| s.as_ref().to_string()).collect(),
            read: read.iter().map(|s| s.as_ref().to_string()).collect(),
            with_spectrum: false,
            acquisition: None,
        }
    }

    /// Also take a spectrum.
    pub fn with_spectrum(mut self) -> Self {
        self.with_spectrum = true;
        self
    }

    /// Use `params` instead of the run-wide acquisition.
    pub fn with_acquisition(mut self, params: AcquisitionParams) -> Self {
        self.acquisition = Some(params);
        self
    }

    /// Resolve device names into the trigger and read sets.
    pub fn resolve<'r>(
        &self,
        registry: &'r DeviceRegistry,
    ) -> ScanResult<(ActiveSet<'r>, ActiveSet<'r>)> {
        let armed = registry
            .select(DeviceFamily::DigitalOutput, &self.arm)
            .map_err(|e| self.context(e))?;
        let read = registry
            .select(DeviceFamily::AnalogInput, &self.read)
            .map_err(|e| self.context(e))?;
        if read.is_empty() {
            return Err(ScanError::configuration(format!(
                "Phase '{}' reads no devices",
                self.label
            )));
        }
        Ok((armed, read))
    }

    fn context(&self, err: ScanError) -> ScanError {
        match err {
            ScanError::Configuration(msg) => {
                ScanError::configuration(format!("Phase '{}': {}", self.label, msg))
            }
            other => other,
        }
    }
}

/// Built-in routines of the reference rig.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutinePreset {
    /// Read the two photodiodes with nothing armed
    ReadOnly,
    /// Laser and signal generator on, read the photodiodes
    Active,
    /// Lamp reference with a spectrum, then the active phase
    ReferenceThenActive,
}

/// A routine as written in configuration: a preset name or explicit phases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RoutineSpec {
    /// `routine = "active"`
    Preset(RoutinePreset),
    /// `[[routine.phases]]` tables
    Custom {
        /// Phases in execution order
        phases: Vec<Phase>,
    },
}

impl Default for RoutineSpec {
    fn default() -> Self {
        RoutineSpec::Preset(RoutinePreset::ReadOnly)
    }
}

/// Ordered, non-empty list of phases with unique labels.
#[derive(Debug, Clone, PartialEq)]
pub struct Routine {
    phases: Vec<Phase>,
}

impl Routine {
    /// Routine from explicit phases.
    pub fn new(phases: Vec<Phase>) -> ScanResult<Self> {
        if phases.is_empty() {
            return Err(ScanError::configuration("Routine has no phases"));
        }
        for (i, phase) in phases.iter().enumerate() {
            if phases[..i].iter().any(|p| p.label == phase.label) {
                return Err(ScanError::configuration(format!(
                    "Duplicate phase label '{}'",
                    phase.label
                )));
            }
        }
        Ok(Self { phases })
    }

    /// Phases of a named preset.
    pub fn preset(preset: RoutinePreset) -> Self {
        const PHOTODIODES: [&str; 2] = ["PhotodiodeT", "PhotodiodeR"];
        const NONE: [&str; 0] = [];
        let active = Phase::new("active", &["Vortran", "Tektronix"], &PHOTODIODES);
        let phases = match preset {
            RoutinePreset::ReadOnly => vec![Phase::new("measurement", &NONE, &PHOTODIODES)],
            RoutinePreset::Active => vec![active],
            RoutinePreset::ReferenceThenActive => vec![
                Phase::new("reference", &["SLS205"], &["PhotodiodeT", "PhotodiodeR", "Lamp"])
                    .with_spectrum(),
                active,
            ],
        };
        Self { phases }
    }

    /// Resolve a configured routine.
    pub fn from_spec(spec: &RoutineSpec) -> ScanResult<Self> {
        match spec {
            RoutineSpec::Preset(preset) => Ok(Self::preset(*preset)),
            RoutineSpec::Custom { phases } => Self::new(phases.clone()),
        }
    }

    /// Phases in execution order.
    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    /// True when any phase takes a spectrum.
    pub fn needs_spectrometer(&self) -> bool {
        self.phases.iter().any(|p| p.with_spectrum)
    }

    /// Check every phase against the registry.
    pub fn validate(&self, registry: &DeviceRegistry) -> ScanResult<()> {
        for phase in &self.phases {
            phase.resolve(registry)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_resolve_against_reference_rig() {
        let registry = DeviceRegistry::reference();
        for preset in [
            RoutinePreset::ReadOnly,
            RoutinePreset::Active,
            RoutinePreset::ReferenceThenActive,
        ] {
            Routine::preset(preset).validate(&registry).unwrap();
        }
    }

    #[test]
    fn reference_phase_opens_shutter_and_takes_spectrum() {
        let routine = Routine::preset(RoutinePreset::ReferenceThenActive);
        let labels: Vec<&str> = routine.phases().iter().map(|p| p.label.as_str()).collect();
        assert_eq!(labels, vec!["reference", "active"]);
        assert_eq!(routine.phases()[0].arm, vec!["SLS205"]);
        assert!(routine.needs_spectrometer());
    }

    #[test]
    fn wrong_family_names_the_phase() {
        let registry = DeviceRegistry::reference();
        let phase = Phase::new("broken", &["Lamp"], &["PhotodiodeT"]);
        let err = phase.resolve(&registry).unwrap_err();
        assert!(err.to_string().contains("Phase 'broken'"));
    }

    #[test]
    fn duplicate_labels_rejected() {
        let phase = Phase::new("a", &["Vortran"], &["Lamp"]);
        assert!(Routine::new(vec![phase.clone(), phase]).is_err());
        assert!(Routine::new(vec![]).is_err());
    }

    #[test]
    fn routine_spec_parses_preset_or_phases() {
        #[derive(Deserialize)]
        struct Wrapper {
            routine: RoutineSpec,
        }
        let preset: Wrapper = toml::from_str(r#"routine = "reference_then_active""#).unwrap();
        assert_eq!(
            preset.routine,
            RoutineSpec::Preset(RoutinePreset::ReferenceThenActive)
        );

        let custom: Wrapper = toml::from_str(
            r#"
            [[routine.phases]]
            label = "dark"
            read = ["PhotodiodeT"]
            "#,
        )
        .unwrap();
        let routine = Routine::from_spec(&custom.routine).unwrap();
        assert_eq!(routine.phases()[0].label, "dark");
        assert!(routine.phases()[0].arm.is_empty());
    }
}
