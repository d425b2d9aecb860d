//! Configuration loading and validation
//!
//! Exercises the shipped `config/scimitar.toml` end to end on the simulated
//! rig, and the validation rules on small TOML snippets.

use scimitar::config::ScanConfig;
use scimitar::data::{JsonResultWriter, ResultWriter};
use scimitar::error::ErrorKind;
use scimitar::experiment::{RoutineSpec, ScanOrchestrator, ScanPlan};
use scimitar::hardware::LengthUnit;
use scimitar::rig::Rig;
use std::path::PathBuf;
use tempfile::TempDir;

fn shipped_config() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config/scimitar.toml")
}

const BASE: &str = r#"
    [grid]
    count = [1, 1, 1]

    [[stages]]
    axis = "z"
    lower = -6.5
    upper = 6.5
"#;

fn with(extra: &str) -> ScanConfig {
    ScanConfig::from_toml_str(&format!("{}\n{}", BASE, extra)).unwrap()
}

#[test]
fn test_shipped_config_is_valid() {
    let config = ScanConfig::load_from(shipped_config()).unwrap();
    config.validate().unwrap();

    assert_eq!(config.stages.len(), 3);
    assert_eq!(config.stages[0].units, LengthUnit::Native);
    assert_eq!(config.grid().unwrap().len(), 4);
    assert_eq!(config.routine().unwrap().phases().len(), 2);
    assert!(config.laser.is_some());
    assert!(config.signal_generator.is_some());
}

#[tokio::test]
async fn test_shipped_config_runs_on_simulated_rig() {
    let dir = TempDir::new().unwrap();
    let mut config = ScanConfig::load_from(shipped_config()).unwrap();
    config.storage.output_dir = dir.path().to_path_buf();

    let (rig, sim) = Rig::simulated(&config).unwrap();
    let orchestrator = ScanOrchestrator::new(rig, ScanPlan::from_config(&config).unwrap());
    let writer = JsonResultWriter::new(&config.storage.output_dir, &config.storage.file_prefix);

    let (result, paths) = orchestrator
        .run_and_save(&[&writer as &dyn ResultWriter])
        .await
        .unwrap();

    // two phases on four points
    assert_eq!(result.record_count(), 8);
    assert!(paths[0].starts_with(dir.path()));
    assert!(paths[0]
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("Scimitar_"));
    // Z piezo parked at zero on release
    assert_eq!(sim.stage(scimitar::control::Axis::Z).unwrap().raw_position().await, 0.0);
}

#[test]
fn test_reference_renders_and_reparses() {
    let text = ScanConfig::reference().to_toml().unwrap();
    let parsed = ScanConfig::from_toml_str(&text).unwrap();
    parsed.validate().unwrap();
    assert_eq!(parsed, ScanConfig::reference());
}

#[test]
fn test_custom_phases_parse() {
    let config = with(
        r#"
        [[routine.phases]]
        label = "lamp"
        arm = ["SLS205"]
        read = ["Lamp"]
        "#,
    );
    config.validate().unwrap();
    assert!(matches!(config.routine, RoutineSpec::Custom { .. }));
    assert_eq!(config.routine().unwrap().phases()[0].label, "lamp");
}

#[test]
fn test_phase_with_unknown_device_is_rejected() {
    let config = with(
        r#"
        [[routine.phases]]
        label = "bad"
        read = ["Bolometer"]
        "#,
    );
    assert_eq!(config.validate().unwrap_err().kind(), ErrorKind::Configuration);
}

#[test]
fn test_phase_arming_analog_device_is_rejected() {
    let config = with(
        r#"
        [[routine.phases]]
        label = "bad"
        arm = ["PhotodiodeT"]
        read = ["PhotodiodeR"]
        "#,
    );
    assert!(config.validate().is_err());
}

#[test]
fn test_duplicate_channel_is_rejected() {
    let config = with(
        r#"
        [[devices]]
        channel = 0
        family = "digital_output"
        name = "Vortran"

        [[devices]]
        channel = 0
        family = "digital_output"
        name = "Tektronix"
        "#,
    );
    assert!(config.validate().is_err());
}

#[test]
fn test_empty_grid_is_rejected() {
    let config = ScanConfig::from_toml_str("[grid]\ncount = [0, 1, 1]").unwrap();
    assert!(config.validate().is_err());
}

#[test]
fn test_unknown_stage_driver_is_rejected() {
    let config = with(
        r#"
        [[stages]]
        axis = "x"
        driver = "zaber_ascii"
        "#,
    );
    assert!(config.validate().is_err());
}

#[test]
fn test_trigger_line_beyond_port_is_rejected() {
    let mut config = ScanConfig::reference();
    config.triggers.line_count = 4;
    assert!(config.validate().is_err());
}

#[test]
fn test_oversized_acquisition_is_rejected() {
    let mut config = ScanConfig::reference();
    config.acquisition.sample_rate_hz = 1e9;
    config.acquisition.integration_time_s = 1e6;
    assert_eq!(config.validate().unwrap_err().kind(), ErrorKind::Configuration);
}
