//! Integration tests for the scan orchestrator on the simulated rig
//!
//! Covers the per-point state machine: visiting order, record bookkeeping,
//! safe-state handling on failure and teardown.

use scimitar::config::ScanConfig;
use scimitar::data::{JsonResultWriter, ResultWriter};
use scimitar::control::Axis;
use scimitar::error::{ErrorKind, ScanError};
use scimitar::experiment::{RoutinePreset, RoutineSpec, RunState, ScanOrchestrator, ScanPlan};
use scimitar::hardware::function_generator::{FunctionGenerator, Waveform};
use scimitar::hardware::transport::{LineTransport, MockTransport};
use scimitar::hardware::vortran::{LaserMode, VortranLaser};
use scimitar::hardware::Connectable;
use scimitar::rig::{GeneratorSetup, LaserSetup, Rig, SimulatedRig};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

const SAFE: &str = "trigger_port.write(00100000)";

fn config(x_count: usize, step: f64) -> ScanConfig {
    let mut config = ScanConfig::reference();
    config.grid.origin = [0.0; 3];
    config.grid.step = [step, step, 0.0];
    config.grid.count = [x_count, 1, 1];
    config.acquisition.integration_time_s = 0.001;
    config
}

fn build(config: &ScanConfig) -> (ScanOrchestrator, SimulatedRig) {
    let (rig, sim) = Rig::simulated(config).unwrap();
    let plan = ScanPlan::from_config(config).unwrap();
    (ScanOrchestrator::new(rig, plan), sim)
}

/// Entries logged after the last one starting with `marker`.
fn entries_after(entries: &[String], marker: &str) -> Vec<String> {
    let last = entries.iter().rposition(|e| e.starts_with(marker)).unwrap();
    entries[last + 1..].to_vec()
}

// =============================================================================
// Sweeps
// =============================================================================

#[tokio::test]
async fn test_two_point_sweep_active_phase() {
    let mut config = config(2, 10.0);
    config.routine = RoutineSpec::Preset(RoutinePreset::Active);
    let (orch, sim) = build(&config);

    let result = orch.run().await.unwrap();

    assert_eq!(result.record_count(), 2);
    let active = result.phase("active").unwrap();
    assert_eq!(active.armed, vec!["Vortran", "Tektronix"]);
    let indices: Vec<usize> = active.records.iter().map(|r| r.grid_index).collect();
    assert_eq!(indices, vec![1, 2]);
    assert!(active.records.iter().all(|r| r.phase == "active"));
    assert_eq!(active.records[1].position.x, 10.0);

    // Armed vector has Vortran, Tektronix and the (inverted) shutter line high.
    let writes = sim.port.writes();
    assert!(writes.contains(&vec![true, true, true, false, false, false, false, false]));

    // Final state equals the safe state.
    assert_eq!(
        sim.port.last_written().unwrap(),
        orch.rig().triggers.safe_vector().lines().to_vec()
    );
    assert!(orch.rig().triggers.is_safe().await);
    assert_eq!(orch.status().state, RunState::Complete);
}

#[tokio::test]
async fn test_four_point_visit_order() {
    let mut config = config(2, 1.0);
    config.grid.count = [2, 2, 1];
    let (orch, _sim) = build(&config);

    let result = orch.run().await.unwrap();

    let visited: Vec<[f64; 3]> = result.position_map.iter().map(|p| p.as_array()).collect();
    assert_eq!(
        visited,
        vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [1.0, 1.0, 0.0]
        ]
    );
    let records = &result.phase("measurement").unwrap().records;
    for (n, record) in records.iter().enumerate() {
        assert_eq!(record.grid_index, n + 1);
        assert_eq!(record.position.as_array(), visited[n]);
    }
}

#[tokio::test]
async fn test_every_point_starts_safe_and_phases_reset_between() {
    let mut config = config(2, 10.0);
    config.routine = RoutineSpec::Preset(RoutinePreset::ReferenceThenActive);
    let (orch, sim) = build(&config);

    orch.run().await.unwrap();

    let writes: Vec<String> = sim
        .call_log
        .entries()
        .into_iter()
        .filter(|e| e.starts_with("trigger_port.write"))
        .collect();
    // prepare, then per point: safe, reference (SLS205 armed), safe, active; then final safe
    let reference = "trigger_port.write(00000000)";
    let active = "trigger_port.write(11100000)";
    assert_eq!(
        writes,
        vec![SAFE, SAFE, reference, SAFE, active, SAFE, reference, SAFE, active, SAFE]
    );
}

#[tokio::test]
async fn test_json_result_written_once_on_success() {
    let dir = TempDir::new().unwrap();
    let config = config(2, 10.0);
    let (orch, _sim) = build(&config);
    let writer = JsonResultWriter::new(dir.path(), "Scimitar");

    let (result, paths) = orch.run_and_save(&[&writer as &dyn ResultWriter]).await.unwrap();

    assert_eq!(paths.len(), 1);
    let loaded = JsonResultWriter::load(&paths[0]).await.unwrap();
    assert_eq!(loaded.run_id, result.run_id);
    assert_eq!(loaded.position_map, result.position_map);
    assert_eq!(loaded.record_count(), 2);
    assert_eq!(
        loaded.phase("measurement").unwrap().records[1].samples.keys().collect::<Vec<_>>(),
        vec!["PhotodiodeR", "PhotodiodeT"]
    );
    // named analog inputs only, spares are left out
    assert_eq!(loaded.ai_devices.len(), 5);
    assert_eq!(loaded.parameters.sample_rate_hz, 100_000.0);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_acquisition_failure_resets_once_and_drops_point() {
    let dir = TempDir::new().unwrap();
    let config = config(2, 10.0);
    let (orch, sim) = build(&config);
    // First point reads fine, the second read times out.
    sim.analog.faults().fail_after(1);
    let writer = JsonResultWriter::new(dir.path(), "Scimitar");

    let err = orch
        .run_and_save(&[&writer as &dyn ResultWriter])
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::HardwareIo);
    let after = entries_after(&sim.call_log.entries(), "daq_ai.read");
    let resets: Vec<&String> = after.iter().filter(|e| e.starts_with("trigger_port.write")).collect();
    assert_eq!(resets, vec![SAFE]);

    let status = orch.status();
    assert_eq!(status.state, RunState::Error);
    assert_eq!(status.iteration, 1);
    assert!(status.last_error.is_some());
    // Nothing is written for a failed run.
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    assert!(orch.rig().triggers.is_safe().await);
}

#[tokio::test]
async fn test_motion_failure_never_arms() {
    let config = config(2, 10.0);
    let (orch, sim) = build(&config);
    // connect succeeds, first move fails
    sim.stage(Axis::X).unwrap().faults().fail_after(1);

    let err = assert_err!(orch.run().await);
    assert!(matches!(err, ScanError::HardwareIo { .. }));

    let entries = sim.call_log.entries();
    assert!(!entries.iter().any(|e| e.starts_with("daq_ai.configure")));
    let writes: Vec<&String> = entries.iter().filter(|e| e.starts_with("trigger_port.write")).collect();
    assert!(writes.iter().all(|w| w.as_str() == SAFE));
}

#[tokio::test]
async fn test_teardown_releases_in_reverse_after_failure() {
    let config = config(2, 10.0);
    let (orch, sim) = build(&config);
    sim.analog.faults().trigger_failure();

    assert_err!(orch.run().await);

    let disconnects: Vec<String> = sim
        .call_log
        .entries()
        .into_iter()
        .filter(|e| e.ends_with(".disconnect"))
        .collect();
    assert_eq!(
        disconnects,
        vec![
            "spectrometer.disconnect",
            "z_stage.disconnect",
            "y_stage.disconnect",
            "x_stage.disconnect",
            "daq_ai.disconnect",
            "trigger_port.disconnect",
        ]
    );
    assert!(!sim.port.is_connected());
    assert!(!sim.analog.is_connected());
}

#[tokio::test]
async fn test_out_of_range_grid_rejected_before_connect() {
    let mut config = config(1, 0.0);
    config.grid.origin[2] = 6.50001;
    let (orch, sim) = build(&config);

    let err = orch.run().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::OutOfRange);
    assert!(sim.call_log.entries().is_empty());
}

#[tokio::test]
async fn test_connect_failure_releases_adapters_and_drives_lines_safe() {
    let config = config(1, 0.0);
    let (orch, sim) = build(&config);
    sim.stage(Axis::Y).unwrap().faults().trigger_failure();

    let err = orch.run().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Connection);
    assert!(!sim.stage(Axis::X).unwrap().is_connected());
    assert!(!sim.port.is_connected());
    assert_eq!(
        sim.port.last_written(),
        Some(vec![false, false, true, false, false, false, false, false])
    );
    let entries = sim.call_log.entries();
    assert_eq!(entries.last().map(String::as_str), Some(SAFE));
    assert_eq!(entries.iter().filter(|e| e.as_str() == SAFE).count(), 1);
}

#[tokio::test]
async fn test_rerun_after_error() {
    let config = config(1, 0.0);
    let (orch, sim) = build(&config);
    sim.analog.faults().trigger_failure();
    assert_err!(orch.run().await);
    let result = assert_ok!(orch.run().await);
    assert_eq!(result.record_count(), 1);
}

// =============================================================================
// Line instruments
// =============================================================================

#[tokio::test]
async fn test_laser_and_generator_configured_before_sweep_and_released() {
    let config = config(1, 0.0);
    let (rig, sim) = Rig::simulated(&config).unwrap();
    let laser_port = Arc::new(MockTransport::new("Vortran"));
    let generator_port = Arc::new(MockTransport::new("Agilent33220A"));
    let rig = rig
        .with_laser(LaserSetup {
            laser: Arc::new(VortranLaser::new("Vortran", laser_port.clone())),
            power_percent: 35.0,
            mode: LaserMode::Digital,
        })
        .with_signal_generator(GeneratorSetup {
            generator: Arc::new(FunctionGenerator::new("Agilent33220A", generator_port.clone())),
            waveform: Waveform::default(),
        });
    let orch = ScanOrchestrator::new(rig, ScanPlan::from_config(&config).unwrap());

    orch.run().await.unwrap();

    let laser_cmds = laser_port.sent();
    assert_eq!(laser_cmds.first().map(String::as_str), Some("EPC=0"));
    assert!(laser_cmds.contains(&"LP=35".to_string()));
    assert!(laser_cmds.contains(&"LE=1".to_string()));
    assert_eq!(laser_cmds.last().map(String::as_str), Some("LE=0"));
    assert!(!laser_port.is_open());

    let generator_cmds = generator_port.sent();
    assert_eq!(generator_cmds.first().map(String::as_str), Some("*RST"));
    assert!(generator_cmds.contains(&"OUTPUT ON".to_string()));
    assert_eq!(generator_cmds.last().map(String::as_str), Some("OUTPUT OFF"));
    assert!(sim.port.last_written().is_some());
}

#[tokio::test]
async fn test_laser_power_out_of_range_rejected_before_hardware() {
    let config = config(1, 0.0);
    let (rig, sim) = Rig::simulated(&config).unwrap();
    let laser_port = Arc::new(MockTransport::new("Vortran"));
    let rig = rig.with_laser(LaserSetup {
        laser: Arc::new(VortranLaser::new("Vortran", laser_port.clone())),
        power_percent: 140.0,
        mode: LaserMode::Cw,
    });
    let orch = ScanOrchestrator::new(rig, ScanPlan::from_config(&config).unwrap());

    let err = orch.run().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::OutOfRange);
    assert!(laser_port.sent().is_empty());
    assert!(sim.call_log.entries().is_empty());
}
