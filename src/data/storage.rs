//! Result file writers.
//!
//! A run is written once, after the sweep has completed and the hardware has
//! been released. The JSON writer stores everything; the CSV writer (behind
//! `storage_csv`) adds a flat per-channel summary next to it for quick looks
//! in a spreadsheet.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::control::acquisition::{AcquisitionParams, SpectrumParams};
use crate::control::position::PositionVector;
use crate::data::record::MeasurementRecord;
use crate::error::ScanResult;
use crate::hardware::registry::DeviceDescriptor;

/// Acquisition settings in force for the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunParameters {
    /// Analog sample rate in Hz
    pub sample_rate_hz: f64,
    /// Length of one integration, in seconds
    pub integration_time_s: f64,
    /// Integrations per window
    pub repeats: u32,
    /// Window length, in seconds
    pub duration_s: f64,
    /// Spectrometer exposure, when any phase takes a spectrum
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spectrometer: Option<SpectrumParams>,
}

impl RunParameters {
    /// Parameters from the run's default acquisition.
    pub fn new(acquisition: &AcquisitionParams, spectrometer: Option<SpectrumParams>) -> Self {
        Self {
            sample_rate_hz: acquisition.sample_rate_hz,
            integration_time_s: acquisition.integration_time_s,
            repeats: acquisition.repeats,
            duration_s: acquisition.duration_s(),
            spectrometer,
        }
    }
}

/// All records of one phase, in visit order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseResult {
    /// Phase label
    pub label: String,
    /// Devices armed during the phase
    pub armed: Vec<String>,
    /// Devices read during the phase
    pub read: Vec<String>,
    /// Whether a spectrum was taken at each point
    pub with_spectrum: bool,
    /// Acquisition used by the phase
    pub acquisition: AcquisitionParams,
    /// One record per grid point
    pub records: Vec<MeasurementRecord>,
}

/// Everything persisted for one completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    /// Unique id of the run
    pub run_id: String,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the last point was acquired
    pub finished_at: DateTime<Utc>,
    /// Visited positions in order; record `grid_index` is 1-based into this list
    pub position_map: Vec<PositionVector>,
    /// Per-phase records, in routine order
    pub phases: Vec<PhaseResult>,
    /// Acquisition settings
    pub parameters: RunParameters,
    /// Analog-input devices of the rig
    pub ai_devices: Vec<DeviceDescriptor>,
}

impl RunResult {
    /// Records across all phases.
    pub fn record_count(&self) -> usize {
        self.phases.iter().map(|p| p.records.len()).sum()
    }

    /// Results of the phase labelled `label`.
    pub fn phase(&self, label: &str) -> Option<&PhaseResult> {
        self.phases.iter().find(|p| p.label == label)
    }
}

/// Destination for a completed run.
#[async_trait]
pub trait ResultWriter: Send + Sync {
    /// Persist `result`, returning the path written.
    async fn write(&self, result: &RunResult) -> ScanResult<PathBuf>;
}

/// Pick `<dir>/<prefix>_<unix-seconds>[_n].<ext>` that does not exist yet.
fn unique_path(dir: &Path, prefix: &str, stamp: &DateTime<Utc>, suffix: &str) -> PathBuf {
    let base = format!("{}_{}", prefix, stamp.timestamp());
    let mut path = dir.join(format!("{}{}", base, suffix));
    let mut n = 1;
    while path.exists() {
        path = dir.join(format!("{}_{}{}", base, n, suffix));
        n += 1;
    }
    path
}

/// Pretty-printed JSON, one file per run.
pub struct JsonResultWriter {
    output_dir: PathBuf,
    file_prefix: String,
}

impl JsonResultWriter {
    /// Writer into `output_dir`, naming files `<file_prefix>_<unix-seconds>.json`.
    pub fn new(output_dir: impl Into<PathBuf>, file_prefix: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            file_prefix: file_prefix.into(),
        }
    }

    /// Read back a result file.
    pub async fn load(path: impl AsRef<Path>) -> ScanResult<RunResult> {
        let text = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl ResultWriter for JsonResultWriter {
    async fn write(&self, result: &RunResult) -> ScanResult<PathBuf> {
        tokio::fs::create_dir_all(&self.output_dir).await?;
        let path = unique_path(&self.output_dir, &self.file_prefix, &result.finished_at, ".json");
        let json = serde_json::to_string_pretty(result)?;
        tokio::fs::write(&path, json).await?;
        tracing::info!(path = %path.display(), records = result.record_count(), "results saved");
        Ok(path)
    }
}

/// One row per (record, device): position, phase and the channel mean.
#[cfg(feature = "storage_csv")]
pub struct CsvSummaryWriter {
    output_dir: PathBuf,
    file_prefix: String,
}

#[cfg(feature = "storage_csv")]
impl CsvSummaryWriter {
    /// Writer into `output_dir`, naming files `<file_prefix>_<unix-seconds>.csv`.
    pub fn new(output_dir: impl Into<PathBuf>, file_prefix: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            file_prefix: file_prefix.into(),
        }
    }

    fn render(result: &RunResult) -> Result<Vec<u8>, csv::Error> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(["grid_index", "phase", "x", "y", "z", "device", "samples", "mean"])?;
        for phase in &result.phases {
            for record in &phase.records {
                for (device, samples) in &record.samples {
                    let mean = if samples.is_empty() {
                        String::new()
                    } else {
                        (samples.iter().sum::<f64>() / samples.len() as f64).to_string()
                    };
                    writer.write_record([
                        record.grid_index.to_string(),
                        phase.label.clone(),
                        record.position.x.to_string(),
                        record.position.y.to_string(),
                        record.position.z.to_string(),
                        device.clone(),
                        samples.len().to_string(),
                        mean,
                    ])?;
                }
            }
        }
        writer
            .into_inner()
            .map_err(|e| csv::Error::from(std::io::Error::other(e.to_string())))
    }
}

#[cfg(feature = "storage_csv")]
#[async_trait]
impl ResultWriter for CsvSummaryWriter {
    async fn write(&self, result: &RunResult) -> ScanResult<PathBuf> {
        tokio::fs::create_dir_all(&self.output_dir).await?;
        let bytes = Self::render(result).map_err(|e| std::io::Error::other(e.to_string()))?;
        let path = unique_path(
            &self.output_dir,
            &self.file_prefix,
            &result.finished_at,
            "_summary.csv",
        );
        tokio::fs::write(&path, bytes).await?;
        tracing::info!(path = %path.display(), "summary saved");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::record::SampleBuffer;
    use tempfile::TempDir;

    fn sample_result() -> RunResult {
        let now = Utc::now();
        let record = MeasurementRecord::new(
            1,
            "measurement",
            PositionVector::default(),
            vec![SampleBuffer {
                device: "PhotodiodeT".into(),
                channel: 0,
                samples: vec![0.5, 1.5],
            }],
        );
        RunResult {
            run_id: "test-run".into(),
            started_at: now,
            finished_at: now,
            position_map: vec![PositionVector::default()],
            phases: vec![PhaseResult {
                label: "measurement".into(),
                armed: vec![],
                read: vec!["PhotodiodeT".into()],
                with_spectrum: false,
                acquisition: AcquisitionParams::default(),
                records: vec![record],
            }],
            parameters: RunParameters::new(&AcquisitionParams::default(), None),
            ai_devices: vec![],
        }
    }

    #[tokio::test]
    async fn test_json_writer_names_and_reloads() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("results");
        let writer = JsonResultWriter::new(&out, "Scimitar");
        let result = sample_result();

        let first = writer.write(&result).await.unwrap();
        let name = first.file_name().unwrap().to_string_lossy().to_string();
        assert_eq!(name, format!("Scimitar_{}.json", result.finished_at.timestamp()));

        let second = writer.write(&result).await.unwrap();
        assert_ne!(first, second);

        let loaded = JsonResultWriter::load(&first).await.unwrap();
        assert_eq!(loaded, result);
    }

    #[cfg(feature = "storage_csv")]
    #[tokio::test]
    async fn test_csv_summary_has_row_per_channel() {
        let dir = TempDir::new().unwrap();
        let writer = CsvSummaryWriter::new(dir.path(), "Scimitar");
        let path = writer.write(&sample_result()).await.unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], "1,measurement,0,0,0,PhotodiodeT,2,1");
    }
}
