//! Measurement records and result storage.
pub mod record;
pub mod storage;

pub use record::{MeasurementRecord, SampleBuffer, Spectrum};
pub use storage::{JsonResultWriter, PhaseResult, ResultWriter, RunParameters, RunResult};

#[cfg(feature = "storage_csv")]
pub use storage::CsvSummaryWriter;
