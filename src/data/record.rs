//! Measurement data produced by a sweep.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::control::position::PositionVector;

/// Samples from one analog-input channel, in acquisition order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleBuffer {
    /// Device name from the registry
    pub device: String,
    /// Analog input channel
    pub channel: u32,
    /// Raw voltages
    pub samples: Vec<f64>,
}

impl SampleBuffer {
    /// Mean of the samples, or `None` when empty.
    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            None
        } else {
            Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
        }
    }
}

/// Spectra taken during one exposure window, sharing a wavelength axis.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Spectrum {
    /// Wavelength of each pixel in nm
    pub wavelengths: Vec<f64>,
    /// One row per spectrum, one column per pixel
    pub spectra: Vec<Vec<f64>>,
}

/// One grid point acquired in one phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    /// 1-based visit index within the grid
    pub grid_index: usize,
    /// Label of the phase that produced the record
    pub phase: String,
    /// Commanded position
    pub position: PositionVector,
    /// Raw samples keyed by device name
    pub samples: BTreeMap<String, Vec<f64>>,
    /// Spectrum taken in the same window, for spectrum phases
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spectrum: Option<Spectrum>,
}

impl MeasurementRecord {
    /// Record from the per-channel buffers of one read.
    pub fn new(
        grid_index: usize,
        phase: impl Into<String>,
        position: PositionVector,
        buffers: Vec<SampleBuffer>,
    ) -> Self {
        Self {
            grid_index,
            phase: phase.into(),
            position,
            samples: buffers.into_iter().map(|b| (b.device, b.samples)).collect(),
            spectrum: None,
        }
    }

    /// Attach the spectrum taken alongside the analog read.
    pub fn with_spectrum(mut self, spectrum: Spectrum) -> Self {
        self.spectrum = Some(spectrum);
        self
    }
}
