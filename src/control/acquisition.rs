//! Acquisition controller.
//!
//! Runs finite, hardware-timed analog captures on a chosen subset of input
//! channels and, when asked, an overlapping spectrometer exposure.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::data::{SampleBuffer, Spectrum};
use crate::error::{ScanError, ScanResult};
use crate::hardware::capabilities::{AnalogInput, Spectrometer};
use crate::hardware::registry::{ActiveSet, DeviceFamily};

/// Timing of one analog acquisition window.
///
/// The window lasts `integration_time_s * repeats` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionParams {
    /// Analog sample rate per channel
    pub sample_rate_hz: f64,
    /// Length of one integration, in seconds
    pub integration_time_s: f64,
    /// Integrations back to back in one window
    #[serde(default = "default_repeats")]
    pub repeats: u32,
}

fn default_repeats() -> u32 {
    1
}

impl Default for AcquisitionParams {
    fn default() -> Self {
        Self {
            sample_rate_hz: 100_000.0,
            integration_time_s: 0.1,
            repeats: 1,
        }
    }
}

impl AcquisitionParams {
    /// Total window length in seconds.
    pub fn duration_s(&self) -> f64 {
        self.integration_time_s * f64::from(self.repeats)
    }
}

/// Spectrometer settings for a synchronized read.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpectrumParams {
    /// Exposure time, in seconds
    pub integration_time_s: f64,
    /// Spectra averaged per read
    #[serde(default = "default_spectra_count")]
    pub spectra_count: usize,
}

fn default_spectra_count() -> usize {
    1
}

impl Default for SpectrumParams {
    fn default() -> Self {
        Self {
            integration_time_s: 0.1,
            spectra_count: 1,
        }
    }
}

/// A configured analog task, ready to be read.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionHandle {
    channels: Vec<(String, u32)>,
    sample_rate_hz: f64,
    duration_s: f64,
    samples_per_channel: usize,
}

impl AcquisitionHandle {
    /// Samples captured per channel.
    pub fn samples_per_channel(&self) -> usize {
        self.samples_per_channel
    }

    /// Configured sample rate in Hz.
    pub fn sample_rate_hz(&self) -> f64 {
        self.sample_rate_hz
    }

    /// Configured window length in seconds.
    pub fn duration_s(&self) -> f64 {
        self.duration_s
    }

    /// Device names, in channel order.
    pub fn devices(&self) -> Vec<&str> {
        self.channels.iter().map(|(name, _)| name.as_str()).collect()
    }
}

/// Largest finite capture a single analog task may request, per channel.
pub const MAX_SAMPLES_PER_CHANNEL: usize = 16_000_000;

/// Reject a rate or duration before any hardware command is issued.
pub fn samples_per_channel(sample_rate_hz: f64, duration_s: f64) -> ScanResult<usize> {
    if !(sample_rate_hz.is_finite() && sample_rate_hz > 0.0) {
        return Err(ScanError::configuration(format!(
            "Sample rate must be positive, got {}",
            sample_rate_hz
        )));
    }
    if !(duration_s.is_finite() && duration_s > 0.0) {
        return Err(ScanError::configuration(format!(
            "Acquisition duration must be positive, got {}",
            duration_s
        )));
    }
    let samples = (sample_rate_hz * duration_s).round();
    if samples < 1.0 {
        return Err(ScanError::configuration(format!(
            "{} Hz for {} s yields no samples",
            sample_rate_hz, duration_s
        )));
    }
    if samples > MAX_SAMPLES_PER_CHANNEL as f64 {
        return Err(ScanError::configuration(format!(
            "{} Hz for {} s needs {} samples per channel, above the limit of {}",
            sample_rate_hz, duration_s, samples, MAX_SAMPLES_PER_CHANNEL
        )));
    }
    Ok(samples as usize)
}

/// Timed analog capture with an optional synchronized spectrometer exposure.
pub struct AcquisitionController {
    daq: Arc<dyn AnalogInput>,
    spectrometer: Option<Arc<dyn Spectrometer>>,
}

impl AcquisitionController {
    /// Controller over `daq` with no spectrometer.
    pub fn new(daq: Arc<dyn AnalogInput>) -> Self {
        Self {
            daq,
            spectrometer: None,
        }
    }

    /// Attach a spectrometer for [`AcquisitionController::read_with_spectrum`].
    pub fn with_spectrometer(mut self, spectrometer: Arc<dyn Spectrometer>) -> Self {
        self.spectrometer = Some(spectrometer);
        self
    }

    /// Whether a spectrometer is attached.
    pub fn has_spectrometer(&self) -> bool {
        self.spectrometer.is_some()
    }

    /// Set up a capture of `devices` at `sample_rate_hz` for `duration_s`.
    pub async fn configure(
        &self,
        devices: &ActiveSet<'_>,
        sample_rate_hz: f64,
        duration_s: f64,
    ) -> ScanResult<AcquisitionHandle> {
        let samples = samples_per_channel(sample_rate_hz, duration_s)?;
        if devices.is_empty() {
            return Err(ScanError::configuration("No analog-input devices selected"));
        }
        let mut channels = Vec::with_capacity(devices.len());
        for device in devices.iter() {
            if device.family != DeviceFamily::AnalogInput {
                return Err(ScanError::configuration(format!(
                    "{} is not an analog-input device",
                    device
                )));
            }
            channels.push((device.name.clone(), device.channel));
        }

        let ids: Vec<u32> = channels.iter().map(|(_, ch)| *ch).collect();
        self.daq.configure(&ids, sample_rate_hz, samples).await?;
        Ok(AcquisitionHandle {
            channels,
            sample_rate_hz,
            duration_s,
            samples_per_channel: samples,
        })
    }

    fn label(&self, handle: &AcquisitionHandle, rows: Vec<Vec<f64>>) -> ScanResult<Vec<SampleBuffer>> {
        if rows.len() != handle.channels.len() {
            return Err(ScanError::hardware_io(
                "analog input",
                format!(
                    "expected {} channels, device returned {}",
                    handle.channels.len(),
                    rows.len()
                ),
            ));
        }
        Ok(handle
            .channels
            .iter()
            .zip(rows)
            .map(|((device, channel), samples)| SampleBuffer {
                device: device.clone(),
                channel: *channel,
                samples,
            })
            .collect())
    }

    /// Run the configured task to completion.
    pub async fn read(&self, handle: &AcquisitionHandle) -> ScanResult<Vec<SampleBuffer>> {
        let rows = self.daq.read().await?;
        self.label(handle, rows)
    }

    /// Run the analog task and a spectrometer exposure side by side.
    ///
    /// Both start in the same poll and the call returns once both have
    /// finished; the first error wins.
    pub async fn read_with_spectrum(
        &self,
        handle: &AcquisitionHandle,
        params: &SpectrumParams,
    ) -> ScanResult<(Vec<SampleBuffer>, Spectrum)> {
        let spectrometer = self
            .spectrometer
            .as_ref()
            .ok_or_else(|| ScanError::configuration("No spectrometer configured"))?;
        if params.spectra_count == 0 {
            return Err(ScanError::configuration("Spectra count must be at least 1"));
        }
        spectrometer
            .set_integration_time(params.integration_time_s)
            .await?;

        let (rows, spectrum) =
            tokio::try_join!(self.daq.read(), spectrometer.acquire(params.spectra_count))?;
        Ok((self.label(handle, rows)?, spectrum))
    }
}
