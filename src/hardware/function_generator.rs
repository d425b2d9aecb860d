//! Agilent 33220A function generator (SCPI subset).
//!
//! The generator is configured once before a sweep: waveform, then gated burst
//! on the external trigger input, so its output follows the DAQ trigger line
//! it is wired to.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{ScanError, ScanResult};
use crate::hardware::capabilities::Connectable;
use crate::hardware::transport::LineTransport;

/// Output function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaveShape {
    /// `SIN`
    Sine,
    /// `SQU`
    Square,
    /// `RAMP`
    Ramp,
    /// `PULSE`
    Pulse,
    /// `NOIS`
    Noise,
    /// `DC`
    Dc,
}

impl WaveShape {
    fn scpi(self) -> &'static str {
        match self {
            WaveShape::Sine => "SIN",
            WaveShape::Square => "SQU",
            WaveShape::Ramp => "RAMP",
            WaveShape::Pulse => "PULSE",
            WaveShape::Noise => "NOIS",
            WaveShape::Dc => "DC",
        }
    }
}

/// Unit the amplitude is expressed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AmplitudeUnit {
    /// Peak to peak
    Vpp,
    /// Root mean square
    Vrms,
}

impl AmplitudeUnit {
    fn scpi(self) -> &'static str {
        match self {
            AmplitudeUnit::Vpp => "VPP",
            AmplitudeUnit::Vrms => "VRMS",
        }
    }
}

/// Output waveform settings. Amplitude and offset are in millivolts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waveform {
    /// Output function
    pub shape: WaveShape,
    /// Frequency in Hz; ignored for DC
    pub frequency_hz: f64,
    /// Amplitude in millivolts
    pub amplitude_mv: f64,
    /// Amplitude unit
    #[serde(default = "default_amplitude_unit")]
    pub unit: AmplitudeUnit,
    /// DC offset in millivolts
    #[serde(default)]
    pub offset_mv: f64,
}

fn default_amplitude_unit() -> AmplitudeUnit {
    AmplitudeUnit::Vpp
}

impl Default for Waveform {
    fn default() -> Self {
        Self {
            shape: WaveShape::Square,
            frequency_hz: 17.17,
            amplitude_mv: 100.0,
            unit: AmplitudeUnit::Vpp,
            offset_mv: 0.0,
        }
    }
}

impl Waveform {
    /// Reject a non-positive frequency or a negative amplitude.
    pub fn validate(&self) -> ScanResult<()> {
        if !(self.frequency_hz > 0.0) && self.shape != WaveShape::Dc {
            return Err(ScanError::configuration(format!(
                "Waveform frequency must be positive, got {}",
                self.frequency_hz
            )));
        }
        if self.amplitude_mv < 0.0 {
            return Err(ScanError::configuration(format!(
                "Waveform amplitude must not be negative, got {} mV",
                self.amplitude_mv
            )));
        }
        Ok(())
    }

    /// SCPI commands that program this waveform, in order
    pub fn commands(&self) -> Vec<String> {
        vec![
            format!("FUNC {}", self.shape.scpi()),
            format!("FREQ {}", self.frequency_hz),
            format!("VOLT:UNIT {}", self.unit.scpi()),
            format!("VOLT:OFFS {}", self.offset_mv / 1000.0),
            format!("VOLT {}", self.amplitude_mv / 1000.0),
        ]
    }
}

/// Gated burst on the external trigger: output runs while the line is high.
pub const GATED_BURST: [&str; 4] = [
    "BURST:STAT ON",
    "BURST:MODE GAT",
    "BURST:NCYC INF",
    "TRIG:SOUR EXT",
];

/// Agilent 33220A over a line transport, driven with SCPI.
pub struct FunctionGenerator {
    name: String,
    transport: Arc<dyn LineTransport>,
}

impl FunctionGenerator {
    /// Generator `name` talking over `transport`.
    pub fn new(name: impl Into<String>, transport: Arc<dyn LineTransport>) -> Self {
        Self {
            name: name.into(),
            transport,
        }
    }

    async fn send_all<S: AsRef<str>>(&self, commands: &[S]) -> ScanResult<()> {
        for command in commands {
            self.transport.send(command.as_ref()).await?;
        }
        Ok(())
    }

    /// Validate and program `waveform`.
    pub async fn apply_waveform(&self, waveform: &Waveform) -> ScanResult<()> {
        waveform.validate()?;
        self.send_all(&waveform.commands()).await?;
        tracing::info!(generator = %self.name, ?waveform, "waveform applied");
        Ok(())
    }

    /// Gate the output on the external trigger line.
    pub async fn arm_gated_burst(&self) -> ScanResult<()> {
        self.send_all(&GATED_BURST).await
    }

    /// Switch the output on or off.
    pub async fn output(&self, on: bool) -> ScanResult<()> {
        self.transport
            .send(if on { "OUTPUT ON" } else { "OUTPUT OFF" })
            .await
    }

    /// Restore factory defaults (`*RST`)
    pub async fn reset(&self) -> ScanResult<()> {
        self.transport.send("*RST").await
    }

    /// Identification string (`*IDN?`).
    pub async fn identify(&self) -> ScanResult<String> {
        self.transport.query("*IDN?").await
    }
}

#[async_trait]
impl Connectable for FunctionGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> ScanResult<()> {
        self.transport.open().await
    }

    async fn disconnect(&self) -> ScanResult<()> {
        if !self.transport.is_open() {
            return Ok(());
        }
        let off = self.output(false).await;
        let closed = self.transport.close().await;
        off.and(closed)
    }

    fn is_connected(&self) -> bool {
        self.transport.is_open()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::transport::MockTransport;

    #[test]
    fn waveform_commands_scale_millivolts() {
        let waveform = Waveform {
            shape: WaveShape::Square,
            frequency_hz: 17.17,
            amplitude_mv: 100.0,
            unit: AmplitudeUnit::Vpp,
            offset_mv: 50.0,
        };
        assert_eq!(
            waveform.commands(),
            vec![
                "FUNC SQU",
                "FREQ 17.17",
                "VOLT:UNIT VPP",
                "VOLT:OFFS 0.05",
                "VOLT 0.1"
            ]
        );
    }

    #[test]
    fn rejects_zero_frequency() {
        let waveform = Waveform {
            frequency_hz: 0.0,
            ..Waveform::default()
        };
        assert!(waveform.validate().is_err());
    }

    #[tokio::test]
    async fn test_identify_and_reset() {
        let transport = Arc::new(
            MockTransport::new("agilent").with_reply("*IDN?", "Agilent Technologies,33220A,0,2.02"),
        );
        let generator = FunctionGenerator::new("agilent", transport.clone());
        generator.connect().await.unwrap();
        assert!(generator.identify().await.unwrap().contains("33220A"));
        generator.reset().await.unwrap();
        assert_eq!(transport.sent(), vec!["*IDN?", "*RST"]);
    }

    #[tokio::test]
    async fn test_configure_for_gated_burst() {
        let transport = Arc::new(MockTransport::new("agilent"));
        let generator = FunctionGenerator::new("agilent", transport.clone());
        generator.connect().await.unwrap();
        generator.apply_waveform(&Waveform::default()).await.unwrap();
        generator.arm_gated_burst().await.unwrap();
        generator.output(true).await.unwrap();

        let sent = transport.sent();
        assert_eq!(sent.len(), 10);
        assert_eq!(&sent[5..9], &GATED_BURST);
        assert_eq!(sent[9], "OUTPUT ON");

        generator.disconnect().await.unwrap();
        assert_eq!(transport.sent().last().map(String::as_str), Some("OUTPUT OFF"));
    }
}
