//! Trigger line controller.
//!
//! Turns an [`ActiveSet`] of digital-output devices into the full vector of
//! line levels and commits it to the DAQ port in one write. Lines are physical
//! levels: a device line is high while the device is armed, except the lamp
//! shutter line, which is wired inverted (high = shutter closed = dark).
//!
//! The safe state is therefore "nothing armed": every source line low and the
//! shutter line high.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::error::{ScanError, ScanResult};
use crate::hardware::capabilities::DigitalOutputPort;
use crate::hardware::registry::{ActiveSet, DeviceFamily};

/// Level of every digital-output line, indexed by channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggerVector(Vec<bool>);

impl TriggerVector {
    /// Line levels, indexed by channel.
    pub fn lines(&self) -> &[bool] {
        &self.0
    }

    /// Number of lines.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for a port with no lines.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Level of `channel`, if it exists.
    pub fn line(&self, channel: usize) -> Option<bool> {
        self.0.get(channel).copied()
    }
}

impl fmt::Display for TriggerVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &level in &self.0 {
            f.write_str(if level { "1" } else { "0" })?;
        }
        Ok(())
    }
}

/// Computes and commits trigger vectors for a digital output port.
///
/// Armed lines are driven active; the shutter line is inverted, so it is
/// high while not armed.
pub struct TriggerLineController {
    port: Arc<dyn DigitalOutputPort>,
    line_count: usize,
    shutter: Option<usize>,
    settle: Duration,
    last: RwLock<Option<TriggerVector>>,
}

impl TriggerLineController {
    /// # Errors
    /// `Configuration` if `line_count` does not match the port or the shutter
    /// channel is outside the port.
    pub fn new(
        port: Arc<dyn DigitalOutputPort>,
        line_count: usize,
        shutter: Option<u32>,
    ) -> ScanResult<Self> {
        if line_count == 0 || line_count != port.line_count() {
            return Err(ScanError::configuration(format!(
                "Trigger vector length {} does not match the {}-line port",
                line_count,
                port.line_count()
            )));
        }
        let shutter = shutter.map(|ch| ch as usize);
        if let Some(ch) = shutter {
            if ch >= line_count {
                return Err(ScanError::configuration(format!(
                    "Shutter line {} is outside the {}-line port",
                    ch, line_count
                )));
            }
        }
        Ok(Self {
            port,
            line_count,
            shutter,
            settle: Duration::ZERO,
            last: RwLock::new(None),
        })
    }

    /// Pause after each committed vector so triggered devices can respond
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Number of lines on the port.
    pub fn line_count(&self) -> usize {
        self.line_count
    }

    /// Channel of the inverted shutter line, if any.
    pub fn shutter_line(&self) -> Option<usize> {
        self.shutter
    }

    fn levels(&self, armed: impl Fn(usize) -> bool) -> TriggerVector {
        TriggerVector(
            (0..self.line_count)
                .map(|line| armed(line) != (Some(line) == self.shutter))
                .collect(),
        )
    }

    /// The vector committed when nothing is armed.
    pub fn safe_vector(&self) -> TriggerVector {
        self.levels(|_| false)
    }

    /// Compute the vector for `active` without touching hardware.
    pub fn vector_for(&self, active: &ActiveSet<'_>) -> ScanResult<TriggerVector> {
        for device in active.iter() {
            if device.family != DeviceFamily::DigitalOutput {
                return Err(ScanError::configuration(format!(
                    "{} is not a digital-output device",
                    device
                )));
            }
            if device.channel as usize >= self.line_count {
                return Err(ScanError::configuration(format!(
                    "{} is outside the {}-line port",
                    device, self.line_count
                )));
            }
        }
        Ok(self.levels(|line| active.contains_channel(DeviceFamily::DigitalOutput, line as u32)))
    }

    async fn commit(&self, vector: TriggerVector) -> ScanResult<TriggerVector> {
        match self.port.write_lines(vector.lines()).await {
            Ok(()) => {
                *self.last.write().await = Some(vector.clone());
                if !self.settle.is_zero() {
                    tokio::time::sleep(self.settle).await;
                }
                Ok(vector)
            }
            Err(e) => {
                // The port may have latched part of the write.
                *self.last.write().await = None;
                Err(e)
            }
        }
    }

    /// Arm exactly the devices in `active`, in a single write.
    pub async fn arm(&self, active: &ActiveSet<'_>) -> ScanResult<TriggerVector> {
        let vector = self.vector_for(active)?;
        tracing::debug!(armed = ?active.names(), lines = %vector, "arming triggers");
        self.commit(vector).await
    }

    /// Commit the safe vector. Idempotent.
    pub async fn reset_to_safe(&self) -> ScanResult<()> {
        let vector = self.commit(self.safe_vector()).await?;
        tracing::info!(lines = %vector, "Triggers reset");
        Ok(())
    }

    /// Last vector known to be latched, `None` before the first write or
    /// after a failed one.
    pub async fn last_committed(&self) -> Option<TriggerVector> {
        self.last.read().await.clone()
    }

    /// True when the last committed vector is the safe one.
    pub async fn is_safe(&self) -> bool {
        self.last_committed().await.as_ref() == Some(&self.safe_vector())
    }
}
