//! Vortran Stradus diode laser driver
//!
//! Protocol Overview:
//! - Format: ASCII command/response, CR-terminated
//! - Baud: 115200, 8N1
//! - Set commands: `KEY=value` (LE, LP, EPC, PUL)
//! - Queries: `?KEY`
//!
//! Output mode is a combination of two flags: `EPC` (external power control)
//! selects analog modulation, otherwise `PUL` selects digital modulation or CW.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{ScanError, ScanResult};
use crate::hardware::capabilities::Connectable;
use crate::hardware::transport::LineTransport;

/// Emission mode of the laser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaserMode {
    /// Continuous wave
    Cw,
    /// On/off following the digital trigger line
    Digital,
    /// Power following the analog modulation input
    Analog,
}

/// Status table returned by [`VortranLaser::conditions`], in query order.
pub const CONDITION_QUERIES: [(&str, &str); 7] = [
    ("Device ID", "?LI"),
    ("Firmware version", "?FV"),
    ("Operating hours", "?LH"),
    ("Settings", "?LS"),
    ("Measured power", "?LP"),
    ("Set power", "?LPS"),
    ("Measured wavelength", "?LW"),
];

/// Driver for the Vortran Stradus laser over a [`LineTransport`].
pub struct VortranLaser {
    name: String,
    transport: Arc<dyn LineTransport>,
}

impl VortranLaser {
    /// Upper bound of [`VortranLaser::set_power`]
    pub const MAX_POWER_PERCENT: f64 = 100.0;

    /// Laser `name` talking over `transport`.
    pub fn new(name: impl Into<String>, transport: Arc<dyn LineTransport>) -> Self {
        Self {
            name: name.into(),
            transport,
        }
    }

    fn unexpected(&self, query: &str, reply: &str) -> ScanError {
        ScanError::hardware_io(
            &self.name,
            format!("unrecognised reply '{}' to {}", reply, query),
        )
    }

    async fn query_flag(&self, query: &str) -> ScanResult<bool> {
        let reply = self.transport.query(query).await?;
        match reply.as_str() {
            "1" => Ok(true),
            "0" => Ok(false),
            other => Err(self.unexpected(query, other)),
        }
    }

    /// Turn emission on and confirm with `?LE`
    pub async fn activate(&self) -> ScanResult<()> {
        self.transport.send("LE=1").await?;
        if !self.query_flag("?LE").await? {
            return Err(ScanError::hardware_io(&self.name, "emission did not turn on"));
        }
        tracing::info!(laser = %self.name, "emission on");
        Ok(())
    }

    /// Turn emission off (`LE=0`).
    pub async fn deactivate(&self) -> ScanResult<()> {
        self.transport.send("LE=0").await?;
        tracing::info!(laser = %self.name, "emission off");
        Ok(())
    }

    /// Emission state from `?LE`.
    pub async fn is_emitting(&self) -> ScanResult<bool> {
        self.query_flag("?LE").await
    }

    /// Set output power as a percentage of full scale
    ///
    /// # Errors
    /// `OutOfRange` if `percent` is outside 0..=100; nothing is sent.
    pub async fn set_power(&self, percent: f64) -> ScanResult<()> {
        if !(0.0..=Self::MAX_POWER_PERCENT).contains(&percent) {
            return Err(ScanError::out_of_range(
                format!("{} power (%)", self.name),
                percent,
                0.0,
                Self::MAX_POWER_PERCENT,
            ));
        }
        self.transport.send(&format!("LP={}", percent)).await
    }

    /// Power measured by the light loop
    pub async fn power(&self) -> ScanResult<f64> {
        let reply = self.transport.query("?LP").await?;
        reply
            .parse::<f64>()
            .map_err(|_| self.unexpected("?LP", &reply))
    }

    /// Select the emission mode
    ///
    /// Sends `EPC=0` before the mode command.
    pub async fn set_mode(&self, mode: LaserMode) -> ScanResult<()> {
        self.transport.send("EPC=0").await?;
        let command = match mode {
            LaserMode::Cw => "PUL=0",
            LaserMode::Digital => "PUL=1",
            LaserMode::Analog => "EPC=1",
        };
        self.transport.send(command).await?;
        tracing::debug!(laser = %self.name, ?mode, "mode set");
        Ok(())
    }

    /// Mode decoded from `?EPC` then `?PUL`.
    pub async fn mode(&self) -> ScanResult<LaserMode> {
        if self.query_flag("?EPC").await? {
            return Ok(LaserMode::Analog);
        }
        if self.query_flag("?PUL").await? {
            Ok(LaserMode::Digital)
        } else {
            Ok(LaserMode::Cw)
        }
    }

    /// Query the operating-condition table
    pub async fn conditions(&self) -> ScanResult<Vec<(String, String)>> {
        let mut table = Vec::with_capacity(CONDITION_QUERIES.len());
        for (label, query) in CONDITION_QUERIES {
            let reply = self.transport.query(query).await?;
            table.push((label.to_string(), reply));
        }
        Ok(table)
    }
}

#[async_trait]
impl Connectable for VortranLaser {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> ScanResult<()> {
        self.transport.open().await
    }

    /// Emission is switched off before the port is released.
    async fn disconnect(&self) -> ScanResult<()> {
        if !self.transport.is_open() {
            return Ok(());
        }
        let off = self.deactivate().await;
        let closed = self.transport.close().await;
        off.and(closed)
    }

    fn is_connected(&self) -> bool {
        self.transport.is_open()
    }
}
