//! Scoped hardware session.
//!
//! Adapters are connected in declaration order when the session opens and
//! disconnected in reverse order when it closes. A connect failure releases
//! whatever was already acquired before the error is returned. Closing always
//! attempts every adapter; failures are collected, not short-circuited.

use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{ScanError, ScanResult};
use crate::hardware::capabilities::Connectable;

/// Devices connected for one run, released in reverse order by `close`.
pub struct HardwareSession {
    acquired: Vec<Arc<dyn Connectable>>,
}

impl HardwareSession {
    /// Connect `devices` in order.
    pub async fn open(devices: &[Arc<dyn Connectable>]) -> ScanResult<Self> {
        let mut session = Self {
            acquired: Vec::with_capacity(devices.len()),
        };
        for device in devices {
            if let Err(e) = device.connect().await {
                warn!(device = device.name(), error = %e, "connect failed, releasing session");
                if let Err(teardown) = session.release().await {
                    warn!(error = %teardown, "release after failed connect was incomplete");
                }
                return Err(e);
            }
            info!(device = device.name(), "connected");
            session.acquired.push(device.clone());
        }
        Ok(session)
    }

    /// Names of the connected devices, in connection order.
    pub fn devices(&self) -> Vec<&str> {
        self.acquired.iter().map(|d| d.name()).collect()
    }

    async fn release(&mut self) -> ScanResult<()> {
        let mut errors = Vec::new();
        while let Some(device) = self.acquired.pop() {
            match device.disconnect().await {
                Ok(()) => info!(device = device.name(), "disconnected"),
                Err(e) => {
                    warn!(device = device.name(), error = %e, "disconnect failed");
                    errors.push(e);
                }
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ScanError::TeardownFailed(errors))
        }
    }

    /// Disconnect every device in reverse order of connection.
    pub async fn close(mut self) -> ScanResult<()> {
        self.release().await
    }
}

impl Drop for HardwareSession {
    fn drop(&mut self) {
        if !self.acquired.is_empty() {
            warn!(
                devices = ?self.devices(),
                "hardware session dropped without close; devices left connected"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::{CallLog, MockDigitalOutput, SimulatedStage};
    use crate::hardware::units::LengthUnit;
    use crate::hardware::TravelLimits;

    #[tokio::test]
    async fn test_reverse_disconnect_order() {
        let log = CallLog::new();
        let a: Arc<dyn Connectable> =
            Arc::new(MockDigitalOutput::new("a", 8).with_call_log(log.clone()));
        let b: Arc<dyn Connectable> =
            Arc::new(SimulatedStage::new("b", LengthUnit::Millimetres).with_call_log(log.clone()));
        let session = HardwareSession::open(&[a, b]).await.unwrap();
        assert_eq!(session.devices(), vec!["a", "b"]);
        session.close().await.unwrap();
        assert_eq!(
            log.entries(),
            vec!["a.connect", "b.connect", "b.disconnect", "a.disconnect"]
        );
    }

    #[tokio::test]
    async fn test_failed_connect_releases_acquired() {
        let log = CallLog::new();
        let a = Arc::new(MockDigitalOutput::new("a", 8).with_call_log(log.clone()));
        let b = Arc::new(SimulatedStage::new("b", LengthUnit::Millimetres).with_call_log(log.clone()));
        b.faults().trigger_failure();
        let devices: Vec<Arc<dyn Connectable>> = vec![a.clone() as Arc<dyn Connectable>, b];
        let err = HardwareSession::open(&devices).await.err().unwrap();
        assert!(matches!(err, ScanError::Connection { .. }));
        assert!(!a.is_connected());
        assert_eq!(log.entries(), vec!["a.connect", "b.connect", "a.disconnect"]);
    }

    #[tokio::test]
    async fn test_close_collects_every_failure() {
        // Parking outside the travel range makes disconnect fail.
        let z = Arc::new(
            SimulatedStage::new("z", LengthUnit::Millimetres)
                .with_limits(TravelLimits::new(1.0, 2.0))
                .with_position(1.5)
                .with_park_position(0.0),
        );
        let port = Arc::new(MockDigitalOutput::new("do", 8));
        let devices: Vec<Arc<dyn Connectable>> =
            vec![port.clone() as Arc<dyn Connectable>, z.clone()];
        let session = HardwareSession::open(&devices).await.unwrap();
        let err = session.close().await.unwrap_err();
        assert!(matches!(&err, ScanError::TeardownFailed(errors) if errors.len() == 1));
        assert!(!port.is_connected());
        assert!(!z.is_connected());
    }
}
