//! Line-oriented command transports.
//!
//! The laser and the function generator both speak an ASCII protocol: one
//! command per line, terminated by CR, optionally answered by one line. The
//! drivers in [`vortran`](super::vortran) and
//! [`function_generator`](super::function_generator) only see this trait, so
//! the same driver code runs against a serial port or a scripted mock.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::error::{ScanError, ScanResult};
use crate::hardware::mock::FaultInjector;

/// Capability: line-based command channel
#[async_trait]
pub trait LineTransport: Send + Sync {
    /// Name of the peer device, used in error messages
    fn peer(&self) -> &str;

    /// Open the link
    async fn open(&self) -> ScanResult<()>;

    /// Close the link
    async fn close(&self) -> ScanResult<()>;

    /// True while the link is open
    fn is_open(&self) -> bool;

    /// Write one command line without waiting for a reply
    async fn send(&self, command: &str) -> ScanResult<()>;

    /// Write one command line and return the trimmed reply line
    async fn query(&self, command: &str) -> ScanResult<String>;
}

// =============================================================================
// MockTransport
// =============================================================================

/// Scripted transport for driver tests.
///
/// Queries are answered from a command → reply table; a `send` whose command
/// has the form `KEY=value` also updates the reply for `?KEY`, so simple
/// set-then-query sequences behave like the real device.
pub struct MockTransport {
    peer: String,
    open: AtomicBool,
    replies: Mutex<HashMap<String, String>>,
    sent: Mutex<Vec<String>>,
    faults: FaultInjector,
}

impl MockTransport {
    /// Closed transport to `peer` with an empty reply table.
    pub fn new(peer: impl Into<String>) -> Self {
        Self {
            peer: peer.into(),
            open: AtomicBool::new(false),
            replies: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
            faults: FaultInjector::new(),
        }
    }

    /// Answer `query` with `reply`.
    pub fn with_reply(self, query: impl Into<String>, reply: impl Into<String>) -> Self {
        self.table().insert(query.into(), reply.into());
        self
    }

    /// Failure injection for send and query.
    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.replies.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn log(&self) -> MutexGuard<'_, Vec<String>> {
        self.sent.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Every line written so far, queries included
    pub fn sent(&self) -> Vec<String> {
        self.log().clone()
    }

    fn write_line(&self, command: &str) -> ScanResult<()> {
        if !self.is_open() {
            return Err(ScanError::connection(&self.peer, "transport is not open"));
        }
        self.log().push(command.to_string());
        if self.faults.should_fail() {
            return Err(ScanError::hardware_io(&self.peer, "simulated line error"));
        }
        Ok(())
    }
}

#[async_trait]
impl LineTransport for MockTransport {
    fn peer(&self) -> &str {
        &self.peer
    }

    async fn open(&self) -> ScanResult<()> {
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> ScanResult<()> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send(&self, command: &str) -> ScanResult<()> {
        self.write_line(command)?;
        if let Some((key, value)) = command.split_once('=') {
            self.table()
                .insert(format!("?{}", key.trim()), value.trim().to_string());
        }
        Ok(())
    }

    async fn query(&self, command: &str) -> ScanResult<String> {
        self.write_line(command)?;
        self.table().get(command).cloned().ok_or_else(|| {
            ScanError::hardware_io(&self.peer, format!("no reply to '{}'", command))
        })
    }
}

// =============================================================================
// SerialTransport
// =============================================================================

#[cfg(feature = "tokio_serial")]
pub use serial::SerialTransport;

#[cfg(feature = "tokio_serial")]
mod serial {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio_serial::{SerialPortBuilderExt, SerialStream};

    /// RS-232 / USB-serial transport, CR-terminated, 8N1.
    pub struct SerialTransport {
        peer: String,
        port_path: String,
        baud_rate: u32,
        timeout: Duration,
        port: tokio::sync::Mutex<Option<BufReader<SerialStream>>>,
        open: AtomicBool,
    }

    impl SerialTransport {
        /// Transport to `peer` on `port_path`, not yet opened.
        pub fn new(peer: impl Into<String>, port_path: impl Into<String>, baud_rate: u32) -> Self {
            Self {
                peer: peer.into(),
                port_path: port_path.into(),
                baud_rate,
                timeout: Duration::from_secs(1),
                port: tokio::sync::Mutex::new(None),
                open: AtomicBool::new(false),
            }
        }

        /// Per-query reply timeout; one second by default.
        pub fn with_timeout(mut self, timeout: Duration) -> Self {
            self.timeout = timeout;
            self
        }

        fn io_error(&self, message: impl std::fmt::Display) -> ScanError {
            ScanError::hardware_io(&self.peer, message.to_string())
        }

        async fn write_line(&self, command: &str) -> ScanResult<tokio::sync::MutexGuard<'_, Option<BufReader<SerialStream>>>> {
            let mut guard = self.port.lock().await;
            let port = guard
                .as_mut()
                .ok_or_else(|| ScanError::connection(&self.peer, "serial port is not open"))?;
            port.get_mut()
                .write_all(format!("{}\r", command).as_bytes())
                .await
                .map_err(|e| self.io_error(format!("write '{}' failed: {}", command, e)))?;
            Ok(guard)
        }
    }

    #[async_trait]
    impl LineTransport for SerialTransport {
        fn peer(&self) -> &str {
            &self.peer
        }

        async fn open(&self) -> ScanResult<()> {
            let stream = tokio_serial::new(&self.port_path, self.baud_rate)
                .data_bits(tokio_serial::DataBits::Eight)
                .parity(tokio_serial::Parity::None)
                .stop_bits(tokio_serial::StopBits::One)
                .flow_control(tokio_serial::FlowControl::None)
                .open_native_async()
                .map_err(|e| {
                    ScanError::connection(&self.peer, format!("{}: {}", self.port_path, e))
                })?;
            *self.port.lock().await = Some(BufReader::new(stream));
            self.open.store(true, Ordering::SeqCst);
            tracing::info!(peer = %self.peer, port = %self.port_path, "serial port opened");
            Ok(())
        }

        async fn close(&self) -> ScanResult<()> {
            self.port.lock().await.take();
            self.open.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }

        async fn send(&self, command: &str) -> ScanResult<()> {
            self.write_line(command).await.map(drop)
        }

        async fn query(&self, command: &str) -> ScanResult<String> {
            let mut guard = self.write_line(command).await?;
            let port = guard
                .as_mut()
                .ok_or_else(|| ScanError::connection(&self.peer, "serial port is not open"))?;
            let mut response = String::new();
            tokio::time::timeout(self.timeout, port.read_line(&mut response))
                .await
                .map_err(|_| self.io_error(format!("timeout waiting for reply to '{}'", command)))?
                .map_err(|e| self.io_error(e))?;
            Ok(response.trim().to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_transport_requires_open() {
        let transport = MockTransport::new("laser");
        let err = transport.send("LE=1").await.unwrap_err();
        assert!(matches!(err, ScanError::Connection { .. }));
    }

    #[tokio::test]
    async fn test_assignment_updates_query_reply() {
        let transport = MockTransport::new("laser");
        transport.open().await.unwrap();
        transport.send("LP=42").await.unwrap();
        assert_eq!(transport.query("?LP").await.unwrap(), "42");
        assert_eq!(transport.sent(), vec!["LP=42", "?LP"]);
    }

    #[tokio::test]
    async fn test_unscripted_query_is_hardware_error() {
        let transport = MockTransport::new("fg");
        transport.open().await.unwrap();
        let err = transport.query("*IDN?").await.unwrap_err();
        assert!(err.requires_safe_reset());
    }
}
