//! # Transport Layer
//!
//! Byte-stream connection abstractions for DL/T 645 communication,
//! supporting TCP channels and RTU serial lines with a unified interface.
//!
//! ## Supported Transports
//!
//! ### TCP (`TcpConnection`)
//! - Connect with a deadline; a timed-out connect leaves the connection
//!   cleanly disconnected
//! - Single request/response exchange per call with a shared timeout
//! - Automatic reconnect on the next request after a failure
//!
//! ### RTU (`RtuConnection`)
//! - Serial port communication (RS-232, RS-485) via `tokio-serial`
//! - Configurable baud rate, data bits, stop bits, parity and flow control
//! - Defaults: 9600 8N1, no flow control
//!
//! A request is one write of the full frame followed by one read of up to
//! 1024 bytes; the returned buffer may still contain preamble noise ahead of
//! the frame. Requests are not pipelined: the `&mut self` receivers give one
//! outstanding request per connection.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};
use tracing::{debug, info, warn};

use crate::constants::{DEFAULT_BAUD_RATE, RESPONSE_BUFFER_SIZE};
use crate::error::{Dlt645Error, Dlt645Result};
use crate::transform::bytes_to_hex_string;

/// Log packet with direction and transport name.
fn log_packet(direction: &str, protocol: &str, data: &[u8]) {
    info!("[DLT645-{}] {} {}", protocol, direction, bytes_to_hex_string(data));
}

/// Transport layer abstraction for DL/T 645 communication.
///
/// One implementation per physical channel; the service engines drive the
/// same request/response contract over either.
///
/// ## Thread Safety
///
/// All implementations are `Send + Sync`; exclusive access for the duration
/// of an exchange comes from the `&mut self` receivers.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Establish the underlying channel.
    ///
    /// Subject to the configured timeout; when the deadline fires the
    /// pending attempt is cancelled and the connection stays disconnected.
    async fn connect(&mut self) -> Dlt645Result<()>;

    /// Idempotent close. Never fails; errors during shutdown are discarded.
    async fn disconnect(&mut self);

    /// Write a full request, then perform a single read of up to 1024
    /// bytes. Both halves are governed by the configured timeout. On any
    /// failure the connected flag is cleared so the next request
    /// reconnects.
    async fn send_request(&mut self, request: &[u8]) -> Dlt645Result<Vec<u8>>;

    /// Write a full request without awaiting any reply (broadcasts).
    async fn send(&mut self, request: &[u8]) -> Dlt645Result<()>;

    /// Whether the transport believes it has an active channel. Local
    /// state only; does not probe the remote end.
    fn is_connected(&self) -> bool;

    /// Replace the timeout governing subsequent operations.
    fn set_timeout(&mut self, timeout: Duration);

    /// Communication statistics gathered so far.
    fn stats(&self) -> TransportStats;
}

/// Transport layer statistics.
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    pub requests_sent: u64,
    pub responses_received: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

// ============================================================================
// Serial Configuration
// ============================================================================

/// Serial line parameters for RTU connections.
#[derive(Debug, Clone, Copy)]
pub struct SerialConfig {
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    pub parity: Parity,
    pub flow_control: FlowControl,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
            flow_control: FlowControl::None,
        }
    }
}

impl SerialConfig {
    /// Build a configuration from the numeric/textual endpoint parameters:
    /// parity `none`/`even`/`odd`, stop bits 1 or 2, data bits 5-8, flow
    /// control 0 = none, 1 = software, 2 = hardware.
    pub fn from_parts(
        baud_rate: u32,
        data_bits: u8,
        stop_bits: u8,
        parity: &str,
        flow_control: u8,
    ) -> Dlt645Result<Self> {
        let data_bits = match data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            8 => DataBits::Eight,
            other => {
                return Err(Dlt645Error::config(format!(
                    "Invalid data bits: {}",
                    other
                )))
            }
        };
        let stop_bits = match stop_bits {
            1 => StopBits::One,
            2 => StopBits::Two,
            other => {
                return Err(Dlt645Error::config(format!(
                    "Invalid stop bits: {}",
                    other
                )))
            }
        };
        let parity = match parity.to_lowercase().as_str() {
            "none" | "n" => Parity::None,
            "even" | "e" => Parity::Even,
            "odd" | "o" => Parity::Odd,
            other => {
                return Err(Dlt645Error::config(format!("Invalid parity: {}", other)))
            }
        };
        let flow_control = match flow_control {
            0 => FlowControl::None,
            1 => FlowControl::Software,
            2 => FlowControl::Hardware,
            other => {
                return Err(Dlt645Error::config(format!(
                    "Invalid flow control: {}",
                    other
                )))
            }
        };
        Ok(Self {
            baud_rate,
            data_bits,
            stop_bits,
            parity,
            flow_control,
        })
    }
}

// ============================================================================
// TCP Connection
// ============================================================================

/// DL/T 645 over a TCP channel.
pub struct TcpConnection {
    stream: Option<TcpStream>,
    address: SocketAddr,
    timeout: Duration,
    stats: TransportStats,
    /// Enable hex packet logging for debugging.
    packet_logging: bool,
}

impl TcpConnection {
    /// Create a disconnected TCP connection; [`Connection::connect`]
    /// establishes the channel.
    pub fn new(ip: &str, port: u16, timeout: Duration) -> Dlt645Result<Self> {
        let address: SocketAddr = format!("{}:{}", ip, port)
            .parse()
            .map_err(|e| Dlt645Error::config(format!("Invalid endpoint {}:{}: {}", ip, port, e)))?;
        Ok(Self {
            stream: None,
            address,
            timeout,
            stats: TransportStats::default(),
            packet_logging: false,
        })
    }

    /// Create a connection from an already-resolved socket address.
    pub fn from_addr(address: SocketAddr, timeout: Duration) -> Self {
        Self {
            stream: None,
            address,
            timeout,
            stats: TransportStats::default(),
            packet_logging: false,
        }
    }

    /// Enable or disable hex packet logging.
    pub fn set_packet_logging(&mut self, enabled: bool) {
        self.packet_logging = enabled;
    }
}

#[async_trait]
impl Connection for TcpConnection {
    async fn connect(&mut self) -> Dlt645Result<()> {
        match timeout(self.timeout, TcpStream::connect(self.address)).await {
            Ok(Ok(stream)) => {
                info!("Connected to {}", self.address);
                self.stream = Some(stream);
                Ok(())
            }
            Ok(Err(e)) => {
                self.stats.errors += 1;
                self.stream = None;
                Err(Dlt645Error::connection(format!(
                    "Failed to connect to {}: {}",
                    self.address, e
                )))
            }
            Err(_) => {
                self.stats.timeouts += 1;
                self.stream = None;
                Err(Dlt645Error::timeout(
                    "connect",
                    self.timeout.as_millis() as u64,
                ))
            }
        }
    }

    async fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
            info!("Disconnected from {}", self.address);
        }
    }

    async fn send_request(&mut self, request: &[u8]) -> Dlt645Result<Vec<u8>> {
        if self.stream.is_none() {
            return Err(Dlt645Error::connection("Not connected"));
        }

        if self.packet_logging {
            log_packet("send", "TCP", request);
        }
        self.stats.requests_sent += 1;

        let stream = self.stream.as_mut().unwrap();
        let write_result = timeout(self.timeout, stream.write_all(request)).await;
        match write_result {
            Ok(Ok(())) => {
                self.stats.bytes_sent += request.len() as u64;
            }
            Ok(Err(e)) => {
                self.stats.errors += 1;
                self.stream = None;
                return Err(Dlt645Error::io(format!("Failed to send request: {}", e)));
            }
            Err(_) => {
                self.stats.timeouts += 1;
                self.stats.errors += 1;
                self.stream = None;
                return Err(Dlt645Error::timeout(
                    "send request",
                    self.timeout.as_millis() as u64,
                ));
            }
        }

        let mut buffer = vec![0u8; RESPONSE_BUFFER_SIZE];
        let stream = self.stream.as_mut().unwrap();
        let read_result = timeout(self.timeout, stream.read(&mut buffer)).await;
        match read_result {
            Ok(Ok(0)) => {
                self.stats.errors += 1;
                self.stream = None;
                Err(Dlt645Error::connection("Connection closed by peer"))
            }
            Ok(Ok(n)) => {
                buffer.truncate(n);
                self.stats.responses_received += 1;
                self.stats.bytes_received += n as u64;
                if self.packet_logging {
                    log_packet("receive", "TCP", &buffer);
                }
                Ok(buffer)
            }
            Ok(Err(e)) => {
                self.stats.errors += 1;
                self.stream = None;
                Err(Dlt645Error::io(format!("Failed to read response: {}", e)))
            }
            Err(_) => {
                self.stats.timeouts += 1;
                self.stats.errors += 1;
                self.stream = None;
                Err(Dlt645Error::timeout(
                    "read response",
                    self.timeout.as_millis() as u64,
                ))
            }
        }
    }

    async fn send(&mut self, request: &[u8]) -> Dlt645Result<()> {
        if self.stream.is_none() {
            return Err(Dlt645Error::connection("Not connected"));
        }

        if self.packet_logging {
            log_packet("send", "TCP", request);
        }
        self.stats.requests_sent += 1;

        let stream = self.stream.as_mut().unwrap();
        let write_result = timeout(self.timeout, stream.write_all(request)).await;
        match write_result {
            Ok(Ok(())) => {
                self.stats.bytes_sent += request.len() as u64;
                Ok(())
            }
            Ok(Err(e)) => {
                self.stats.errors += 1;
                self.stream = None;
                Err(Dlt645Error::io(format!("Failed to send request: {}", e)))
            }
            Err(_) => {
                self.stats.timeouts += 1;
                self.stats.errors += 1;
                self.stream = None;
                Err(Dlt645Error::timeout(
                    "send request",
                    self.timeout.as_millis() as u64,
                ))
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    fn stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

// ============================================================================
// RTU Connection
// ============================================================================

/// DL/T 645 over a serial line.
pub struct RtuConnection {
    port: Option<SerialStream>,
    port_name: String,
    config: SerialConfig,
    timeout: Duration,
    stats: TransportStats,
    /// Enable hex packet logging for debugging.
    packet_logging: bool,
}

impl RtuConnection {
    /// Create a disconnected serial connection; [`Connection::connect`]
    /// opens and configures the port.
    pub fn new(port: &str, config: SerialConfig, timeout: Duration) -> Self {
        Self {
            port: None,
            port_name: port.to_string(),
            config,
            timeout,
            stats: TransportStats::default(),
            packet_logging: false,
        }
    }

    /// Enable or disable hex packet logging.
    pub fn set_packet_logging(&mut self, enabled: bool) {
        self.packet_logging = enabled;
    }

    /// Direct access to the open serial stream (server read loop).
    pub fn port_mut(&mut self) -> Option<&mut SerialStream> {
        self.port.as_mut()
    }

    fn open_port(&self) -> Dlt645Result<SerialStream> {
        tokio_serial::new(&self.port_name, self.config.baud_rate)
            .data_bits(self.config.data_bits)
            .stop_bits(self.config.stop_bits)
            .parity(self.config.parity)
            .flow_control(self.config.flow_control)
            .timeout(self.timeout)
            .open_native_async()
            .map_err(|e| {
                Dlt645Error::connection(format!(
                    "Failed to open serial port {}: {}",
                    self.port_name, e
                ))
            })
    }
}

#[async_trait]
impl Connection for RtuConnection {
    async fn connect(&mut self) -> Dlt645Result<()> {
        let port = self.open_port()?;
        info!(
            "Opened serial port {} at {} baud",
            self.port_name, self.config.baud_rate
        );
        self.port = Some(port);
        Ok(())
    }

    async fn disconnect(&mut self) {
        if self.port.take().is_some() {
            debug!("Closed serial port {}", self.port_name);
        }
    }

    async fn send_request(&mut self, request: &[u8]) -> Dlt645Result<Vec<u8>> {
        if self.port.is_none() {
            return Err(Dlt645Error::connection("Serial port not open"));
        }

        if self.packet_logging {
            log_packet("send", "RTU", request);
        }
        self.stats.requests_sent += 1;

        let port = self.port.as_mut().unwrap();
        let write_result = timeout(self.timeout, port.write_all(request)).await;
        match write_result {
            Ok(Ok(())) => {
                self.stats.bytes_sent += request.len() as u64;
                let port = self.port.as_mut().unwrap();
                let _ = port.flush().await;
            }
            Ok(Err(e)) => {
                self.stats.errors += 1;
                self.port = None;
                return Err(Dlt645Error::io(format!("Failed to send request: {}", e)));
            }
            Err(_) => {
                self.stats.timeouts += 1;
                self.stats.errors += 1;
                self.port = None;
                return Err(Dlt645Error::timeout(
                    "send request",
                    self.timeout.as_millis() as u64,
                ));
            }
        }

        let mut buffer = vec![0u8; RESPONSE_BUFFER_SIZE];
        let port = self.port.as_mut().unwrap();
        let read_result = timeout(self.timeout, port.read(&mut buffer)).await;
        match read_result {
            Ok(Ok(0)) => {
                self.stats.errors += 1;
                self.port = None;
                Err(Dlt645Error::connection("Serial port closed"))
            }
            Ok(Ok(n)) => {
                buffer.truncate(n);
                self.stats.responses_received += 1;
                self.stats.bytes_received += n as u64;
                if self.packet_logging {
                    log_packet("receive", "RTU", &buffer);
                }
                Ok(buffer)
            }
            Ok(Err(e)) => {
                self.stats.errors += 1;
                self.port = None;
                Err(Dlt645Error::io(format!("Serial read error: {}", e)))
            }
            Err(_) => {
                self.stats.timeouts += 1;
                self.stats.errors += 1;
                warn!("No response on {} before timeout", self.port_name);
                Err(Dlt645Error::timeout(
                    "read response",
                    self.timeout.as_millis() as u64,
                ))
            }
        }
    }

    async fn send(&mut self, request: &[u8]) -> Dlt645Result<()> {
        if self.port.is_none() {
            return Err(Dlt645Error::connection("Serial port not open"));
        }

        if self.packet_logging {
            log_packet("send", "RTU", request);
        }
        self.stats.requests_sent += 1;

        let port = self.port.as_mut().unwrap();
        let write_result = timeout(self.timeout, port.write_all(request)).await;
        match write_result {
            Ok(Ok(())) => {
                self.stats.bytes_sent += request.len() as u64;
                let port = self.port.as_mut().unwrap();
                let _ = port.flush().await;
                Ok(())
            }
            Ok(Err(e)) => {
                self.stats.errors += 1;
                self.port = None;
                Err(Dlt645Error::io(format!("Failed to send request: {}", e)))
            }
            Err(_) => {
                self.stats.timeouts += 1;
                self.stats.errors += 1;
                self.port = None;
                Err(Dlt645Error::timeout(
                    "send request",
                    self.timeout.as_millis() as u64,
                ))
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    fn stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_config_defaults() {
        let config = SerialConfig::default();
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.data_bits, DataBits::Eight);
        assert_eq!(config.stop_bits, StopBits::One);
        assert_eq!(config.parity, Parity::None);
        assert_eq!(config.flow_control, FlowControl::None);
    }

    #[test]
    fn test_serial_config_from_parts() {
        let config = SerialConfig::from_parts(19200, 7, 2, "even", 1).unwrap();
        assert_eq!(config.baud_rate, 19200);
        assert_eq!(config.data_bits, DataBits::Seven);
        assert_eq!(config.stop_bits, StopBits::Two);
        assert_eq!(config.parity, Parity::Even);
        assert_eq!(config.flow_control, FlowControl::Software);

        assert!(SerialConfig::from_parts(9600, 9, 1, "none", 0).is_err());
        assert!(SerialConfig::from_parts(9600, 8, 3, "none", 0).is_err());
        assert!(SerialConfig::from_parts(9600, 8, 1, "mark", 0).is_err());
        assert!(SerialConfig::from_parts(9600, 8, 1, "none", 5).is_err());
    }

    #[test]
    fn test_tcp_connection_bad_endpoint() {
        assert!(TcpConnection::new("not an ip", 10521, Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn test_tcp_request_before_connect() {
        let mut conn = TcpConnection::new("127.0.0.1", 10521, Duration::from_millis(100)).unwrap();
        assert!(!conn.is_connected());
        assert!(conn.send_request(&[0x68]).await.is_err());
    }

    #[tokio::test]
    async fn test_tcp_connect_refused_clears_state() {
        // Bind then drop a listener to get a port nothing listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut conn = TcpConnection::new("127.0.0.1", port, Duration::from_millis(200)).unwrap();
        assert!(conn.connect().await.is_err());
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_tcp_exchange_and_stats() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let echo = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let n = socket.read(&mut buf).await.unwrap();
            socket.write_all(&buf[..n]).await.unwrap();
        });

        let mut conn = TcpConnection::from_addr(addr, Duration::from_secs(1));
        conn.connect().await.unwrap();
        assert!(conn.is_connected());

        let reply = conn.send_request(&[0x01, 0x02, 0x03]).await.unwrap();
        assert_eq!(reply, vec![0x01, 0x02, 0x03]);

        let stats = conn.stats();
        assert_eq!(stats.requests_sent, 1);
        assert_eq!(stats.responses_received, 1);
        assert_eq!(stats.bytes_sent, 3);
        assert_eq!(stats.bytes_received, 3);

        conn.disconnect().await;
        assert!(!conn.is_connected());
        echo.await.unwrap();
    }

    #[tokio::test]
    async fn test_tcp_read_timeout_disconnects() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Accept but never answer.
        let silent = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
        });

        let mut conn = TcpConnection::from_addr(addr, Duration::from_millis(200));
        conn.connect().await.unwrap();

        let start = std::time::Instant::now();
        let result = conn.send_request(&[0x68, 0x16]).await;
        let elapsed = start.elapsed();

        assert!(matches!(result, Err(Dlt645Error::Timeout { .. })));
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_millis(600));
        assert!(!conn.is_connected());
        assert_eq!(conn.stats().timeouts, 1);
        silent.abort();
    }

    #[tokio::test]
    async fn test_rtu_connect_missing_port() {
        let mut conn = RtuConnection::new(
            "/dev/nonexistent-dlt645",
            SerialConfig::default(),
            Duration::from_millis(200),
        );
        assert!(conn.connect().await.is_err());
        assert!(!conn.is_connected());
    }
}
