//! DL/T 645 server (slave) implementations
//!
//! The server side mirrors the client: [`MeterServer`] is the service
//! engine holding the device identity and the DI catalog, and
//! [`TcpMeterServer`] / [`RtuMeterServer`] are the transport front ends
//! feeding it frames.
//!
//! # Architecture
//!
//! `MeterServer` is shared as `Arc<MeterServer>` between concurrently
//! handled connections; its identity fields sit behind locks and the
//! catalog guards itself. Each TCP connection gets its own task with a
//! sequential read → dispatch → write chain; the serial server runs a
//! single such chain on the port.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use voltage_dlt645::{DiCatalog, MeterServer, TcpMeterServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let catalog = Arc::new(DiCatalog::from_config_dir("config")?);
//!     let service = Arc::new(MeterServer::new([0u8; 6], catalog));
//!     service.set00(0x0000_0000, 1234.56)?;
//!
//!     let server = TcpMeterServer::bind("0.0.0.0", 10521, service).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Local};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::catalog::DiCatalog;
use crate::constants::{
    ADDRESS_LEN, BROADCAST_ADDRESS, CTRL_RESPONSE_FLAG, DI_LEN, PASSWORD_LEN,
    RESPONSE_BUFFER_SIZE, UNKNOWN_ADDRESS,
};
use crate::error::{Dlt645Error, Dlt645Result};
use crate::frame::{ControlCode, Frame};
use crate::transform::{
    bcd_to_time, bytes_to_hex_string, bytes_to_u32_le, float_to_bcd, format_byte_width,
    time_to_bcd,
};
use crate::transport::{RtuConnection, SerialConfig};
use crate::value::{is_value_valid, Demand, Dlt645Value};

// ============================================================================
// Service Engine
// ============================================================================

/// Server-side service engine: device identity plus the DI catalog.
pub struct MeterServer {
    address: RwLock<[u8; ADDRESS_LEN]>,
    password: RwLock<[u8; PASSWORD_LEN]>,
    last_time_sync: RwLock<Option<DateTime<Local>>>,
    catalog: Arc<DiCatalog>,
}

impl MeterServer {
    /// Create a service engine for a device with the given address.
    pub fn new(address: [u8; ADDRESS_LEN], catalog: Arc<DiCatalog>) -> Self {
        Self {
            address: RwLock::new(address),
            password: RwLock::new([0u8; PASSWORD_LEN]),
            last_time_sync: RwLock::new(None),
            catalog,
        }
    }

    /// Configured device address.
    pub fn address(&self) -> [u8; ADDRESS_LEN] {
        *self.address.read().expect("address lock poisoned")
    }

    /// Reconfigure the device address.
    pub fn set_address(&self, address: [u8; ADDRESS_LEN]) {
        *self.address.write().expect("address lock poisoned") = address;
        info!("Server address set to {}", bytes_to_hex_string(&address));
    }

    /// Reconfigure the device password.
    pub fn set_password(&self, password: [u8; PASSWORD_LEN]) {
        *self.password.write().expect("password lock poisoned") = password;
        info!("Server password set");
    }

    /// The shared DI catalog.
    pub fn catalog(&self) -> &Arc<DiCatalog> {
        &self.catalog
    }

    /// Last time received over a broadcast time sync, if any.
    pub fn last_time_sync(&self) -> Option<DateTime<Local>> {
        *self.last_time_sync.read().expect("time lock poisoned")
    }

    // ========================================================================
    // Value installation
    // ========================================================================

    /// Install an energy register value (DI3 = 0x00).
    pub fn set00(&self, di: u32, value: f32) -> Dlt645Result<()> {
        self.install(di, Dlt645Value::Float(value))
    }

    /// Install a maximum demand value (DI3 = 0x01).
    pub fn set01(&self, di: u32, demand: Demand) -> Dlt645Result<()> {
        self.install(di, Dlt645Value::DemandV(demand))
    }

    /// Install an instantaneous variable value (DI3 = 0x02).
    pub fn set02(&self, di: u32, value: f32) -> Dlt645Result<()> {
        self.install(di, Dlt645Value::Float(value))
    }

    fn install(&self, di: u32, value: Dlt645Value) -> Dlt645Result<()> {
        let mut item = self
            .catalog
            .get(di)
            .ok_or(Dlt645Error::UnknownDi { di })?;

        if !is_value_valid(&item.data_format, &value) {
            return Err(Dlt645Error::invalid_data(format!(
                "Value {} out of range for format {} (DI 0x{:08X})",
                value, item.data_format, di
            )));
        }

        item.value = value;
        item.timestamp = Local::now().timestamp();
        if !self.catalog.update(di, item) {
            return Err(Dlt645Error::UnknownDi { di });
        }
        Ok(())
    }

    // ========================================================================
    // Request dispatch
    // ========================================================================

    /// Addresses this server answers to: its own, the `AA..AA` broadcast
    /// (address discovery) and the `99..99` alias (broadcast time sync).
    fn accepts_address(&self, address: &[u8; ADDRESS_LEN]) -> bool {
        *address == self.address() || *address == BROADCAST_ADDRESS || *address == UNKNOWN_ADDRESS
    }

    /// Handle one request frame.
    ///
    /// Returns the serialized response, or `None` when the frame is not
    /// addressed to this device or carries a control code the server does
    /// not answer. Catalog misses and malformed payloads surface as errors;
    /// callers log them and emit no response.
    pub fn handle_frame(&self, frame: &Frame) -> Dlt645Result<Option<Vec<u8>>> {
        if !self.accepts_address(&frame.address) {
            debug!(
                "Ignoring frame for {}",
                bytes_to_hex_string(&frame.address)
            );
            return Ok(None);
        }

        match frame.control_code()? {
            ControlCode::BroadcastTimeSync => self.handle_time_sync(frame).map(Some),
            ControlCode::ReadData => self.handle_read(frame).map(Some),
            ControlCode::ReadAddress => self.handle_read_address(frame).map(Some),
            ControlCode::WriteAddress => self.handle_write_address(frame),
            ControlCode::ChangePassword => self.handle_change_password(frame),
            other => {
                debug!("No handler for {}", other);
                Ok(None)
            }
        }
    }

    /// 0x08: record the broadcast time and echo the payload with 0x88.
    fn handle_time_sync(&self, frame: &Frame) -> Dlt645Result<Vec<u8>> {
        if frame.data.len() >= 5 {
            match bcd_to_time(&frame.data[..5], true) {
                Ok(time) => {
                    info!("Time sync received: {}", time);
                    *self.last_time_sync.write().expect("time lock poisoned") = Some(time);
                }
                Err(e) => warn!("Ignoring unparsable time sync payload: {}", e),
            }
        }
        Frame::build(
            frame.address,
            frame.control | CTRL_RESPONSE_FLAG,
            &frame.data,
        )
    }

    /// 0x11: look up the DI and encode the response per its class byte.
    fn handle_read(&self, frame: &Frame) -> Dlt645Result<Vec<u8>> {
        if frame.data.len() < DI_LEN {
            return Err(Dlt645Error::protocol("Read request without a full DI"));
        }
        let di = bytes_to_u32_le(&frame.data[..DI_LEN]);
        let item = self
            .catalog
            .get(di)
            .ok_or(Dlt645Error::UnknownDi { di })?;

        let mut payload = frame.data[..DI_LEN].to_vec();
        match (di >> 24) as u8 {
            0x00 => {
                let bcd = float_to_bcd(item.value.as_f32(), &item.data_format, true)?;
                payload.extend_from_slice(&bcd[..4]);
            }
            0x01 => {
                let (magnitude, occur_time) = match &item.value {
                    Dlt645Value::DemandV(demand) => (demand.value, demand.occur_time),
                    other => (other.as_f32(), Local::now()),
                };
                let bcd = float_to_bcd(magnitude, &item.data_format, true)?;
                payload.extend_from_slice(&bcd[..3]);
                payload.extend_from_slice(&time_to_bcd(occur_time, true));
            }
            0x02 => {
                let width = format_byte_width(&item.data_format);
                let bcd = float_to_bcd(item.value.as_f32(), &item.data_format, true)?;
                payload.extend_from_slice(&bcd[..width.min(bcd.len())]);
            }
            other => {
                return Err(Dlt645Error::protocol(format!(
                    "Unsupported DI class 0x{:02X}",
                    other
                )));
            }
        }

        debug!("Read 0x{:08X} -> {} ({})", di, item.value, item.name);
        Frame::build(frame.address, frame.control | CTRL_RESPONSE_FLAG, &payload)
    }

    /// 0x13: reply with the configured address as source and payload.
    fn handle_read_address(&self, frame: &Frame) -> Dlt645Result<Vec<u8>> {
        let address = self.address();
        Frame::build(address, frame.control | CTRL_RESPONSE_FLAG, &address)
    }

    /// 0x15: verify the password, adopt the new address, empty ack.
    fn handle_write_address(&self, frame: &Frame) -> Dlt645Result<Option<Vec<u8>>> {
        if frame.data.len() < PASSWORD_LEN + ADDRESS_LEN {
            return Err(Dlt645Error::protocol("Write-address payload too short"));
        }
        if frame.data[..PASSWORD_LEN] != *self.password.read().expect("password lock poisoned") {
            warn!("Write address rejected: wrong password");
            return Ok(None);
        }

        let mut new_address = [0u8; ADDRESS_LEN];
        new_address.copy_from_slice(&frame.data[PASSWORD_LEN..PASSWORD_LEN + ADDRESS_LEN]);
        self.set_address(new_address);

        Frame::build(new_address, frame.control | CTRL_RESPONSE_FLAG, &[]).map(Some)
    }

    /// 0x18: verify the old password, adopt the new one, empty ack.
    fn handle_change_password(&self, frame: &Frame) -> Dlt645Result<Option<Vec<u8>>> {
        if frame.data.len() < PASSWORD_LEN * 2 {
            return Err(Dlt645Error::protocol("Change-password payload too short"));
        }
        if frame.data[..PASSWORD_LEN] != *self.password.read().expect("password lock poisoned") {
            warn!("Change password rejected: wrong old password");
            return Ok(None);
        }

        let mut new_password = [0u8; PASSWORD_LEN];
        new_password.copy_from_slice(&frame.data[PASSWORD_LEN..PASSWORD_LEN * 2]);
        self.set_password(new_password);

        Frame::build(self.address(), frame.control | CTRL_RESPONSE_FLAG, &[]).map(Some)
    }
}

// ============================================================================
// TCP Front End
// ============================================================================

/// TCP listener feeding accepted streams into a [`MeterServer`].
///
/// Each accepted connection is handled in its own task; connections are
/// served concurrently, the frames within one connection sequentially.
pub struct TcpMeterServer {
    listener: TcpListener,
    service: Arc<MeterServer>,
}

impl TcpMeterServer {
    /// Bind the listening socket.
    pub async fn bind(ip: &str, port: u16, service: Arc<MeterServer>) -> Dlt645Result<Self> {
        let listener = TcpListener::bind((ip, port)).await.map_err(|e| {
            Dlt645Error::connection(format!("Failed to bind {}:{}: {}", ip, port, e))
        })?;
        info!("DL/T 645 server listening on {}:{}", ip, port);
        Ok(Self { listener, service })
    }

    /// Actual bound address (useful with port 0).
    pub fn local_addr(&self) -> Dlt645Result<std::net::SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| Dlt645Error::connection(format!("No local address: {}", e)))
    }

    /// Accept connections until the task is cancelled.
    pub async fn run(self) -> Dlt645Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    info!("Accepted connection from {}", peer);
                    let service = self.service.clone();
                    tokio::spawn(async move {
                        if let Err(e) = Self::handle_connection(stream, service).await {
                            warn!("Connection from {} ended: {}", peer, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Accept failed: {}", e);
                }
            }
        }
    }

    /// Sequential read -> dispatch -> write chain for one stream.
    async fn handle_connection(
        mut stream: tokio::net::TcpStream,
        service: Arc<MeterServer>,
    ) -> Dlt645Result<()> {
        let mut buffer = vec![0u8; RESPONSE_BUFFER_SIZE];
        loop {
            let n = stream.read(&mut buffer).await?;
            if n == 0 {
                debug!("Peer closed connection");
                return Ok(());
            }

            match dispatch(&service, &buffer[..n]) {
                Some(response) => stream.write_all(&response).await?,
                None => continue,
            }
        }
    }
}

// ============================================================================
// RTU Front End
// ============================================================================

/// Serial front end running a single read loop on the port.
pub struct RtuMeterServer {
    connection: RtuConnection,
    service: Arc<MeterServer>,
}

impl RtuMeterServer {
    /// Open and configure the serial port.
    pub async fn open(
        port: &str,
        config: SerialConfig,
        service: Arc<MeterServer>,
    ) -> Dlt645Result<Self> {
        use crate::transport::Connection as _;

        let mut connection = RtuConnection::new(
            port,
            config,
            std::time::Duration::from_millis(crate::constants::DEFAULT_TIMEOUT_MS),
        );
        connection.connect().await?;
        info!("DL/T 645 server listening on serial port {}", port);
        Ok(Self {
            connection,
            service,
        })
    }

    /// Serve requests until the task is cancelled or the port fails.
    pub async fn run(mut self) -> Dlt645Result<()> {
        let mut buffer = vec![0u8; RESPONSE_BUFFER_SIZE];
        loop {
            let port = self
                .connection
                .port_mut()
                .ok_or_else(|| Dlt645Error::connection("Serial port not open"))?;

            let n = port.read(&mut buffer).await?;
            if n == 0 {
                continue;
            }

            if let Some(response) = dispatch(&self.service, &buffer[..n]) {
                let port = self
                    .connection
                    .port_mut()
                    .ok_or_else(|| Dlt645Error::connection("Serial port not open"))?;
                port.write_all(&response).await?;
            }
        }
    }
}

/// Parse and dispatch one raw buffer; frame and handler errors are logged
/// and produce no response.
fn dispatch(service: &MeterServer, raw: &[u8]) -> Option<Vec<u8>> {
    debug!("Received {}", bytes_to_hex_string(raw));

    let frame = match Frame::deserialize(raw) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("Discarding unparsable buffer: {}", e);
            return None;
        }
    };

    match service.handle_frame(&frame) {
        Ok(response) => response,
        Err(e) => {
            warn!("Request handling failed: {}", e);
            None
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
