//! High-level DL/T 645 client implementations
//!
//! This module provides the master-side service engine: request
//! construction, response validation and payload decoding against the DI
//! catalog.
//!
//! # Architecture
//!
//! TCP and RTU channels carry the identical frame format, so the
//! application logic is implemented once in [`MeterClient`] and
//! parameterized over the [`Connection`] transport. `&mut self` receivers
//! serialize requests: one exchange is in flight per connection at any time.
//!
//! # API Naming Convention
//!
//! The read operations follow a **dual-track API**:
//!
//! | DI class | Primary Name | Semantic Alias |
//! |----------|--------------|----------------|
//! | 0x00 | `read00()` | `read_energy()` |
//! | 0x01 | `read01()` | `read_demand()` |
//! | 0x02 | `read02()` | `read_variable()` |
//!
//! The three are wire-identical requests; the response shape is decided by
//! the DI's class byte, so all of them funnel into [`MeterClient::read`].
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use voltage_dlt645::{DiCatalog, TcpMeterClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let catalog = Arc::new(DiCatalog::from_config_dir("config")?);
//!     let mut client =
//!         TcpMeterClient::new("192.168.1.50", 10521, Duration::from_secs(5), catalog)?;
//!
//!     client.set_address([0x01, 0x00, 0x00, 0x00, 0x00, 0x00])?;
//!     let item = client.read00(0x0001_0000).await?;
//!     println!("{}: {} {}", item.name, item.value, item.unit);
//!
//!     client.disconnect().await;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tracing::{debug, info, warn};

use crate::catalog::{DataItem, DiCatalog};
use crate::constants::{ADDRESS_LEN, DI_LEN, FORMAT_ADDRESS, PASSWORD_LEN, UNKNOWN_ADDRESS};
use crate::error::{Dlt645Error, Dlt645Result};
use crate::frame::{ControlCode, Frame};
use crate::transform::{
    bcd_to_float, bcd_to_time, bytes_to_hex_string, bytes_to_u32_le, time_to_bcd, u32_to_bytes_le,
};
use crate::transport::{Connection, RtuConnection, SerialConfig, TcpConnection, TransportStats};
use crate::value::{Demand, Dlt645Value};

/// DL/T 645 client over a TCP channel.
pub type TcpMeterClient = MeterClient<TcpConnection>;

/// DL/T 645 client over a serial line.
pub type RtuMeterClient = MeterClient<RtuConnection>;

/// Generic DL/T 645 client that works with any transport.
///
/// Holds the target device address (default all zeros until discovered or
/// configured), the password used for write operations, and the shared DI
/// catalog consulted when decoding read responses.
pub struct MeterClient<T: Connection> {
    address: [u8; ADDRESS_LEN],
    password: [u8; PASSWORD_LEN],
    connection: T,
    catalog: Arc<DiCatalog>,
}

impl TcpMeterClient {
    /// Create a TCP client for `ip:port` with the given request timeout.
    ///
    /// The connection is established lazily on the first request.
    pub fn new(
        ip: &str,
        port: u16,
        timeout: Duration,
        catalog: Arc<DiCatalog>,
    ) -> Dlt645Result<Self> {
        Ok(MeterClient::with_connection(
            TcpConnection::new(ip, port, timeout)?,
            catalog,
        ))
    }
}

impl RtuMeterClient {
    /// Create an RTU client for a serial port.
    pub fn new(
        port: &str,
        config: SerialConfig,
        timeout: Duration,
        catalog: Arc<DiCatalog>,
    ) -> Self {
        MeterClient::with_connection(RtuConnection::new(port, config, timeout), catalog)
    }
}

impl<T: Connection> MeterClient<T> {
    /// Create a client over an existing transport.
    pub fn with_connection(connection: T, catalog: Arc<DiCatalog>) -> Self {
        Self {
            address: [0u8; ADDRESS_LEN],
            password: [0u8; PASSWORD_LEN],
            connection,
            catalog,
        }
    }

    /// Currently configured device address.
    pub fn address(&self) -> [u8; ADDRESS_LEN] {
        self.address
    }

    /// Set the target device address.
    pub fn set_address(&mut self, address: [u8; ADDRESS_LEN]) -> Dlt645Result<()> {
        self.address = address;
        info!("Client address set to {}", bytes_to_hex_string(&address));
        Ok(())
    }

    /// Set the password used for write operations.
    pub fn set_password(&mut self, password: [u8; PASSWORD_LEN]) {
        self.password = password;
        info!("Client password set");
    }

    /// Establish the transport channel.
    pub async fn connect(&mut self) -> Dlt645Result<()> {
        self.connection.connect().await
    }

    /// Close the transport channel.
    pub async fn disconnect(&mut self) {
        self.connection.disconnect().await;
    }

    /// Whether the transport channel is up.
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Replace the timeout governing subsequent requests.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.connection.set_timeout(timeout);
    }

    /// Transport statistics.
    pub fn stats(&self) -> TransportStats {
        self.connection.stats()
    }

    /// Access the underlying transport.
    pub fn connection_mut(&mut self) -> &mut T {
        &mut self.connection
    }

    // ========================================================================
    // Read operations
    // ========================================================================

    /// Read any data identifier; the response decoder is selected by the
    /// DI's class byte (energy, demand or variable).
    pub async fn read(&mut self, di: u32) -> Dlt645Result<DataItem> {
        let wire = Frame::build(
            self.address,
            ControlCode::ReadData.to_u8(),
            &u32_to_bytes_le(di),
        )?;
        self.send_and_handle(&wire).await
    }

    /// Read an energy register (DI3 = 0x00).
    pub async fn read00(&mut self, di: u32) -> Dlt645Result<DataItem> {
        self.read(di).await
    }

    /// Read a maximum demand register with its occurrence time (DI3 = 0x01).
    pub async fn read01(&mut self, di: u32) -> Dlt645Result<DataItem> {
        self.read(di).await
    }

    /// Read an instantaneous variable (DI3 = 0x02).
    pub async fn read02(&mut self, di: u32) -> Dlt645Result<DataItem> {
        self.read(di).await
    }

    // ===== Semantic name aliases (for readability) =====

    /// Alias for `read00` - Read energy register
    #[inline]
    pub async fn read_energy(&mut self, di: u32) -> Dlt645Result<DataItem> {
        self.read00(di).await
    }

    /// Alias for `read01` - Read maximum demand register
    #[inline]
    pub async fn read_demand(&mut self, di: u32) -> Dlt645Result<DataItem> {
        self.read01(di).await
    }

    /// Alias for `read02` - Read instantaneous variable
    #[inline]
    pub async fn read_variable(&mut self, di: u32) -> Dlt645Result<DataItem> {
        self.read02(di).await
    }

    // ========================================================================
    // Address and password operations
    // ========================================================================

    /// Discover the device address (control code 0x13).
    ///
    /// Usually issued with the client address set to the `AA..AA` broadcast
    /// alias on a point-to-point link. On success the local address is
    /// updated to the discovered one.
    pub async fn read_address(&mut self) -> Dlt645Result<DataItem> {
        let wire = Frame::build(self.address, ControlCode::ReadAddress.to_u8(), &[])?;
        self.send_and_handle(&wire).await
    }

    /// Change the device address (control code 0x15).
    ///
    /// Payload is password(4) ‖ new address(6). On a confirmed response the
    /// local address is updated.
    pub async fn write_address(&mut self, new_address: [u8; ADDRESS_LEN]) -> Dlt645Result<()> {
        let mut data = Vec::with_capacity(PASSWORD_LEN + ADDRESS_LEN);
        data.extend_from_slice(&self.password);
        data.extend_from_slice(&new_address);

        let wire = Frame::build(self.address, ControlCode::WriteAddress.to_u8(), &data)?;
        let expected = new_address;
        self.send_and_confirm(&wire, ControlCode::WriteAddress, Some(expected))
            .await?;

        self.address = new_address;
        info!(
            "Device address changed to {}",
            bytes_to_hex_string(&new_address)
        );
        Ok(())
    }

    /// Change the device password (control code 0x18).
    ///
    /// Payload is old password(4) ‖ new password(4). The old password must
    /// match the locally configured one; on a confirmed response the local
    /// password is updated.
    pub async fn change_password(
        &mut self,
        old_password: [u8; PASSWORD_LEN],
        new_password: [u8; PASSWORD_LEN],
    ) -> Dlt645Result<()> {
        if old_password != self.password {
            return Err(Dlt645Error::auth("Old password does not match"));
        }

        let mut data = Vec::with_capacity(PASSWORD_LEN * 2);
        data.extend_from_slice(&old_password);
        data.extend_from_slice(&new_password);

        let wire = Frame::build(self.address, ControlCode::ChangePassword.to_u8(), &data)?;
        self.send_and_confirm(&wire, ControlCode::ChangePassword, None)
            .await?;

        self.password = new_password;
        info!("Device password changed");
        Ok(())
    }

    /// Broadcast the current local time (control code 0x08).
    ///
    /// Sent to the `99..99` broadcast alias; no response is awaited.
    pub async fn broadcast_time_sync(&mut self) -> Dlt645Result<()> {
        let time_bcd = time_to_bcd(Local::now(), true);
        let wire = Frame::build(
            UNKNOWN_ADDRESS,
            ControlCode::BroadcastTimeSync.to_u8(),
            &time_bcd,
        )?;

        self.ensure_connected().await?;
        self.connection.send(&wire).await?;
        info!("Broadcast time sync sent");
        Ok(())
    }

    // ========================================================================
    // Response handling
    // ========================================================================

    async fn ensure_connected(&mut self) -> Dlt645Result<()> {
        if !self.connection.is_connected() {
            self.connection.connect().await?;
        }
        Ok(())
    }

    /// Send a request and run the full response pipeline: deserialize,
    /// reject error frames, validate the source address, dispatch on the
    /// control code.
    async fn send_and_handle(&mut self, wire: &[u8]) -> Dlt645Result<DataItem> {
        self.ensure_connected().await?;

        let raw = self.connection.send_request(wire).await?;
        let frame = Frame::deserialize(&raw)?;
        self.check_response_frame(&frame)?;
        self.handle_response(&frame)
    }

    /// Send a request expecting a bare confirmation (no payload decode).
    ///
    /// `alternate_source` additionally accepts a response originating from
    /// the given address; a write-address acknowledgment arrives from the
    /// device's new address.
    async fn send_and_confirm(
        &mut self,
        wire: &[u8],
        expected: ControlCode,
        alternate_source: Option<[u8; ADDRESS_LEN]>,
    ) -> Dlt645Result<()> {
        self.ensure_connected().await?;

        let raw = self.connection.send_request(wire).await?;
        let frame = Frame::deserialize(&raw)?;

        if frame.is_exception() {
            return Err(self.exception_error(&frame));
        }
        if !frame.is_response() {
            return Err(Dlt645Error::protocol(format!(
                "Not a response frame: ctrl=0x{:02X}",
                frame.control
            )));
        }
        if frame.control_code()? != expected {
            return Err(Dlt645Error::protocol(format!(
                "Unexpected response control code 0x{:02X}",
                frame.control
            )));
        }

        let source_ok = self.accepts_source(&frame.address)
            || alternate_source.is_some_and(|alt| frame.address == alt);
        if !source_ok {
            return Err(self.address_mismatch(&frame.address));
        }
        Ok(())
    }

    /// Source addresses the client accepts on a response: the configured
    /// device address, or the server's self-unknown `99..99` alias.
    fn accepts_source(&self, source: &[u8; ADDRESS_LEN]) -> bool {
        *source == self.address || *source == UNKNOWN_ADDRESS
    }

    fn address_mismatch(&self, source: &[u8; ADDRESS_LEN]) -> Dlt645Error {
        warn!(
            "Response address {} not accepted (configured {})",
            bytes_to_hex_string(source),
            bytes_to_hex_string(&self.address)
        );
        Dlt645Error::AddressMismatch {
            expected: bytes_to_hex_string(&self.address),
            actual: bytes_to_hex_string(source),
        }
    }

    fn exception_error(&self, frame: &Frame) -> Dlt645Error {
        let code = frame.data.first().copied();
        match code {
            Some(code) => Dlt645Error::protocol(format!(
                "Device returned error response, code 0x{:02X}",
                code
            )),
            None => Dlt645Error::protocol("Device returned error response"),
        }
    }

    fn check_response_frame(&self, frame: &Frame) -> Dlt645Result<()> {
        if frame.is_exception() {
            return Err(self.exception_error(frame));
        }
        if !frame.is_response() {
            return Err(Dlt645Error::protocol(format!(
                "Not a response frame: ctrl=0x{:02X}",
                frame.control
            )));
        }
        // Address discovery is exempt: the whole point is that the source
        // address is not known yet.
        if frame.control_code()? != ControlCode::ReadAddress && !self.accepts_source(&frame.address)
        {
            return Err(self.address_mismatch(&frame.address));
        }
        Ok(())
    }

    /// Dispatch a validated response frame on its control code.
    fn handle_response(&mut self, frame: &Frame) -> Dlt645Result<DataItem> {
        match frame.control_code()? {
            ControlCode::ReadData => self.handle_read_response(frame),
            ControlCode::ReadAddress => self.handle_read_address_response(frame),
            other => Err(Dlt645Error::protocol(format!(
                "Unexpected response: {}",
                other
            ))),
        }
    }

    /// Decode a read-data response: DI from the first four data bytes, then
    /// the value per the DI's class byte.
    fn handle_read_response(&mut self, frame: &Frame) -> Dlt645Result<DataItem> {
        if frame.data.len() < DI_LEN {
            return Err(Dlt645Error::protocol(
                "Read response shorter than a data identifier",
            ));
        }

        let di = bytes_to_u32_le(&frame.data[..DI_LEN]);
        let mut item = self
            .catalog
            .get(di)
            .ok_or(Dlt645Error::UnknownDi { di })?;

        let class = (di >> 24) as u8;
        match class {
            0x00 => {
                // Energy: 4 BCD bytes after the DI.
                if frame.data.len() < DI_LEN + 4 {
                    return Err(Dlt645Error::protocol("Energy response too short"));
                }
                let value =
                    bcd_to_float(&frame.data[DI_LEN..DI_LEN + 4], &item.data_format, true)?;
                debug!("Energy 0x{:08X} = {} {}", di, value, item.unit);
                item.value = Dlt645Value::Float(value);
            }
            0x01 => {
                // Demand: 3 BCD bytes, then 5 BCD time bytes.
                if frame.data.len() < DI_LEN + 8 {
                    return Err(Dlt645Error::protocol("Demand response too short"));
                }
                let value =
                    bcd_to_float(&frame.data[DI_LEN..DI_LEN + 3], &item.data_format, true)?;
                let occur_time = bcd_to_time(&frame.data[DI_LEN + 3..DI_LEN + 8], true)?;
                debug!(
                    "Demand 0x{:08X} = {} {} @ {}",
                    di, value, item.unit, occur_time
                );
                item.value = Dlt645Value::DemandV(Demand::new(value, occur_time));
            }
            0x02 => {
                // Variable: BCD width comes from the declared format.
                let width = crate::transform::format_byte_width(&item.data_format);
                if frame.data.len() < DI_LEN + width {
                    return Err(Dlt645Error::protocol("Variable response too short"));
                }
                let value =
                    bcd_to_float(&frame.data[DI_LEN..DI_LEN + width], &item.data_format, true)?;
                debug!("Variable 0x{:08X} = {} {}", di, value, item.unit);
                item.value = Dlt645Value::Float(value);
            }
            other => {
                return Err(Dlt645Error::protocol(format!(
                    "Unsupported DI class 0x{:02X}",
                    other
                )));
            }
        }

        item.timestamp = Local::now().timestamp();
        Ok(item)
    }

    /// Decode a read-address response and adopt the discovered address.
    fn handle_read_address_response(&mut self, frame: &Frame) -> Dlt645Result<DataItem> {
        if frame.data.len() < ADDRESS_LEN {
            return Err(Dlt645Error::protocol("Address response too short"));
        }

        let mut discovered = [0u8; ADDRESS_LEN];
        discovered.copy_from_slice(&frame.data[..ADDRESS_LEN]);
        self.address = discovered;
        info!(
            "Discovered device address {}",
            bytes_to_hex_string(&discovered)
        );

        // The address reads most-significant byte first when reversed out
        // of its little-endian wire order.
        let display: String = discovered
            .iter()
            .rev()
            .map(|b| format!("{:02X}", b))
            .collect();

        Ok(DataItem {
            di: bytes_to_u32_le(&frame.data[..DI_LEN]),
            name: "communication address".to_string(),
            data_format: FORMAT_ADDRESS.to_string(),
            value: Dlt645Value::Text(display),
            unit: String::new(),
            timestamp: Local::now().timestamp(),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
