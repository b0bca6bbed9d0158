//! # Voltage DL/T 645 - High-Performance Smart Meter Protocol Library
//!
//! **Author:** Evan Liu <liuyifanz.1996@gmail.com>
//! **Version:** 0.1.0
//! **License:** MIT
//!
//! A comprehensive, high-performance DL/T 645-2007 implementation in pure
//! Rust for electricity meters, data concentrators, IoT gateways and smart
//! grid systems.
//!
//! ## Features
//!
//! - **High Performance**: Async/await support with Tokio
//! - **Complete Protocol Support**: master and slave roles over TCP and RTU
//! - **Memory Safe**: Pure Rust implementation with zero unsafe code
//! - **Full DI Catalog**: the combinatorial energy/demand register space
//!   plus instantaneous variables, loaded from JSON definitions
//! - **Byte-Accurate Codec**: preamble handling, ±0x33 data domain,
//!   modulo-256 checksum, packed-BCD fixed-point values
//!
//! ## Supported Control Codes
//!
//! | Code | Function | Client | Server |
//! |------|----------|--------|--------|
//! | 0x08 | Broadcast Time Sync | ✅ | ✅ |
//! | 0x11 | Read Data | ✅ | ✅ |
//! | 0x13 | Read Address | ✅ | ✅ |
//! | 0x14 | Write Data | | |
//! | 0x15 | Write Address | ✅ | ✅ |
//! | 0x16 | Freeze | | |
//! | 0x17 | Change Baud Rate | | |
//! | 0x18 | Change Password | ✅ | ✅ |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use voltage_dlt645::{DiCatalog, TcpMeterClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let catalog = Arc::new(DiCatalog::from_config_dir("config")?);
//!
//!     // Connect to a meter gateway
//!     let mut client =
//!         TcpMeterClient::new("192.168.1.50", 10521, Duration::from_secs(5), catalog)?;
//!
//!     // Read the current combined active energy register
//!     let item = client.read00(0x0000_0000).await?;
//!     println!("{}: {} {}", item.name, item.value, item.unit);
//!
//!     client.disconnect().await;
//!     Ok(())
//! }
//! ```

// ============================================================================
// Core modules
// ============================================================================

/// Core error types and result handling
pub mod error;

/// Protocol constants based on the DL/T 645-2007 specification
pub mod constants;

/// BCD, fixed-point and timestamp conversions for the data domain
pub mod transform;

/// Frame codec: build and parse protocol frames
pub mod frame;

/// Tagged value union and per-format range validation
pub mod value;

/// Data identifier catalog with JSON loader and grid synthesis
pub mod catalog;

/// Transport layer for TCP and RTU communication
pub mod transport;

/// Client (master) service engine
pub mod client;

/// Server (slave) service engine
pub mod server;

/// Logging initialization for binaries and tests
pub mod logging;

// Re-export commonly used external types
pub use tokio;

// Core client exports
pub use client::{MeterClient, RtuMeterClient, TcpMeterClient};

// Core server exports
pub use server::{MeterServer, RtuMeterServer, TcpMeterServer};

// Error handling
pub use error::{Dlt645Error, Dlt645Result};

// Protocol types
pub use catalog::{CatalogEntry, DataItem, DiCatalog};
pub use frame::{ControlCode, Frame};
pub use value::{is_value_valid, Demand, Dlt645Value};

// Transport layer
pub use transport::{Connection, RtuConnection, SerialConfig, TcpConnection, TransportStats};

// Frequently used constants
pub use constants::{
    BROADCAST_ADDRESS, DEFAULT_BAUD_RATE, DEFAULT_TCP_PORT, DEFAULT_TIMEOUT_MS, UNKNOWN_ADDRESS,
};

// Codec helpers
pub use transform::{
    bcd_to_float, bcd_to_int, bcd_to_time, bytes_to_hex_string, float_to_bcd, format_byte_width,
    int_to_bcd, time_to_bcd,
};
