//! DL/T 645-2007 protocol constants
//!
//! These constants are derived from the DL/T 645-2007 specification:
//! - Frame delimiters and the fixed frame skeleton around the data domain
//! - The per-byte +0x33 data-domain offset
//! - Broadcast address aliases and field widths

// ============================================================================
// Frame Structure Constants
// ============================================================================

/// Frame start marker, appears before the address field and again before
/// the control code.
pub const FRAME_START: u8 = 0x68;

/// Frame end marker, follows the checksum byte.
pub const FRAME_END: u8 = 0x16;

/// Preamble byte prepended to a transmission so the receiver's UART can
/// synchronize before the first start marker.
pub const PREAMBLE_BYTE: u8 = 0xFE;

/// Number of preamble bytes emitted on send.
pub const PREAMBLE_LEN: usize = 4;

/// Offset applied to every data-domain byte on the wire (modulo 256).
pub const DATA_OFFSET: u8 = 0x33;

/// Device address length in bytes (little-endian BCD digits).
pub const ADDRESS_LEN: usize = 6;

/// Password length in bytes.
pub const PASSWORD_LEN: usize = 4;

/// Data identifier length in bytes (little-endian on the wire).
pub const DI_LEN: usize = 4;

/// Maximum data-domain length (the length field is a single byte).
pub const MAX_DATA_LEN: usize = 255;

/// Fixed frame overhead around the data domain:
/// start(1) + address(6) + start(1) + ctrl(1) + len(1) + checksum(1) + end(1)
pub const FRAME_OVERHEAD: usize = 12;

/// Minimum number of bytes that must follow the first start marker for a
/// frame to possibly be complete: address(6) + start(1) + ctrl(1) + len(1)
/// + checksum(1) + end(1)
pub const MIN_BYTES_AFTER_START: usize = 11;

/// Receive buffer size for a single request/response exchange.
///
/// A maximal frame is 4 (preamble) + 12 (overhead) + 255 (data) = 271 bytes;
/// 1024 bytes leaves room for line noise ahead of the frame.
pub const RESPONSE_BUFFER_SIZE: usize = 1024;

// ============================================================================
// Control Codes
// ============================================================================

/// Broadcast time synchronization (no response expected).
pub const CTRL_BROADCAST_TIME_SYNC: u8 = 0x08;

/// Read data.
pub const CTRL_READ_DATA: u8 = 0x11;

/// Read communication address.
pub const CTRL_READ_ADDRESS: u8 = 0x13;

/// Write data.
pub const CTRL_WRITE_DATA: u8 = 0x14;

/// Write communication address.
pub const CTRL_WRITE_ADDRESS: u8 = 0x15;

/// Freeze command.
pub const CTRL_FREEZE: u8 = 0x16;

/// Change baud rate.
pub const CTRL_CHANGE_BAUD_RATE: u8 = 0x17;

/// Change password.
pub const CTRL_CHANGE_PASSWORD: u8 = 0x18;

/// A response echoes the request control code with this bit set.
pub const CTRL_RESPONSE_FLAG: u8 = 0x80;

/// An error response additionally sets this bit.
pub const CTRL_ERROR_FLAG: u8 = 0x40;

// ============================================================================
// Broadcast Addresses
// ============================================================================

/// General broadcast address: the client uses it for address discovery, the
/// server accepts it on any read request.
pub const BROADCAST_ADDRESS: [u8; ADDRESS_LEN] = [0xAA; ADDRESS_LEN];

/// Self-unknown address: used by a server that cannot identify itself, and
/// as the destination of broadcast time synchronization.
pub const UNKNOWN_ADDRESS: [u8; ADDRESS_LEN] = [0x99; ADDRESS_LEN];

// ============================================================================
// Data Format Masks
// ============================================================================

/// Energy register format: 4 BCD bytes, 2 decimals.
pub const FORMAT_ENERGY: &str = "XXXXXX.XX";

/// Generic 3-byte format with 2 decimals.
pub const FORMAT_XXXX_XX: &str = "XXXX.XX";

/// 3-byte format with 3 decimals (currents).
pub const FORMAT_XXX_XXX: &str = "XXX.XXX";

/// 2-byte format with 1 decimal (voltages).
pub const FORMAT_XXX_X: &str = "XXX.X";

/// Demand register format: 3 BCD bytes, 4 decimals.
pub const FORMAT_DEMAND: &str = "XX.XXXX";

/// 2-byte format with 2 decimals (frequency).
pub const FORMAT_XX_XX: &str = "XX.XX";

/// 2-byte format with 3 decimals (power factor).
pub const FORMAT_X_XXX: &str = "X.XXX";

/// 6-byte digit-string format (communication address).
pub const FORMAT_ADDRESS: &str = "XXXXXXXXXXXX";

// ============================================================================
// Transport Defaults
// ============================================================================

/// Default TCP port for DL/T 645 over a network channel.
pub const DEFAULT_TCP_PORT: u16 = 10521;

/// Default serial baud rate.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default request timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;
