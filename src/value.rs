//! # DL/T 645 Value Types
//!
//! Self-contained data types for metering values.
//! Designed for BCD encoding/decoding with per-format range validation.

use std::fmt;

use chrono::{DateTime, Local};

/// A time-stamped maximum-demand register value.
///
/// Carries the demand magnitude together with the wall-clock instant at
/// which the maximum occurred.
#[derive(Debug, Clone, PartialEq)]
pub struct Demand {
    /// Demand magnitude (kW, kvar or kVA depending on the register).
    pub value: f32,
    /// Instant the maximum occurred.
    pub occur_time: DateTime<Local>,
}

impl Demand {
    /// Create a new demand value.
    pub fn new(value: f32, occur_time: DateTime<Local>) -> Self {
        Self { value, occur_time }
    }
}

impl fmt::Display for Demand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} @ {}",
            self.value,
            self.occur_time.format("%Y-%m-%d %H:%M")
        )
    }
}

/// Tagged value union for a catalog entry.
///
/// Most registers decode to [`Dlt645Value::Float`]; maximum-demand registers
/// decode to [`Dlt645Value::DemandV`]; the read-address path produces
/// [`Dlt645Value::Text`]. Entries that have never been read or written hold
/// [`Dlt645Value::Empty`].
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Dlt645Value {
    /// No value stored yet.
    #[default]
    Empty,
    /// Fixed-point register decoded to floating point.
    Float(f32),
    /// Signed 32-bit integer.
    I32(i32),
    /// Unsigned 32-bit integer.
    U32(u32),
    /// Digit-string value (communication address).
    Text(String),
    /// Maximum demand with occurrence time.
    DemandV(Demand),
}

impl Dlt645Value {
    /// Convert the value to f32 for uniform numeric handling.
    ///
    /// Demand values yield their magnitude; `Empty` and `Text` yield 0.0.
    #[inline]
    pub fn as_f32(&self) -> f32 {
        match self {
            Dlt645Value::Empty => 0.0,
            Dlt645Value::Float(v) => *v,
            Dlt645Value::I32(v) => *v as f32,
            Dlt645Value::U32(v) => *v as f32,
            Dlt645Value::Text(_) => 0.0,
            Dlt645Value::DemandV(d) => d.value,
        }
    }

    /// Check whether a value is present.
    #[inline]
    pub fn is_empty(&self) -> bool {
        matches!(self, Dlt645Value::Empty)
    }

    /// Returns the variant name as a string for logging/debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Dlt645Value::Empty => "empty",
            Dlt645Value::Float(_) => "f32",
            Dlt645Value::I32(_) => "i32",
            Dlt645Value::U32(_) => "u32",
            Dlt645Value::Text(_) => "text",
            Dlt645Value::DemandV(_) => "demand",
        }
    }
}

impl fmt::Display for Dlt645Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dlt645Value::Empty => write!(f, "-"),
            Dlt645Value::Float(v) => write!(f, "{}", v),
            Dlt645Value::I32(v) => write!(f, "{}", v),
            Dlt645Value::U32(v) => write!(f, "{}", v),
            Dlt645Value::Text(v) => write!(f, "{}", v),
            Dlt645Value::DemandV(v) => write!(f, "{}", v),
        }
    }
}

// ============================================================================
// From implementations for ergonomic construction
// ============================================================================

impl From<f32> for Dlt645Value {
    fn from(v: f32) -> Self {
        Dlt645Value::Float(v)
    }
}

impl From<i32> for Dlt645Value {
    fn from(v: i32) -> Self {
        Dlt645Value::I32(v)
    }
}

impl From<u32> for Dlt645Value {
    fn from(v: u32) -> Self {
        Dlt645Value::U32(v)
    }
}

impl From<String> for Dlt645Value {
    fn from(v: String) -> Self {
        Dlt645Value::Text(v)
    }
}

impl From<Demand> for Dlt645Value {
    fn from(v: Demand) -> Self {
        Dlt645Value::DemandV(v)
    }
}

// ============================================================================
// Range Validation
// ============================================================================

/// Numeric range a format mask allows.
///
/// The upper digit of the whole part is constrained to 0-7 so the 0x80 bit
/// of the most-significant BCD byte stays free for the sign flag.
pub fn format_range(data_format: &str) -> Option<(f64, f64)> {
    match data_format {
        "XXXXXX.XX" => Some((-799_999.99, 799_999.99)),
        "XXXX.XX" => Some((-7_999.99, 7_999.99)),
        "XXX.XXX" => Some((-799.999, 799.999)),
        "XXX.X" => Some((-799.9, 799.9)),
        "XX.XXXX" => Some((-79.9999, 79.9999)),
        "XX.XX" => Some((-79.99, 79.99)),
        "X.XXX" => Some((-7.999, 7.999)),
        _ => None,
    }
}

/// Validate a value against its declared format before storing it.
///
/// Numeric values are checked against the format's range (formats without a
/// declared range accept any number). Text values must match the mask's
/// character count. Demand values are checked on their magnitude; empty
/// values are always acceptable.
pub fn is_value_valid(data_format: &str, value: &Dlt645Value) -> bool {
    match value {
        Dlt645Value::Empty => true,
        Dlt645Value::Float(v) => in_format_range(data_format, f64::from(*v)),
        Dlt645Value::I32(v) => in_format_range(data_format, f64::from(*v)),
        Dlt645Value::U32(v) => in_format_range(data_format, f64::from(*v)),
        Dlt645Value::Text(s) => s.len() == data_format.len(),
        Dlt645Value::DemandV(d) => in_format_range(data_format, f64::from(d.value)),
    }
}

/// The comparison happens on the scaled integer the BCD encoder would
/// produce, not on raw floats: `7999.99f32` sits a fraction above the f64
/// literal `7999.99` and must still be accepted, while anything that would
/// spill into the sign bit's digit must not.
fn in_format_range(data_format: &str, value: f64) -> bool {
    let Some((_, max)) = format_range(data_format) else {
        return true;
    };
    if !value.is_finite() {
        return false;
    }
    let scale = 10f64.powi(crate::transform::format_decimals(data_format) as i32);
    let limit = (max * scale).round() as u64;
    let scaled = (value.abs() * scale).round() as u64;
    scaled <= limit
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_as_f32() {
        assert_eq!(Dlt645Value::Empty.as_f32(), 0.0);
        assert_eq!(Dlt645Value::Float(12.5).as_f32(), 12.5);
        assert_eq!(Dlt645Value::I32(-7).as_f32(), -7.0);
        assert_eq!(Dlt645Value::U32(42).as_f32(), 42.0);
        let d = Demand::new(75.0, Local::now());
        assert_eq!(Dlt645Value::DemandV(d).as_f32(), 75.0);
    }

    #[test]
    fn test_from_primitives() {
        let _: Dlt645Value = 3.5f32.into();
        let _: Dlt645Value = (-100i32).into();
        let _: Dlt645Value = 100u32.into();
        let _: Dlt645Value = "000000000000".to_string().into();
        let _: Dlt645Value = Demand::new(1.0, Local::now()).into();
    }

    #[test]
    fn test_type_name() {
        assert_eq!(Dlt645Value::Empty.type_name(), "empty");
        assert_eq!(Dlt645Value::Float(0.0).type_name(), "f32");
        assert_eq!(
            Dlt645Value::DemandV(Demand::new(0.0, Local::now())).type_name(),
            "demand"
        );
    }

    #[test]
    fn test_format_range_bounds() {
        assert!(is_value_valid("XXXX.XX", &Dlt645Value::Float(7999.99)));
        assert!(!is_value_valid("XXXX.XX", &Dlt645Value::Float(8000.00)));
        assert!(is_value_valid("XXXX.XX", &Dlt645Value::Float(-7999.99)));
        assert!(!is_value_valid("XXXX.XX", &Dlt645Value::Float(-8000.00)));

        // 799999.99 itself is not representable in f32 (it rounds to
        // 800000.0, which would spill into the sign digit).
        assert!(is_value_valid("XXXXXX.XX", &Dlt645Value::Float(799_999.9)));
        assert!(!is_value_valid("XXXXXX.XX", &Dlt645Value::Float(800_000.0)));

        assert!(is_value_valid("XX.XXXX", &Dlt645Value::Float(79.9999)));
        assert!(!is_value_valid("XX.XXXX", &Dlt645Value::Float(80.0)));

        assert!(is_value_valid("X.XXX", &Dlt645Value::Float(7.999)));
        assert!(!is_value_valid("X.XXX", &Dlt645Value::Float(8.0)));
    }

    #[test]
    fn test_text_validation() {
        assert!(is_value_valid(
            "XXXXXXXXXXXX",
            &Dlt645Value::Text("001122334455".to_string())
        ));
        assert!(!is_value_valid(
            "XXXXXXXXXXXX",
            &Dlt645Value::Text("0011".to_string())
        ));
    }

    #[test]
    fn test_demand_validation() {
        let ok = Demand::new(79.9999, Local::now());
        let bad = Demand::new(80.0, Local::now());
        assert!(is_value_valid("XX.XXXX", &Dlt645Value::DemandV(ok)));
        assert!(!is_value_valid("XX.XXXX", &Dlt645Value::DemandV(bad)));
    }

    #[test]
    fn test_empty_always_valid() {
        assert!(is_value_valid("XXXXXX.XX", &Dlt645Value::Empty));
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", Dlt645Value::Empty), "-");
        assert_eq!(format!("{}", Dlt645Value::Float(1.5)), "1.5");
        assert_eq!(format!("{}", Dlt645Value::Text("ab".into())), "ab");
    }
}
