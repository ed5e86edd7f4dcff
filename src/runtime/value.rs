//! WebAssembly value representation

use crate::types::ValueType;
use fhex::ToHex;
use std::fmt;

/// Runtime representation of a WebAssembly value.
///
/// Float payloads are bit-exact: values read from a module or produced by
/// reinterpret instructions round-trip through `to_bits`/`from_bits`, so
/// NaN payloads survive. Drivers compare floats on bits, never with `==`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl Value {
    /// Get the WebAssembly type of this value.
    pub fn typ(&self) -> ValueType {
        match self {
            Value::I32(_) => ValueType::I32,
            Value::I64(_) => ValueType::I64,
            Value::F32(_) => ValueType::F32,
            Value::F64(_) => ValueType::F64,
        }
    }

    /// The zero value of a type, used for local and global initialisation.
    pub fn zero(typ: ValueType) -> Value {
        match typ {
            ValueType::I32 => Value::I32(0),
            ValueType::I64 => Value::I64(0),
            ValueType::F32 => Value::F32(0.0),
            ValueType::F64 => Value::F64(0.0),
        }
    }

    /// Convert to i32, returning None if wrong type.
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::I32(v) => Some(*v),
            _ => None,
        }
    }

    /// Convert to i64, returning None if wrong type.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I64(v) => Some(*v),
            _ => None,
        }
    }

    /// Convert to f32, returning None if wrong type.
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Value::F32(v) => Some(*v),
            _ => None,
        }
    }

    /// Convert to f64, returning None if wrong type.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F64(v) => Some(*v),
            _ => None,
        }
    }

    /// The raw 64-bit payload: integers zero-extended, floats as bits.
    pub fn bits(&self) -> u64 {
        match self {
            Value::I32(v) => *v as u32 as u64,
            Value::I64(v) => *v as u64,
            Value::F32(v) => v.to_bits() as u64,
            Value::F64(v) => v.to_bits(),
        }
    }

    /// Bit-level equality: same type and same payload.
    ///
    /// This is the comparison the test drivers use; unlike `==` it treats
    /// two NaNs with equal payloads as equal and +0.0 != -0.0.
    pub fn bits_eq(&self, other: &Value) -> bool {
        self.typ() == other.typ() && self.bits() == other.bits()
    }

    /// Construct a value from a type name and a decimal bit-pattern string,
    /// the encoding used by the JSON spec scripts.
    pub fn from_bit_strings(typ: &str, value: &str) -> Result<Value, String> {
        match typ {
            "i32" => value
                .parse::<u32>()
                .map(|v| Value::I32(v as i32))
                .map_err(|e| format!("failed to parse i32: {e}")),
            "i64" => value
                .parse::<u64>()
                .map(|v| Value::I64(v as i64))
                .map_err(|e| format!("failed to parse i64: {e}")),
            "f32" => value
                .parse::<u32>()
                .map(|bits| Value::F32(f32::from_bits(bits)))
                .map_err(|e| format!("failed to parse f32 bits: {e}")),
            "f64" => value
                .parse::<u64>()
                .map(|bits| Value::F64(f64::from_bits(bits)))
                .map_err(|e| format!("failed to parse f64 bits: {e}")),
            t => Err(format!("unknown value type: {t}")),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::I32(v) => write!(f, "i32:{}", *v as u32),
            Value::I64(v) => write!(f, "i64:{}", *v as u64),
            Value::F32(v) => write!(f, "f32:{}", v.to_hex()),
            Value::F64(v) => write!(f, "f64:{}", v.to_hex()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_type() {
        assert_eq!(Value::I32(42).typ(), ValueType::I32);
        assert_eq!(Value::I64(42).typ(), ValueType::I64);
        assert_eq!(Value::F32(42.0).typ(), ValueType::F32);
        assert_eq!(Value::F64(42.0).typ(), ValueType::F64);
    }

    #[test]
    fn test_value_conversions() {
        assert_eq!(Value::I32(42).as_i32(), Some(42));
        assert_eq!(Value::I32(42).as_i64(), None);
        assert_eq!(Value::I64(42).as_i64(), Some(42));
        assert_eq!(Value::F32(42.0).as_f32(), Some(42.0));
        assert_eq!(Value::F64(42.0).as_f64(), Some(42.0));
    }

    #[test]
    fn test_bits_eq() {
        // NaNs with identical payloads are bit-equal even though `==` says no.
        let nan = Value::F32(f32::from_bits(0x7fc0_0001));
        assert!(nan.bits_eq(&Value::F32(f32::from_bits(0x7fc0_0001))));
        assert!(!nan.bits_eq(&Value::F32(f32::from_bits(0x7fc0_0002))));

        // Signed zeroes differ in bits.
        assert!(!Value::F64(0.0).bits_eq(&Value::F64(-0.0)));

        // Different types never compare equal.
        assert!(!Value::I32(0).bits_eq(&Value::I64(0)));
    }

    #[test]
    fn test_from_bit_strings() {
        assert_eq!(Value::from_bit_strings("i32", "42").unwrap(), Value::I32(42));
        assert_eq!(
            Value::from_bit_strings("i32", "4294967295").unwrap(),
            Value::I32(-1)
        );
        assert_eq!(
            Value::from_bit_strings("f32", "1109917696").unwrap(),
            Value::F32(42.0)
        );
        assert_eq!(
            Value::from_bit_strings("f64", "4631107791820423168").unwrap(),
            Value::F64(42.0)
        );
        assert!(Value::from_bit_strings("v128", "0").is_err());
        assert!(Value::from_bit_strings("i32", "-1").is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", Value::I32(-1)), "i32:4294967295");
        assert_eq!(format!("{}", Value::I64(42)), "i64:42");
        assert!(format!("{}", Value::F32(42.0)).starts_with("f32:"));
        assert!(format!("{}", Value::F64(42.0)).starts_with("f64:"));
    }
}
