//! Numeric instruction semantics that need more than a builtin: trapping
//! division and remainder, checked float-to-integer truncation, and the
//! IEEE-754 float operations whose NaN behaviour differs from Rust's.

use super::Trap;

/// Signed division. Traps on a zero divisor and on `MIN / -1`.
pub fn div_s32(lhs: i32, rhs: i32) -> Result<i32, Trap> {
    if rhs == 0 {
        return Err(Trap::IntegerDivideByZero);
    }
    lhs.checked_div(rhs).ok_or(Trap::IntegerOverflow)
}

pub fn div_s64(lhs: i64, rhs: i64) -> Result<i64, Trap> {
    if rhs == 0 {
        return Err(Trap::IntegerDivideByZero);
    }
    lhs.checked_div(rhs).ok_or(Trap::IntegerOverflow)
}

/// Unsigned division. Traps on a zero divisor.
pub fn div_u32(lhs: u32, rhs: u32) -> Result<u32, Trap> {
    lhs.checked_div(rhs).ok_or(Trap::IntegerDivideByZero)
}

pub fn div_u64(lhs: u64, rhs: u64) -> Result<u64, Trap> {
    lhs.checked_div(rhs).ok_or(Trap::IntegerDivideByZero)
}

/// Signed remainder. Traps on a zero divisor; `MIN % -1` is 0, not a trap.
pub fn rem_s32(lhs: i32, rhs: i32) -> Result<i32, Trap> {
    if rhs == 0 {
        return Err(Trap::IntegerDivideByZero);
    }
    Ok(lhs.wrapping_rem(rhs))
}

pub fn rem_s64(lhs: i64, rhs: i64) -> Result<i64, Trap> {
    if rhs == 0 {
        return Err(Trap::IntegerDivideByZero);
    }
    Ok(lhs.wrapping_rem(rhs))
}

pub fn rem_u32(lhs: u32, rhs: u32) -> Result<u32, Trap> {
    lhs.checked_rem(rhs).ok_or(Trap::IntegerDivideByZero)
}

pub fn rem_u64(lhs: u64, rhs: u64) -> Result<u64, Trap> {
    lhs.checked_rem(rhs).ok_or(Trap::IntegerDivideByZero)
}

// Float-to-integer truncation. NaN is an invalid conversion; a truncated
// value outside the target range is an integer overflow. The range checks
// compare against the exact representable bounds: the lower bound is
// itself representable, the upper bound is the first power of two past
// the maximum.

pub fn trunc_f32_to_i32(value: f32) -> Result<i32, Trap> {
    if value.is_nan() {
        return Err(Trap::InvalidConversionToInteger);
    }
    let t = value.trunc();
    if t < -2147483648.0 || t >= 2147483648.0 {
        return Err(Trap::IntegerOverflow);
    }
    Ok(t as i32)
}

pub fn trunc_f32_to_u32(value: f32) -> Result<u32, Trap> {
    if value.is_nan() {
        return Err(Trap::InvalidConversionToInteger);
    }
    let t = value.trunc();
    if t <= -1.0 || t >= 4294967296.0 {
        return Err(Trap::IntegerOverflow);
    }
    Ok(t as u32)
}

pub fn trunc_f64_to_i32(value: f64) -> Result<i32, Trap> {
    if value.is_nan() {
        return Err(Trap::InvalidConversionToInteger);
    }
    let t = value.trunc();
    if t < -2147483648.0 || t >= 2147483648.0 {
        return Err(Trap::IntegerOverflow);
    }
    Ok(t as i32)
}

pub fn trunc_f64_to_u32(value: f64) -> Result<u32, Trap> {
    if value.is_nan() {
        return Err(Trap::InvalidConversionToInteger);
    }
    let t = value.trunc();
    if t <= -1.0 || t >= 4294967296.0 {
        return Err(Trap::IntegerOverflow);
    }
    Ok(t as u32)
}

pub fn trunc_f32_to_i64(value: f32) -> Result<i64, Trap> {
    if value.is_nan() {
        return Err(Trap::InvalidConversionToInteger);
    }
    let t = value.trunc();
    if t < -9223372036854775808.0 || t >= 9223372036854775808.0 {
        return Err(Trap::IntegerOverflow);
    }
    Ok(t as i64)
}

pub fn trunc_f32_to_u64(value: f32) -> Result<u64, Trap> {
    if value.is_nan() {
        return Err(Trap::InvalidConversionToInteger);
    }
    let t = value.trunc();
    if t <= -1.0 || t >= 18446744073709551616.0 {
        return Err(Trap::IntegerOverflow);
    }
    Ok(t as u64)
}

pub fn trunc_f64_to_i64(value: f64) -> Result<i64, Trap> {
    if value.is_nan() {
        return Err(Trap::InvalidConversionToInteger);
    }
    let t = value.trunc();
    if t < -9223372036854775808.0 || t >= 9223372036854775808.0 {
        return Err(Trap::IntegerOverflow);
    }
    Ok(t as i64)
}

pub fn trunc_f64_to_u64(value: f64) -> Result<u64, Trap> {
    if value.is_nan() {
        return Err(Trap::InvalidConversionToInteger);
    }
    let t = value.trunc();
    if t <= -1.0 || t >= 18446744073709551616.0 {
        return Err(Trap::IntegerOverflow);
    }
    Ok(t as u64)
}

// Float min/max. Rust's f32::min ignores NaN operands; WebAssembly
// requires a NaN result (produced here as the canonical quiet NaN) and
// orders -0.0 below +0.0.

const CANONICAL_NAN_F32: u32 = 0x7fc0_0000;
const CANONICAL_NAN_F64: u64 = 0x7ff8_0000_0000_0000;

pub fn fmin32(lhs: f32, rhs: f32) -> f32 {
    if lhs.is_nan() || rhs.is_nan() {
        f32::from_bits(CANONICAL_NAN_F32)
    } else if lhs == rhs {
        // Picks -0.0 over +0.0.
        f32::from_bits(lhs.to_bits() | rhs.to_bits())
    } else if lhs < rhs {
        lhs
    } else {
        rhs
    }
}

pub fn fmax32(lhs: f32, rhs: f32) -> f32 {
    if lhs.is_nan() || rhs.is_nan() {
        f32::from_bits(CANONICAL_NAN_F32)
    } else if lhs == rhs {
        // Picks +0.0 over -0.0.
        f32::from_bits(lhs.to_bits() & rhs.to_bits())
    } else if lhs > rhs {
        lhs
    } else {
        rhs
    }
}

pub fn fmin64(lhs: f64, rhs: f64) -> f64 {
    if lhs.is_nan() || rhs.is_nan() {
        f64::from_bits(CANONICAL_NAN_F64)
    } else if lhs == rhs {
        f64::from_bits(lhs.to_bits() | rhs.to_bits())
    } else if lhs < rhs {
        lhs
    } else {
        rhs
    }
}

pub fn fmax64(lhs: f64, rhs: f64) -> f64 {
    if lhs.is_nan() || rhs.is_nan() {
        f64::from_bits(CANONICAL_NAN_F64)
    } else if lhs == rhs {
        f64::from_bits(lhs.to_bits() & rhs.to_bits())
    } else if lhs > rhs {
        lhs
    } else {
        rhs
    }
}

/// Round to nearest, ties to even. `round_ties_even` implements the IEEE
/// 754 roundTiesToEven attribute directly.
pub fn fnearest32(value: f32) -> f32 {
    value.round_ties_even()
}

pub fn fnearest64(value: f64) -> f64 {
    value.round_ties_even()
}

pub fn fcopysign32(lhs: f32, rhs: f32) -> f32 {
    lhs.copysign(rhs)
}

pub fn fcopysign64(lhs: f64, rhs: f64) -> f64 {
    lhs.copysign(rhs)
}
