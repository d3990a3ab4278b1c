//! Minimal-encoding integers used by script arithmetic.

use crate::interpreter::ScriptError;

/// Operands are limited to four bytes; lock-time checks allow five.
pub const DEFAULT_MAX_NUM_SIZE: usize = 4;
pub const LOCKTIME_MAX_NUM_SIZE: usize = 5;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct ScriptNum(i64);

impl ScriptNum {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn decode(
        data: &[u8],
        require_minimal: bool,
        max_size: usize,
    ) -> Result<Self, ScriptError> {
        if data.len() > max_size {
            return Err(ScriptError::NumOverflow);
        }
        if require_minimal && !is_minimally_encoded(data) {
            return Err(ScriptError::NumNotMinimal);
        }
        if data.is_empty() {
            return Ok(Self(0));
        }

        let mut result: i64 = 0;
        for (i, byte) in data.iter().enumerate() {
            result |= i64::from(*byte) << (8 * i);
        }
        let last = data[data.len() - 1];
        if last & 0x80 != 0 {
            let mask = !(0x80i64 << (8 * (data.len() - 1)));
            return Ok(Self(-(result & mask)));
        }
        Ok(Self(result))
    }

    pub fn value(self) -> i64 {
        self.0
    }

    /// The value clamped into `i32`, as consumed by stack-index and count operands.
    pub fn to_i32(self) -> i32 {
        self.0.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
    }

    pub fn encode(self) -> Vec<u8> {
        let value = self.0;
        if value == 0 {
            return Vec::new();
        }
        let negative = value < 0;
        let mut abs = value.unsigned_abs();
        let mut result = Vec::with_capacity(9);
        while abs > 0 {
            result.push((abs & 0xff) as u8);
            abs >>= 8;
        }
        if let Some(last) = result.last_mut() {
            if *last & 0x80 != 0 {
                result.push(if negative { 0x80 } else { 0 });
            } else if negative {
                *last |= 0x80;
            }
        }
        result
    }
}

fn is_minimally_encoded(data: &[u8]) -> bool {
    let Some(last) = data.last() else {
        return true;
    };
    // A last byte that carries only the sign is allowed when the byte before
    // it would otherwise have its high bit misread as the sign.
    if last & 0x7f == 0 {
        return data.len() > 1 && data[data.len() - 2] & 0x80 != 0;
    }
    true
}
