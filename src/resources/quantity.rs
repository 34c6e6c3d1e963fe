//! Kubernetes resource quantity arithmetic
//!
//! Quantities are compared by value, not by spelling: `1Gi` equals
//! `1024Mi` and `500m` equals `0.5`. Values are held as nano-units so
//! the smallest suffix (`n`) stays integral.

use std::cmp::Ordering;

use crate::controller::error::{Error, Result};

const NANOS_EXPONENT: i32 = 9;
const GIB: i128 = 1 << 30;

/// A parsed quantity, in nano-units of the base unit
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ParsedQuantity(i128);

impl ParsedQuantity {
    pub const ZERO: Self = Self(0);

    /// Parse a quantity string such as `10Gi`, `500m`, `1.5`, or `1e3`
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = || Error::ValidationError(format!("invalid quantity: '{}'", input));

        let s = input.trim();
        let number_end = s
            .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '+' || c == '-'))
            .unwrap_or(s.len());
        let (number, suffix) = s.split_at(number_end);

        let (negative, number) = match number.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, number.strip_prefix('+').unwrap_or(number)),
        };
        if number.is_empty() || number.contains(['+', '-']) {
            return Err(invalid());
        }

        let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
        if whole.is_empty() && fraction.is_empty() {
            return Err(invalid());
        }
        let digits = format!("{}{}", whole, fraction);
        if !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        let mantissa: i128 = digits.parse().map_err(|_| invalid())?;

        let (binary_multiplier, decimal_exponent) = suffix_scale(suffix).ok_or_else(invalid)?;
        let exponent = NANOS_EXPONENT
            .checked_add(decimal_exponent)
            .and_then(|e| e.checked_sub(fraction.len() as i32))
            .ok_or_else(invalid)?;

        let scaled = mantissa.checked_mul(binary_multiplier).ok_or_else(invalid)?;
        let value = match exponent.cmp(&0) {
            Ordering::Equal => scaled,
            Ordering::Greater => {
                let factor = 10i128.checked_pow(exponent as u32).ok_or_else(invalid)?;
                scaled.checked_mul(factor).ok_or_else(invalid)?
            }
            Ordering::Less => match 10i128.checked_pow(exponent.unsigned_abs()) {
                Some(divisor) => scaled / divisor,
                None => 0,
            },
        };

        Ok(Self(if negative { -value } else { value }))
    }

    /// Whole gibibytes, rounded down
    pub fn as_gib(&self) -> Result<i64> {
        let nanos_per_gib = GIB * 10i128.pow(NANOS_EXPONENT as u32);
        i64::try_from(self.0.div_euclid(nanos_per_gib)).map_err(|_| {
            Error::ValidationError(format!("quantity of {} nano-units is too large", self.0))
        })
    }
}

/// Binary multiplier and decimal exponent of a quantity suffix
fn suffix_scale(suffix: &str) -> Option<(i128, i32)> {
    let scale = match suffix {
        "" => (1, 0),
        "n" => (1, -9),
        "u" => (1, -6),
        "m" => (1, -3),
        "k" => (1, 3),
        "M" => (1, 6),
        "G" => (1, 9),
        "T" => (1, 12),
        "P" => (1, 15),
        "E" => (1, 18),
        "Ki" => (1 << 10, 0),
        "Mi" => (1 << 20, 0),
        "Gi" => (1 << 30, 0),
        "Ti" => (1 << 40, 0),
        "Pi" => (1 << 50, 0),
        "Ei" => (1 << 60, 0),
        _ => {
            let exponent = suffix
                .strip_prefix('e')
                .or_else(|| suffix.strip_prefix('E'))?;
            (1, exponent.parse().ok()?)
        }
    };
    Some(scale)
}

/// Compare two quantity strings by value, falling back to spelling when
/// either side does not parse
pub fn quantities_equal(a: &str, b: &str) -> bool {
    match (ParsedQuantity::parse(a), ParsedQuantity::parse(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Whole gibibytes of a quantity string, rounded down
pub fn quantity_to_gib(quantity: &str) -> Result<i64> {
    ParsedQuantity::parse(quantity)?.as_gib()
}
