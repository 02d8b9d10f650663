//! Exact fixed-point numbers.
//!
//! `Decimal` is the row-side value: an unscaled 128-bit coefficient and a
//! decimal scale, able to hold any `decimal(38, s)` literal. `Decimal128` is
//! the document-side value, restricted to 34 significant digits. All
//! arithmetic stays in integers; no binary floating point is involved.

use std::fmt;
use std::str::FromStr;

use snafu::prelude::*;

use crate::error::{DecimalError, InvalidLiteralSnafu, TooManyDigitsSnafu};

/// Significant digits representable by the document database's decimal type.
pub const DECIMAL128_DIGITS: u32 = 34;

/// Largest coefficient or scale accepted for row-side decimals.
pub const MAX_DECIMAL_DIGITS: u32 = 38;

/// Fixed-point value `unscaled * 10^-scale`.
#[derive(Debug, Clone, Copy)]
pub struct Decimal {
    unscaled: i128,
    scale: u32,
}

impl Decimal {
    /// Create a decimal from an unscaled coefficient and scale.
    pub const fn new(unscaled: i128, scale: u32) -> Self {
        Self { unscaled, scale }
    }

    pub fn unscaled(&self) -> i128 {
        self.unscaled
    }

    pub fn scale(&self) -> u32 {
        self.scale
    }

    /// Number of significant digits in the coefficient (zero counts as one).
    pub fn precision(&self) -> u32 {
        digit_count(self.unscaled.unsigned_abs())
    }

    /// Number of digits left of the decimal point (zero for `|x| < 1`).
    pub fn integer_digits(&self) -> u32 {
        if self.unscaled == 0 {
            return 0;
        }
        self.precision().saturating_sub(self.scale)
    }

    /// Round to at most `scale` fractional digits, half away from zero.
    ///
    /// Values that already have `scale` or fewer fractional digits are
    /// returned unchanged, so no padding zeros are introduced.
    pub fn round_half_up(self, scale: u32) -> Self {
        if self.scale <= scale {
            return self;
        }
        if self.scale - scale > MAX_DECIMAL_DIGITS {
            // |unscaled| < 2^127 is far below half of 10^39
            return Self { unscaled: 0, scale };
        }
        let divisor = 10u128.pow(self.scale - scale);
        let magnitude = self.unscaled.unsigned_abs();
        let mut quotient = magnitude / divisor;
        if (magnitude % divisor) * 2 >= divisor {
            quotient += 1;
        }
        // quotient <= magnitude / 10 + 1, which always fits back into i128
        let quotient = quotient as i128;
        Self {
            unscaled: if self.unscaled < 0 { -quotient } else { quotient },
            scale,
        }
    }

    /// Drop trailing fractional zeros without changing the value.
    pub fn strip_trailing_zeros(self) -> Self {
        let mut unscaled = self.unscaled;
        let mut scale = self.scale;
        while scale > 0 && unscaled % 10 == 0 {
            unscaled /= 10;
            scale -= 1;
        }
        Self { unscaled, scale }
    }

    /// Convert to the document decimal type if the value fits in 34 digits.
    ///
    /// Trailing fractional zeros are removed only when needed to fit, and only
    /// exactly; a value that would require rounding yields `None`.
    pub fn to_decimal128(self) -> Option<Decimal128> {
        if self.precision() <= DECIMAL128_DIGITS {
            return Some(Decimal128(self));
        }
        let stripped = self.strip_trailing_zeros();
        (stripped.precision() <= DECIMAL128_DIGITS).then_some(Decimal128(stripped))
    }
}

impl PartialEq for Decimal {
    fn eq(&self, other: &Self) -> bool {
        let a = self.strip_trailing_zeros();
        let b = other.strip_trailing_zeros();
        a.unscaled == b.unscaled && a.scale == b.scale
    }
}

impl Eq for Decimal {}

impl FromStr for Decimal {
    type Err = DecimalError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let (negative, body) = match input.as_bytes().first() {
            Some(b'-') => (true, &input[1..]),
            Some(b'+') => (false, &input[1..]),
            _ => (false, input),
        };
        let (int_part, frac_part) = body.split_once('.').unwrap_or((body, ""));

        ensure!(
            !(int_part.is_empty() && frac_part.is_empty())
                && int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()),
            InvalidLiteralSnafu { input }
        );

        let digits = int_part.len() + frac_part.len();
        let significant = int_part
            .bytes()
            .chain(frac_part.bytes())
            .skip_while(|b| *b == b'0')
            .count();
        ensure!(
            significant as u32 <= MAX_DECIMAL_DIGITS
                && frac_part.len() as u32 <= MAX_DECIMAL_DIGITS
                && digits > 0,
            TooManyDigitsSnafu { input }
        );

        let mut unscaled: i128 = 0;
        for b in int_part.bytes().chain(frac_part.bytes()) {
            unscaled = unscaled * 10 + i128::from(b - b'0');
        }

        Ok(Self {
            unscaled: if negative { -unscaled } else { unscaled },
            scale: frac_part.len() as u32,
        })
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = self.unscaled.unsigned_abs().to_string();
        let sign = if self.unscaled < 0 { "-" } else { "" };
        let scale = self.scale as usize;
        if scale == 0 {
            return write!(f, "{sign}{digits}");
        }
        if digits.len() > scale {
            let (int, frac) = digits.split_at(digits.len() - scale);
            write!(f, "{sign}{int}.{frac}")
        } else {
            write!(f, "{sign}0.{digits:0>scale$}")
        }
    }
}

impl From<i64> for Decimal {
    fn from(value: i64) -> Self {
        Self::new(i128::from(value), 0)
    }
}

/// Decimal value as persisted in a document, at most 34 significant digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decimal128(Decimal);

impl Decimal128 {
    /// The exact value carried by this decimal.
    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Decimal128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

fn digit_count(value: u128) -> u32 {
    if value == 0 { 1 } else { value.ilog10() + 1 }
}
