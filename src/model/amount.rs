//! Monetary amounts in minor units.
//!
//! Amounts arrive as decimal text (`"12.50"`) or JSON numbers (`12.5`) and are
//! held as whole cents so that arithmetic and equality are exact.
//!
//! JSON numbers that serialize in exponent form (`1.5e16`, `1e-7`) are expanded
//! to plain decimal text first and then follow the same rules as strings: more
//! than two fraction digits is `TooPrecise` and more than `i64` cents is
//! `Overflow`. Decimal text itself never accepts an exponent.

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};

/// Errors that can occur while parsing an amount.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("amount is empty")]
    Empty,

    #[error("amount contains invalid characters: {0}")]
    InvalidDigit(String),

    #[error("amount has more than two fraction digits: {0}")]
    TooPrecise(String),

    #[error("amount out of range: {0}")]
    Overflow(String),
}

/// A signed amount of money, stored as cents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount {
    cents: i64,
}

impl Amount {
    pub const ZERO: Amount = Amount { cents: 0 };

    pub const fn from_cents(cents: i64) -> Self {
        Self { cents }
    }

    pub const fn cents(self) -> i64 {
        self.cents
    }

    pub const fn is_negative(self) -> bool {
        self.cents < 0
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (negative, unsigned) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
        };

        let (whole, fraction) = unsigned.split_once('.').unwrap_or((unsigned, ""));
        if whole.is_empty() && fraction.is_empty() {
            return Err(AmountError::Empty);
        }
        if !whole.bytes().chain(fraction.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(AmountError::InvalidDigit(s.to_string()));
        }
        if fraction.len() > 2 {
            return Err(AmountError::TooPrecise(s.to_string()));
        }

        let overflow = || AmountError::Overflow(s.to_string());
        let whole_cents = if whole.is_empty() {
            0
        } else {
            whole
                .parse::<i64>()
                .map_err(|_| overflow())?
                .checked_mul(100)
                .ok_or_else(overflow)?
        };
        let fraction_cents = match fraction.len() {
            0 => 0,
            1 => fraction.parse::<i64>().map_err(|_| overflow())? * 10,
            _ => fraction.parse::<i64>().map_err(|_| overflow())?,
        };

        let cents = whole_cents
            .checked_add(fraction_cents)
            .ok_or_else(overflow)?;
        Ok(Self::from_cents(if negative { -cents } else { cents }))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.cents < 0 { "-" } else { "" };
        let abs = self.cents.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(serde_json::Number),
        }

        let text = match Raw::deserialize(deserializer)? {
            Raw::Text(text) => text,
            Raw::Number(number) => {
                expand_exponent(&number.to_string()).map_err(de::Error::custom)?
            }
        };
        text.parse().map_err(de::Error::custom)
    }
}

/// Beyond this many integer digits the amount cannot fit in `i64` cents.
const MAX_EXPANDED_DIGITS: i64 = 24;

/// Rewrite `1.5e3` as `1500`. Text without an exponent is returned unchanged.
fn expand_exponent(text: &str) -> Result<String, AmountError> {
    let Some((mantissa, exponent)) = text.split_once(['e', 'E']) else {
        return Ok(text.to_string());
    };
    let exponent: i64 = exponent
        .parse()
        .map_err(|_| AmountError::InvalidDigit(text.to_string()))?;

    let (sign, unsigned) = match mantissa.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", mantissa),
    };
    let (whole, fraction) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    let digits = format!("{}{}", whole, fraction);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AmountError::InvalidDigit(text.to_string()));
    }

    let point = whole.len() as i64 + exponent;
    if point > MAX_EXPANDED_DIGITS {
        return Err(AmountError::Overflow(text.to_string()));
    }
    if point < -MAX_EXPANDED_DIGITS {
        return Err(AmountError::TooPrecise(text.to_string()));
    }

    let expanded = if point <= 0 {
        format!("0.{}{}", "0".repeat(point.unsigned_abs() as usize), digits)
    } else if point as usize >= digits.len() {
        format!("{}{}", digits, "0".repeat(point as usize - digits.len()))
    } else {
        let (int, frac) = digits.split_at(point as usize);
        format!("{}.{}", int, frac)
    };

    // "1.50e0" must not count the trailing zero as precision.
    let expanded = match expanded.split_once('.') {
        Some((int, frac)) => {
            let frac = frac.trim_end_matches('0');
            if frac.is_empty() {
                int.to_string()
            } else {
                format!("{}.{}", int, frac)
            }
        }
        None => expanded,
    };
    Ok(format!("{}{}", sign, expanded))
}
