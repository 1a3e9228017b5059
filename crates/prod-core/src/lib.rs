#![deny(warnings)]

//! Core domain models and invariants for the production ratio calculator.
//!
//! This crate defines the exact [`Minutes`] quantity, the duration parser that
//! gates user input, and the serializable chain records shared by the store
//! and the planner.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Characters that switch a duration into clock form (`M.SS`, `M,SS`, `M:SS`).
pub const CLOCK_SEPARATORS: [char; 3] = ['.', ',', ':'];

/// Greatest common divisor (Euclid). `gcd(a, 0) == a`.
pub fn gcd(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}

/// A non-negative, exact number of minutes stored as a reduced fraction.
///
/// Clock durations such as `1:20` are not representable as finite decimals,
/// so the parser hands these out instead of floats.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Minutes {
    numer: u128,
    denom: u128,
}

impl Minutes {
    /// Zero minutes.
    pub const ZERO: Minutes = Minutes { numer: 0, denom: 1 };

    /// Build `numer / denom` minutes, reduced. Returns `None` for a zero denominator.
    pub fn new(numer: u128, denom: u128) -> Option<Self> {
        if denom == 0 {
            return None;
        }
        let g = gcd(numer, denom);
        // g > 0 because denom > 0
        Some(Self {
            numer: numer / g,
            denom: denom / g,
        })
    }

    /// Whole minutes.
    pub fn whole(minutes: u64) -> Self {
        Self {
            numer: minutes as u128,
            denom: 1,
        }
    }

    /// `minutes + seconds / 60`.
    pub fn from_clock(minutes: u64, seconds: u8) -> Self {
        // u64 minutes always fit
        Self::checked_from_clock(minutes as u128, seconds).unwrap_or(Self::ZERO)
    }

    /// `minutes + seconds / 60`, or `None` when the total seconds overflow.
    pub fn checked_from_clock(minutes: u128, seconds: u8) -> Option<Self> {
        let total = minutes.checked_mul(60)?.checked_add(seconds as u128)?;
        Self::new(total, 60)
    }

    /// Exact conversion from a decimal. Negative values yield `None`.
    pub fn from_decimal(value: Decimal) -> Option<Self> {
        if value.is_sign_negative() && !value.is_zero() {
            return None;
        }
        let numer = value.mantissa().unsigned_abs();
        let denom = 10u128.checked_pow(value.scale())?;
        Self::new(numer, denom)
    }

    /// Recover an exact value from decimal minutes held in a float.
    ///
    /// The float is read back through its shortest round-trip representation,
    /// so `0.1` becomes exactly `1/10` rather than its binary expansion.
    /// Negative, NaN and infinite inputs yield `None`.
    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() || value < 0.0 {
            return None;
        }
        let text = value.to_string();
        let dec = Decimal::from_str(&text)
            .ok()
            .or_else(|| <Decimal as rust_decimal::prelude::FromPrimitive>::from_f64(value))?;
        Self::from_decimal(dec)
    }

    /// Like [`Minutes::from_f64`], but every positive finite float yields a
    /// positive value.
    ///
    /// Floats outside the decimal range, or too small for it, are taken from
    /// their binary mantissa and exponent instead. That is exact while the
    /// value fits a `u128` fraction; beyond it the numerator saturates and
    /// tiny values keep their leading mantissa bits over `2^127`.
    pub fn from_f64_lossy(value: f64) -> Option<Self> {
        if !value.is_finite() || value < 0.0 {
            return None;
        }
        match Self::from_f64(value) {
            Some(m) if !m.is_zero() || value == 0.0 => Some(m),
            _ => Some(Self::from_binary(value)),
        }
    }

    fn from_binary(value: f64) -> Self {
        let bits = value.to_bits();
        let exp_bits = ((bits >> 52) & 0x7ff) as i32;
        let frac = (bits & ((1u64 << 52) - 1)) as u128;
        // value = mantissa * 2^exp
        let (mantissa, exp) = if exp_bits == 0 {
            (frac, -1074)
        } else {
            (frac | (1u128 << 52), exp_bits - 1075)
        };
        if mantissa == 0 {
            return Self::ZERO;
        }
        if exp >= 0 {
            let shift = exp as u32;
            let numer = if shift <= mantissa.leading_zeros() {
                mantissa << shift
            } else {
                u128::MAX
            };
            return Self { numer, denom: 1 };
        }
        let shift = exp.unsigned_abs();
        if shift <= 127 {
            return Self::new(mantissa, 1u128 << shift).unwrap_or(Self::ZERO);
        }
        let drop = shift - 127;
        let numer = if drop >= 128 {
            1
        } else {
            // round half up on the dropped bits
            let kept = mantissa >> drop;
            let half = (mantissa >> (drop - 1)) & 1;
            (kept + half).max(1)
        };
        Self::new(numer, 1u128 << 127).unwrap_or(Self::ZERO)
    }

    pub fn numer(&self) -> u128 {
        self.numer
    }

    pub fn denom(&self) -> u128 {
        self.denom
    }

    pub fn is_zero(&self) -> bool {
        self.numer == 0
    }

    /// Decimal minutes (lossy).
    pub fn to_f64(&self) -> f64 {
        self.numer as f64 / self.denom as f64
    }

    /// Whole seconds, when the value is an exact number of seconds.
    pub fn whole_seconds(&self) -> Option<u128> {
        let scaled = self.numer.checked_mul(60)?;
        if scaled % self.denom == 0 {
            Some(scaled / self.denom)
        } else {
            None
        }
    }

    /// Render as `M:SS` when the value is a whole number of seconds,
    /// otherwise as decimal minutes.
    pub fn to_clock_string(&self) -> String {
        match self.whole_seconds() {
            Some(secs) => format!("{}:{:02}", secs / 60, secs % 60),
            None => self.to_f64().to_string(),
        }
    }
}

impl fmt::Display for Minutes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_f64())
    }
}

/// Reasons a duration string is rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DurationError {
    /// Nothing left after trimming.
    #[error("duration cannot be empty")]
    Empty,
    /// Bare minutes that do not parse as a number.
    #[error("duration is not a valid number")]
    InvalidNumber,
    /// Bare minutes below zero.
    #[error("duration cannot be negative")]
    Negative,
    /// Clock form that does not split into exactly two parts.
    #[error("invalid format, use M.SS, M,SS or M:SS (e.g. 1.30 for 1 min 30 sec)")]
    InvalidFormat,
    /// Clock minutes or seconds that are not integers.
    #[error("minutes and seconds must be whole numbers")]
    NotInteger,
    /// Clock minutes below zero.
    #[error("minutes cannot be negative")]
    NegativeMinutes,
    /// Clock seconds outside [0, 59].
    #[error("seconds must be between 0 and 59 (got {0})")]
    SecondsOutOfRange(i64),
    /// Clock seconds written with more than two characters.
    #[error("seconds must have at most 2 digits (0-59)")]
    SecondsTooLong,
    /// Well-formed number too large to represent exactly.
    #[error("duration is too large")]
    TooLarge,
}

fn is_bare_number(text: &str) -> bool {
    text.chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | 'e' | 'E'))
}

/// Parse a user-entered duration into exact minutes.
///
/// Accepts bare minutes (`"2"`, `"15e-1"`) or clock form `M.SS`, `M,SS`,
/// `M:SS`. Any separator selects clock form, so `"0.5"` is five seconds.
pub fn parse_duration(input: &str) -> Result<Minutes, DurationError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(DurationError::Empty);
    }

    if !trimmed.contains(CLOCK_SEPARATORS) {
        if !is_bare_number(trimmed) {
            return Err(DurationError::InvalidNumber);
        }
        let parsed = Decimal::from_str(trimmed).or_else(|_| Decimal::from_scientific(trimmed));
        let value = match parsed {
            Ok(value) => value,
            Err(_) if trimmed.bytes().all(|b| b.is_ascii_digit()) => {
                return Err(DurationError::TooLarge)
            }
            Err(_) => return Err(DurationError::InvalidNumber),
        };
        return Minutes::from_decimal(value).ok_or(DurationError::Negative);
    }

    let parts: Vec<&str> = trimmed.split(CLOCK_SEPARATORS).collect();
    let [minutes_part, seconds_part] = parts.as_slice() else {
        return Err(DurationError::InvalidFormat);
    };
    let minutes_part = minutes_part.trim();
    let seconds_part = seconds_part.trim();

    let minutes = match minutes_part.parse::<i128>() {
        Ok(m) => m,
        Err(_) if !minutes_part.is_empty() && minutes_part.bytes().all(|b| b.is_ascii_digit()) => {
            return Err(DurationError::TooLarge)
        }
        Err(_) => return Err(DurationError::NotInteger),
    };
    let seconds = seconds_part
        .parse::<i64>()
        .map_err(|_| DurationError::NotInteger)?;
    if minutes < 0 {
        return Err(DurationError::NegativeMinutes);
    }
    if !(0..=59).contains(&seconds) {
        return Err(DurationError::SecondsOutOfRange(seconds));
    }
    if seconds_part.chars().count() > 2 {
        return Err(DurationError::SecondsTooLong);
    }

    Minutes::checked_from_clock(minutes as u128, seconds as u8).ok_or(DurationError::TooLarge)
}

/// One building of a saved chain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Building {
    /// Display name, trimmed.
    pub name: String,
    /// Production cycle in decimal minutes (> 0).
    pub duration: f64,
    /// Building count relative to the rest of the chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ratio: Option<u64>,
}

impl Building {
    /// Stored ratio, or the number of cycles completed in `base` when the
    /// record predates stored ratios.
    pub fn effective_ratio(&self, base: u64) -> u64 {
        match self.ratio {
            Some(r) => r,
            None if self.duration > 0.0 => (base as f64 / self.duration).round() as u64,
            None => 0,
        }
    }
}

/// A chain ready to be stored; identity is assigned by the store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewChain {
    pub name: String,
    pub buildings: Vec<Building>,
    /// Shortest cycle (minutes) in which every building completes whole cycles.
    pub base: u64,
}

/// A persisted production chain. Immutable once created.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductionChain {
    pub id: String,
    pub name: String,
    pub buildings: Vec<Building>,
    pub base: u64,
    /// Creation time, milliseconds since the UNIX epoch.
    pub created_at: i64,
}

impl ProductionChain {
    pub fn from_new(chain: NewChain, id: String, created_at: i64) -> Self {
        Self {
            id,
            name: chain.name,
            buildings: chain.buildings,
            base: chain.base,
            created_at,
        }
    }
}

/// Validation errors for chain records.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    /// Chain name is empty or whitespace.
    #[error("chain name must not be blank")]
    BlankChainName,
    /// A chain needs at least one building.
    #[error("chain has no buildings")]
    NoBuildings,
    /// Building name is empty or whitespace.
    #[error("building {0} has a blank name")]
    BlankBuildingName(usize),
    /// Duration must be finite and strictly positive.
    #[error("building {0} has a non-positive duration")]
    NonPositiveDuration(usize),
    /// Every building of a new chain carries its computed ratio.
    #[error("building {0} has no ratio")]
    MissingRatio(usize),
}

/// Validate a chain before it is stored.
pub fn validate_new_chain(chain: &NewChain) -> Result<(), ValidationError> {
    if chain.name.trim().is_empty() {
        return Err(ValidationError::BlankChainName);
    }
    if chain.buildings.is_empty() {
        return Err(ValidationError::NoBuildings);
    }
    for (i, b) in chain.buildings.iter().enumerate() {
        if b.name.trim().is_empty() {
            return Err(ValidationError::BlankBuildingName(i));
        }
        if !(b.duration.is_finite() && b.duration > 0.0) {
            return Err(ValidationError::NonPositiveDuration(i));
        }
        if b.ratio.is_none() {
            return Err(ValidationError::MissingRatio(i));
        }
    }
    Ok(())
}
