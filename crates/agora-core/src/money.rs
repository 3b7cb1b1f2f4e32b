use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::MarketError;

/// Micro-credits per cent (1 credit = 100 cents = 1_000_000 micro-credits).
const MICRO_PER_CENT: i128 = 10_000;

/// USDC base units per cent (USDC has 6 fractional digits, credits have 2).
const UNITS_PER_CENT: u64 = 10_000;

// ── Credits ──────────────────────────────────────────────────────────────────

/// Platform credits: fixed-point with two fractional digits, stored as whole
/// cents in an i64. All monetary arithmetic is integer arithmetic; any
/// rounding is an explicit round-up-to-cent at the fee boundary.
///
/// Serialized as a decimal string (`"28.00"`) on every wire surface.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Credits(i64);

impl Credits {
    pub const ZERO: Credits = Credits(0);

    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    pub const fn cents(self) -> i64 {
        self.0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn checked_add(self, other: Credits) -> Option<Credits> {
        self.0.checked_add(other.0).map(Credits)
    }

    pub fn checked_sub(self, other: Credits) -> Option<Credits> {
        self.0.checked_sub(other.0).map(Credits)
    }

    /// Micro-credit view used by the fee calculator's intermediate math.
    pub fn to_micro(self) -> i128 {
        self.0 as i128 * MICRO_PER_CENT
    }

    /// Collapse a non-negative micro-credit amount back to cents, rounding up.
    pub fn from_micro_ceil(micro: u128) -> Credits {
        let cents = micro.div_ceil(MICRO_PER_CENT as u128);
        Credits(cents as i64)
    }

    /// `bps` basis points of this amount, rounded up to the next cent.
    pub fn percent_bps_ceil(self, bps: u32) -> Credits {
        let micro = self.to_micro().unsigned_abs() * bps as u128 / 10_000;
        Credits::from_micro_ceil(micro)
    }
}

impl fmt::Display for Credits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl fmt::Debug for Credits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credits({self})")
    }
}

impl FromStr for Credits {
    type Err = MarketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || MarketError::Validation(format!("invalid credit amount: {s:?}"));
        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let (whole, frac) = match digits.split_once('.') {
            Some((w, f)) => (w, f),
            None => (digits, ""),
        };
        if whole.is_empty() || frac.len() > 2 {
            return Err(bad());
        }
        if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(bad());
        }
        let whole: i64 = whole.parse().map_err(|_| bad())?;
        let mut frac_cents: i64 = if frac.is_empty() { 0 } else { frac.parse().map_err(|_| bad())? };
        if frac.len() == 1 {
            frac_cents *= 10;
        }
        let cents = whole
            .checked_mul(100)
            .and_then(|c| c.checked_add(frac_cents))
            .ok_or_else(bad)?;
        Ok(Credits(if negative { -cents } else { cents }))
    }
}

impl Serialize for Credits {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Credits {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(|e: MarketError| de::Error::custom(e.to_string()))
    }
}

// ── UsdcUnits ────────────────────────────────────────────────────────────────

/// On-chain USDC amount in base units (6 fractional digits).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct UsdcUnits(pub u64);

impl UsdcUnits {
    /// Convert to credits at 1:1 value. Sub-cent dust is dropped.
    pub fn to_credits(self) -> Credits {
        Credits::from_cents((self.0 / UNITS_PER_CENT) as i64)
    }

    /// Convert credits to on-chain units at 1:1 value.
    pub fn from_credits(credits: Credits) -> Self {
        UsdcUnits(credits.cents() as u64 * UNITS_PER_CENT)
    }
}

impl fmt::Display for UsdcUnits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}", self.0 / 1_000_000, self.0 % 1_000_000)
    }
}

impl fmt::Debug for UsdcUnits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UsdcUnits({self})")
    }
}
