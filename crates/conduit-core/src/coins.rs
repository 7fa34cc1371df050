//! Minimal coin amounts, enough to validate, compare, and split fees.
//!
//! Moving funds is the ledger's job. This module only does arithmetic.
//! Canonical text form: `"100stake,25uatom"`, denominations sorted, no duplicates.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ServiceError;

/// Basis-point denominator used by discounts and tax rates.
pub const BPS_DENOMINATOR: u128 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Coin {
    pub denom: String,
    pub amount: u128,
}

impl Coin {
    pub fn new(amount: u128, denom: impl Into<String>) -> Self {
        Self {
            denom: denom.into(),
            amount,
        }
    }
}

impl fmt::Display for Coin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.denom)
    }
}

/// `[a-z][a-z0-9/]{2,127}`
pub fn is_valid_denom(denom: &str) -> bool {
    let mut chars = denom.chars();
    let first_ok = chars.next().is_some_and(|c| c.is_ascii_lowercase());
    first_ok
        && (3..=128).contains(&denom.len())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '/')
}

impl FromStr for Coin {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| ServiceError::InvalidCoins(format!("missing denomination in {s:?}")))?;
        let (amount, denom) = s.split_at(split);
        if amount.is_empty() {
            return Err(ServiceError::InvalidCoins(format!("missing amount in {s:?}")));
        }
        if !is_valid_denom(denom) {
            return Err(ServiceError::InvalidCoins(format!("invalid denomination {denom:?}")));
        }
        let amount = amount
            .parse::<u128>()
            .map_err(|e| ServiceError::InvalidCoins(format!("invalid amount in {s:?}: {e}")))?;
        Ok(Coin::new(amount, denom))
    }
}

/// A set of coins. Kept sorted by denomination; zero amounts are preserved so a
/// caller-supplied cap of `0stake` still round-trips.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Coins(Vec<Coin>);

impl Coins {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Build from arbitrary coins: sorts, and merges repeated denominations.
    pub fn from_coins(coins: impl IntoIterator<Item = Coin>) -> Self {
        let mut out = Coins::new();
        for c in coins {
            out.add_coin(c);
        }
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = &Coin> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when every amount is zero (including the empty set).
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|c| c.amount == 0)
    }

    /// Non-empty and every amount strictly positive.
    pub fn is_all_positive(&self) -> bool {
        !self.0.is_empty() && self.0.iter().all(|c| c.amount > 0)
    }

    pub fn amount_of(&self, denom: &str) -> u128 {
        self.0
            .iter()
            .find(|c| c.denom == denom)
            .map(|c| c.amount)
            .unwrap_or(0)
    }

    fn add_coin(&mut self, coin: Coin) {
        match self.0.binary_search_by(|c| c.denom.as_str().cmp(&coin.denom)) {
            Ok(i) => self.0[i].amount = self.0[i].amount.saturating_add(coin.amount),
            Err(i) => self.0.insert(i, coin),
        }
    }

    pub fn add(&self, other: &Coins) -> Coins {
        let mut out = self.clone();
        for c in other.iter() {
            out.add_coin(c.clone());
        }
        out
    }

    /// `self - other`, or `None` if any denomination would go negative.
    /// Denominations that reach zero are dropped.
    pub fn checked_sub(&self, other: &Coins) -> Option<Coins> {
        let mut out = self.clone();
        for c in other.iter() {
            let i = out.0.iter().position(|x| x.denom == c.denom);
            match i {
                Some(i) => {
                    out.0[i].amount = out.0[i].amount.checked_sub(c.amount)?;
                }
                None if c.amount == 0 => {}
                None => return None,
            }
        }
        out.0.retain(|c| c.amount > 0);
        Some(out)
    }

    /// Every denomination in `other` is covered by at least that amount here.
    pub fn is_all_gte(&self, other: &Coins) -> bool {
        other.iter().all(|c| self.amount_of(&c.denom) >= c.amount)
    }

    /// Every denomination here is covered by `cap`; denominations absent from
    /// `cap` only pass when zero.
    pub fn is_all_lte(&self, cap: &Coins) -> bool {
        cap.is_all_gte(self)
    }

    pub fn mul(&self, factor: u128) -> Coins {
        Coins(
            self.0
                .iter()
                .map(|c| Coin::new(c.amount.saturating_mul(factor), c.denom.clone()))
                .collect(),
        )
    }

    /// Scale by `bps / 10_000`, rounding down.
    pub fn mul_bps(&self, bps: u32) -> Coins {
        Coins(
            self.0
                .iter()
                .map(|c| {
                    Coin::new(
                        c.amount.saturating_mul(bps as u128) / BPS_DENOMINATOR,
                        c.denom.clone(),
                    )
                })
                .collect(),
        )
    }

    /// Per-denomination maximum of both sets.
    pub fn max(&self, other: &Coins) -> Coins {
        let mut out = self.clone();
        for c in other.iter() {
            match out.0.iter_mut().find(|x| x.denom == c.denom) {
                Some(x) => x.amount = x.amount.max(c.amount),
                None => out.add_coin(c.clone()),
            }
        }
        out
    }
}

impl fmt::Display for Coins {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(Coin::to_string).collect();
        f.write_str(&parts.join(","))
    }
}

impl FromStr for Coins {
    type Err = ServiceError;

    /// Strict parse: denominations must be unique. Empty input is the empty set.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Coins::new());
        }
        let mut coins: Vec<Coin> = s.split(',').map(str::parse).collect::<Result<_, _>>()?;
        coins.sort_by(|a, b| a.denom.cmp(&b.denom));
        if coins.windows(2).any(|w| w[0].denom == w[1].denom) {
            return Err(ServiceError::InvalidCoins(format!("duplicate denomination in {s:?}")));
        }
        Ok(Coins(coins))
    }
}

impl Serialize for Coins {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Coins {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
