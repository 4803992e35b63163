//! Amount type for handling monetary values.
//!
//! This module provides the `Amount` type which wraps `Decimal`. Amounts are written to JSON as
//! plain numbers, and they are lenient when read: numbers, numeric strings and `null` (which
//! becomes zero) are all accepted, because the remote store has nullable numeric columns and
//! imported data is often loosely typed.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::error::Error;
use std::fmt;
use std::fmt::{Debug, Display, Formatter};
use std::iter::Sum;
use std::ops::Add;
use std::str::FromStr;

/// Represents a money amount.
///
/// # Examples
///
/// ```
/// # use ledger_sync::model::Amount;
/// # use std::str::FromStr;
/// let amount = Amount::from_str("12.5").unwrap();
/// assert_eq!(amount.to_string(), "12.50");
/// assert_eq!(amount.doubled().to_string(), "25.00");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(Decimal);

impl Amount {
    pub const ZERO: Amount = Amount(Decimal::ZERO);

    /// Creates a new Amount from a Decimal value.
    pub const fn new(value: Decimal) -> Self {
        Self(value)
    }

    /// Returns the underlying Decimal value.
    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Returns true if the amount is zero.
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Returns true if the amount is positive.
    pub fn is_positive(&self) -> bool {
        !self.is_zero() && self.0.is_sign_positive()
    }

    /// Returns true if the amount is negative.
    pub fn is_negative(&self) -> bool {
        !self.is_zero() && self.0.is_sign_negative()
    }

    /// Twice this amount. A shared expense costs the household double what the user pays.
    /// Saturates at the largest representable amount.
    pub fn doubled(&self) -> Self {
        Self(self.0.saturating_mul(Decimal::TWO))
    }

    /// Twice this amount, or `None` when that is not representable.
    pub fn checked_doubled(&self) -> Option<Self> {
        self.0.checked_mul(Decimal::TWO).map(Self)
    }

    pub fn checked_add(&self, rhs: Amount) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    /// Sums `amounts`, or returns `None` when the total is not representable.
    pub fn checked_sum<'a>(amounts: impl IntoIterator<Item = &'a Amount>) -> Option<Self> {
        amounts
            .into_iter()
            .try_fold(Amount::ZERO, |acc, a| acc.checked_add(*a))
    }
}

/// An error that can occur when parsing strings into `Amount` values.
pub struct AmountError(rust_decimal::Error);

impl Debug for AmountError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

impl Display for AmountError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Error for AmountError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.0)
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Ok(Amount::default());
        }
        // Scientific notation shows up when amounts went through a float somewhere.
        let value = Decimal::from_str(trimmed)
            .or_else(|_| Decimal::from_scientific(trimmed))
            .map_err(AmountError)?;
        Ok(Amount(value))
    }
}

impl Display for Amount {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl Add for Amount {
    type Output = Amount;

    /// Saturates instead of overflowing.
    fn add(self, rhs: Self) -> Self::Output {
        Amount(self.0.saturating_add(rhs.0))
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Amount::ZERO, |acc, a| acc + a)
    }
}

impl<'a> Sum<&'a Amount> for Amount {
    fn sum<I: Iterator<Item = &'a Amount>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

impl Serialize for Amount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        // Whole amounts are written as integers so that `1200` stays `1200` and not `1200.0`.
        if self.0.fract().is_zero() {
            if let Some(i) = self.0.to_i64() {
                return serializer.serialize_i64(i);
            }
        }
        match self.0.to_f64() {
            Some(f) => serializer.serialize_f64(f),
            None => serializer.serialize_str(&self.0.to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(AmountVisitor)
    }
}

struct AmountVisitor;

impl<'de> Visitor<'de> for AmountVisitor {
    type Value = Amount;

    fn expecting(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str("a number, a numeric string or null")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        Ok(Amount(Decimal::from(v)))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(Amount(Decimal::from(v)))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
        Decimal::from_f64(v)
            .map(|d| Amount(d.normalize()))
            .ok_or_else(|| E::custom(format!("{v} cannot be represented as an amount")))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        Amount::from_str(v).map_err(E::custom)
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(Amount::ZERO)
    }

    fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(Amount::ZERO)
    }
}

impl From<Decimal> for Amount {
    fn from(value: Decimal) -> Self {
        Amount::new(value)
    }
}

impl From<i64> for Amount {
    fn from(value: i64) -> Self {
        Amount::new(Decimal::from(value))
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn amt(s: &str) -> Amount {
        Amount::from_str(s).unwrap()
    }

    #[test]
    fn test_parse_plain() {
        assert_eq!(amt("50.00").value(), Decimal::from_str("50.00").unwrap());
    }

    #[test]
    fn test_parse_empty_string() {
        assert!(amt("").is_zero());
        assert!(amt("   ").is_zero());
    }

    #[test]
    fn test_parse_garbage() {
        assert!(Amount::from_str("fifty").is_err());
    }

    #[test]
    fn test_display_two_places() {
        assert_eq!(amt("50").to_string(), "50.00");
        assert_eq!(amt("-7.5").to_string(), "-7.50");
    }

    #[test]
    fn test_doubled() {
        assert_eq!(amt("21.25").doubled(), amt("42.50"));
    }

    #[test]
    fn test_overflow_saturates() {
        let max = Amount::new(Decimal::MAX);
        assert_eq!(max.doubled(), max);
        assert_eq!(max + Amount::from(1), max);
        assert!(max.checked_doubled().is_none());
        assert!(max.checked_add(Amount::from(1)).is_none());
        assert_eq!(Amount::checked_sum(&[amt("1"), amt("2")]), Some(amt("3")));
        assert!(Amount::checked_sum(&[max, amt("0.5"), amt("0.5")]).is_none());
    }

    #[test]
    fn test_sum() {
        let total: Amount = [amt("1.10"), amt("2.20"), amt("3.30")].iter().sum();
        assert_eq!(total.value(), Decimal::from_str("6.60").unwrap());
    }

    #[test]
    fn test_serialize_whole_as_integer() {
        assert_eq!(serde_json::to_string(&amt("1200")).unwrap(), "1200");
        assert_eq!(serde_json::to_string(&amt("1200.00")).unwrap(), "1200");
    }

    #[test]
    fn test_serialize_fraction_as_number() {
        assert_eq!(serde_json::to_string(&amt("12.5")).unwrap(), "12.5");
    }

    #[test]
    fn test_deserialize_number_string_and_null() {
        let a: Amount = serde_json::from_str("12.5").unwrap();
        assert_eq!(a, amt("12.5"));
        let b: Amount = serde_json::from_str("\"12.50\"").unwrap();
        assert_eq!(b.value(), amt("12.5").value());
        let c: Amount = serde_json::from_str("null").unwrap();
        assert!(c.is_zero());
        let d: Amount = serde_json::from_str("40").unwrap();
        assert_eq!(d, Amount::from(40));
    }

    #[test]
    fn test_deserialize_rejects_bool() {
        assert!(serde_json::from_str::<Amount>("true").is_err());
    }

    #[test]
    fn test_sign_checks() {
        assert!(amt("5").is_positive());
        assert!(amt("-5").is_negative());
        assert!(!Amount::ZERO.is_positive());
        assert!(!Amount::ZERO.is_negative());
    }
}
