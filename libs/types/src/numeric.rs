//! Decimal newtypes for prices and volumes
//!
//! Uses rust_decimal for deterministic arithmetic (no floating-point errors).
//! Equality and hashing are scale-insensitive, so `100` and `100.00` address
//! the same price level.
//!
//! Venue payloads are read into `RawDecimal` first, so a bad number surfaces
//! as a validation error on its row rather than a parse failure of the whole
//! document.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::NumericError;

/// Price of a book level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(Decimal);

impl Price {
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    pub fn from_u64(value: u64) -> Self {
        Self(Decimal::from(value))
    }

    pub fn from_str(s: &str) -> Result<Self, NumericError> {
        Decimal::from_str(s)
            .map(Self)
            .map_err(|_| NumericError::Invalid(s.to_string()))
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Resting volume at a book level
///
/// Never negative. Zero is only meaningful in change lists, where it is the
/// deletion sentinel; a stored level always carries a positive volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Volume(Decimal);

impl Volume {
    pub const ZERO: Volume = Volume(Decimal::ZERO);

    /// Validate and wrap a decimal volume.
    pub fn try_new(value: Decimal) -> Result<Self, NumericError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(NumericError::Negative(value.to_string()));
        }
        Ok(Self(value))
    }

    pub fn from_u64(value: u64) -> Self {
        Self(Decimal::from(value))
    }

    pub fn from_str(s: &str) -> Result<Self, NumericError> {
        let value = Decimal::from_str(s).map_err(|_| NumericError::Invalid(s.to_string()))?;
        Self::try_new(value)
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// Whether this volume is the deletion sentinel.
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl fmt::Display for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A decimal exactly as delivered: JSON number or numeric string, unparsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawDecimal(serde_json::Value);

impl RawDecimal {
    pub fn from_decimal(value: impl Into<Decimal>) -> Self {
        Self(serde_json::Value::String(value.into().to_string()))
    }

    pub fn from_value(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// Parse into a decimal. Accepts plain and scientific notation.
    pub fn parse(&self) -> Result<Decimal, NumericError> {
        let text = match &self.0 {
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::String(s) => s.trim().to_string(),
            other => return Err(NumericError::Invalid(other.to_string())),
        };
        Decimal::from_str(&text)
            .or_else(|_| Decimal::from_scientific(&text))
            .map_err(|_| NumericError::Invalid(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    fn hash_of<T: Hash>(value: &T) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_price_scale_insensitive() {
        let a = Price::from_str("100").unwrap();
        let b = Price::from_str("100.00").unwrap();
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn test_price_invalid() {
        assert!(matches!(Price::from_str("abc"), Err(NumericError::Invalid(_))));
    }

    #[test]
    fn test_volume_rejects_negative() {
        let result = Volume::try_new(Decimal::from(-1));
        assert!(matches!(result, Err(NumericError::Negative(_))));
        assert!(Volume::from_str("-0.5").is_err());
    }

    #[test]
    fn test_volume_zero_is_sentinel() {
        assert!(Volume::ZERO.is_zero());
        assert!(Volume::from_str("0.000").unwrap().is_zero());
        assert!(!Volume::from_u64(5).is_zero());
    }

    #[test]
    fn test_negative_zero_accepted() {
        let value = Decimal::from_str("-0").unwrap();
        assert!(Volume::try_new(value).unwrap().is_zero());
    }

    #[test]
    fn test_raw_decimal_parse() {
        let number: RawDecimal = serde_json::from_str("100.5").unwrap();
        assert_eq!(number.parse().unwrap(), Decimal::from_str("100.5").unwrap());

        let string: RawDecimal = serde_json::from_str(r#"" 42 ""#).unwrap();
        assert_eq!(string.parse().unwrap(), Decimal::from(42));

        let scientific: RawDecimal = serde_json::from_str("1e-7").unwrap();
        assert_eq!(scientific.parse().unwrap(), Decimal::from_str("0.0000001").unwrap());

        assert_eq!(RawDecimal::from_decimal(7).parse().unwrap(), Decimal::from(7));
    }

    #[test]
    fn test_raw_decimal_rejects_non_numeric() {
        let word: RawDecimal = serde_json::from_str(r#""abc""#).unwrap();
        assert!(matches!(word.parse(), Err(NumericError::Invalid(_))));

        let boolean = RawDecimal::from_value(serde_json::Value::Bool(true));
        assert!(matches!(boolean.parse(), Err(NumericError::Invalid(_))));
    }

    proptest! {
        #[test]
        fn prop_price_ignores_scale(mantissa in -1_000_000_000i64..1_000_000_000, scale in 0u32..8, pad in 0u32..8) {
            let value = Decimal::new(mantissa, scale);
            let mut padded = value;
            padded.rescale(scale + pad);

            let a = Price::new(value);
            let b = Price::new(padded);
            prop_assert_eq!(a, b);
            prop_assert_eq!(hash_of(&a), hash_of(&b));
        }
    }
}
