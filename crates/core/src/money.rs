//! Monetary amounts in the smallest currency unit.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// A strictly positive amount in minor units (e.g. cents).
///
/// Balances themselves stay plain `i64`; only amounts that move money go
/// through this type.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct AmountMinor(i64);

impl AmountMinor {
    pub fn new(value: i64) -> DomainResult<Self> {
        if value <= 0 {
            return Err(DomainError::validation("amount_minor must be greater than 0"));
        }
        Ok(Self(value))
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl TryFrom<i64> for AmountMinor {
    type Error = DomainError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<AmountMinor> for i64 {
    fn from(value: AmountMinor) -> Self {
        value.0
    }
}

impl core::fmt::Display for AmountMinor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn zero_and_negative_are_rejected() {
        assert!(AmountMinor::new(0).is_err());
        assert!(AmountMinor::new(-1).is_err());
        assert_eq!(AmountMinor::new(1).unwrap().get(), 1);
    }

    proptest! {
        #[test]
        fn accepts_exactly_the_positive_range(value in any::<i64>()) {
            prop_assert_eq!(AmountMinor::new(value).is_ok(), value > 0);
        }
    }
}
