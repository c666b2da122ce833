use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Debug, Display};
use std::ops::{Add, Sub};
use std::str::FromStr;

/// An on-chain token amount, in the token's smallest unit.
///
/// Amounts are (de)serialized as decimal strings, since JSON numbers can not safely carry values of this size.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TokenAmount {
    amount: u128,
}

impl TokenAmount {
    pub const ZERO: TokenAmount = TokenAmount { amount: 0 };
    pub const MAX: TokenAmount = TokenAmount { amount: u128::MAX };

    pub const fn new(amount: u128) -> Self {
        TokenAmount { amount }
    }

    pub fn value(&self) -> u128 {
        self.amount
    }

    pub fn is_zero(&self) -> bool {
        self.amount == 0
    }

    pub fn checked_add(self, rhs: TokenAmount) -> Option<TokenAmount> {
        self.amount.checked_add(rhs.amount).map(TokenAmount::new)
    }

    pub fn checked_sub(self, rhs: TokenAmount) -> Option<TokenAmount> {
        self.amount.checked_sub(rhs.amount).map(TokenAmount::new)
    }

    pub fn saturating_sub(self, rhs: TokenAmount) -> TokenAmount {
        TokenAmount::new(self.amount.saturating_sub(rhs.amount))
    }
}

impl From<u128> for TokenAmount {
    fn from(amount: u128) -> Self {
        TokenAmount::new(amount)
    }
}

impl From<u64> for TokenAmount {
    fn from(amount: u64) -> Self {
        TokenAmount::new(amount as u128)
    }
}

/// Saturating addition. Use [`TokenAmount::checked_add`] where overflow must be detected.
impl Add for TokenAmount {
    type Output = TokenAmount;

    fn add(self, rhs: Self) -> Self::Output {
        TokenAmount::new(self.amount.saturating_add(rhs.amount))
    }
}

/// Saturating subtraction. Use [`TokenAmount::checked_sub`] where underflow must be detected.
impl Sub for TokenAmount {
    type Output = TokenAmount;

    fn sub(self, rhs: Self) -> Self::Output {
        self.saturating_sub(rhs)
    }
}

impl FromStr for TokenAmount {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u128>().map(TokenAmount::new)
    }
}

impl Display for TokenAmount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.amount)
    }
}

impl Debug for TokenAmount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TokenAmount({})", self.amount)
    }
}

impl Serialize for TokenAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.amount.to_string())
    }
}

impl<'de> Deserialize<'de> for TokenAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        TokenAmount::from_str(&s).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use super::TokenAmount;

    #[test]
    fn arithmetic_saturates() {
        let a = TokenAmount::new(10);
        let b = TokenAmount::new(3);
        assert_eq!(a + b, TokenAmount::new(13));
        assert_eq!(b - a, TokenAmount::ZERO);
        assert_eq!(a.checked_sub(b), Some(TokenAmount::new(7)));
        assert_eq!(b.checked_sub(a), None);
        assert_eq!(TokenAmount::MAX.checked_add(b), None);
    }

    #[test]
    fn serializes_as_decimal_string() {
        let a = TokenAmount::new(u128::MAX);
        let json = serde_json::to_string(&a).unwrap();
        assert_eq!(json, format!("\"{}\"", u128::MAX));
        let back: TokenAmount = serde_json::from_str(&json).unwrap();
        assert_eq!(back, a);
        assert!(serde_json::from_str::<TokenAmount>("\"-1\"").is_err());
        assert!(serde_json::from_str::<TokenAmount>("\"12abc\"").is_err());
    }
}
