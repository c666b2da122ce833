use alloy::primitives::{Keccak256, B256};
use rand::RngCore;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum HexError {
    #[error("Missing 0x prefix")]
    MissingPrefix,
    #[error("Expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("Invalid hex string. {0}")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("Address checksum does not match")]
    BadChecksum,
}

/// Keccak-256 digest over the concatenation of the given byte slices.
pub fn keccak256<T: AsRef<[S]>, S: AsRef<[u8]>>(preimages: T) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    for preimage in preimages.as_ref() {
        hasher.update(preimage);
    }
    hasher.finalize().0
}

fn decode_prefixed<const N: usize>(s: &str) -> Result<[u8; N], HexError> {
    let body = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).ok_or(HexError::MissingPrefix)?;
    if body.len() != N * 2 {
        return Err(HexError::InvalidLength { expected: N, actual: body.len() / 2 });
    }
    let mut bytes = [0u8; N];
    hex::decode_to_slice(body, &mut bytes)?;
    Ok(bytes)
}

macro_rules! hex_serde {
    ($t:ty) => {
        impl Serialize for $t {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $t {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                <$t>::from_str(&s).map_err(D::Error::custom)
            }
        }
    };
}

//------------------------------------------------   Address   --------------------------------------------------------

/// A 20-byte account address. Displayed in its EIP-55 checksummed form.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(alloy::primitives::Address);

impl Address {
    pub const ZERO: Address = Address(alloy::primitives::Address::ZERO);

    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Address(alloy::primitives::Address::new(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn random() -> Self {
        let mut bytes = [0u8; 20];
        rand::rng().fill_bytes(&mut bytes);
        Address::from_bytes(bytes)
    }

    /// The EIP-55 mixed-case checksum encoding, with `0x` prefix.
    pub fn to_checksum(&self) -> String {
        self.0.to_checksum(None)
    }

    /// Parses a `0x`-prefixed hex address. All-lowercase and all-uppercase inputs are accepted as-is; mixed-case
    /// inputs must carry a valid EIP-55 checksum.
    pub fn parse_checksummed(s: &str) -> Result<Self, HexError> {
        let address = Address::from_bytes(decode_prefixed::<20>(s)?);
        let body = &s[2..];
        let has_lower = body.chars().any(|c| c.is_ascii_lowercase());
        let has_upper = body.chars().any(|c| c.is_ascii_uppercase());
        if has_lower && has_upper {
            alloy::primitives::Address::parse_checksummed(s, None).map_err(|_| HexError::BadChecksum)?;
        }
        Ok(address)
    }
}

impl From<alloy::primitives::Address> for Address {
    fn from(address: alloy::primitives::Address) -> Self {
        Address(address)
    }
}

impl FromStr for Address {
    type Err = HexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::parse_checksummed(s)
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_checksum())
    }
}

impl Debug for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_checksum())
    }
}

hex_serde!(Address);

//------------------------------------------------   Hash   -----------------------------------------------------------

#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hash(B256);

impl Hash {
    pub const ZERO: Hash = Hash(B256::ZERO);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Hash(B256::new(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn as_b256(&self) -> &B256 {
        &self.0
    }

    pub fn compute<T: AsRef<[S]>, S: AsRef<[u8]>>(preimages: T) -> Hash {
        Hash::from_bytes(keccak256(preimages))
    }

    pub fn random() -> Self {
        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        Hash::from_bytes(bytes)
    }
}

impl FromStr for Hash {
    type Err = HexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_prefixed::<32>(s).map(Hash::from_bytes)
    }
}

impl Display for Hash {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl Debug for Hash {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

hex_serde!(Hash);

//------------------------------------------------   Secret   ---------------------------------------------------------

/// The preimage of a transfer's secrethash.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Secret([u8; 32]);

impl Secret {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Secret(bytes)
    }

    pub fn random() -> Self {
        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        Secret(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn secrethash(&self) -> Hash {
        Hash::compute([self.0])
    }
}

impl FromStr for Secret {
    type Err = HexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_prefixed::<32>(s).map(Secret)
    }
}

impl Display for Secret {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl Debug for Secret {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret(***)")
    }
}

hex_serde!(Secret);
