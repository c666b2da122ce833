use crate::primitives::{keccak256, Address, Hash};
use k256::ecdsa::SigningKey;
use rand::RngCore;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Invalid signature encoding. {0}")]
    Encoding(String),
    #[error("Invalid secret key")]
    InvalidKey,
    #[error("Could not recover the signer from the signature")]
    Recovery,
}

/// A 65-byte recoverable secp256k1 signature, `r || s || v` with `v` in `{27, 28}`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature(alloy::primitives::Signature);

impl Signature {
    /// Parses `r || s || v`. `v` may be given as `0/1` or `27/28`.
    pub fn try_from_bytes(bytes: &[u8]) -> Result<Self, SignatureError> {
        let signature =
            alloy::primitives::Signature::try_from(bytes).map_err(|e| SignatureError::Encoding(e.to_string()))?;
        Ok(Signature(signature))
    }

    pub fn as_bytes(&self) -> [u8; 65] {
        self.0.as_bytes()
    }

    /// Recovers the address that produced this signature over `data`.
    pub fn recover(&self, data: &[u8]) -> Result<Address, SignatureError> {
        let digest = Hash::from_bytes(keccak256([data]));
        let signer = self.0.recover_address_from_prehash(digest.as_b256()).map_err(|_| SignatureError::Recovery)?;
        Ok(Address::from(signer))
    }
}

impl FromStr for Signature {
    type Err = SignatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s.strip_prefix("0x").ok_or_else(|| SignatureError::Encoding("missing 0x prefix".into()))?;
        let mut bytes = [0u8; 65];
        hex::decode_to_slice(body, &mut bytes).map_err(|e| SignatureError::Encoding(e.to_string()))?;
        Signature::try_from_bytes(&bytes)
    }
}

impl Display for Signature {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.as_bytes()))
    }
}

impl Debug for Signature {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature({self})")
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Signature::from_str(&s).map_err(D::Error::custom)
    }
}

/// The account key used to sign off-chain messages.
#[derive(Clone)]
pub struct AccountKey {
    key: SigningKey,
    address: Address,
}

impl AccountKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SignatureError> {
        let key = SigningKey::from_slice(bytes).map_err(|_| SignatureError::InvalidKey)?;
        let address = Address::from(alloy::primitives::Address::from_private_key(&key));
        Ok(AccountKey { key, address })
    }

    pub fn random() -> Self {
        let mut rng = rand::rng();
        loop {
            let mut bytes = [0u8; 32];
            rng.fill_bytes(&mut bytes);
            // Only the zero scalar and values above the curve order are rejected, so this practically never loops.
            if let Ok(key) = AccountKey::from_bytes(&bytes) {
                return key;
            }
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// The raw 32-byte secret scalar.
    pub fn to_bytes(&self) -> [u8; 32] {
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&self.key.to_bytes());
        bytes
    }

    pub fn sign(&self, data: &[u8]) -> Result<Signature, SignatureError> {
        let digest = keccak256([data]);
        let (sig, recid) = self.key.sign_prehash_recoverable(&digest).map_err(|_| SignatureError::InvalidKey)?;
        let mut bytes = [0u8; 65];
        bytes[..64].copy_from_slice(&sig.to_bytes());
        bytes[64] = recid.to_byte() + 27;
        Signature::try_from_bytes(&bytes)
    }
}

impl Debug for AccountKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "AccountKey({})", self.address)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sign_and_recover() {
        let key = AccountKey::random();
        let sig = key.sign(b"hello conduit").unwrap();
        assert_eq!(sig.recover(b"hello conduit").unwrap(), key.address());
        assert_ne!(sig.recover(b"goodbye conduit").ok(), Some(key.address()));
    }

    #[test]
    fn known_key_address() {
        // Private key 1 has a well known address.
        let mut bytes = [0u8; 32];
        bytes[31] = 1;
        let key = AccountKey::from_bytes(&bytes).unwrap();
        assert_eq!(key.address().to_string(), "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf");
    }

    #[test]
    fn signature_hex_format() {
        let key = AccountKey::random();
        let sig = key.sign(b"data").unwrap();
        let s = sig.to_string();
        assert_eq!(s.len(), 132);
        assert_eq!(Signature::from_str(&s).unwrap(), sig);
        assert!(Signature::from_str("0x1234").is_err());
    }

    #[test]
    fn recovery_byte_forms() {
        let key = AccountKey::random();
        let mut bytes = key.sign(b"data").unwrap().as_bytes();
        assert!(bytes[64] == 27 || bytes[64] == 28);
        bytes[64] -= 27;
        let compact = Signature::try_from_bytes(&bytes).unwrap();
        assert_eq!(compact.recover(b"data").unwrap(), key.address());
        assert_eq!(compact.as_bytes()[64], bytes[64] + 27);
        assert!(Signature::try_from_bytes(&bytes[..64]).is_err());
    }
}
