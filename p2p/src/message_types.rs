//! The protocol messages exchanged between channel partners.
//!
//! Messages travel as JSON objects tagged by `type`. Signed messages carry a `signature` over the keccak256 digest
//! of the message's own JSON encoding without that field.

use crate::errors::CodecError;
use libconduit::amount::TokenAmount;
use libconduit::crypto::{AccountKey, Signature};
use libconduit::primitives::{Address, Hash, Secret};
use libconduit::state::{BalanceProof, Lock};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockedTransfer {
    pub message_identifier: u64,
    pub payment_identifier: u64,
    pub token_network_address: Address,
    pub channel_identifier: u64,
    pub nonce: u64,
    pub transferred_amount: TokenAmount,
    pub locked_amount: TokenAmount,
    pub locksroot: Hash,
    pub lock: Lock,
    pub recipient: Address,
    pub initiator: Address,
    pub target: Address,
    pub fee: TokenAmount,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<Signature>,
}

impl LockedTransfer {
    pub fn balance_proof(&self) -> BalanceProof {
        BalanceProof {
            nonce: self.nonce,
            transferred_amount: self.transferred_amount,
            locked_amount: self.locked_amount,
            locksroot: self.locksroot,
        }
    }

    /// The amount the target receives: the locked amount without the fee.
    pub fn value(&self) -> TokenAmount {
        self.lock.amount - self.fee
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Unlock {
    pub message_identifier: u64,
    pub payment_identifier: u64,
    pub token_network_address: Address,
    pub channel_identifier: u64,
    pub nonce: u64,
    pub transferred_amount: TokenAmount,
    pub locked_amount: TokenAmount,
    pub locksroot: Hash,
    pub secret: Secret,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<Signature>,
}

impl Unlock {
    pub fn balance_proof(&self) -> BalanceProof {
        BalanceProof {
            nonce: self.nonce,
            transferred_amount: self.transferred_amount,
            locked_amount: self.locked_amount,
            locksroot: self.locksroot,
        }
    }
}

/// Acknowledges that a message was validated and applied.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Processed {
    pub message_identifier: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<Signature>,
}

/// Acknowledges that a message arrived, for peers with the `Delivery` capability.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delivered {
    pub delivered_message_identifier: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<Signature>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    LockedTransfer(LockedTransfer),
    Unlock(Unlock),
    Processed(Processed),
    Delivered(Delivered),
}

impl Message {
    pub fn signature(&self) -> Option<&Signature> {
        match self {
            Message::LockedTransfer(m) => m.signature.as_ref(),
            Message::Unlock(m) => m.signature.as_ref(),
            Message::Processed(m) => m.signature.as_ref(),
            Message::Delivered(m) => m.signature.as_ref(),
        }
    }

    fn signature_mut(&mut self) -> &mut Option<Signature> {
        match self {
            Message::LockedTransfer(m) => &mut m.signature,
            Message::Unlock(m) => &mut m.signature,
            Message::Processed(m) => &mut m.signature,
            Message::Delivered(m) => &mut m.signature,
        }
    }

    /// The identifier `Processed` and `Delivered` replies refer to. `Delivered` itself is never acknowledged.
    pub fn message_identifier(&self) -> Option<u64> {
        match self {
            Message::LockedTransfer(m) => Some(m.message_identifier),
            Message::Unlock(m) => Some(m.message_identifier),
            Message::Processed(m) => Some(m.message_identifier),
            Message::Delivered(_) => None,
        }
    }

    /// The bytes the signature covers.
    pub fn signing_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let mut unsigned = self.clone();
        *unsigned.signature_mut() = None;
        Ok(serde_json::to_vec(&unsigned)?)
    }

    pub fn sign(mut self, key: &AccountKey) -> Result<Self, CodecError> {
        let signature = key.sign(&self.signing_bytes()?)?;
        *self.signature_mut() = Some(signature);
        Ok(self)
    }

    /// The address that signed the message, or `None` if it is unsigned.
    pub fn signer(&self) -> Result<Option<Address>, CodecError> {
        match self.signature() {
            Some(signature) => Ok(Some(signature.recover(&self.signing_bytes()?)?)),
            None => Ok(None),
        }
    }
}

impl Display for Message {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Message::LockedTransfer(m) => write!(f, "LockedTransfer({}, {})", m.message_identifier, m.lock.secrethash),
            Message::Unlock(m) => write!(f, "Unlock({})", m.message_identifier),
            Message::Processed(m) => write!(f, "Processed({})", m.message_identifier),
            Message::Delivered(m) => write!(f, "Delivered({})", m.delivered_message_identifier),
        }
    }
}

/// A fresh message identifier.
pub fn new_message_id() -> u64 {
    rand::random_range(1..u64::MAX)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn json_shape() {
        let msg = Message::Processed(Processed { message_identifier: 7, signature: None });
        assert_eq!(serde_json::to_string(&msg).unwrap(), r#"{"type":"Processed","messageIdentifier":7}"#);
        let back: Message = serde_json::from_str(r#"{"type":"Delivered","deliveredMessageIdentifier":9}"#).unwrap();
        assert_eq!(back, Message::Delivered(Delivered { delivered_message_identifier: 9, signature: None }));
    }

    #[test]
    fn signatures_cover_the_content() {
        let key = AccountKey::random();
        let msg = Message::Processed(Processed { message_identifier: 7, signature: None });
        assert_eq!(msg.signer().unwrap(), None);
        let signed = msg.sign(&key).unwrap();
        assert_eq!(signed.signer().unwrap(), Some(key.address()));
        let Message::Processed(mut tampered) = signed else { unreachable!() };
        tampered.message_identifier = 8;
        assert_ne!(Message::Processed(tampered).signer().ok().flatten(), Some(key.address()));
    }
}
