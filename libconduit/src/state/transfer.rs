use crate::amount::TokenAmount;
use crate::primitives::{Address, Hash, Secret};
use crate::state::channel::{BalanceProof, Lock};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Sent,
    Received,
}

impl Display for Direction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Sent => write!(f, "sent"),
            Direction::Received => write!(f, "received"),
        }
    }
}

/// Transfers are identified by their direction and secrethash. This is also the correlation meta of every
/// transfer-related action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransferKey {
    pub direction: Direction,
    pub secrethash: Hash,
}

impl TransferKey {
    pub fn new(direction: Direction, secrethash: Hash) -> Self {
        TransferKey { direction, secrethash }
    }

    pub fn sent(secrethash: Hash) -> Self {
        TransferKey::new(Direction::Sent, secrethash)
    }

    pub fn received(secrethash: Hash) -> Self {
        TransferKey::new(Direction::Received, secrethash)
    }
}

/// The string form used as the storage key, e.g. `sent:0xabc...`.
impl Display for TransferKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.direction, self.secrethash)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferState {
    pub direction: Direction,
    pub secrethash: Hash,
    pub token_network: Address,
    pub channel_id: u64,
    pub partner: Address,
    pub initiator: Address,
    pub target: Address,
    pub amount: TokenAmount,
    pub fee: TokenAmount,
    pub payment_id: u64,
    pub lock: Lock,
    /// The balance proof of the locked transfer message.
    pub balance_proof: BalanceProof,
    pub message_id: u64,
    /// Revealed lazily; always consistent with `secrethash`.
    pub secret: Option<Secret>,
    /// Set once the partner acknowledged the locked transfer with `Processed`.
    pub transfer_processed: bool,
    /// The balance proof of the unlock message, once sent or received.
    pub unlock: Option<BalanceProof>,
    pub unlock_message_id: Option<u64>,
    pub unlock_processed: bool,
}

impl TransferState {
    pub fn key(&self) -> TransferKey {
        TransferKey::new(self.direction, self.secrethash)
    }

    /// Sets the secret, refusing one that does not hash to this transfer's secrethash.
    pub fn reveal(&mut self, secret: Secret) -> bool {
        if secret.secrethash() != self.secrethash {
            return false;
        }
        self.secret = Some(secret);
        true
    }

    pub fn is_resolved(&self) -> bool {
        self.unlock_processed
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn key_display() {
        let key = TransferKey::sent(Hash::ZERO);
        assert_eq!(key.to_string(), format!("sent:0x{}", "00".repeat(32)));
    }
}
