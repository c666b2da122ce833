use crate::amount::TokenAmount;
use crate::primitives::{Address, Hash};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Channels are keyed by the token network they live in and the partner on the other end.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChannelKey {
    pub token_network: Address,
    pub partner: Address,
}

impl ChannelKey {
    pub fn new(token_network: Address, partner: Address) -> Self {
        ChannelKey { token_network, partner }
    }
}

impl Display for ChannelKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.partner, self.token_network)
    }
}

/// The lifecycle of a channel. Transitions only follow confirmed on-chain events, or local requests for the
/// transitional `Closing`/`Settling` stages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelState {
    Opening,
    Open,
    Closing,
    Closed,
    Settleable,
    Settling,
    /// Terminal. Settled channels are removed from the state.
    Settled,
}

impl ChannelState {
    /// Closed in any of its forms: the channel can no longer carry transfers.
    pub fn is_closed(&self) -> bool {
        matches!(self, ChannelState::Closed | ChannelState::Settleable | ChannelState::Settling | ChannelState::Settled)
    }
}

impl Display for ChannelState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChannelState::Opening => "opening",
            ChannelState::Open => "open",
            ChannelState::Closing => "closing",
            ChannelState::Closed => "closed",
            ChannelState::Settleable => "settleable",
            ChannelState::Settling => "settling",
            ChannelState::Settled => "settled",
        };
        write!(f, "{s}")
    }
}

/// A hash-time lock on part of a balance proof's locked amount.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lock {
    pub amount: TokenAmount,
    pub expiration: u64,
    pub secrethash: Hash,
}

impl Lock {
    fn encode(&self) -> [u8; 96] {
        let mut out = [0u8; 96];
        out[24..32].copy_from_slice(&self.expiration.to_be_bytes());
        out[48..64].copy_from_slice(&self.amount.value().to_be_bytes());
        out[64..96].copy_from_slice(self.secrethash.as_bytes());
        out
    }
}

/// The root committing to the ordered set of pending locks.
pub fn locksroot(locks: &[Lock]) -> Hash {
    let encoded: Vec<[u8; 96]> = locks.iter().map(Lock::encode).collect();
    Hash::compute(encoded)
}

/// The monotonically increasing claim of a participant's off-chain balance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceProof {
    pub nonce: u64,
    pub transferred_amount: TokenAmount,
    pub locked_amount: TokenAmount,
    pub locksroot: Hash,
}

impl Default for BalanceProof {
    fn default() -> Self {
        BalanceProof {
            nonce: 0,
            transferred_amount: TokenAmount::ZERO,
            locked_amount: TokenAmount::ZERO,
            locksroot: locksroot(&[]),
        }
    }
}

/// One end of a channel.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub deposit: TokenAmount,
    pub withdraw: TokenAmount,
    pub balance_proof: BalanceProof,
    pub locks: Vec<Lock>,
}

impl Participant {
    /// The balance proof after adding `lock` to this participant's pending locks. `None` on overflow.
    pub fn next_locked_balance_proof(&self, lock: &Lock) -> Option<BalanceProof> {
        let mut locks = self.locks.clone();
        locks.push(lock.clone());
        Some(BalanceProof {
            nonce: self.balance_proof.nonce + 1,
            transferred_amount: self.balance_proof.transferred_amount,
            locked_amount: self.balance_proof.locked_amount.checked_add(lock.amount)?,
            locksroot: locksroot(&locks),
        })
    }

    /// The balance proof after unlocking the lock for `secrethash`, moving its amount from locked to transferred.
    /// `None` if there is no such lock.
    pub fn unlocked_balance_proof(&self, secrethash: &Hash) -> Option<BalanceProof> {
        let lock = self.locks.iter().find(|l| l.secrethash == *secrethash)?;
        let remaining: Vec<Lock> = self.locks.iter().filter(|l| l.secrethash != *secrethash).cloned().collect();
        Some(BalanceProof {
            nonce: self.balance_proof.nonce + 1,
            transferred_amount: self.balance_proof.transferred_amount.checked_add(lock.amount)?,
            locked_amount: self.balance_proof.locked_amount.checked_sub(lock.amount)?,
            locksroot: locksroot(&remaining),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: u64,
    pub state: ChannelState,
    pub settle_timeout: u64,
    pub open_block: u64,
    pub close_block: Option<u64>,
    pub own: Participant,
    pub partner: Participant,
}

impl Channel {
    pub fn new(id: u64, settle_timeout: u64, open_block: u64) -> Self {
        Channel {
            id,
            state: ChannelState::Open,
            settle_timeout,
            open_block,
            close_block: None,
            own: Participant::default(),
            partner: Participant::default(),
        }
    }

    /// What we can still send to the partner.
    pub fn capacity(&self) -> TokenAmount {
        let own = &self.own;
        (own.deposit + self.partner.balance_proof.transferred_amount)
            - own.withdraw
            - own.balance_proof.transferred_amount
            - own.balance_proof.locked_amount
    }

    /// What the partner can still send to us.
    pub fn partner_capacity(&self) -> TokenAmount {
        let partner = &self.partner;
        (partner.deposit + self.own.balance_proof.transferred_amount)
            - partner.withdraw
            - partner.balance_proof.transferred_amount
            - partner.balance_proof.locked_amount
    }

    /// The first block at which the channel can be settled.
    pub fn settleable_after(&self) -> Option<u64> {
        self.close_block.map(|b| b + self.settle_timeout)
    }
}
