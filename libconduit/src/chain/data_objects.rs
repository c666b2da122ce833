use crate::amount::TokenAmount;
use crate::primitives::{Address, Hash};
use serde::{Deserialize, Serialize};

/// A submitted, not necessarily mined, transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxHandle {
    pub hash: Hash,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub transaction_hash: Hash,
    pub block_number: u64,
    /// `false` if the transaction was mined but reverted.
    pub status: bool,
}

/// The UDC's record of an account's pending withdraw plan. A zero `withdraw_block` means there is no plan.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawPlanRecord {
    pub amount: TokenAmount,
    pub withdraw_block: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelEvent {
    Opened { id: u64, participant1: Address, participant2: Address, settle_timeout: u64 },
    NewDeposit { id: u64, participant: Address, total_deposit: TokenAmount },
    Closed { id: u64, closing_participant: Address },
    Settled { id: u64 },
}

impl ChannelEvent {
    pub fn channel_id(&self) -> u64 {
        match self {
            ChannelEvent::Opened { id, .. }
            | ChannelEvent::NewDeposit { id, .. }
            | ChannelEvent::Closed { id, .. }
            | ChannelEvent::Settled { id } => *id,
        }
    }
}

/// A token-network contract event, as included in a block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelEventLog {
    pub token_network: Address,
    pub transaction_hash: Hash,
    pub block_number: u64,
    pub event: ChannelEvent,
}
