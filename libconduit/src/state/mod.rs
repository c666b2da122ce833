//! The state snapshot. It is owned by the reducer task; everything else only ever sees immutable snapshots.
mod channel;
mod transfer;

pub use channel::{locksroot, BalanceProof, Channel, ChannelKey, ChannelState, Lock, Participant};
pub use transfer::{Direction, TransferKey, TransferState};

use crate::actions::{Action, PresenceInfo};
use crate::amount::TokenAmount;
use crate::primitives::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A planned UDC withdrawal, as confirmed on-chain. Not actionable before `block`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawPlan {
    pub amount: TokenAmount,
    pub block: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoredToken {
    pub token_network: Address,
    pub from_block: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineState {
    pub address: Address,
    pub block_number: u64,
    pub udc_balance: TokenAmount,
    pub udc_total_deposit: TokenAmount,
    pub withdraw_plan: Option<WithdrawPlan>,
    /// Monitored tokens, keyed by token address.
    pub tokens: BTreeMap<Address, MonitoredToken>,
    pub channels: BTreeMap<ChannelKey, Channel>,
    pub transfers: BTreeMap<TransferKey, TransferState>,
    /// Chain-originated success actions awaiting confirmation.
    pub pending_txs: Vec<Action>,
    pub presences: BTreeMap<Address, PresenceInfo>,
}

impl EngineState {
    pub fn new(address: Address) -> Self {
        EngineState {
            address,
            block_number: 0,
            udc_balance: TokenAmount::ZERO,
            udc_total_deposit: TokenAmount::ZERO,
            withdraw_plan: None,
            tokens: BTreeMap::new(),
            channels: BTreeMap::new(),
            transfers: BTreeMap::new(),
            pending_txs: Vec::new(),
            presences: BTreeMap::new(),
        }
    }

    pub fn channel(&self, key: &ChannelKey) -> Option<&Channel> {
        self.channels.get(key)
    }

    pub fn transfer(&self, key: &TransferKey) -> Option<&TransferState> {
        self.transfers.get(key)
    }

    /// The key of the channel with the given on-chain id, if we track it.
    pub fn channel_key_by_id(&self, token_network: &Address, id: u64) -> Option<ChannelKey> {
        self.channels.iter().find(|(k, c)| k.token_network == *token_network && c.id == id).map(|(k, _)| *k)
    }

    pub fn is_monitored(&self, token_network: &Address) -> bool {
        self.tokens.values().any(|t| t.token_network == *token_network)
    }
}
