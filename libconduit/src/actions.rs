//! Every observation and command the engine handles is an [`Action`].
//!
//! Operations come as request/success/failure trios ([`AsyncAction`]). A success or failure always carries the
//! `meta` of the request it resolves, and consumers correlate purely by structural equality of that meta.

use crate::amount::TokenAmount;
use crate::caps::Caps;
use crate::error::ErrorInfo;
use crate::primitives::{Address, Hash, Secret};
use crate::state::{BalanceProof, ChannelKey, TransferKey, TransferState};
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display, Formatter};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AsyncAction<Req, Ok, Meta> {
    Request { payload: Req, meta: Meta },
    Success { payload: Ok, meta: Meta },
    Failure { error: ErrorInfo, meta: Meta },
}

impl<Req, Ok, Meta: PartialEq> AsyncAction<Req, Ok, Meta> {
    pub fn request(payload: Req, meta: Meta) -> Self {
        AsyncAction::Request { payload, meta }
    }

    pub fn success(payload: Ok, meta: Meta) -> Self {
        AsyncAction::Success { payload, meta }
    }

    pub fn failure(error: impl Into<ErrorInfo>, meta: Meta) -> Self {
        AsyncAction::Failure { error: error.into(), meta }
    }

    pub fn meta(&self) -> &Meta {
        match self {
            AsyncAction::Request { meta, .. } => meta,
            AsyncAction::Success { meta, .. } => meta,
            AsyncAction::Failure { meta, .. } => meta,
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(self, AsyncAction::Request { .. })
    }

    /// True for a success or failure resolving the request with the given meta.
    pub fn is_response_of(&self, meta: &Meta) -> bool {
        !self.is_request() && self.meta() == meta
    }
}

/// Inclusion details of the transaction behind a chain-originated success action.
///
/// `confirmed` is `None` until the action has been seen `confirmation_blocks` deep; it then becomes `Some(true)`,
/// or `Some(false)` if the transaction disappeared.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInfo {
    pub tx_hash: Option<Hash>,
    pub tx_block: Option<u64>,
    pub confirmed: Option<bool>,
}

impl TxInfo {
    pub fn unconfirmed(tx_hash: Hash, tx_block: u64) -> Self {
        TxInfo { tx_hash: Some(tx_hash), tx_block: Some(tx_block), confirmed: None }
    }

    pub fn confirmed() -> Self {
        TxInfo { tx_hash: None, tx_block: None, confirmed: Some(true) }
    }

    /// Not yet confirmed, and carrying enough information to be confirmed.
    pub fn is_pending(&self) -> bool {
        self.confirmed.is_none() && self.tx_hash.is_some() && self.tx_block.is_some()
    }
}

//------------------------------------------------   Metas   ----------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositMeta {
    pub total_deposit: TokenAmount,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawMeta {
    pub amount: TokenAmount,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceMeta {
    pub address: Address,
}

//------------------------------------------------   Payloads   -------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UdcDepositRequest {
    /// The delta to deposit. `meta.total_deposit` is the cumulative deposit the caller expects afterwards.
    pub deposit: TokenAmount,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UdcDepositSuccess {
    /// The effective balance after the deposit.
    pub balance: TokenAmount,
    pub tx: TxInfo,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UdcWithdrawPlanSuccess {
    /// The maturity block of the plan.
    pub block: u64,
    pub tx: TxInfo,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UdcWithdrawSuccess {
    /// What actually left the UDC.
    pub withdrawal: TokenAmount,
    pub tx: TxInfo,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelOpenRequest {
    pub settle_timeout: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelOpened {
    pub id: u64,
    pub settle_timeout: u64,
    pub is_first_participant: bool,
    pub tx: TxInfo,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelDepositRequest {
    pub deposit: TokenAmount,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelDeposited {
    pub id: u64,
    pub participant: Address,
    pub total_deposit: TokenAmount,
    pub tx: TxInfo,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelClosed {
    pub id: u64,
    pub participant: Address,
    pub tx: TxInfo,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSettled {
    pub id: u64,
    pub tx: TxInfo,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub token_network: Address,
    pub target: Address,
    pub value: TokenAmount,
    pub fee: TokenAmount,
    pub payment_id: u64,
    pub secret: Option<Secret>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferCompleted {
    pub secret: Option<Secret>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferUnlocked {
    pub balance_proof: BalanceProof,
    pub message_id: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceInfo {
    pub user_id: String,
    pub available: bool,
    pub caps: Option<Caps>,
}

//------------------------------------------------   Action   ---------------------------------------------------------

pub type UdcDeposit = AsyncAction<UdcDepositRequest, UdcDepositSuccess, DepositMeta>;
pub type UdcWithdrawPlan = AsyncAction<(), UdcWithdrawPlanSuccess, WithdrawMeta>;
pub type UdcWithdraw = AsyncAction<(), UdcWithdrawSuccess, WithdrawMeta>;
pub type ChannelOpen = AsyncAction<ChannelOpenRequest, ChannelOpened, ChannelKey>;
pub type ChannelDeposit = AsyncAction<ChannelDepositRequest, ChannelDeposited, ChannelKey>;
pub type ChannelClose = AsyncAction<(), ChannelClosed, ChannelKey>;
pub type ChannelSettle = AsyncAction<(), ChannelSettled, ChannelKey>;
pub type Transfer = AsyncAction<TransferRequest, TransferCompleted, TransferKey>;
pub type TransferUnlock = AsyncAction<(), TransferUnlocked, TransferKey>;
pub type Presence = AsyncAction<(), PresenceInfo, PresenceMeta>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    NewBlock { block_number: u64 },
    TokenMonitored { token: Address, token_network: Address, from_block: u64 },
    UdcDeposit(UdcDeposit),
    UdcWithdrawPlan(UdcWithdrawPlan),
    UdcWithdraw(UdcWithdraw),
    ChannelOpen(ChannelOpen),
    ChannelDeposit(ChannelDeposit),
    ChannelClose(ChannelClose),
    ChannelSettle(ChannelSettle),
    Transfer(Transfer),
    /// A locked transfer was signed by us (sent) or validated from the partner (received).
    TransferSigned { transfer: Box<TransferState> },
    /// The partner acknowledged the locked transfer, or we acknowledged theirs.
    TransferProcessed { meta: TransferKey },
    TransferSecret { secret: Secret, meta: TransferKey },
    TransferUnlock(TransferUnlock),
    TransferUnlockProcessed { meta: TransferKey },
    Presence(Presence),
}

macro_rules! action_accessor {
    ($name:ident, $variant:ident, $ty:ty) => {
        pub fn $name(&self) -> Option<&$ty> {
            match self {
                Action::$variant(a) => Some(a),
                _ => None,
            }
        }
    };
}

macro_rules! with_tx_info {
    ($self:expr, $payload:ident => $body:expr, $default:expr) => {
        match $self {
            Action::UdcDeposit(AsyncAction::Success { payload: $payload, .. }) => $body,
            Action::UdcWithdrawPlan(AsyncAction::Success { payload: $payload, .. }) => $body,
            Action::UdcWithdraw(AsyncAction::Success { payload: $payload, .. }) => $body,
            Action::ChannelOpen(AsyncAction::Success { payload: $payload, .. }) => $body,
            Action::ChannelDeposit(AsyncAction::Success { payload: $payload, .. }) => $body,
            Action::ChannelClose(AsyncAction::Success { payload: $payload, .. }) => $body,
            Action::ChannelSettle(AsyncAction::Success { payload: $payload, .. }) => $body,
            _ => $default,
        }
    };
}

impl Action {
    action_accessor!(as_udc_deposit, UdcDeposit, UdcDeposit);
    action_accessor!(as_udc_withdraw_plan, UdcWithdrawPlan, UdcWithdrawPlan);
    action_accessor!(as_udc_withdraw, UdcWithdraw, UdcWithdraw);
    action_accessor!(as_channel_open, ChannelOpen, ChannelOpen);
    action_accessor!(as_channel_deposit, ChannelDeposit, ChannelDeposit);
    action_accessor!(as_channel_close, ChannelClose, ChannelClose);
    action_accessor!(as_channel_settle, ChannelSettle, ChannelSettle);
    action_accessor!(as_transfer, Transfer, Transfer);
    action_accessor!(as_transfer_unlock, TransferUnlock, TransferUnlock);
    action_accessor!(as_presence, Presence, Presence);

    pub fn new_block(&self) -> Option<u64> {
        match self {
            Action::NewBlock { block_number } => Some(*block_number),
            _ => None,
        }
    }

    /// The inclusion details of chain-originated success actions.
    pub fn tx_info(&self) -> Option<&TxInfo> {
        with_tx_info!(self, payload => Some(&payload.tx), None)
    }

    /// A copy of this action with its confirmation marker set, and its inclusion block updated to the block
    /// reported by the receipt. `None` for actions without inclusion details.
    pub fn with_confirmation(&self, confirmed: bool, tx_block: Option<u64>) -> Option<Action> {
        let mut action = self.clone();
        let tx = with_tx_info!(&mut action, payload => Some(&mut payload.tx), None)?;
        tx.confirmed = Some(confirmed);
        if let Some(block) = tx_block {
            tx.tx_block = Some(block);
        }
        Some(action)
    }

    /// The same kind of action, for the same request and transaction.
    pub fn is_same_tx(&self, other: &Action) -> bool {
        let same_kind = std::mem::discriminant(self) == std::mem::discriminant(other);
        let hash = |a: &Action| a.tx_info().and_then(|t| t.tx_hash);
        same_kind && hash(self).is_some() && hash(self) == hash(other) && self.meta_eq(other)
    }

    fn meta_eq(&self, other: &Action) -> bool {
        match (self, other) {
            (Action::UdcDeposit(a), Action::UdcDeposit(b)) => a.meta() == b.meta(),
            (Action::UdcWithdrawPlan(a), Action::UdcWithdrawPlan(b)) => a.meta() == b.meta(),
            (Action::UdcWithdraw(a), Action::UdcWithdraw(b)) => a.meta() == b.meta(),
            (Action::ChannelOpen(a), Action::ChannelOpen(b)) => a.meta() == b.meta(),
            (Action::ChannelDeposit(a), Action::ChannelDeposit(b)) => a.meta() == b.meta(),
            (Action::ChannelClose(a), Action::ChannelClose(b)) => a.meta() == b.meta(),
            (Action::ChannelSettle(a), Action::ChannelSettle(b)) => a.meta() == b.meta(),
            _ => false,
        }
    }
}

fn stage<Req, Ok, Meta>(a: &AsyncAction<Req, Ok, Meta>) -> &'static str {
    match a {
        AsyncAction::Request { .. } => "request",
        AsyncAction::Success { .. } => "success",
        AsyncAction::Failure { .. } => "failure",
    }
}

impl Display for Action {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::NewBlock { block_number } => write!(f, "block/new({block_number})"),
            Action::TokenMonitored { token, .. } => write!(f, "token/monitored({token})"),
            Action::UdcDeposit(a) => write!(f, "udc/deposit/{}", stage(a)),
            Action::UdcWithdrawPlan(a) => write!(f, "udc/withdraw/plan/{}", stage(a)),
            Action::UdcWithdraw(a) => write!(f, "udc/withdraw/{}", stage(a)),
            Action::ChannelOpen(a) => write!(f, "channel/open/{}", stage(a)),
            Action::ChannelDeposit(a) => write!(f, "channel/deposit/{}", stage(a)),
            Action::ChannelClose(a) => write!(f, "channel/close/{}", stage(a)),
            Action::ChannelSettle(a) => write!(f, "channel/settle/{}", stage(a)),
            Action::Transfer(a) => write!(f, "transfer/{}", stage(a)),
            Action::TransferSigned { transfer } => write!(f, "transfer/signed({})", transfer.key()),
            Action::TransferProcessed { meta } => write!(f, "transfer/processed({meta})"),
            Action::TransferSecret { meta, .. } => write!(f, "transfer/secret({meta})"),
            Action::TransferUnlock(a) => write!(f, "transfer/unlock/{}", stage(a)),
            Action::TransferUnlockProcessed { meta } => write!(f, "transfer/unlock/processed({meta})"),
            Action::Presence(a) => write!(f, "transport/presence/{}", stage(a)),
        }
    }
}
