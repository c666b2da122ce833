use crate::amount::TokenAmount;
use crate::chain::{ChannelEventLog, Receipt, TxHandle, WithdrawPlanRecord};
use crate::error::ChainError;
use crate::primitives::{Address, Hash};
use std::future::Future;

//--------------------------------------------   Provider   -----------------------------------------------------------

pub trait Provider: Send + Sync + 'static {
    /// The number of the latest mined block.
    fn block_number(&self) -> impl Future<Output = Result<u64, ChainError>> + Send;

    /// Resolves once the transaction is mined.
    fn wait_for_transaction(&self, hash: Hash) -> impl Future<Output = Result<Receipt, ChainError>> + Send;

    /// The receipt of a mined transaction, or `None` if it is unknown (e.g. dropped in a reorg).
    fn transaction_receipt(&self, hash: Hash) -> impl Future<Output = Result<Option<Receipt>, ChainError>> + Send;
}

//--------------------------------------------   User deposit contract   ----------------------------------------------

/// The user deposit contract, as seen by a signer bound to one account. Mutating calls are sent from that account.
pub trait UserDepositContract: Send + Sync + 'static {
    fn udc_address(&self) -> Address;

    /// The token held by the UDC.
    fn token(&self) -> impl Future<Output = Result<Address, ChainError>> + Send;

    /// The balance `owner` can spend on services: deposits minus planned withdraws.
    fn effective_balance(&self, owner: Address) -> impl Future<Output = Result<TokenAmount, ChainError>> + Send;

    /// The cumulative amount ever deposited for `owner`.
    fn total_deposit(&self, owner: Address) -> impl Future<Output = Result<TokenAmount, ChainError>> + Send;

    /// The amount currently held for `owner`, including planned withdraws.
    fn balances(&self, owner: Address) -> impl Future<Output = Result<TokenAmount, ChainError>> + Send;

    fn withdraw_plans(&self, owner: Address) -> impl Future<Output = Result<WithdrawPlanRecord, ChainError>> + Send;

    /// Raise the cumulative deposit of `beneficiary` to `new_total_deposit`.
    fn deposit(
        &self,
        beneficiary: Address,
        new_total_deposit: TokenAmount,
    ) -> impl Future<Output = Result<TxHandle, ChainError>> + Send;

    fn plan_withdraw(&self, amount: TokenAmount) -> impl Future<Output = Result<TxHandle, ChainError>> + Send;

    fn withdraw(&self, amount: TokenAmount) -> impl Future<Output = Result<TxHandle, ChainError>> + Send;
}

//--------------------------------------------   ERC20 token   --------------------------------------------------------

pub trait TokenContract: Send + Sync + 'static {
    fn balance_of(
        &self,
        token: Address,
        owner: Address,
    ) -> impl Future<Output = Result<TokenAmount, ChainError>> + Send;

    fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> impl Future<Output = Result<TokenAmount, ChainError>> + Send;

    fn approve(
        &self,
        token: Address,
        spender: Address,
        amount: TokenAmount,
    ) -> impl Future<Output = Result<TxHandle, ChainError>> + Send;
}

//--------------------------------------------   Token networks   -----------------------------------------------------

pub trait TokenNetworkContract: Send + Sync + 'static {
    /// The events emitted by `token_network` in the inclusive block range.
    fn channel_events(
        &self,
        token_network: Address,
        from_block: u64,
        to_block: u64,
    ) -> impl Future<Output = Result<Vec<ChannelEventLog>, ChainError>> + Send;
}

/// Everything the engine needs from the chain.
pub trait Chain: Provider + UserDepositContract + TokenContract + TokenNetworkContract {
    /// The account this chain handle sends transactions from.
    fn account(&self) -> Address;
}
