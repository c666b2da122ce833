//! An in-memory chain for tests and demos.
//!
//! One [`DummyChain`] is shared by every account; [`DummyAccount`] is the per-account signer handle that
//! implements [`Chain`]. Submitted transactions are included in the next mined block, where they are executed
//! against the user deposit and token contract rules. Invalid transactions are mined with a failed receipt.

use crate::amount::TokenAmount;
use crate::chain::*;
use crate::error::ChainError;
use crate::primitives::{Address, Hash};
use log::*;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

#[derive(Clone, Debug)]
enum TxCall {
    Approve { token: Address, spender: Address, amount: TokenAmount },
    Deposit { beneficiary: Address, new_total_deposit: TokenAmount },
    PlanWithdraw { amount: TokenAmount },
    Withdraw { amount: TokenAmount },
}

impl TxCall {
    fn label(&self) -> &'static str {
        match self {
            TxCall::Approve { .. } => "approve",
            TxCall::Deposit { .. } => "deposit",
            TxCall::PlanWithdraw { .. } => "planWithdraw",
            TxCall::Withdraw { .. } => "withdraw",
        }
    }
}

#[derive(Clone, Debug)]
struct PendingTx {
    hash: Hash,
    from: Address,
    call: TxCall,
}

#[derive(Debug)]
struct ChainData {
    block: u64,
    token: Address,
    udc: Address,
    token_balances: HashMap<Address, TokenAmount>,
    allowances: HashMap<(Address, Address), TokenAmount>,
    udc_balances: HashMap<Address, TokenAmount>,
    total_deposits: HashMap<Address, TokenAmount>,
    withdraw_plans: HashMap<Address, WithdrawPlanRecord>,
    withdraw_delay: u64,
    pending: Vec<PendingTx>,
    receipts: HashMap<Hash, Receipt>,
    events: Vec<ChannelEventLog>,
    submitted: Vec<String>,
    failing_reads: VecDeque<ChainError>,
    failing_txs: VecDeque<ChainError>,
}

impl ChainData {
    fn new(block: u64) -> Self {
        ChainData {
            block,
            token: Address::random(),
            udc: Address::random(),
            token_balances: HashMap::new(),
            allowances: HashMap::new(),
            udc_balances: HashMap::new(),
            total_deposits: HashMap::new(),
            withdraw_plans: HashMap::new(),
            withdraw_delay: 10,
            pending: Vec::new(),
            receipts: HashMap::new(),
            events: Vec::new(),
            submitted: Vec::new(),
            failing_reads: VecDeque::new(),
            failing_txs: VecDeque::new(),
        }
    }

    fn read(&mut self) -> Result<(), ChainError> {
        match self.failing_reads.pop_front() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn token_balance(&self, owner: &Address) -> TokenAmount {
        self.token_balances.get(owner).copied().unwrap_or_default()
    }

    fn udc_balance(&self, owner: &Address) -> TokenAmount {
        self.udc_balances.get(owner).copied().unwrap_or_default()
    }

    fn plan(&self, owner: &Address) -> WithdrawPlanRecord {
        self.withdraw_plans.get(owner).copied().unwrap_or_default()
    }

    /// Executes a transaction in the current block. Returns whether it succeeded.
    fn execute(&mut self, tx: &PendingTx) -> bool {
        let from = tx.from;
        match tx.call {
            TxCall::Approve { token, spender, amount } => {
                if token != self.token {
                    return false;
                }
                self.allowances.insert((from, spender), amount);
                true
            }
            TxCall::Deposit { beneficiary, new_total_deposit } => {
                let total = self.total_deposits.get(&beneficiary).copied().unwrap_or_default();
                let Some(delta) = new_total_deposit.checked_sub(total).filter(|d| !d.is_zero()) else {
                    return false;
                };
                let allowance = self.allowances.get(&(from, self.udc)).copied().unwrap_or_default();
                if allowance < delta || self.token_balance(&from) < delta {
                    return false;
                }
                self.allowances.insert((from, self.udc), allowance - delta);
                self.token_balances.insert(from, self.token_balance(&from) - delta);
                let held = self.token_balance(&self.udc);
                self.token_balances.insert(self.udc, held + delta);
                self.udc_balances.insert(beneficiary, self.udc_balance(&beneficiary) + delta);
                self.total_deposits.insert(beneficiary, new_total_deposit);
                true
            }
            TxCall::PlanWithdraw { amount } => {
                if amount.is_zero() || amount > self.udc_balance(&from) {
                    return false;
                }
                let record = WithdrawPlanRecord { amount, withdraw_block: self.block + self.withdraw_delay };
                self.withdraw_plans.insert(from, record);
                true
            }
            TxCall::Withdraw { amount } => {
                let plan = self.plan(&from);
                if plan.withdraw_block == 0 || amount > plan.amount || plan.withdraw_block > self.block {
                    return false;
                }
                let amount = amount.min(self.udc_balance(&from));
                self.udc_balances.insert(from, self.udc_balance(&from) - amount);
                self.token_balances.insert(from, self.token_balance(&from) + amount);
                let held = self.token_balance(&self.udc);
                self.token_balances.insert(self.udc, held - amount);
                self.withdraw_plans.remove(&from);
                true
            }
        }
    }

    fn mine_one(&mut self) {
        self.block += 1;
        let pending = std::mem::take(&mut self.pending);
        for tx in pending {
            let status = self.execute(&tx);
            debug!("Dummy chain: {} from {} mined in block {} (status {status})", tx.call.label(), tx.from, self.block);
            let receipt = Receipt { transaction_hash: tx.hash, block_number: self.block, status };
            self.receipts.insert(tx.hash, receipt);
        }
    }
}

/// The shared in-memory chain. Cheap to clone; all clones see the same chain.
#[derive(Clone)]
pub struct DummyChain {
    data: Arc<Mutex<ChainData>>,
    mined: Arc<Notify>,
}

impl DummyChain {
    pub fn new(start_block: u64) -> Self {
        Self { data: Arc::new(Mutex::new(ChainData::new(start_block))), mined: Arc::new(Notify::new()) }
    }

    fn data(&self) -> MutexGuard<'_, ChainData> {
        // A panic while holding the lock leaves plain data behind, so poisoning is ignored.
        self.data.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// A signer handle sending transactions from `account`.
    pub fn account(&self, account: Address) -> DummyAccount {
        DummyAccount { chain: self.clone(), account }
    }

    pub fn block(&self) -> u64 {
        self.data().block
    }

    pub fn token_address(&self) -> Address {
        self.data().token
    }

    pub fn udc_address(&self) -> Address {
        self.data().udc
    }

    /// Mines `n` blocks. Pending transactions are included in the first one.
    pub fn mine(&self, n: u64) {
        {
            let mut data = self.data();
            for _ in 0..n {
                data.mine_one();
            }
        }
        self.mined.notify_waiters();
    }

    /// Mines blocks until the chain reaches `block`.
    pub fn mine_to(&self, block: u64) {
        let current = self.block();
        if block > current {
            self.mine(block - current);
        }
    }

    /// Mines one block every `interval`, for as long as the runtime lives.
    pub fn start_mining(&self, interval: Duration) -> JoinHandle<()> {
        let chain = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                chain.mine(1);
            }
        })
    }

    pub fn mint(&self, owner: Address, amount: TokenAmount) {
        let mut data = self.data();
        let balance = data.token_balance(&owner);
        data.token_balances.insert(owner, balance + amount);
    }

    pub fn token_balance(&self, owner: Address) -> TokenAmount {
        self.data().token_balance(&owner)
    }

    /// Credits `owner` in the UDC directly, as if a deposit had been mined earlier.
    pub fn seed_udc_deposit(&self, owner: Address, amount: TokenAmount) {
        let mut data = self.data();
        let balance = data.udc_balance(&owner);
        data.udc_balances.insert(owner, balance + amount);
        let total = data.total_deposits.get(&owner).copied().unwrap_or_default();
        data.total_deposits.insert(owner, total + amount);
    }

    /// Records an existing withdraw plan for `owner`, as if it had been planned earlier.
    pub fn seed_withdraw_plan(&self, owner: Address, plan: WithdrawPlanRecord) {
        self.data().withdraw_plans.insert(owner, plan);
    }

    /// The number of blocks between planning a withdraw and its maturity.
    pub fn set_withdraw_delay(&self, blocks: u64) {
        self.data().withdraw_delay = blocks;
    }

    /// Makes the next chain reads fail with the given errors, in order.
    pub fn fail_next_reads(&self, errors: impl IntoIterator<Item = ChainError>) {
        self.data().failing_reads.extend(errors);
    }

    /// Makes the next transaction submissions fail with the given errors, in order.
    pub fn fail_next_txs(&self, errors: impl IntoIterator<Item = ChainError>) {
        self.data().failing_txs.extend(errors);
    }

    /// The labels of every transaction accepted for inclusion so far.
    pub fn submitted_txs(&self) -> Vec<String> {
        self.data().submitted.clone()
    }

    /// Records a token-network event as included in `block`, with a successful receipt for its transaction.
    pub fn emit_channel_event(&self, token_network: Address, block: u64, event: ChannelEvent) -> Hash {
        let transaction_hash = Hash::random();
        let mut data = self.data();
        data.receipts.insert(transaction_hash, Receipt { transaction_hash, block_number: block, status: true });
        data.events.push(ChannelEventLog { token_network, transaction_hash, block_number: block, event });
        transaction_hash
    }

    /// Drops an event and its receipt, as a reorg would.
    pub fn remove_transaction(&self, hash: Hash) {
        let mut data = self.data();
        data.receipts.remove(&hash);
        data.events.retain(|e| e.transaction_hash != hash);
    }

    fn submit(&self, from: Address, call: TxCall) -> Result<TxHandle, ChainError> {
        let mut data = self.data();
        if let Some(e) = data.failing_txs.pop_front() {
            return Err(e);
        }
        let hash = Hash::random();
        data.submitted.push(call.label().to_string());
        data.pending.push(PendingTx { hash, from, call });
        Ok(TxHandle { hash })
    }

    fn read<T>(&self, f: impl FnOnce(&ChainData) -> T) -> Result<T, ChainError> {
        let mut data = self.data();
        data.read()?;
        Ok(f(&data))
    }
}

/// A [`DummyChain`] seen by one account.
#[derive(Clone)]
pub struct DummyAccount {
    chain: DummyChain,
    account: Address,
}

impl DummyAccount {
    pub fn chain(&self) -> &DummyChain {
        &self.chain
    }
}

impl Provider for DummyAccount {
    async fn block_number(&self) -> Result<u64, ChainError> {
        self.chain.read(|d| d.block)
    }

    async fn wait_for_transaction(&self, hash: Hash) -> Result<Receipt, ChainError> {
        loop {
            let mined = self.chain.mined.notified();
            let receipt = self.chain.data().receipts.get(&hash).copied();
            if let Some(receipt) = receipt {
                return Ok(receipt);
            }
            mined.await;
        }
    }

    async fn transaction_receipt(&self, hash: Hash) -> Result<Option<Receipt>, ChainError> {
        self.chain.read(|d| d.receipts.get(&hash).copied())
    }
}

impl UserDepositContract for DummyAccount {
    fn udc_address(&self) -> Address {
        self.chain.udc_address()
    }

    async fn token(&self) -> Result<Address, ChainError> {
        self.chain.read(|d| d.token)
    }

    async fn effective_balance(&self, owner: Address) -> Result<TokenAmount, ChainError> {
        self.chain.read(|d| d.udc_balance(&owner).saturating_sub(d.plan(&owner).amount))
    }

    async fn total_deposit(&self, owner: Address) -> Result<TokenAmount, ChainError> {
        self.chain.read(|d| d.total_deposits.get(&owner).copied().unwrap_or_default())
    }

    async fn balances(&self, owner: Address) -> Result<TokenAmount, ChainError> {
        self.chain.read(|d| d.udc_balance(&owner))
    }

    async fn withdraw_plans(&self, owner: Address) -> Result<WithdrawPlanRecord, ChainError> {
        self.chain.read(|d| d.plan(&owner))
    }

    async fn deposit(&self, beneficiary: Address, new_total_deposit: TokenAmount) -> Result<TxHandle, ChainError> {
        self.chain.submit(self.account, TxCall::Deposit { beneficiary, new_total_deposit })
    }

    async fn plan_withdraw(&self, amount: TokenAmount) -> Result<TxHandle, ChainError> {
        self.chain.submit(self.account, TxCall::PlanWithdraw { amount })
    }

    async fn withdraw(&self, amount: TokenAmount) -> Result<TxHandle, ChainError> {
        self.chain.submit(self.account, TxCall::Withdraw { amount })
    }
}

impl TokenContract for DummyAccount {
    async fn balance_of(&self, _token: Address, owner: Address) -> Result<TokenAmount, ChainError> {
        self.chain.read(|d| d.token_balance(&owner))
    }

    async fn allowance(&self, _token: Address, owner: Address, spender: Address) -> Result<TokenAmount, ChainError> {
        self.chain.read(|d| d.allowances.get(&(owner, spender)).copied().unwrap_or_default())
    }

    async fn approve(&self, token: Address, spender: Address, amount: TokenAmount) -> Result<TxHandle, ChainError> {
        self.chain.submit(self.account, TxCall::Approve { token, spender, amount })
    }
}

impl TokenNetworkContract for DummyAccount {
    async fn channel_events(
        &self,
        token_network: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<ChannelEventLog>, ChainError> {
        self.chain.read(|d| {
            d.events
                .iter()
                .filter(|e| e.token_network == token_network && (from_block..=to_block).contains(&e.block_number))
                .cloned()
                .collect()
        })
    }
}

impl Chain for DummyAccount {
    fn account(&self) -> Address {
        self.account
    }
}
