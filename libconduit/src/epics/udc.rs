//! The user deposit contract flows: balance monitoring, deposits, and the two-phase withdraw.

use crate::actions::*;
use crate::chain::{Chain, Receipt};
use crate::config::ConfigHandle;
use crate::error::{ensure, ChainError, EngineError, ErrorCode};
use crate::pipeline::{Concat, Dispatcher, EpicContext, Exhaust, StateWatch};
use crate::primitives::Address;
use crate::retry::{retry_async, retry_while};
use crate::tx::{approve_if_needed, assert_tx, Approval};
use log::*;
use std::sync::Arc;

//------------------------------------------   Balance monitor   -----------------------------------------------------

/// Reads the effective balance and total deposit at startup and on every new block, emitting an update whenever
/// they differ from the state. A check still running when the next block arrives makes that block's check skip.
pub async fn udc_monitor<C: Chain>(mut ctx: EpicContext<C>) {
    let exhaust = Exhaust::new(&ctx.tasks);
    let mut last = ctx.state.current().block_number;
    loop {
        let check = check_udc_balance(ctx.chain.clone(), ctx.state.clone(), ctx.dispatcher.clone());
        exhaust.run(check);
        match ctx.state.block_after(last).await {
            Ok(block) => last = block,
            Err(_) => break,
        }
    }
}

async fn check_udc_balance<C: Chain>(chain: Arc<C>, state: StateWatch, dispatcher: Dispatcher) {
    let account = chain.account();
    let read = futures::future::try_join(chain.effective_balance(account), chain.total_deposit(account)).await;
    let (balance, total_deposit) = match read {
        Ok(values) => values,
        Err(e) => {
            debug!("UDC balance check failed. Retrying next block. {e}");
            return;
        }
    };
    let current = state.current();
    if balance != current.udc_balance || total_deposit != current.udc_total_deposit {
        debug!("UDC balance changed: {balance} (total deposit {total_deposit})");
        let success = UdcDepositSuccess { balance, tx: TxInfo::default() };
        dispatcher.dispatch(Action::UdcDeposit(UdcDeposit::success(success, DepositMeta { total_deposit })));
    }
}

//------------------------------------------   Deposit   -------------------------------------------------------------

/// Handles deposit requests strictly one at a time.
pub async fn udc_deposit<C: Chain>(mut ctx: EpicContext<C>) {
    let chain = ctx.chain.clone();
    let config = ctx.config.clone();
    let dispatcher = ctx.dispatcher.clone();
    let worker = Concat::spawn(&ctx.tasks, move |(request, meta): (UdcDepositRequest, DepositMeta)| {
        let chain = chain.clone();
        let config = config.clone();
        let dispatcher = dispatcher.clone();
        async move {
            let action = match deposit(chain.as_ref(), &config, request, meta).await {
                Ok(success) => UdcDeposit::success(success, meta),
                Err(e) => {
                    warn!("UDC deposit of {} failed. {e}", request.deposit);
                    UdcDeposit::failure(&e, meta)
                }
            };
            dispatcher.dispatch(Action::UdcDeposit(action));
        }
    });
    while let Some(action) = ctx.actions.next().await {
        if let Some(AsyncAction::Request { payload, meta }) = action.as_udc_deposit() {
            worker.push((*payload, *meta));
        }
    }
}

async fn deposit<C: Chain>(
    chain: &C,
    config: &ConfigHandle,
    request: UdcDepositRequest,
    meta: DepositMeta,
) -> Result<UdcDepositSuccess, EngineError> {
    let account = chain.account();
    let token = retry_async(|| chain.token(), config, ChainError::is_network, Level::Debug).await?;
    let max_retries = config.current().tx_max_retries;
    let submit = || submit_deposit(chain, config, token, request, meta);
    let receipt = retry_while(submit, config, max_retries, EngineError::is_recoverable_tx, Level::Info).await?;
    let balance = retry_async(|| chain.effective_balance(account), config, ChainError::is_network, Level::Debug).await?;
    info!("Deposited {} to the UDC. Effective balance is now {balance}", request.deposit);
    Ok(UdcDepositSuccess { balance, tx: TxInfo::unconfirmed(receipt.transaction_hash, receipt.block_number) })
}

/// One submission attempt: approve if needed, check the deposit is still current, deposit.
async fn submit_deposit<C: Chain>(
    chain: &C,
    config: &ConfigHandle,
    token: Address,
    request: UdcDepositRequest,
    meta: DepositMeta,
) -> Result<Receipt, EngineError> {
    let account = chain.account();
    let spender = chain.udc_address();
    let read_token =
        || futures::future::try_join(chain.balance_of(token, account), chain.allowance(token, account, spender));
    let (balance, allowance) = retry_async(read_token, config, ChainError::is_network, Level::Debug).await?;
    let minimum_allowance = config.current().minimum_allowance;
    let approval = Approval { token, spender, amount: request.deposit, minimum_allowance };
    approve_if_needed(chain, balance, allowance, approval).await?;
    let deposited = retry_async(|| chain.total_deposit(account), config, ChainError::is_network, Level::Debug).await?;
    ensure(
        deposited + request.deposit == meta.total_deposit,
        ErrorCode::UdcDepositOutdated,
        [("requested", meta.total_deposit), ("current", deposited)],
    )?;
    let tx = chain.deposit(account, meta.total_deposit).await?;
    assert_tx(chain, "deposit", ErrorCode::DepositTransactionFailed, tx).await
}

//------------------------------------------   Withdraw plan   -------------------------------------------------------

/// Handles withdraw plan requests strictly one at a time.
pub async fn udc_withdraw_plan<C: Chain>(mut ctx: EpicContext<C>) {
    let chain = ctx.chain.clone();
    let config = ctx.config.clone();
    let state = ctx.state.clone();
    let dispatcher = ctx.dispatcher.clone();
    let worker = Concat::spawn(&ctx.tasks, move |meta: WithdrawMeta| {
        let chain = chain.clone();
        let config = config.clone();
        let mut state = state.clone();
        let dispatcher = dispatcher.clone();
        async move {
            let action = match plan_withdraw(chain.as_ref(), &config, &mut state, meta).await {
                Ok(success) => UdcWithdrawPlan::success(success, meta),
                Err(e) => {
                    warn!("Planning a UDC withdraw of {} failed. {e}", meta.amount);
                    UdcWithdrawPlan::failure(&e, meta)
                }
            };
            dispatcher.dispatch(Action::UdcWithdrawPlan(action));
        }
    });
    while let Some(action) = ctx.actions.next().await {
        if let Some(AsyncAction::Request { meta, .. }) = action.as_udc_withdraw_plan() {
            worker.push(*meta);
        }
    }
}

async fn plan_withdraw<C: Chain>(
    chain: &C,
    config: &ConfigHandle,
    state: &mut StateWatch,
    meta: WithdrawMeta,
) -> Result<UdcWithdrawPlanSuccess, EngineError> {
    let account = chain.account();
    let amount = meta.amount;
    let balance = retry_async(|| chain.balances(account), config, ChainError::is_network, Level::Debug).await?;
    ensure(!amount.is_zero(), ErrorCode::UdcPlanWithdrawGtZero, [("amount", amount)])?;
    ensure(amount <= balance, ErrorCode::UdcPlanWithdrawExceedsAvailable, [("balance", balance), ("amount", amount)])?;

    let max_retries = config.current().tx_max_retries;
    let submit = || async move {
        let tx = chain.plan_withdraw(amount).await?;
        assert_tx(chain, "planWithdraw", ErrorCode::UdcPlanWithdrawFailed, tx).await
    };
    let receipt = retry_while(submit, config, max_retries, EngineError::is_recoverable_tx, Level::Info).await?;

    let mut block = state.current().block_number;
    let plan = loop {
        match chain.withdraw_plans(account).await {
            Ok(plan) if plan.amount >= amount => break plan,
            Ok(_) => trace!("Withdraw plan of {amount} not visible yet"),
            Err(e) => debug!("Could not read the withdraw plan. Retrying next block. {e}"),
        }
        block = state.block_after(block).await?;
    };
    info!("Planned a UDC withdraw of {amount}, maturing at block {}", plan.withdraw_block);
    let tx = TxInfo::unconfirmed(receipt.transaction_hash, receipt.block_number);
    Ok(UdcWithdrawPlanSuccess { block: plan.withdraw_block, tx })
}

/// At startup, picks up a plan that already exists on-chain as if it had just been confirmed.
pub async fn udc_check_withdraw_planned<C: Chain>(ctx: EpicContext<C>) {
    let account = ctx.chain.account();
    let chain = ctx.chain.as_ref();
    match retry_async(|| chain.withdraw_plans(account), &ctx.config, ChainError::is_network, Level::Debug).await {
        Ok(plan) if plan.withdraw_block != 0 => {
            info!("Found a UDC withdraw plan of {} maturing at block {}", plan.amount, plan.withdraw_block);
            let success = UdcWithdrawPlanSuccess { block: plan.withdraw_block, tx: TxInfo::confirmed() };
            let meta = WithdrawMeta { amount: plan.amount };
            ctx.dispatch(Action::UdcWithdrawPlan(UdcWithdrawPlan::success(success, meta)));
        }
        Ok(_) => debug!("No UDC withdraw plan pending"),
        Err(e) => warn!("Could not check for a pending UDC withdraw plan. {e}"),
    }
}

//------------------------------------------   Withdraw   ------------------------------------------------------------

/// Executes every confirmed withdraw plan once it has matured. Plans wait for maturity independently, but the
/// withdrawals themselves run one at a time. Failures are reported against the plan.
pub async fn udc_withdraw_planned<C: Chain>(mut ctx: EpicContext<C>) {
    let chain = ctx.chain.clone();
    let config = ctx.config.clone();
    let state = ctx.state.clone();
    let dispatcher = ctx.dispatcher.clone();
    let worker = Concat::spawn(&ctx.tasks, move |meta: WithdrawMeta| {
        let chain = chain.clone();
        let config = config.clone();
        let mut state = state.clone();
        let dispatcher = dispatcher.clone();
        async move {
            let action = match withdraw(chain.as_ref(), &config, &mut state, meta).await {
                Ok(success) => Action::UdcWithdraw(UdcWithdraw::success(success, meta)),
                Err(e) => {
                    warn!("UDC withdraw of {} failed. {e}", meta.amount);
                    Action::UdcWithdrawPlan(UdcWithdrawPlan::failure(&e, meta))
                }
            };
            dispatcher.dispatch(action);
        }
    });
    while let Some(action) = ctx.actions.next().await {
        let Some(AsyncAction::Success { payload, meta }) = action.as_udc_withdraw_plan() else { continue };
        if payload.tx.confirmed != Some(true) {
            continue;
        }
        let (plan_block, meta) = (payload.block, *meta);
        let mut state = ctx.state.clone();
        let worker = worker.clone();
        ctx.spawn(async move {
            debug!("Waiting for block {plan_block} to withdraw {} from the UDC", meta.amount);
            if state.block_after(plan_block).await.is_ok() {
                worker.push(meta);
            }
        });
    }
}

/// Withdraws a matured plan and waits for the UDC balance to reflect it.
async fn withdraw<C: Chain>(
    chain: &C,
    config: &ConfigHandle,
    state: &mut StateWatch,
    meta: WithdrawMeta,
) -> Result<UdcWithdrawSuccess, EngineError> {
    let account = chain.account();
    let amount = meta.amount;
    let balance = retry_async(|| chain.balances(account), config, ChainError::is_network, Level::Debug).await?;
    ensure(!balance.is_zero(), ErrorCode::UdcWithdrawNoBalance, [("balance", balance)])?;

    let max_retries = config.current().tx_max_retries;
    let submit = || async move {
        let tx = chain.withdraw(amount).await?;
        assert_tx(chain, "withdraw", ErrorCode::UdcWithdrawFailed, tx).await
    };
    let receipt = retry_while(submit, config, max_retries, EngineError::is_recoverable_tx, Level::Info).await?;

    // The withdrawal is confirmed by the balance going down, not by the receipt.
    let mut block = state.current().block_number;
    let new_balance = loop {
        block = state.block_after(block).await?;
        match chain.balances(account).await {
            Ok(b) if b < balance => break b,
            Ok(_) => trace!("UDC balance has not decreased yet"),
            Err(e) => debug!("Could not read the UDC balance. Retrying next block. {e}"),
        }
    };
    let withdrawal = balance - new_balance;
    info!("Withdrew {withdrawal} from the UDC");
    Ok(UdcWithdrawSuccess { withdrawal, tx: TxInfo::unconfirmed(receipt.transaction_hash, receipt.block_number) })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::amount::TokenAmount;
    use crate::chain::{Provider, TokenContract, UserDepositContract, WithdrawPlanRecord};
    use crate::config::EngineConfig;
    use crate::dummy_impl::{DummyAccount, DummyChain};
    use crate::error::ErrorInfo;
    use crate::pipeline::{Engine, EngineBuilder};
    use crate::state::EngineState;
    use std::time::Duration;

    fn start(chain: &DummyChain, owner: Address) -> Engine {
        let _ = env_logger::try_init();
        let config = EngineConfig { polling_interval: 5, confirmation_blocks: 2, ..Default::default() };
        EngineBuilder::new(chain.account(owner), ConfigHandle::new(config)).with_default_epics().start()
    }

    /// Balance updates from the monitor share the deposit meta, but carry no transaction.
    fn is_deposit_response(meta: DepositMeta) -> impl FnMut(&Action) -> bool {
        move |a| {
            a.as_udc_deposit().is_some_and(|d| {
                let balance_update = matches!(d, AsyncAction::Success { payload, .. } if payload.tx.tx_hash.is_none());
                d.is_response_of(&meta) && !balance_update
            })
        }
    }

    fn is_plan_response(meta: WithdrawMeta) -> impl FnMut(&Action) -> bool {
        move |a| a.as_udc_withdraw_plan().is_some_and(|d| d.is_response_of(&meta))
    }

    fn is_plan_failure(a: &Action) -> bool {
        matches!(a.as_udc_withdraw_plan(), Some(AsyncAction::Failure { .. }))
    }

    fn nonce_conflicts(n: usize) -> impl Iterator<Item = ChainError> {
        (0..n).map(|_| ChainError::NonceConflict("nonce too low".into()))
    }

    /// A funded account on a mining chain, and a configuration that retries quickly.
    fn funded(tx_max_retries: usize) -> (DummyChain, DummyAccount, ConfigHandle) {
        let _ = env_logger::try_init();
        let chain = DummyChain::new(100);
        chain.start_mining(Duration::from_millis(10));
        let owner = Address::random();
        chain.mint(owner, TokenAmount::new(1000));
        let account = chain.account(owner);
        let config = ConfigHandle::new(EngineConfig { polling_interval: 5, tx_max_retries, ..Default::default() });
        (chain, account, config)
    }

    fn first_deposit(amount: u128) -> (UdcDepositRequest, DepositMeta) {
        let amount = TokenAmount::new(amount);
        (UdcDepositRequest { deposit: amount }, DepositMeta { total_deposit: amount })
    }

    #[tokio::test]
    async fn deposit_approves_then_deposits() {
        let chain = DummyChain::new(100);
        chain.start_mining(Duration::from_millis(10));
        let owner = Address::random();
        chain.mint(owner, TokenAmount::new(1000));
        let engine = start(&chain, owner);

        let meta = DepositMeta { total_deposit: TokenAmount::new(300) };
        let payload = UdcDepositRequest { deposit: TokenAmount::new(300) };
        let request = Action::UdcDeposit(UdcDeposit::request(payload, meta));
        let response = engine.request(request, is_deposit_response(meta)).await.unwrap();
        let Some(AsyncAction::Success { payload, .. }) = response.as_udc_deposit() else {
            panic!("expected a deposit success, got {response}");
        };
        assert_eq!(payload.balance, TokenAmount::new(300));
        assert!(payload.tx.is_pending());
        assert_eq!(chain.submitted_txs(), vec!["approve".to_string(), "deposit".to_string()]);
        let settled = |s: &EngineState| s.udc_balance == TokenAmount::new(300) && s.pending_txs.is_empty();
        let state = engine.wait_for(settled).await.unwrap();
        assert_eq!(state.udc_total_deposit, TokenAmount::new(300));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn outdated_deposit_submits_nothing() {
        let chain = DummyChain::new(100);
        chain.start_mining(Duration::from_millis(10));
        let owner = Address::random();
        chain.mint(owner, TokenAmount::new(1000));
        chain.seed_udc_deposit(owner, TokenAmount::new(200));
        let engine = start(&chain, owner);
        let udc = chain.udc_address();
        let account = chain.account(owner);
        let tx = account.approve(chain.token_address(), udc, TokenAmount::MAX).await.unwrap();
        account.wait_for_transaction(tx.hash).await.unwrap();

        // Caller believes nothing has been deposited yet.
        let meta = DepositMeta { total_deposit: TokenAmount::new(100) };
        let payload = UdcDepositRequest { deposit: TokenAmount::new(100) };
        let request = Action::UdcDeposit(UdcDeposit::request(payload, meta));
        let response = engine.request(request, is_deposit_response(meta)).await.unwrap();
        let Some(AsyncAction::Failure { error, .. }) = response.as_udc_deposit() else {
            panic!("expected a deposit failure, got {response}");
        };
        assert_eq!(error.code, Some(ErrorCode::UdcDepositOutdated));
        assert_eq!(chain.submitted_txs(), vec!["approve".to_string()]);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn invalid_plans_fail_without_a_transaction() {
        let chain = DummyChain::new(100);
        let owner = Address::random();
        chain.seed_udc_deposit(owner, TokenAmount::new(50));
        let engine = start(&chain, owner);
        let cases = [(0, ErrorCode::UdcPlanWithdrawGtZero), (51, ErrorCode::UdcPlanWithdrawExceedsAvailable)];
        for (amount, code) in cases {
            let meta = WithdrawMeta { amount: TokenAmount::new(amount) };
            let request = Action::UdcWithdrawPlan(UdcWithdrawPlan::request((), meta));
            let response = engine.request(request, is_plan_response(meta)).await.unwrap();
            let Some(AsyncAction::Failure { error, .. }) = response.as_udc_withdraw_plan() else {
                panic!("expected a plan failure, got {response}");
            };
            assert_eq!(error.code, Some(code));
        }
        assert!(chain.submitted_txs().is_empty());
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn plan_then_withdraw_after_maturity() {
        let chain = DummyChain::new(100);
        chain.set_withdraw_delay(4);
        chain.start_mining(Duration::from_millis(10));
        let owner = Address::random();
        chain.seed_udc_deposit(owner, TokenAmount::new(50));
        let engine = start(&chain, owner);

        let meta = WithdrawMeta { amount: TokenAmount::new(20) };
        let mut actions = engine.subscribe();
        let request = Action::UdcWithdrawPlan(UdcWithdrawPlan::request((), meta));
        let response = engine.request(request, is_plan_response(meta)).await.unwrap();
        let Some(AsyncAction::Success { payload, .. }) = response.as_udc_withdraw_plan() else {
            panic!("expected a plan success, got {response}");
        };
        let plan_block = payload.block;

        let is_withdrawn = |a: &Action| matches!(a.as_udc_withdraw(), Some(AsyncAction::Success { .. }));
        let done = actions.wait_for(is_withdrawn).await.unwrap();
        let Some(AsyncAction::Success { payload, meta: done_meta }) = done.as_udc_withdraw() else { unreachable!() };
        assert_eq!(*done_meta, meta);
        assert_eq!(payload.withdrawal, TokenAmount::new(20));
        assert!(payload.tx.tx_block.unwrap() > plan_block);
        assert_eq!(chain.submitted_txs(), vec!["planWithdraw".to_string(), "withdraw".to_string()]);
        let state = engine.wait_for(|s| s.withdraw_plan.is_none() && s.udc_balance == TokenAmount::new(30)).await;
        assert!(state.is_ok());
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn existing_plan_is_replayed_at_startup() {
        let chain = DummyChain::new(100);
        let owner = Address::random();
        chain.seed_udc_deposit(owner, TokenAmount::new(50));
        chain.seed_withdraw_plan(owner, WithdrawPlanRecord { amount: TokenAmount::new(50), withdraw_block: 103 });
        let engine = start(&chain, owner);
        let state = engine.wait_for(|s| s.withdraw_plan.is_some_and(|p| p.block == 103)).await.unwrap();
        assert_eq!(state.withdraw_plan.unwrap().amount, TokenAmount::new(50));
        let mut actions = engine.subscribe();
        chain.start_mining(Duration::from_millis(10));
        let done = actions.wait_for(|a| a.as_udc_withdraw().is_some()).await.unwrap();
        let Some(AsyncAction::Success { payload, .. }) = done.as_udc_withdraw() else {
            panic!("expected a withdraw success, got {done}");
        };
        assert_eq!(payload.withdrawal, TokenAmount::new(50));
        assert_eq!(chain.submitted_txs(), vec!["withdraw".to_string()]);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn balance_monitor_survives_read_failures() {
        let chain = DummyChain::new(100);
        let owner = Address::random();
        chain.fail_next_reads((0..3).map(|_| ChainError::Network("unreachable".into())));
        chain.seed_udc_deposit(owner, TokenAmount::new(70));
        let engine = start(&chain, owner);
        chain.start_mining(Duration::from_millis(10));
        let state = engine.wait_for(|s| s.udc_balance == TokenAmount::new(70)).await.unwrap();
        assert_eq!(state.udc_total_deposit, TokenAmount::new(70));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn deposit_survives_transient_read_failures() {
        let (chain, account, config) = funded(10);
        let (request, meta) = first_deposit(300);
        chain.fail_next_reads((0..3).map(|_| ChainError::Network("unreachable".into())));
        let receipt = submit_deposit(&account, &config, chain.token_address(), request, meta).await.unwrap();
        assert!(receipt.status);
        assert_eq!(chain.submitted_txs(), vec!["approve".to_string(), "deposit".to_string()]);
        assert_eq!(account.total_deposit(account.account()).await.unwrap(), TokenAmount::new(300));
    }

    #[tokio::test]
    async fn deposit_resubmits_after_a_nonce_conflict() {
        let (chain, account, config) = funded(10);
        let (request, meta) = first_deposit(300);
        chain.fail_next_txs(nonce_conflicts(1));
        let success = deposit(&account, &config, request, meta).await.unwrap();
        assert_eq!(success.balance, TokenAmount::new(300));
        assert_eq!(chain.submitted_txs(), vec!["approve".to_string(), "deposit".to_string()]);
    }

    #[tokio::test]
    async fn deposit_gives_up_after_max_retries() {
        let (chain, account, config) = funded(2);
        let (request, meta) = first_deposit(300);
        chain.fail_next_txs(nonce_conflicts(3));
        let err = deposit(&account, &config, request, meta).await.unwrap_err();
        assert_eq!(err, EngineError::Chain(ChainError::NonceConflict("nonce too low".into())));
        assert!(chain.submitted_txs().is_empty());
        // One more try would have gone through.
        assert!(deposit(&account, &config, request, meta).await.is_ok());
    }

    #[tokio::test]
    async fn reverted_deposit_is_not_retried() {
        let (chain, account, config) = funded(10);
        // Depositing nothing leaves the total unchanged, which the contract rejects.
        let (request, meta) = first_deposit(0);
        let err = deposit(&account, &config, request, meta).await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::DepositTransactionFailed));
        assert!(matches!(err, EngineError::TxFailed { ref label, .. } if label == "deposit"));
        assert_eq!(chain.submitted_txs(), vec!["deposit".to_string()]);
        let info = ErrorInfo::from(&err);
        assert_eq!(info.details.get("label").map(String::as_str), Some("deposit"));
    }

    #[tokio::test]
    async fn matured_plan_without_balance_fails() {
        let chain = DummyChain::new(100);
        let owner = Address::random();
        chain.seed_withdraw_plan(owner, WithdrawPlanRecord { amount: TokenAmount::new(50), withdraw_block: 103 });
        let engine = start(&chain, owner);
        let mut actions = engine.subscribe();
        chain.start_mining(Duration::from_millis(10));
        let failed = actions.wait_for(is_plan_failure).await.unwrap();
        let Some(AsyncAction::Failure { error, meta }) = failed.as_udc_withdraw_plan() else { unreachable!() };
        assert_eq!(error.code, Some(ErrorCode::UdcWithdrawNoBalance));
        assert_eq!(meta.amount, TokenAmount::new(50));
        assert!(chain.submitted_txs().is_empty());
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn matured_plans_withdraw_one_at_a_time() {
        let chain = DummyChain::new(100);
        let owner = Address::random();
        chain.seed_udc_deposit(owner, TokenAmount::new(50));
        chain.seed_withdraw_plan(owner, WithdrawPlanRecord { amount: TokenAmount::new(50), withdraw_block: 103 });
        let engine = start(&chain, owner);
        engine.wait_for(|s| s.withdraw_plan.is_some()).await.unwrap();
        // The same plan confirmed a second time, so both mature at the same block.
        let meta = WithdrawMeta { amount: TokenAmount::new(50) };
        let success = UdcWithdrawPlanSuccess { block: 103, tx: TxInfo::confirmed() };
        engine.dispatch(Action::UdcWithdrawPlan(UdcWithdrawPlan::success(success, meta)));
        let mut actions = engine.subscribe();
        chain.start_mining(Duration::from_millis(10));

        let done = actions.wait_for(|a| a.as_udc_withdraw().is_some()).await.unwrap();
        assert!(matches!(done.as_udc_withdraw(), Some(AsyncAction::Success { .. })));
        // The second withdrawal only starts once the first has drained the balance.
        let failed = actions.wait_for(is_plan_failure).await.unwrap();
        let Some(AsyncAction::Failure { error, .. }) = failed.as_udc_withdraw_plan() else { unreachable!() };
        assert_eq!(error.code, Some(ErrorCode::UdcWithdrawNoBalance));
        assert_eq!(chain.submitted_txs(), vec!["withdraw".to_string()]);
        engine.shutdown().await;
    }
}
