use e2e::TestNetwork;
use libconduit::actions::*;
use libconduit::amount::TokenAmount;
use libconduit::error::ErrorCode;
use std::time::Duration;

fn is_plan_response(meta: WithdrawMeta) -> impl FnMut(&Action) -> bool {
    move |a| a.as_udc_withdraw_plan().is_some_and(|d| d.is_response_of(&meta))
}

#[tokio::test]
async fn planned_withdraw_matures_then_lowers_the_balance() {
    let net = TestNetwork::start().unwrap();
    let alice = net.alice.address();
    net.chain.seed_udc_deposit(alice, TokenAmount::new(50));
    net.chain.set_withdraw_delay(4);
    let miner = net.chain.start_mining(Duration::from_millis(10));
    net.alice.wait_for("the UDC balance", |s| s.udc_balance == TokenAmount::new(50)).await.unwrap();

    let meta = WithdrawMeta { amount: TokenAmount::new(20) };
    let mut actions = net.alice.engine().subscribe();
    let request = Action::UdcWithdrawPlan(UdcWithdrawPlan::request((), meta));
    let response = net.alice.engine().request(request, is_plan_response(meta)).await.unwrap();
    let Some(AsyncAction::Success { payload, .. }) = response.as_udc_withdraw_plan() else {
        panic!("expected a plan success, got {response}");
    };
    let withdraw_block = payload.block;

    let done = actions.wait_for(|a| a.as_udc_withdraw().is_some()).await.unwrap();
    let Some(AsyncAction::Success { payload, .. }) = done.as_udc_withdraw() else {
        panic!("expected a withdraw success, got {done}");
    };
    assert_eq!(payload.withdrawal, TokenAmount::new(20));
    assert!(payload.tx.tx_block.is_some_and(|b| b > withdraw_block));
    let state = net.alice.wait_for("the lower balance", |s| s.udc_balance == TokenAmount::new(30)).await.unwrap();
    assert!(state.withdraw_plan.is_none());
    assert_eq!(net.bob.state().udc_balance, TokenAmount::ZERO);
    miner.abort();
    net.shutdown().await;
}

#[tokio::test]
async fn withdraw_plans_beyond_the_balance_fail() {
    let net = TestNetwork::start().unwrap();
    net.chain.seed_udc_deposit(net.alice.address(), TokenAmount::new(50));
    net.chain.mine(1);
    net.alice.wait_for("the UDC balance", |s| s.udc_balance == TokenAmount::new(50)).await.unwrap();
    let meta = WithdrawMeta { amount: TokenAmount::new(51) };
    let request = Action::UdcWithdrawPlan(UdcWithdrawPlan::request((), meta));
    let response = net.alice.engine().request(request, is_plan_response(meta)).await.unwrap();
    let Some(AsyncAction::Failure { error, .. }) = response.as_udc_withdraw_plan() else {
        panic!("expected a plan failure, got {response}");
    };
    assert_eq!(error.code, Some(ErrorCode::UdcPlanWithdrawExceedsAvailable));
    assert!(net.chain.submitted_txs().is_empty());
    net.shutdown().await;
}
