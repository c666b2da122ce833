use e2e::fixtures::*;
use e2e::TestNetwork;
use libconduit::actions::*;
use libconduit::amount::TokenAmount;
use libconduit::error::ErrorCode;
use libconduit::primitives::{Address, Secret};
use libconduit::state::{Direction, TransferKey};

#[tokio::test]
async fn pending_then_unlocked_on_both_ends() {
    let net = TestNetwork::start().unwrap();
    net.ensure_presence().await.unwrap();
    let secret = Secret::random();
    let received = TransferKey::received(secret.secrethash());

    let meta = net.ensure_transfer_pending(secret).await.unwrap();
    net.expect_channels_in_sync().unwrap();
    let locked = TokenAmount::new(AMOUNT + FEE);
    let alice = net.alice_channel().unwrap();
    assert_eq!(alice.own.balance_proof.locked_amount, locked);
    assert_eq!(alice.capacity(), TokenAmount::new(DEPOSIT - AMOUNT - FEE));
    let incoming = net.bob.state().transfer(&received).cloned().unwrap();
    assert_eq!(incoming.amount, TokenAmount::new(AMOUNT));
    assert_eq!(incoming.fee, TokenAmount::new(FEE));
    assert_eq!(incoming.secret, None);

    let mut actions = net.alice.engine().subscribe();
    net.ensure_transfer_unlocked(secret).await.unwrap();
    net.expect_channels_in_sync().unwrap();
    let alice = net.alice_channel().unwrap();
    assert_eq!(alice.own.balance_proof.transferred_amount, locked);
    assert_eq!(alice.own.balance_proof.locked_amount, TokenAmount::ZERO);
    assert_eq!(net.bob_channel().unwrap().capacity(), locked);
    assert_eq!(net.bob.state().transfer(&received).and_then(|t| t.secret), Some(secret));

    let done = actions.wait_for(|a| matches!(a.as_transfer(), Some(AsyncAction::Success { .. }))).await.unwrap();
    let Some(AsyncAction::Success { payload, meta: done_meta }) = done.as_transfer() else { unreachable!() };
    assert_eq!(*done_meta, meta);
    assert_eq!(payload.secret, Some(secret));

    let stored = net.bob.stored_transfers().unwrap();
    assert!(stored.iter().any(|t| t.direction == Direction::Received && t.unlock_processed));
    let sent = net.hub.sent_messages();
    assert!(sent.iter().any(|m| m.from == net.bob.address() && m.body.contains("\"Delivered\"")));
    net.shutdown().await;
}

#[tokio::test]
async fn consecutive_transfers_continue_the_balance_proof() {
    let net = TestNetwork::start().unwrap();
    let first = Secret::random();
    let second = Secret::random();
    net.ensure_transfer_unlocked(first).await.unwrap();
    net.ensure_transfer_pending(second).await.unwrap();
    net.expect_channels_in_sync().unwrap();
    let alice = net.alice_channel().unwrap();
    assert_eq!(alice.own.balance_proof.nonce, 3);
    assert_eq!(alice.own.locks.len(), 1);
    net.shutdown().await;
}

#[tokio::test]
async fn transfers_need_a_channel() {
    let net = TestNetwork::start().unwrap();
    net.ensure_token_monitored().await.unwrap();
    let secret = Secret::random();
    let meta = TransferKey::sent(secret.secrethash());
    let request = TransferRequest {
        token_network: net.token_network,
        target: Address::random(),
        value: TokenAmount::new(AMOUNT),
        fee: TokenAmount::new(FEE),
        payment_id: PAYMENT_ID,
        secret: Some(secret),
    };
    let action = Action::Transfer(Transfer::request(request, meta));
    let response = net
        .alice
        .engine()
        .request(action, |a| a.as_transfer().is_some_and(|t| t.is_response_of(&meta)))
        .await
        .unwrap();
    let Some(AsyncAction::Failure { error, .. }) = response.as_transfer() else {
        panic!("expected a transfer failure, got {response}");
    };
    assert_eq!(error.code, Some(ErrorCode::ChannelNotFound));
    assert!(net.alice.state().transfer(&meta).is_none());
    assert!(net.hub.sent_messages().is_empty());
    net.shutdown().await;
}
