//! Direct transfers over the transport: locking, unlocking, and the acknowledgements in between.
//!
//! Everything that changes our own balance proof (sending a locked transfer or an unlock) goes through one
//! sequential worker, which waits for the reducer to apply each change before building the next one. Inbound
//! messages are handled one at a time for the same reason.

use crate::codec::{decode_body, encode_message};
use crate::errors::TransportError;
use crate::message_types::{new_message_id, Delivered, LockedTransfer, Message, Processed, Unlock};
use crate::presence::{no_delivery_peers, PeerSet};
use crate::transport::{InboundReceiver, Transport};
use libconduit::actions::*;
use libconduit::chain::Chain;
use libconduit::config::ConfigHandle;
use libconduit::crypto::AccountKey;
use libconduit::error::{ensure, EngineError, ErrorCode};
use libconduit::pipeline::{Concat, Dispatcher, EpicContext, StateWatch, TaskSet};
use libconduit::primitives::Address;
use libconduit::retry::retry_while;
use libconduit::state::{ChannelKey, ChannelState, Direction, EngineState, Lock, TransferKey, TransferState};
use log::*;
use std::sync::Arc;
use tokio::sync::watch;

/// What the transfer epics share: the transport, and the key our messages are signed with.
pub struct TransportDeps<T: Transport> {
    pub transport: Arc<T>,
    pub key: AccountKey,
}

impl<T: Transport> TransportDeps<T> {
    /// Signs and sends `message` to `peer`, retrying while the peer is unreachable.
    pub async fn send(&self, config: &ConfigHandle, peer: Address, message: Message) -> Result<(), EngineError> {
        let message = message.sign(&self.key).map_err(|e| transport_error(e.to_string()))?;
        let body = encode_message(&message).map_err(|e| transport_error(e.to_string()))?;
        let max_retries = config.current().tx_max_retries;
        let send = || self.transport.send(peer, body.clone());
        retry_while(send, config, max_retries, TransportError::is_transient, Level::Debug)
            .await
            .map_err(|e| transport_error(e.to_string()))?;
        debug!("Sent {message} to {peer}");
        Ok(())
    }
}

fn transport_error(reason: String) -> EngineError {
    EngineError::assertion(ErrorCode::TransportUnavailable, [("reason", reason)])
}

/// Sends an acknowledgement without holding up the caller.
fn reply<T: Transport>(
    tasks: &TaskSet,
    deps: &Arc<TransportDeps<T>>,
    config: &ConfigHandle,
    peer: Address,
    message: Message,
) {
    let deps = deps.clone();
    let config = config.clone();
    tasks.spawn(async move {
        if let Err(e) = deps.send(&config, peer, message).await {
            warn!("Could not acknowledge a message of {peer}. {e}");
        }
    });
}

fn is_open(state: &EngineState, key: &ChannelKey, id: u64) -> bool {
    state.channel(key).is_some_and(|c| c.id == id && c.state == ChannelState::Open)
}

//------------------------------------------   Outbound   ------------------------------------------------------------

enum Outbound {
    Transfer(TransferRequest, TransferKey),
    Unlock(TransferKey),
}

/// Handles our transfer and unlock requests, and reports a sent transfer as completed once the partner has
/// processed its unlock.
pub async fn transfer_requests<C: Chain, T: Transport>(deps: Arc<TransportDeps<T>>, mut ctx: EpicContext<C>) {
    let worker = {
        let config = ctx.config.clone();
        let state = ctx.state.clone();
        let dispatcher = ctx.dispatcher.clone();
        Concat::spawn(&ctx.tasks, move |item: Outbound| {
            let deps = deps.clone();
            let config = config.clone();
            let state = state.clone();
            let dispatcher = dispatcher.clone();
            async move {
                match item {
                    Outbound::Transfer(request, meta) => {
                        if let Err(e) = send_transfer(&deps, &config, state, &dispatcher, &request, meta).await {
                            warn!("Transfer {meta} failed. {e}");
                            dispatcher.dispatch(Action::Transfer(Transfer::failure(e, meta)));
                        }
                    }
                    Outbound::Unlock(meta) => {
                        if let Err(e) = send_unlock(&deps, &config, state, &dispatcher, meta).await {
                            warn!("Unlock of {meta} failed. {e}");
                            dispatcher.dispatch(Action::TransferUnlock(TransferUnlock::failure(e, meta)));
                        }
                    }
                }
            }
        })
    };
    while let Some(action) = ctx.actions.next().await {
        match action.as_ref() {
            Action::Transfer(AsyncAction::Request { payload, meta }) if meta.direction == Direction::Sent => {
                debug!("Transfer of {} to {} requested", payload.value, payload.target);
                worker.push(Outbound::Transfer(payload.clone(), *meta));
            }
            Action::TransferUnlock(AsyncAction::Request { meta, .. }) if meta.direction == Direction::Sent => {
                worker.push(Outbound::Unlock(*meta));
            }
            Action::TransferUnlockProcessed { meta } if meta.direction == Direction::Sent => {
                let secret = ctx.state.current().transfer(meta).and_then(|t| t.secret);
                info!("Transfer {meta} completed");
                ctx.dispatch(Action::Transfer(Transfer::success(TransferCompleted { secret }, *meta)));
            }
            _ => {}
        }
    }
}

async fn send_transfer<T: Transport>(
    deps: &TransportDeps<T>,
    config: &ConfigHandle,
    mut state: StateWatch,
    dispatcher: &Dispatcher,
    request: &TransferRequest,
    meta: TransferKey,
) -> Result<(), EngineError> {
    let reveal_timeout = config.current().reveal_timeout;
    let (transfer, message) = build_locked_transfer(&state.current(), request, meta, reveal_timeout)?;
    let channel_key = ChannelKey::new(transfer.token_network, transfer.partner);
    let channel_id = transfer.channel_id;
    let message_id = transfer.message_id;
    dispatcher.dispatch(Action::TransferSigned { transfer: Box::new(transfer) });
    let applied = state.wait_for(|s| s.transfer(&meta).is_some() || !is_open(s, &channel_key, channel_id)).await?;
    let accepted = applied.transfer(&meta).is_some_and(|t| t.message_id == message_id);
    ensure(accepted, ErrorCode::ChannelNotOpen, [("channel", channel_key)])?;
    info!("Sending transfer {meta} of {} to {}", request.value, request.target);
    deps.send(config, channel_key.partner, Message::LockedTransfer(message)).await
}

/// Builds the record and the message of a direct transfer to `request.target`, locking `value + fee` on top of our
/// current balance proof.
fn build_locked_transfer(
    state: &EngineState,
    request: &TransferRequest,
    meta: TransferKey,
    reveal_timeout: u64,
) -> Result<(TransferState, LockedTransfer), EngineError> {
    let invalid = |reason: &str| EngineError::assertion(ErrorCode::TransferInvalid, [("reason", reason)]);
    if meta.direction != Direction::Sent {
        return Err(invalid("only sent transfers can be requested"));
    }
    if state.transfer(&meta).is_some() {
        return Err(invalid("the transfer exists already"));
    }
    if let Some(secret) = request.secret {
        ensure(secret.secrethash() == meta.secrethash, ErrorCode::SecretMismatch, [("secrethash", meta.secrethash)])?;
    }
    let channel_key = ChannelKey::new(request.token_network, request.target);
    let channel = state
        .channel(&channel_key)
        .ok_or_else(|| EngineError::assertion(ErrorCode::ChannelNotFound, [("channel", channel_key)]))?;
    ensure(channel.state == ChannelState::Open, ErrorCode::ChannelNotOpen, [("state", channel.state)])?;
    if request.value.is_zero() {
        return Err(invalid("the value must be greater than zero"));
    }
    let amount = request.value.checked_add(request.fee).ok_or_else(|| invalid("the amount overflows"))?;
    let capacity = channel.capacity();
    ensure(amount <= capacity, ErrorCode::InsufficientCapacity, [("capacity", capacity), ("amount", amount)])?;

    let lock = Lock { amount, expiration: state.block_number + 2 * reveal_timeout, secrethash: meta.secrethash };
    let balance_proof = channel.own.next_locked_balance_proof(&lock).ok_or_else(|| invalid("the amount overflows"))?;
    let message_id = new_message_id();
    let message = LockedTransfer {
        message_identifier: message_id,
        payment_identifier: request.payment_id,
        token_network_address: request.token_network,
        channel_identifier: channel.id,
        nonce: balance_proof.nonce,
        transferred_amount: balance_proof.transferred_amount,
        locked_amount: balance_proof.locked_amount,
        locksroot: balance_proof.locksroot,
        lock: lock.clone(),
        recipient: request.target,
        initiator: state.address,
        target: request.target,
        fee: request.fee,
        signature: None,
    };
    let transfer = TransferState {
        direction: Direction::Sent,
        secrethash: meta.secrethash,
        token_network: request.token_network,
        channel_id: channel.id,
        partner: request.target,
        initiator: state.address,
        target: request.target,
        amount: request.value,
        fee: request.fee,
        payment_id: request.payment_id,
        lock,
        balance_proof,
        message_id,
        secret: request.secret,
        transfer_processed: false,
        unlock: None,
        unlock_message_id: None,
        unlock_processed: false,
    };
    Ok((transfer, message))
}

async fn send_unlock<T: Transport>(
    deps: &TransportDeps<T>,
    config: &ConfigHandle,
    mut state: StateWatch,
    dispatcher: &Dispatcher,
    meta: TransferKey,
) -> Result<(), EngineError> {
    let (unlocked, message, partner) = build_unlock(&state.current(), meta)?;
    let message_id = unlocked.message_id;
    dispatcher.dispatch(Action::TransferUnlock(TransferUnlock::success(unlocked, meta)));
    let applied = state.wait_for(|s| s.transfer(&meta).is_some_and(|t| t.unlock.is_some())).await?;
    let accepted = applied.transfer(&meta).and_then(|t| t.unlock_message_id) == Some(message_id);
    ensure(accepted, ErrorCode::TransferInvalid, [("transfer", meta)])?;
    info!("Sending the unlock of {meta} to {partner}");
    deps.send(config, partner, Message::Unlock(message)).await
}

/// Builds the unlock of a sent transfer whose secret we know, moving its lock into the transferred amount.
fn build_unlock(state: &EngineState, meta: TransferKey) -> Result<(TransferUnlocked, Unlock, Address), EngineError> {
    let invalid = |reason: &str| EngineError::assertion(ErrorCode::TransferInvalid, [("reason", reason)]);
    let transfer = state
        .transfer(&meta)
        .filter(|t| t.direction == Direction::Sent)
        .ok_or_else(|| EngineError::assertion(ErrorCode::TransferNotFound, [("transfer", meta)]))?;
    let secret = transfer.secret.ok_or_else(|| invalid("the secret is unknown"))?;
    if transfer.unlock.is_some() {
        return Err(invalid("the transfer is unlocked already"));
    }
    let channel_key = ChannelKey::new(transfer.token_network, transfer.partner);
    let channel = state
        .channel(&channel_key)
        .filter(|c| c.id == transfer.channel_id)
        .ok_or_else(|| EngineError::assertion(ErrorCode::ChannelNotFound, [("channel", channel_key)]))?;
    ensure(!channel.state.is_closed(), ErrorCode::ChannelNotOpen, [("state", channel.state)])?;
    let balance_proof =
        channel.own.unlocked_balance_proof(&meta.secrethash).ok_or_else(|| invalid("the lock is not pending"))?;
    let message_id = new_message_id();
    let message = Unlock {
        message_identifier: message_id,
        payment_identifier: transfer.payment_id,
        token_network_address: transfer.token_network,
        channel_identifier: transfer.channel_id,
        nonce: balance_proof.nonce,
        transferred_amount: balance_proof.transferred_amount,
        locked_amount: balance_proof.locked_amount,
        locksroot: balance_proof.locksroot,
        secret,
        signature: None,
    };
    Ok((TransferUnlocked { balance_proof, message_id }, message, transfer.partner))
}

//------------------------------------------   Inbound   -------------------------------------------------------------

/// Handles the messages peers send us, acknowledging every signed one with `Delivered` unless the peer opted out.
pub async fn inbound_messages<C: Chain, T: Transport>(
    deps: Arc<TransportDeps<T>>,
    mut inbound: InboundReceiver,
    ctx: EpicContext<C>,
) {
    let EpicContext { config, actions, mut state, dispatcher, tasks, .. } = ctx;
    let no_delivery = no_delivery_peers(&tasks, actions);
    while let Some(received) = inbound.recv().await {
        let sender = received.sender;
        for message in decode_body(&received.body, sender) {
            trace!("Received {message} from {sender}");
            match handle_message(&mut state, &dispatcher, sender, &message).await {
                Ok(Some(processed)) => {
                    let processed = Processed { message_identifier: processed, signature: None };
                    reply(&tasks, &deps, &config, sender, Message::Processed(processed));
                }
                Ok(None) => {}
                Err(e) => warn!("Dropping {message} from {sender}. {e}"),
            }
            if let Some(id) = delivery_receipt_for(&message, sender, &no_delivery) {
                let delivered = Delivered { delivered_message_identifier: id, signature: None };
                reply(&tasks, &deps, &config, sender, Message::Delivered(delivered));
            }
        }
    }
    debug!("Inbound message stream closed");
}

/// The identifier to acknowledge with `Delivered`, if any. Unsigned messages and `Delivered` itself never are.
fn delivery_receipt_for(message: &Message, sender: Address, no_delivery: &watch::Receiver<PeerSet>) -> Option<u64> {
    message.signature()?;
    if no_delivery.borrow().contains(&sender) {
        return None;
    }
    message.message_identifier()
}

/// Returns the identifier to answer with `Processed`.
async fn handle_message(
    state: &mut StateWatch,
    dispatcher: &Dispatcher,
    sender: Address,
    message: &Message,
) -> Result<Option<u64>, EngineError> {
    if message.signature().is_none() && !matches!(message, Message::Delivered(_)) {
        return Err(EngineError::assertion(ErrorCode::MessageSignatureMismatch, [("reason", "unsigned message")]));
    }
    match message {
        Message::LockedTransfer(m) => receive_transfer(state, dispatcher, sender, m).await.map(Some),
        Message::Unlock(m) => receive_unlock(state, dispatcher, sender, m).await.map(Some),
        Message::Processed(m) => {
            on_processed(&state.current(), dispatcher, sender, m.message_identifier)?;
            Ok(None)
        }
        Message::Delivered(m) => {
            trace!("{sender} received our message {}", m.delivered_message_identifier);
            Ok(None)
        }
    }
}

async fn receive_transfer(
    state: &mut StateWatch,
    dispatcher: &Dispatcher,
    sender: Address,
    message: &LockedTransfer,
) -> Result<u64, EngineError> {
    let id = message.message_identifier;
    let Some(transfer) = validate_locked_transfer(&state.current(), sender, message)? else {
        debug!("Transfer message {id} was received before. Acknowledging it again");
        return Ok(id);
    };
    let key = transfer.key();
    let channel_key = ChannelKey::new(transfer.token_network, sender);
    let channel_id = transfer.channel_id;
    info!("Received transfer {key} of {} from {sender}", transfer.amount);
    dispatcher.dispatch(Action::TransferSigned { transfer: Box::new(transfer) });
    let applied = state.wait_for(|s| s.transfer(&key).is_some() || !is_open(s, &channel_key, channel_id)).await?;
    let accepted = applied.transfer(&key).is_some_and(|t| t.message_id == id);
    ensure(accepted, ErrorCode::ChannelNotOpen, [("channel", channel_key)])?;
    dispatcher.dispatch(Action::TransferProcessed { meta: key });
    Ok(id)
}

/// Checks a locked transfer from `sender` against the partner side of our channel. `None` for a transfer we
/// already applied.
fn validate_locked_transfer(
    state: &EngineState,
    sender: Address,
    message: &LockedTransfer,
) -> Result<Option<TransferState>, EngineError> {
    let invalid = |reason: &str| EngineError::assertion(ErrorCode::TransferInvalid, [("reason", reason)]);
    let key = TransferKey::received(message.lock.secrethash);
    if let Some(existing) = state.transfer(&key) {
        if existing.message_id == message.message_identifier && existing.partner == sender {
            return Ok(None);
        }
        return Err(invalid("a different transfer with this secrethash exists"));
    }
    if message.recipient != state.address {
        return Err(invalid("we are not the recipient"));
    }
    if message.target != state.address {
        return Err(invalid("mediated transfers are not supported"));
    }
    let channel_key = ChannelKey::new(message.token_network_address, sender);
    let channel = state
        .channel(&channel_key)
        .filter(|c| c.id == message.channel_identifier)
        .ok_or_else(|| EngineError::assertion(ErrorCode::ChannelNotFound, [("channel", channel_key)]))?;
    ensure(channel.state == ChannelState::Open, ErrorCode::ChannelNotOpen, [("state", channel.state)])?;
    if message.fee > message.lock.amount {
        return Err(invalid("the fee exceeds the locked amount"));
    }
    if message.lock.expiration <= state.block_number {
        return Err(invalid("the lock has expired"));
    }
    let capacity = channel.partner_capacity();
    let amount = message.lock.amount;
    ensure(amount <= capacity, ErrorCode::InsufficientCapacity, [("capacity", capacity), ("amount", amount)])?;
    let expected = channel.partner.next_locked_balance_proof(&message.lock);
    if expected.as_ref() != Some(&message.balance_proof()) {
        return Err(invalid("the balance proof does not follow the partner's last one"));
    }
    Ok(Some(TransferState {
        direction: Direction::Received,
        secrethash: message.lock.secrethash,
        token_network: message.token_network_address,
        channel_id: message.channel_identifier,
        partner: sender,
        initiator: message.initiator,
        target: message.target,
        amount: message.value(),
        fee: message.fee,
        payment_id: message.payment_identifier,
        lock: message.lock.clone(),
        balance_proof: message.balance_proof(),
        message_id: message.message_identifier,
        secret: None,
        transfer_processed: false,
        unlock: None,
        unlock_message_id: None,
        unlock_processed: false,
    }))
}

async fn receive_unlock(
    state: &mut StateWatch,
    dispatcher: &Dispatcher,
    sender: Address,
    message: &Unlock,
) -> Result<u64, EngineError> {
    let id = message.message_identifier;
    let Some((key, unlocked)) = validate_unlock(&state.current(), sender, message)? else {
        debug!("Unlock message {id} was received before. Acknowledging it again");
        return Ok(id);
    };
    info!("Transfer {key} was unlocked by {sender}");
    dispatcher.dispatch(Action::TransferSecret { secret: message.secret, meta: key });
    dispatcher.dispatch(Action::TransferUnlock(TransferUnlock::success(unlocked, key)));
    dispatcher.dispatch(Action::TransferUnlockProcessed { meta: key });
    state.wait_for(|s| s.transfer(&key).is_some_and(|t| t.unlock_processed)).await?;
    Ok(id)
}

/// Checks an unlock from `sender` against the received transfer it claims. `None` for an unlock we already applied.
fn validate_unlock(
    state: &EngineState,
    sender: Address,
    message: &Unlock,
) -> Result<Option<(TransferKey, TransferUnlocked)>, EngineError> {
    let invalid = |reason: &str| EngineError::assertion(ErrorCode::TransferInvalid, [("reason", reason)]);
    let key = TransferKey::received(message.secret.secrethash());
    let transfer = state
        .transfer(&key)
        .filter(|t| t.partner == sender)
        .ok_or_else(|| EngineError::assertion(ErrorCode::TransferNotFound, [("transfer", key)]))?;
    if transfer.unlock.is_some() {
        if transfer.unlock_message_id == Some(message.message_identifier) {
            return Ok(None);
        }
        return Err(invalid("the transfer is unlocked already"));
    }
    if message.token_network_address != transfer.token_network || message.channel_identifier != transfer.channel_id {
        return Err(invalid("the unlock is for another channel"));
    }
    let channel_key = ChannelKey::new(transfer.token_network, sender);
    let channel = state
        .channel(&channel_key)
        .filter(|c| c.id == transfer.channel_id)
        .ok_or_else(|| EngineError::assertion(ErrorCode::ChannelNotFound, [("channel", channel_key)]))?;
    let expected = channel.partner.unlocked_balance_proof(&key.secrethash);
    if expected.as_ref() != Some(&message.balance_proof()) {
        return Err(invalid("the balance proof does not follow the partner's last one"));
    }
    let unlocked = TransferUnlocked { balance_proof: message.balance_proof(), message_id: message.message_identifier };
    Ok(Some((key, unlocked)))
}

/// Matches a `Processed` from `sender` against the messages of our sent transfers.
fn on_processed(state: &EngineState, dispatcher: &Dispatcher, sender: Address, id: u64) -> Result<(), EngineError> {
    let sent = state.transfers.iter().filter(|(k, t)| k.direction == Direction::Sent && t.partner == sender);
    for (key, transfer) in sent {
        if transfer.message_id == id {
            if !transfer.transfer_processed {
                debug!("{sender} processed transfer {key}");
                dispatcher.dispatch(Action::TransferProcessed { meta: *key });
            }
            return Ok(());
        }
        if transfer.unlock_message_id == Some(id) {
            if !transfer.unlock_processed {
                debug!("{sender} processed the unlock of {key}");
                dispatcher.dispatch(Action::TransferUnlockProcessed { meta: *key });
            }
            return Ok(());
        }
    }
    Err(EngineError::assertion(ErrorCode::TransferNotFound, [("messageIdentifier", id)]))
}

#[cfg(test)]
mod test {
    use super::*;
    use libconduit::amount::TokenAmount;
    use libconduit::dummy_impl::DummyChain;
    use libconduit::pipeline::EngineBuilder;
    use libconduit::primitives::Secret;
    use libconduit::reducer::reduce;
    use libconduit::state::Channel;

    struct Peers {
        token_network: Address,
        alice: EngineState,
        bob: EngineState,
    }

    /// Two views of one channel with 1000 deposited by alice.
    fn peers() -> Peers {
        let token_network = Address::random();
        let (a, b) = (Address::random(), Address::random());
        let mut alice = EngineState::new(a);
        let mut bob = EngineState::new(b);
        alice.block_number = 130;
        bob.block_number = 130;
        let mut channel = Channel::new(17, 60, 121);
        channel.own.deposit = TokenAmount::new(1000);
        alice.channels.insert(ChannelKey::new(token_network, b), channel.clone());
        std::mem::swap(&mut channel.own, &mut channel.partner);
        bob.channels.insert(ChannelKey::new(token_network, a), channel);
        Peers { token_network, alice, bob }
    }

    fn request(peers: &Peers, value: u128, secret: Option<Secret>) -> TransferRequest {
        TransferRequest {
            token_network: peers.token_network,
            target: peers.bob.address,
            value: TokenAmount::new(value),
            fee: TokenAmount::new(3),
            payment_id: 1,
            secret,
        }
    }

    #[test]
    fn locked_transfers_are_validated_before_signing() {
        let peers = peers();
        let secret = Secret::random();
        let meta = TransferKey::sent(secret.secrethash());
        let err = |r: Result<_, EngineError>| r.err().and_then(|e| e.code());

        let too_much = build_locked_transfer(&peers.alice, &request(&peers, 998, None), meta, 50);
        assert_eq!(err(too_much), Some(ErrorCode::InsufficientCapacity));
        let wrong_secret = build_locked_transfer(&peers.alice, &request(&peers, 10, Some(Secret::random())), meta, 50);
        assert_eq!(err(wrong_secret), Some(ErrorCode::SecretMismatch));
        let zero = build_locked_transfer(&peers.alice, &request(&peers, 0, None), meta, 50);
        assert_eq!(err(zero), Some(ErrorCode::TransferInvalid));
        let no_channel = build_locked_transfer(&peers.bob, &request(&peers, 10, None), meta, 50);
        assert_eq!(err(no_channel), Some(ErrorCode::ChannelNotFound));

        let req = request(&peers, 10, Some(secret));
        let (transfer, message) = build_locked_transfer(&peers.alice, &req, meta, 50).unwrap();
        assert_eq!(transfer.lock.amount, TokenAmount::new(13));
        assert_eq!(transfer.lock.expiration, 230);
        assert_eq!(message.balance_proof(), transfer.balance_proof);
        assert_eq!(message.balance_proof().nonce, 1);
        assert_eq!(message.value(), TokenAmount::new(10));
    }

    #[test]
    fn both_ends_agree_on_a_lock_then_unlock() {
        let mut peers = peers();
        let secret = Secret::random();
        let meta = TransferKey::sent(secret.secrethash());
        let alice = peers.alice.address;
        let req = request(&peers, 10, Some(secret));
        let (sent, message) = build_locked_transfer(&peers.alice, &req, meta, 50).unwrap();
        reduce(&mut peers.alice, &Action::TransferSigned { transfer: Box::new(sent) });

        let received = validate_locked_transfer(&peers.bob, alice, &message).unwrap().unwrap();
        assert_eq!(received.amount, TokenAmount::new(10));
        reduce(&mut peers.bob, &Action::TransferSigned { transfer: Box::new(received) });
        assert!(validate_locked_transfer(&peers.bob, alice, &message).unwrap().is_none());
        let mut replay = message.clone();
        replay.message_identifier += 1;
        assert!(validate_locked_transfer(&peers.bob, alice, &replay).is_err());

        let (unlocked, unlock, partner) = build_unlock(&peers.alice, meta).unwrap();
        assert_eq!(partner, peers.bob.address);
        reduce(&mut peers.alice, &Action::TransferUnlock(TransferUnlock::success(unlocked, meta)));
        let (key, unlocked) = validate_unlock(&peers.bob, alice, &unlock).unwrap().unwrap();
        reduce(&mut peers.bob, &Action::TransferUnlock(TransferUnlock::success(unlocked, key)));

        let a = peers.alice.channels.values().next().unwrap();
        let b = peers.bob.channels.values().next().unwrap();
        assert_eq!(a.own, b.partner);
        assert_eq!(a.partner, b.own);
        assert_eq!(a.own.balance_proof.transferred_amount, TokenAmount::new(13));
        assert!(build_unlock(&peers.alice, meta).is_err());
    }

    #[test]
    fn out_of_order_balance_proofs_are_rejected() {
        let peers = peers();
        let secret = Secret::random();
        let meta = TransferKey::sent(secret.secrethash());
        let (_, mut message) = build_locked_transfer(&peers.alice, &request(&peers, 10, None), meta, 50).unwrap();
        message.nonce = 5;
        assert!(validate_locked_transfer(&peers.bob, peers.alice.address, &message).is_err());
        let (_, message) = build_locked_transfer(&peers.alice, &request(&peers, 10, None), meta, 50).unwrap();
        assert!(validate_locked_transfer(&peers.bob, Address::random(), &message).is_err());
    }

    #[tokio::test]
    async fn processed_marks_the_matching_transfer() {
        env_logger::try_init().ok();
        let mut peers = peers();
        let secret = Secret::random();
        let meta = TransferKey::sent(secret.secrethash());
        let req = request(&peers, 10, Some(secret));
        let (sent, _) = build_locked_transfer(&peers.alice, &req, meta, 50).unwrap();
        let id = sent.message_id;
        reduce(&mut peers.alice, &Action::TransferSigned { transfer: Box::new(sent) });
        let bob = peers.bob.address;
        let chain = DummyChain::new(130).account(peers.alice.address);
        let engine = EngineBuilder::new(chain, ConfigHandle::new(Default::default())).with_state(peers.alice).start();

        let state = engine.state();
        assert!(on_processed(&state, &engine.dispatcher(), bob, id + 1).is_err());
        assert!(on_processed(&state, &engine.dispatcher(), Address::random(), id).is_err());
        on_processed(&state, &engine.dispatcher(), bob, id).unwrap();
        let state = engine.wait_for(|s| s.transfer(&meta).is_some_and(|t| t.transfer_processed)).await.unwrap();
        assert!(state.transfer(&meta).is_some_and(|t| t.unlock.is_none()));
        engine.shutdown().await;
    }
}
