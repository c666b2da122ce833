//! The reducer folds one action at a time into the state snapshot. It performs no I/O and never fails: actions
//! that do not apply to the current state are ignored.

use crate::actions::{Action, AsyncAction};
use crate::state::{
    Channel, ChannelKey, ChannelState, Direction, EngineState, MonitoredToken, TransferState, WithdrawPlan,
};
use log::*;

pub fn reduce(state: &mut EngineState, action: &Action) {
    track_pending_tx(state, action);
    match action {
        Action::NewBlock { block_number } => on_new_block(state, *block_number),
        Action::TokenMonitored { token, token_network, from_block } => {
            let monitored = MonitoredToken { token_network: *token_network, from_block: *from_block };
            let entry = state.tokens.entry(*token).or_insert(monitored);
            entry.from_block = entry.from_block.min(*from_block);
        }
        Action::UdcDeposit(AsyncAction::Success { payload, meta }) if payload.tx.confirmed != Some(false) => {
            state.udc_balance = payload.balance;
            state.udc_total_deposit = meta.total_deposit;
        }
        Action::UdcWithdrawPlan(AsyncAction::Success { payload, meta }) if payload.tx.confirmed != Some(false) => {
            state.withdraw_plan = Some(WithdrawPlan { amount: meta.amount, block: payload.block });
        }
        Action::UdcWithdraw(AsyncAction::Success { payload, .. }) if payload.tx.confirmed != Some(false) => {
            state.withdraw_plan = None;
        }
        Action::ChannelOpen(a) => on_channel_open(state, a),
        Action::ChannelDeposit(AsyncAction::Success { payload, meta }) if payload.tx.confirmed == Some(true) => {
            let own = payload.participant == state.address;
            if let Some(channel) = channel_with_id(state, meta, payload.id) {
                let participant = if own { &mut channel.own } else { &mut channel.partner };
                participant.deposit = participant.deposit.max(payload.total_deposit);
            }
        }
        Action::ChannelClose(a) => on_channel_close(state, a),
        Action::ChannelSettle(a) => on_channel_settle(state, a),
        Action::TransferSigned { transfer } => on_transfer_signed(state, transfer),
        Action::TransferProcessed { meta } => {
            if let Some(t) = state.transfers.get_mut(meta) {
                t.transfer_processed = true;
            }
        }
        Action::TransferSecret { secret, meta } => {
            if let Some(t) = state.transfers.get_mut(meta) {
                if !t.reveal(*secret) {
                    warn!("Ignoring a secret for transfer {meta} that does not match its secrethash");
                }
            }
        }
        Action::TransferUnlock(AsyncAction::Success { payload, meta }) => {
            let Some(transfer) = state.transfers.get_mut(meta) else {
                warn!("Unlock for unknown transfer {meta}");
                return;
            };
            if transfer.unlock.is_some() {
                return;
            }
            transfer.unlock = Some(payload.balance_proof.clone());
            transfer.unlock_message_id = Some(payload.message_id);
            let key = ChannelKey::new(transfer.token_network, transfer.partner);
            if let Some(channel) = state.channels.get_mut(&key) {
                let participant = match meta.direction {
                    Direction::Sent => &mut channel.own,
                    Direction::Received => &mut channel.partner,
                };
                participant.balance_proof = payload.balance_proof.clone();
                participant.locks.retain(|l| l.secrethash != meta.secrethash);
            }
        }
        Action::TransferUnlockProcessed { meta } => {
            if let Some(t) = state.transfers.get_mut(meta) {
                t.unlock_processed = true;
            }
        }
        Action::Presence(AsyncAction::Success { payload, meta }) => {
            state.presences.insert(meta.address, payload.clone());
        }
        _ => {}
    }
}

/// Records unconfirmed chain-originated actions, and drops them again once their confirmation arrives.
fn track_pending_tx(state: &mut EngineState, action: &Action) {
    let Some(tx) = action.tx_info() else { return };
    if tx.is_pending() {
        if !state.pending_txs.iter().any(|p| p.is_same_tx(action)) {
            state.pending_txs.push(action.clone());
        }
    } else if tx.confirmed.is_some() {
        state.pending_txs.retain(|p| !p.is_same_tx(action));
    }
}

fn on_new_block(state: &mut EngineState, block_number: u64) {
    if block_number <= state.block_number {
        return;
    }
    state.block_number = block_number;
    for (key, channel) in state.channels.iter_mut() {
        if channel.state != ChannelState::Closed {
            continue;
        }
        if matches!(channel.settleable_after(), Some(b) if block_number > b) {
            debug!("Channel {key} is now settleable");
            channel.state = ChannelState::Settleable;
        }
    }
}

fn channel_with_id<'a>(state: &'a mut EngineState, key: &ChannelKey, id: u64) -> Option<&'a mut Channel> {
    state.channels.get_mut(key).filter(|c| c.id == id)
}

fn on_channel_open(state: &mut EngineState, action: &crate::actions::ChannelOpen) {
    match action {
        AsyncAction::Request { payload, meta } => {
            if !state.channels.contains_key(meta) {
                let mut placeholder = Channel::new(0, payload.settle_timeout.unwrap_or_default(), state.block_number);
                placeholder.state = ChannelState::Opening;
                state.channels.insert(*meta, placeholder);
            }
        }
        AsyncAction::Success { payload, meta } if payload.tx.confirmed == Some(true) => {
            let replaceable = state.channels.get(meta).map_or(true, |c| c.state == ChannelState::Opening);
            if replaceable {
                let open_block = payload.tx.tx_block.unwrap_or(state.block_number);
                info!("Channel {} with {meta} is open", payload.id);
                state.channels.insert(*meta, Channel::new(payload.id, payload.settle_timeout, open_block));
            }
        }
        AsyncAction::Failure { meta, .. } => {
            if state.channels.get(meta).is_some_and(|c| c.state == ChannelState::Opening) {
                state.channels.remove(meta);
            }
        }
        _ => {}
    }
}

fn on_channel_close(state: &mut EngineState, action: &crate::actions::ChannelClose) {
    match action {
        AsyncAction::Request { meta, .. } => {
            if let Some(channel) = state.channels.get_mut(meta).filter(|c| c.state == ChannelState::Open) {
                channel.state = ChannelState::Closing;
            }
        }
        AsyncAction::Success { payload, meta } if payload.tx.confirmed == Some(true) => {
            let block = state.block_number;
            if let Some(channel) = channel_with_id(state, meta, payload.id) {
                if matches!(channel.state, ChannelState::Open | ChannelState::Closing) {
                    channel.state = ChannelState::Closed;
                    channel.close_block = Some(payload.tx.tx_block.unwrap_or(block));
                }
            }
        }
        AsyncAction::Failure { meta, .. } => {
            if let Some(channel) = state.channels.get_mut(meta).filter(|c| c.state == ChannelState::Closing) {
                channel.state = ChannelState::Open;
            }
        }
        _ => {}
    }
}

fn on_channel_settle(state: &mut EngineState, action: &crate::actions::ChannelSettle) {
    match action {
        AsyncAction::Request { meta, .. } => {
            if let Some(channel) = state.channels.get_mut(meta).filter(|c| c.state == ChannelState::Settleable) {
                channel.state = ChannelState::Settling;
            }
        }
        AsyncAction::Success { payload, meta } if payload.tx.confirmed == Some(true) => {
            if channel_with_id(state, meta, payload.id).is_some() {
                info!("Channel {} with {meta} is settled", payload.id);
                state.channels.remove(meta);
            }
        }
        AsyncAction::Failure { meta, .. } => {
            if let Some(channel) = state.channels.get_mut(meta).filter(|c| c.state == ChannelState::Settling) {
                channel.state = ChannelState::Settleable;
            }
        }
        _ => {}
    }
}

fn on_transfer_signed(state: &mut EngineState, transfer: &TransferState) {
    let key = transfer.key();
    if state.transfers.contains_key(&key) {
        warn!("Transfer {key} already exists. Ignoring the duplicate");
        return;
    }
    if transfer.lock.secrethash != transfer.secrethash {
        warn!("Transfer {key} locks a different secrethash. Ignoring it");
        return;
    }
    let channel_key = ChannelKey::new(transfer.token_network, transfer.partner);
    let Some(channel) = channel_with_id(state, &channel_key, transfer.channel_id) else {
        warn!("Transfer {key} refers to an unknown channel {channel_key}");
        return;
    };
    if channel.state != ChannelState::Open {
        warn!("Transfer {key} refers to channel {channel_key}, which is {}", channel.state);
        return;
    }
    let participant = match transfer.direction {
        Direction::Sent => &mut channel.own,
        Direction::Received => &mut channel.partner,
    };
    participant.balance_proof = transfer.balance_proof.clone();
    participant.locks.push(transfer.lock.clone());
    state.transfers.insert(key, transfer.clone());
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::actions::*;
    use crate::amount::TokenAmount;
    use crate::primitives::{Address, Hash, Secret};
    use crate::state::{Lock, TransferKey};

    fn opened(key: ChannelKey, id: u64, confirmed: Option<bool>) -> Action {
        let tx = TxInfo { tx_hash: Some(Hash::random()), tx_block: Some(121), confirmed };
        Action::ChannelOpen(ChannelOpen::success(
            ChannelOpened { id, settle_timeout: 60, is_first_participant: true, tx },
            key,
        ))
    }

    fn open_state() -> (EngineState, ChannelKey) {
        let mut state = EngineState::new(Address::random());
        let key = ChannelKey::new(Address::random(), Address::random());
        reduce(&mut state, &opened(key, 17, Some(true)));
        (state, key)
    }

    #[test]
    fn channel_opens_only_when_confirmed() {
        let mut state = EngineState::new(Address::random());
        let key = ChannelKey::new(Address::random(), Address::random());
        let action = opened(key, 17, None);
        reduce(&mut state, &action);
        assert!(state.channel(&key).is_none());
        assert_eq!(state.pending_txs.len(), 1);
        let confirmed = action.with_confirmation(true, Some(121)).unwrap();
        reduce(&mut state, &confirmed);
        assert!(state.pending_txs.is_empty());
        let channel = state.channel(&key).unwrap();
        assert_eq!(channel.state, ChannelState::Open);
        assert_eq!(channel.open_block, 121);
    }

    #[test]
    fn close_then_settle_lifecycle() {
        let (mut state, key) = open_state();
        reduce(&mut state, &Action::ChannelClose(ChannelClose::request((), key)));
        assert_eq!(state.channel(&key).unwrap().state, ChannelState::Closing);
        let tx = TxInfo { tx_hash: Some(Hash::random()), tx_block: Some(171), confirmed: Some(true) };
        let closed = ChannelClosed { id: 17, participant: state.address, tx };
        reduce(&mut state, &Action::ChannelClose(ChannelClose::success(closed, key)));
        assert_eq!(state.channel(&key).unwrap().state, ChannelState::Closed);
        reduce(&mut state, &Action::NewBlock { block_number: 231 });
        assert_eq!(state.channel(&key).unwrap().state, ChannelState::Closed);
        reduce(&mut state, &Action::NewBlock { block_number: 232 });
        assert_eq!(state.channel(&key).unwrap().state, ChannelState::Settleable);
        reduce(&mut state, &Action::ChannelSettle(ChannelSettle::request((), key)));
        assert_eq!(state.channel(&key).unwrap().state, ChannelState::Settling);
        let settled = ChannelSettled { id: 17, tx: TxInfo::confirmed() };
        reduce(&mut state, &Action::ChannelSettle(ChannelSettle::success(settled, key)));
        assert!(state.channel(&key).is_none());
    }

    #[test]
    fn deposits_go_to_the_right_participant() {
        let (mut state, key) = open_state();
        let deposit = |participant, total| {
            let payload = ChannelDeposited {
                id: 17,
                participant,
                total_deposit: TokenAmount::new(total),
                tx: TxInfo::confirmed(),
            };
            Action::ChannelDeposit(ChannelDeposit::success(payload, key))
        };
        let own = state.address;
        reduce(&mut state, &deposit(own, 1000));
        reduce(&mut state, &deposit(key.partner, 400));
        let channel = state.channel(&key).unwrap();
        assert_eq!(channel.own.deposit, TokenAmount::new(1000));
        assert_eq!(channel.partner.deposit, TokenAmount::new(400));
    }

    #[test]
    fn mismatching_secret_is_ignored() {
        let (mut state, key) = open_state();
        let secret = Secret::random();
        let lock = Lock { amount: TokenAmount::new(13), expiration: 200, secrethash: secret.secrethash() };
        let balance_proof = state.channel(&key).unwrap().own.next_locked_balance_proof(&lock).unwrap();
        let transfer = TransferState {
            direction: Direction::Sent,
            secrethash: secret.secrethash(),
            token_network: key.token_network,
            channel_id: 17,
            partner: key.partner,
            initiator: state.address,
            target: key.partner,
            amount: TokenAmount::new(10),
            fee: TokenAmount::new(3),
            payment_id: 1,
            lock,
            balance_proof,
            message_id: 1,
            secret: None,
            transfer_processed: false,
            unlock: None,
            unlock_message_id: None,
            unlock_processed: false,
        };
        reduce(&mut state, &Action::TransferSigned { transfer: Box::new(transfer) });
        let meta = TransferKey::sent(secret.secrethash());
        assert_eq!(state.channel(&key).unwrap().own.locks.len(), 1);
        reduce(&mut state, &Action::TransferSecret { secret: Secret::random(), meta });
        assert!(state.transfer(&meta).unwrap().secret.is_none());
        reduce(&mut state, &Action::TransferSecret { secret, meta });
        assert_eq!(state.transfer(&meta).unwrap().secret, Some(secret));
    }

    #[test]
    fn udc_plan_and_withdraw() {
        let mut state = EngineState::new(Address::random());
        let meta = WithdrawMeta { amount: TokenAmount::new(5) };
        let plan = UdcWithdrawPlanSuccess { block: 300, tx: TxInfo::confirmed() };
        reduce(&mut state, &Action::UdcWithdrawPlan(UdcWithdrawPlan::success(plan, meta)));
        assert_eq!(state.withdraw_plan, Some(WithdrawPlan { amount: TokenAmount::new(5), block: 300 }));
        let withdrawn = UdcWithdrawSuccess { withdrawal: TokenAmount::new(5), tx: TxInfo::confirmed() };
        reduce(&mut state, &Action::UdcWithdraw(UdcWithdraw::success(withdrawn, meta)));
        assert!(state.withdraw_plan.is_none());
    }
}
