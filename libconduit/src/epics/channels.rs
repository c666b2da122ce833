use crate::actions::*;
use crate::chain::{Chain, ChannelEvent, ChannelEventLog};
use crate::pipeline::EpicContext;
use crate::primitives::Address;
use crate::state::ChannelKey;
use log::*;
use std::collections::HashMap;

/// Scans the monitored token networks on every new block, and emits an unconfirmed channel action for every event
/// of a channel we participate in. The reducer applies them once the confirmation epic has confirmed them.
pub async fn channel_monitor<C: Chain>(mut ctx: EpicContext<C>) {
    let me = ctx.chain.account();
    let mut scanned: HashMap<Address, u64> = HashMap::new();
    let mut known: HashMap<(Address, u64), ChannelKey> = HashMap::new();
    let mut last = 0;
    loop {
        let Ok(block) = ctx.state.block_after(last).await else { break };
        last = block;
        let state = ctx.state.current();
        for (key, channel) in &state.channels {
            if channel.id != 0 {
                known.insert((key.token_network, channel.id), *key);
            }
        }
        for token in state.tokens.values() {
            let token_network = token.token_network;
            let from = scanned.get(&token_network).map_or(token.from_block, |b| b + 1);
            if from > block {
                continue;
            }
            match ctx.chain.channel_events(token_network, from, block).await {
                Ok(logs) => {
                    trace!("{} events in {token_network} for blocks {from}..={block}", logs.len());
                    for log in &logs {
                        if let Some(action) = channel_action(me, &mut known, log) {
                            debug!("Observed {action} in block {}", log.block_number);
                            ctx.dispatch(action);
                        }
                    }
                    scanned.insert(token_network, block);
                }
                // The range is scanned again on the next block.
                Err(e) => debug!("Could not fetch events of {token_network}. {e}"),
            }
        }
    }
}

/// Maps a token-network event to the channel action it implies for `me`, if it concerns one of our channels.
fn channel_action(
    me: Address,
    known: &mut HashMap<(Address, u64), ChannelKey>,
    log: &ChannelEventLog,
) -> Option<Action> {
    let tx = TxInfo::unconfirmed(log.transaction_hash, log.block_number);
    let token_network = log.token_network;
    match log.event {
        ChannelEvent::Opened { id, participant1, participant2, settle_timeout } => {
            let partner = if participant1 == me {
                participant2
            } else if participant2 == me {
                participant1
            } else {
                return None;
            };
            let key = ChannelKey::new(token_network, partner);
            known.insert((token_network, id), key);
            let opened = ChannelOpened { id, settle_timeout, is_first_participant: participant1 == me, tx };
            Some(Action::ChannelOpen(ChannelOpen::success(opened, key)))
        }
        ChannelEvent::NewDeposit { id, participant, total_deposit } => {
            let key = *known.get(&(token_network, id))?;
            let deposited = ChannelDeposited { id, participant, total_deposit, tx };
            Some(Action::ChannelDeposit(ChannelDeposit::success(deposited, key)))
        }
        ChannelEvent::Closed { id, closing_participant } => {
            let key = *known.get(&(token_network, id))?;
            let closed = ChannelClosed { id, participant: closing_participant, tx };
            Some(Action::ChannelClose(ChannelClose::success(closed, key)))
        }
        ChannelEvent::Settled { id } => {
            let key = *known.get(&(token_network, id))?;
            Some(Action::ChannelSettle(ChannelSettle::success(ChannelSettled { id, tx }, key)))
        }
    }
}
