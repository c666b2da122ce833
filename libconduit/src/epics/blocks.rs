use crate::actions::Action;
use crate::chain::Chain;
use crate::pipeline::EpicContext;
use crate::primitives::Hash;
use log::*;
use std::collections::HashSet;

/// Polls the chain for its block number and emits a `NewBlock` whenever it increases.
pub async fn block_monitor<C: Chain>(ctx: EpicContext<C>) {
    let mut last = ctx.state.current().block_number;
    loop {
        match ctx.chain.block_number().await {
            Ok(block_number) if block_number > last => {
                last = block_number;
                if !ctx.dispatch(Action::NewBlock { block_number }) {
                    break;
                }
            }
            Ok(_) => {}
            // The next tick is the retry.
            Err(e) => debug!("Could not fetch the block number. {e}"),
        }
        tokio::time::sleep(ctx.config.polling_interval()).await;
    }
}

/// Confirms the pending chain-originated actions once they are `confirmation_blocks` deep.
///
/// A transaction that is still mined at the expected depth is confirmed with the block its receipt reports. One
/// that vanished, or that reverted, is re-emitted as unconfirmed (`confirmed: Some(false)`) so its effects are
/// never applied. A vanished transaction is given twice the confirmation depth to reappear first.
pub async fn confirmation_monitor<C: Chain>(mut ctx: EpicContext<C>) {
    let mut last = 0;
    let mut emitted: HashSet<Hash> = HashSet::new();
    loop {
        let Ok(block) = ctx.state.block_after(last).await else { break };
        last = block;
        let state = ctx.state.current();
        let depth = ctx.config.current().confirmation_blocks;
        emitted.retain(|h| state.pending_txs.iter().any(|a| a.tx_info().and_then(|t| t.tx_hash) == Some(*h)));
        for action in &state.pending_txs {
            let Some(tx) = action.tx_info() else { continue };
            let (Some(tx_hash), Some(tx_block)) = (tx.tx_hash, tx.tx_block) else { continue };
            if tx_block + depth > block || emitted.contains(&tx_hash) {
                continue;
            }
            let confirmation = match ctx.chain.transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) if !receipt.status => action.with_confirmation(false, None),
                Ok(Some(receipt)) if receipt.block_number + depth <= block => {
                    action.with_confirmation(true, Some(receipt.block_number))
                }
                Ok(Some(receipt)) => {
                    trace!("{tx_hash} moved to block {}. Waiting for it to be confirmed there", receipt.block_number);
                    None
                }
                Ok(None) if tx_block + 2 * depth <= block => {
                    warn!("{tx_hash} of {action} is gone from the chain");
                    action.with_confirmation(false, None)
                }
                Ok(None) => None,
                Err(e) => {
                    debug!("Could not fetch the receipt of {tx_hash}. Retrying next block. {e}");
                    None
                }
            };
            if let Some(confirmed) = confirmation {
                debug!("Confirmation of {action}: {:?}", confirmed.tx_info().and_then(|t| t.confirmed));
                emitted.insert(tx_hash);
                ctx.dispatch(confirmed);
            }
        }
    }
}
