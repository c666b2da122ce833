mod file_store;
mod traits;

pub use file_store::FileStore;
pub use traits::StateStore;

use crate::actions::{Action, AsyncAction};
use crate::chain::Chain;
use crate::pipeline::EpicContext;
use log::*;

/// Writes a transfer record to the store every time an action changes it, so the history of resolved transfers
/// outlives the in-memory snapshot.
pub async fn persist_transfers<C: Chain, S: StateStore + Send + 'static>(mut store: S, mut ctx: EpicContext<C>) {
    while let Some(action) = ctx.actions.next().await {
        let key = match action.as_ref() {
            Action::TransferSigned { transfer } => transfer.key(),
            Action::TransferProcessed { meta }
            | Action::TransferSecret { meta, .. }
            | Action::TransferUnlockProcessed { meta }
            | Action::TransferUnlock(AsyncAction::Success { meta, .. }) => *meta,
            _ => continue,
        };
        let Some(transfer) = ctx.state.current().transfer(&key).cloned() else { continue };
        match store.write_transfer(&transfer) {
            Ok(()) => trace!("Stored transfer {key}"),
            Err(e) => error!("Could not store transfer {key}. {e}"),
        }
    }
}
