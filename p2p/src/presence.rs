//! Peer presence: looking peers up on the transport, and tracking which of them lack a capability.

use crate::caps::decode_caps;
use crate::transport::Transport;
use libconduit::actions::{Action, AsyncAction, Presence, PresenceInfo, PresenceMeta};
use libconduit::caps::{get_cap, Capability};
use libconduit::chain::Chain;
use libconduit::error::{ErrorCode, ErrorInfo};
use libconduit::pipeline::{ActionStream, EpicContext, TaskSet};
use libconduit::primitives::Address;
use log::*;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::watch;

pub type PeerSet = BTreeSet<Address>;

/// Applies a presence update to the set of peers lacking `cap`. Returns whether the set changed.
pub fn fold_presence(set: &mut PeerSet, action: &Action, cap: Capability) -> bool {
    let Some(AsyncAction::Success { payload, meta }) = action.as_presence() else { return false };
    if get_cap(payload.caps.as_ref(), cap).is_truthy() {
        set.remove(&meta.address)
    } else {
        set.insert(meta.address)
    }
}

/// The live set of peers known to lack `cap`, folded from the presence updates on `actions`. It starts empty, and
/// every receiver, including clones taken later, can always read the current set.
pub fn capability_lacking_peers(
    tasks: &TaskSet,
    cap: Capability,
    mut actions: ActionStream,
) -> watch::Receiver<PeerSet> {
    let (sender, receiver) = watch::channel(PeerSet::new());
    tasks.spawn(async move {
        while let Some(action) = actions.next().await {
            if sender.send_if_modified(|set| fold_presence(set, &action, cap)) {
                trace!("Peers lacking {cap}: {:?}", *sender.borrow());
            }
            if sender.is_closed() {
                break;
            }
        }
    });
    receiver
}

/// Peers that do not want `Delivered` acknowledgements.
pub fn no_delivery_peers(tasks: &TaskSet, actions: ActionStream) -> watch::Receiver<PeerSet> {
    capability_lacking_peers(tasks, Capability::Delivery, actions)
}

/// Answers presence requests by looking the peer up on the transport. Lookups run concurrently.
pub async fn presence_monitor<C: Chain, T: Transport>(transport: Arc<T>, mut ctx: EpicContext<C>) {
    while let Some(action) = ctx.actions.next().await {
        let Some(AsyncAction::Request { meta, .. }) = action.as_presence() else { continue };
        let meta = *meta;
        let transport = transport.clone();
        let dispatcher = ctx.dispatcher.clone();
        ctx.spawn(async move {
            let response = match transport.presence(meta.address).await {
                Ok(Some(peer)) => {
                    let caps = peer.caps.as_deref().and_then(decode_caps);
                    debug!("Presence of {}: available={} caps={caps:?}", meta.address, peer.available);
                    let info = PresenceInfo { user_id: peer.user_id, available: peer.available, caps };
                    Presence::success(info, meta)
                }
                Ok(None) => presence_failure(meta, format!("{} is not on the transport", meta.address)),
                Err(e) => presence_failure(meta, e.to_string()),
            };
            dispatcher.dispatch(Action::Presence(response));
        });
    }
}

fn presence_failure(meta: PresenceMeta, message: String) -> Presence {
    warn!("Presence lookup of {} failed. {message}", meta.address);
    Presence::failure(ErrorInfo::new(ErrorCode::TransportUnavailable, message), meta)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::caps::decode_caps;
    use libconduit::caps::Caps;

    fn presence(address: Address, caps: Option<Caps>) -> Action {
        let info = PresenceInfo { user_id: format!("@{address}:server"), available: true, caps };
        Action::Presence(Presence::success(info, PresenceMeta { address }))
    }

    #[test]
    fn peers_enter_and_leave_the_set() {
        let peer = Address::random();
        let mut set = PeerSet::new();
        assert!(set.is_empty());
        let without = decode_caps("mxc://raiden.network/cap?Delivery=0");
        assert!(fold_presence(&mut set, &presence(peer, without), Capability::Delivery));
        assert!(set.contains(&peer));
        let with = decode_caps("mxc://raiden.network/cap?Delivery=1");
        assert!(fold_presence(&mut set, &presence(peer, with), Capability::Delivery));
        assert!(!set.contains(&peer));
        // no caps at all means the fallback applies
        assert!(!fold_presence(&mut set, &presence(peer, None), Capability::Delivery));
        assert!(fold_presence(&mut set, &presence(peer, None), Capability::WebRtc));
        let request = Action::Presence(Presence::request((), PresenceMeta { address: peer }));
        assert!(!fold_presence(&mut set, &request, Capability::WebRtc));
    }
}
