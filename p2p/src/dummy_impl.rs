//! An in-memory peer hub for tests and demos. Every [`DummyTransport`] joined to the same [`DummyHub`] can reach
//! every other one, and each body sent is recorded for inspection.

use crate::errors::TransportError;
use crate::identity::peer_id_of;
use crate::transport::{InboundMessage, InboundReceiver, PeerPresence, Transport};
use libconduit::primitives::Address;
use log::*;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

pub const DUMMY_SERVER: &str = "matrix.conduit.test";

#[derive(Clone, Debug, PartialEq)]
pub struct SentMessage {
    pub from: Address,
    pub to: Address,
    pub body: String,
}

struct PeerEntry {
    user_id: String,
    caps: Option<String>,
    online: bool,
    inbox: mpsc::UnboundedSender<InboundMessage>,
}

#[derive(Default)]
struct HubData {
    peers: HashMap<Address, PeerEntry>,
    sent: Vec<SentMessage>,
}

#[derive(Clone, Default)]
pub struct DummyHub {
    data: Arc<Mutex<HubData>>,
}

impl DummyHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn data(&self) -> MutexGuard<'_, HubData> {
        self.data.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Joins `address` to the hub. Joining again replaces the previous inbox.
    pub fn join(&self, address: Address) -> (DummyTransport, InboundReceiver) {
        let (inbox, receiver) = mpsc::unbounded_channel();
        let entry = PeerEntry { user_id: peer_id_of(&address, DUMMY_SERVER), caps: None, online: true, inbox };
        self.data().peers.insert(address, entry);
        (DummyTransport { hub: self.clone(), address }, receiver)
    }

    pub fn set_online(&self, address: Address, online: bool) {
        if let Some(peer) = self.data().peers.get_mut(&address) {
            peer.online = online;
        }
    }

    /// Every body sent through the hub so far, in order.
    pub fn sent_messages(&self) -> Vec<SentMessage> {
        self.data().sent.clone()
    }

    /// Delivers an arbitrary body to `to`, as if `from` had sent it.
    pub fn inject(&self, from: Address, to: Address, body: Value) -> Result<(), TransportError> {
        let data = self.data();
        let peer = data.peers.get(&to).ok_or(TransportError::Unreachable(to))?;
        peer.inbox.send(InboundMessage { sender: from, body }).map_err(|_| TransportError::Unreachable(to))
    }
}

#[derive(Clone)]
pub struct DummyTransport {
    hub: DummyHub,
    address: Address,
}

impl DummyTransport {
    pub fn hub(&self) -> &DummyHub {
        &self.hub
    }
}

impl Transport for DummyTransport {
    fn address(&self) -> Address {
        self.address
    }

    async fn send(&self, peer: Address, body: String) -> Result<(), TransportError> {
        let mut data = self.hub.data();
        match data.peers.get(&peer) {
            Some(entry) if entry.online => {
                let message = InboundMessage { sender: self.address, body: Value::String(body.clone()) };
                entry.inbox.send(message).map_err(|_| TransportError::Unreachable(peer))?;
            }
            _ => return Err(TransportError::Unreachable(peer)),
        }
        trace!("Hub: {} -> {peer}", self.address);
        data.sent.push(SentMessage { from: self.address, to: peer, body });
        Ok(())
    }

    async fn presence(&self, peer: Address) -> Result<Option<PeerPresence>, TransportError> {
        let data = self.hub.data();
        Ok(data.peers.get(&peer).map(|p| PeerPresence {
            user_id: p.user_id.clone(),
            available: p.online,
            caps: p.caps.clone(),
        }))
    }

    async fn set_caps(&self, caps: String) -> Result<(), TransportError> {
        let mut data = self.hub.data();
        let peer = data.peers.get_mut(&self.address).ok_or(TransportError::Closed)?;
        peer.caps = Some(caps);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn peers_reach_each_other() {
        let hub = DummyHub::new();
        let (alice, _alice_inbox) = hub.join(Address::random());
        let (bob, mut bob_inbox) = hub.join(Address::random());
        alice.send(bob.address(), "hello".into()).await.unwrap();
        let received = bob_inbox.recv().await.unwrap();
        assert_eq!(received.sender, alice.address());
        assert_eq!(received.body, Value::from("hello"));
        assert_eq!(hub.sent_messages().len(), 1);

        hub.set_online(bob.address(), false);
        let err = alice.send(bob.address(), "again".into()).await.unwrap_err();
        assert_eq!(err, TransportError::Unreachable(bob.address()));
        assert!(alice.send(Address::random(), "nobody".into()).await.is_err());
    }

    #[tokio::test]
    async fn presence_reports_caps() {
        let hub = DummyHub::new();
        let (alice, _a) = hub.join(Address::random());
        let (bob, _b) = hub.join(Address::random());
        bob.set_caps("mxc://raiden.network/cap?Delivery=0".into()).await.unwrap();
        let presence = alice.presence(bob.address()).await.unwrap().unwrap();
        assert!(presence.available);
        assert_eq!(presence.caps.as_deref(), Some("mxc://raiden.network/cap?Delivery=0"));
        assert_eq!(crate::identity::address_from_peer_id(&presence.user_id), Some(bob.address()));
        assert_eq!(alice.presence(Address::random()).await.unwrap(), None);
    }
}
