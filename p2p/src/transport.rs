use crate::errors::TransportError;
use libconduit::primitives::Address;
use serde_json::Value;
use std::future::Future;
use tokio::sync::mpsc;

/// A message body received from a peer, along with the address the transport authenticated it came from.
#[derive(Clone, Debug, PartialEq)]
pub struct InboundMessage {
    pub sender: Address,
    pub body: Value,
}

pub type InboundReceiver = mpsc::UnboundedReceiver<InboundMessage>;

/// What the transport knows about a peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerPresence {
    pub user_id: String,
    pub available: bool,
    /// The peer's caps url, if it advertises any.
    pub caps: Option<String>,
}

/// The peer transport. Inbound messages are delivered on the [`InboundReceiver`] handed out with the transport.
pub trait Transport: Send + Sync + 'static {
    /// The address we are known by.
    fn address(&self) -> Address;

    /// Sends a message body (one or more lines) to `peer`.
    fn send(&self, peer: Address, body: String) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Looks up `peer`. `None` if the peer never joined the transport.
    fn presence(&self, peer: Address) -> impl Future<Output = Result<Option<PeerPresence>, TransportError>> + Send;

    /// Advertises our capabilities, as a caps url.
    fn set_caps(&self, caps: String) -> impl Future<Output = Result<(), TransportError>> + Send;
}
