pub mod caps;
pub mod codec;
pub mod epics;
pub mod errors;
pub mod identity;
pub mod message_types;
pub mod presence;
pub mod transfers;
pub mod transport;

#[cfg(feature = "dummy_transport")]
pub mod dummy_impl;

pub use caps::{decode_caps, encode_caps};
pub use codec::{decode_and_validate_message, encode_message};
pub use epics::register_transport_epics;
pub use errors::{CapsError, CodecError, TransportError};
pub use identity::{IdentityError, NodeIdentity};
pub use message_types::Message;
pub use transport::{InboundMessage, InboundReceiver, PeerPresence, Transport};
