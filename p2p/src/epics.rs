use crate::caps::encode_caps;
use crate::presence::presence_monitor;
use crate::transfers::{inbound_messages, transfer_requests, TransportDeps};
use crate::transport::{InboundReceiver, Transport};
use libconduit::chain::Chain;
use libconduit::crypto::AccountKey;
use libconduit::pipeline::{EngineBuilder, EpicContext};
use log::*;
use std::sync::Arc;

/// Registers the transport epics on `builder`: caps advertisement, presence lookups, and the transfer flows.
/// `key` signs every message we send, so its address must be the engine's address.
pub fn register_transport_epics<C: Chain, T: Transport>(
    builder: EngineBuilder<C>,
    transport: T,
    inbound: InboundReceiver,
    key: AccountKey,
) -> EngineBuilder<C> {
    let deps = Arc::new(TransportDeps { transport: Arc::new(transport), key });
    let presence = deps.transport.clone();
    let caps = deps.transport.clone();
    let outbound = deps.clone();
    builder
        .with_epic("advertise_caps", move |ctx| advertise_caps(caps, ctx))
        .with_epic("presence_monitor", move |ctx| presence_monitor(presence, ctx))
        .with_epic("transfer_requests", move |ctx| transfer_requests(outbound, ctx))
        .with_epic("inbound_messages", move |ctx| inbound_messages(deps, inbound, ctx))
}

/// Keeps the caps we advertise in line with the configured ones.
pub async fn advertise_caps<C: Chain, T: Transport>(transport: Arc<T>, ctx: EpicContext<C>) {
    let mut config = ctx.config.subscribe();
    loop {
        let caps = encode_caps(&config.borrow_and_update().caps);
        match transport.set_caps(caps.clone()).await {
            Ok(()) => debug!("Advertising caps {caps}"),
            Err(e) => warn!("Could not advertise caps {caps}. {e}"),
        }
        if config.changed().await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dummy_impl::DummyHub;
    use libconduit::caps::{Capability, CapsValue};
    use libconduit::config::ConfigHandle;
    use libconduit::dummy_impl::DummyChain;
    use libconduit::primitives::Address;
    use std::time::Duration;

    #[tokio::test]
    async fn caps_follow_the_config() {
        env_logger::try_init().ok();
        let hub = DummyHub::new();
        let address = Address::random();
        let (transport, _inbox) = hub.join(address);
        let (observer, _) = hub.join(Address::random());
        let config = ConfigHandle::new(Default::default());
        let chain = DummyChain::new(1).account(address);
        let engine = EngineBuilder::new(chain, config.clone())
            .with_epic("advertise_caps", move |ctx| advertise_caps(Arc::new(transport), ctx))
            .start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let first = observer.presence(address).await.unwrap().and_then(|p| p.caps);
        assert_eq!(first, Some(encode_caps(&config.current().caps)));

        config.update(|c| {
            c.caps.insert(Capability::Delivery.to_string(), CapsValue::from(0u64));
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = observer.presence(address).await.unwrap().and_then(|p| p.caps).unwrap();
        assert!(second.contains("Delivery=0"));
        engine.shutdown().await;
    }
}
