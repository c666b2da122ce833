use anyhow::anyhow;
use conduit_p2p::dummy_impl::DummyHub;
use conduit_p2p::{register_transport_epics, NodeIdentity};
use libconduit::actions::Action;
use libconduit::config::{ConfigHandle, EngineConfig};
use libconduit::dummy_impl::DummyChain;
use libconduit::pipeline::{Engine, EngineBuilder};
use libconduit::primitives::Address;
use libconduit::state::{EngineState, TransferState};
use libconduit::storage::{persist_transfers, FileStore, StateStore};
use log::*;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// How long a client may take to reach an expected state before the scenario fails.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// A full client: the engine with the chain and transport epics, its identity, and a private transfer store.
pub struct MockClient {
    name: String,
    identity: NodeIdentity,
    config: ConfigHandle,
    engine: Engine,
    store_dir: TempDir,
}

impl MockClient {
    pub fn start(name: &str, chain: &DummyChain, hub: &DummyHub, config: EngineConfig) -> anyhow::Result<Self> {
        let identity = NodeIdentity::random_with_name(name);
        let address = identity.address();
        let (transport, inbound) = hub.join(address);
        let store_dir = tempfile::tempdir()?;
        let store = FileStore::new(store_dir.path().to_path_buf())?;
        let config = ConfigHandle::new(config);
        let builder = EngineBuilder::new(chain.account(address), config.clone())
            .with_default_epics()
            .with_epic("persist_transfers", move |ctx| persist_transfers(store, ctx));
        let engine = register_transport_epics(builder, transport, inbound, identity.key().clone()).start();
        info!("Started {name} as {address}");
        Ok(MockClient { name: name.to_string(), identity, config, engine, store_dir })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> Address {
        self.identity.address()
    }

    pub fn config(&self) -> &ConfigHandle {
        &self.config
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn state(&self) -> Arc<EngineState> {
        self.engine.state()
    }

    pub fn dispatch(&self, action: Action) -> bool {
        self.engine.dispatch(action)
    }

    /// Waits for the first state satisfying `predicate`, failing after [`WAIT_TIMEOUT`].
    pub async fn wait_for<F>(&self, what: &str, predicate: F) -> anyhow::Result<Arc<EngineState>>
    where
        F: FnMut(&EngineState) -> bool,
    {
        let state = tokio::time::timeout(WAIT_TIMEOUT, self.engine.wait_for(predicate))
            .await
            .map_err(|_| anyhow!("{} timed out waiting for {what}", self.name))??;
        Ok(state)
    }

    pub async fn wait_for_block(&self, block: u64) -> anyhow::Result<Arc<EngineState>> {
        self.wait_for(&format!("block {block}"), |s| s.block_number >= block).await
    }

    /// Every transfer record written to this client's store.
    pub fn stored_transfers(&self) -> anyhow::Result<Vec<TransferState>> {
        let store = FileStore::new(self.store_dir.path().to_path_buf())?;
        store.list_transfers()?.iter().map(|key| store.load_transfer(key)).collect()
    }

    pub async fn shutdown(self) {
        debug!("Stopping {}", self.name);
        self.engine.shutdown().await;
    }
}
