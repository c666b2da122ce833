use crate::config::RunCommand;
use crate::id_management::default_data_dir;
use conduit_p2p::dummy_impl::DummyHub;
use conduit_p2p::{register_transport_epics, NodeIdentity};
use libconduit::actions::{Action, AsyncAction, DepositMeta, UdcDeposit, UdcDepositRequest};
use libconduit::amount::TokenAmount;
use libconduit::config::{ConfigHandle, EngineConfig};
use libconduit::dummy_impl::DummyChain;
use libconduit::pipeline::{Engine, EngineBuilder};
use libconduit::storage::{persist_transfers, FileStore};
use log::*;

const START_BLOCK: u64 = 100;

/// Runs a node for `identity` on a fresh development chain, reporting its UDC balance until interrupted.
pub async fn run_node(identity: NodeIdentity, mut engine: EngineConfig, cmd: RunCommand) -> Result<(), anyhow::Error> {
    if let Some(interval) = cmd.polling_interval {
        engine.polling_interval = interval;
    }
    let address = identity.address();
    let chain = DummyChain::new(START_BLOCK);
    chain.mint(address, cmd.mint);
    let hub = DummyHub::new();
    let (transport, inbound) = hub.join(address);
    let data_dir = cmd.data_dir.unwrap_or_else(default_data_dir);
    let store = FileStore::new(data_dir.clone())?;
    info!("Storing transfers in {}", data_dir.display());

    let config = ConfigHandle::new(engine);
    let builder = EngineBuilder::new(chain.account(address), config.clone())
        .with_default_epics()
        .with_epic("persist_transfers", move |ctx| persist_transfers(store, ctx));
    let engine = register_transport_epics(builder, transport, inbound, identity.key().clone()).start();
    let miner = chain.start_mining(config.polling_interval());
    println!("Node {identity} is running. Press Ctrl-C to stop.");

    let mut state = engine.state_watch();
    let first = state.wait_for(|s| s.block_number > START_BLOCK).await?;
    if let Some(deposit) = cmd.udc_deposit {
        request_deposit(&engine, first.udc_total_deposit + deposit, deposit);
    }
    let mut shown = None;
    loop {
        let last = shown;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            s = state.wait_for(move |s| Some(s.udc_balance) != last) => {
                let s = s?;
                println!("Block {}: UDC balance {}", s.block_number, s.udc_balance);
                shown = Some(s.udc_balance);
            }
        }
    }
    miner.abort();
    engine.shutdown().await;
    Ok(())
}

/// Requests a UDC deposit and reports its outcome in the background.
fn request_deposit(engine: &Engine, total_deposit: TokenAmount, deposit: TokenAmount) {
    let meta = DepositMeta { total_deposit };
    let mut actions = engine.subscribe();
    engine.dispatch(Action::UdcDeposit(UdcDeposit::request(UdcDepositRequest { deposit }, meta)));
    tokio::spawn(async move {
        let response = actions.wait_for(|a| a.as_udc_deposit().is_some_and(|d| d.is_response_of(&meta))).await;
        match response.as_deref().map(Action::as_udc_deposit) {
            Ok(Some(AsyncAction::Success { payload, .. })) => {
                println!("Deposited {deposit}. Balance: {}", payload.balance)
            }
            Ok(Some(AsyncAction::Failure { error, .. })) => println!("Deposit of {deposit} failed. {}", error.message),
            Ok(_) => {}
            Err(e) => warn!("Stopped waiting for the deposit. {e}"),
        }
    });
}
