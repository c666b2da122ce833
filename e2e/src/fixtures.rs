use crate::mock_client::MockClient;
use anyhow::{anyhow, ensure};
use conduit_p2p::dummy_impl::DummyHub;
use conduit_p2p::identity::sorted_addresses;
use libconduit::actions::*;
use libconduit::amount::TokenAmount;
use libconduit::chain::ChannelEvent;
use libconduit::config::EngineConfig;
use libconduit::dummy_impl::DummyChain;
use libconduit::primitives::{Address, Secret};
use libconduit::state::{Channel, ChannelKey, ChannelState, EngineState, TransferKey};
use log::*;

pub const START_BLOCK: u64 = 100;
pub const SETTLE_TIMEOUT: u64 = 60;
pub const REVEAL_TIMEOUT: u64 = 50;
pub const CONFIRMATION_BLOCKS: u64 = 5;
pub const CHANNEL_ID: u64 = 17;
pub const OPEN_BLOCK: u64 = 121;
pub const CLOSE_BLOCK: u64 = OPEN_BLOCK + REVEAL_TIMEOUT;
pub const SETTLE_BLOCK: u64 = CLOSE_BLOCK + SETTLE_TIMEOUT + 1;
pub const DEPOSIT: u128 = 1000;
pub const AMOUNT: u128 = 10;
pub const FEE: u128 = 3;
pub const PAYMENT_ID: u64 = 1;

pub fn test_config() -> EngineConfig {
    EngineConfig {
        polling_interval: 5,
        confirmation_blocks: CONFIRMATION_BLOCKS,
        reveal_timeout: REVEAL_TIMEOUT,
        ..Default::default()
    }
}

/// Alice and Bob on one chain and one hub. Alice is the depositing and sending side. Blocks are only mined by the
/// helpers, so every event lands at a known block.
pub struct TestNetwork {
    pub chain: DummyChain,
    pub hub: DummyHub,
    pub token_network: Address,
    pub alice: MockClient,
    pub bob: MockClient,
}

impl TestNetwork {
    pub fn start() -> anyhow::Result<Self> {
        env_logger::try_init().ok();
        let chain = DummyChain::new(START_BLOCK);
        let hub = DummyHub::new();
        let alice = MockClient::start("alice", &chain, &hub, test_config())?;
        let bob = MockClient::start("bob", &chain, &hub, test_config())?;
        Ok(TestNetwork { chain, hub, token_network: Address::random(), alice, bob })
    }

    pub fn alice_channel(&self) -> Option<Channel> {
        self.alice.state().channel(&ChannelKey::new(self.token_network, self.bob.address())).cloned()
    }

    pub fn bob_channel(&self) -> Option<Channel> {
        self.bob.state().channel(&ChannelKey::new(self.token_network, self.alice.address())).cloned()
    }

    /// Mines up to `block` and waits until both clients have seen it.
    pub async fn mine_to(&self, block: u64) -> anyhow::Result<()> {
        self.chain.mine_to(block);
        self.alice.wait_for_block(block).await?;
        self.bob.wait_for_block(block).await?;
        Ok(())
    }

    /// Mines `CONFIRMATION_BLOCKS` past `block`, one at a time, so each client sees every block in between.
    async fn mine_confirmations(&self, block: u64) -> anyhow::Result<()> {
        for b in self.chain.block() + 1..=block + CONFIRMATION_BLOCKS {
            self.mine_to(b).await?;
        }
        Ok(())
    }

    async fn wait_for_channels<F>(&self, what: &str, mut predicate: F) -> anyhow::Result<()>
    where
        F: FnMut(Option<&Channel>) -> bool,
    {
        let alice_key = ChannelKey::new(self.token_network, self.bob.address());
        let bob_key = ChannelKey::new(self.token_network, self.alice.address());
        self.alice.wait_for(what, |s| predicate(s.channel(&alice_key))).await?;
        self.bob.wait_for(what, |s| predicate(s.channel(&bob_key))).await?;
        Ok(())
    }

    pub async fn ensure_token_monitored(&self) -> anyhow::Result<()> {
        let token = self.chain.token_address();
        let token_network = self.token_network;
        for client in [&self.alice, &self.bob] {
            if !client.state().is_monitored(&token_network) {
                client.dispatch(Action::TokenMonitored { token, token_network, from_block: START_BLOCK });
            }
            client.wait_for("the token to be monitored", |s| s.is_monitored(&token_network)).await?;
        }
        Ok(())
    }

    pub async fn ensure_channel_open(&self) -> anyhow::Result<()> {
        self.ensure_token_monitored().await?;
        let is_open = |c: Option<Channel>| c.is_some_and(|c| c.state == ChannelState::Open);
        if is_open(self.alice_channel()) && is_open(self.bob_channel()) {
            return Ok(());
        }
        ensure!(self.chain.block() < OPEN_BLOCK, "the chain is already past block {OPEN_BLOCK}");
        let (participant1, participant2) = sorted_addresses(self.alice.address(), self.bob.address());
        let settle_timeout = SETTLE_TIMEOUT;
        let opened = ChannelEvent::Opened { id: CHANNEL_ID, participant1, participant2, settle_timeout };
        self.chain.emit_channel_event(self.token_network, OPEN_BLOCK, opened);
        self.mine_to(OPEN_BLOCK).await?;
        self.mine_confirmations(OPEN_BLOCK).await?;
        self.wait_for_channels("the channel to open", |c| c.is_some_and(|c| c.state == ChannelState::Open)).await?;
        info!("Channel {CHANNEL_ID} is open on both ends");
        Ok(())
    }

    /// Makes sure Alice's side of the channel holds `amount`.
    pub async fn deposited(&self, amount: u128) -> anyhow::Result<()> {
        self.ensure_channel_open().await?;
        let amount = TokenAmount::new(amount);
        let deposited = self.alice_channel().is_some_and(|c| c.own.deposit >= amount);
        if deposited {
            return Ok(());
        }
        let block = self.chain.block() + 1;
        let participant = self.alice.address();
        let event = ChannelEvent::NewDeposit { id: CHANNEL_ID, participant, total_deposit: amount };
        self.chain.emit_channel_event(self.token_network, block, event);
        self.mine_confirmations(block).await?;
        let alice_key = ChannelKey::new(self.token_network, self.bob.address());
        let bob_key = ChannelKey::new(self.token_network, participant);
        let has = |c: Option<&Channel>, own: bool| {
            c.is_some_and(|c| if own { c.own.deposit == amount } else { c.partner.deposit == amount })
        };
        self.alice.wait_for("the deposit", |s| has(s.channel(&alice_key), true)).await?;
        self.bob.wait_for("the partner deposit", |s| has(s.channel(&bob_key), false)).await?;
        Ok(())
    }

    /// Alice closes the channel at `CLOSE_BLOCK`.
    pub async fn closed(&self) -> anyhow::Result<()> {
        let closed = |c: Option<Channel>| c.is_some_and(|c| c.state.is_closed());
        if closed(self.alice_channel()) && closed(self.bob_channel()) {
            return Ok(());
        }
        self.deposited(DEPOSIT).await?;
        ensure!(self.chain.block() < CLOSE_BLOCK, "the chain is already past block {CLOSE_BLOCK}");
        let event = ChannelEvent::Closed { id: CHANNEL_ID, closing_participant: self.alice.address() };
        self.chain.emit_channel_event(self.token_network, CLOSE_BLOCK, event);
        self.mine_to(CLOSE_BLOCK).await?;
        self.mine_confirmations(CLOSE_BLOCK).await?;
        self.wait_for_channels("the channel to close", |c| c.is_some_and(|c| c.state.is_closed())).await
    }

    pub async fn settled(&self) -> anyhow::Result<()> {
        let gone = self.alice_channel().is_none() && self.bob_channel().is_none();
        if gone && self.chain.block() > SETTLE_BLOCK {
            return Ok(());
        }
        self.closed().await?;
        self.mine_to(SETTLE_BLOCK).await?;
        self.wait_for_channels("the channel to become settleable", |c| {
            c.is_some_and(|c| c.state == ChannelState::Settleable)
        })
        .await?;
        let block = SETTLE_BLOCK + 1;
        self.chain.emit_channel_event(self.token_network, block, ChannelEvent::Settled { id: CHANNEL_ID });
        self.mine_confirmations(block).await?;
        self.wait_for_channels("the channel to settle", |c| c.is_none()).await
    }

    /// Both clients look each other up on the transport.
    pub async fn ensure_presence(&self) -> anyhow::Result<()> {
        for (client, peer) in [(&self.alice, self.bob.address()), (&self.bob, self.alice.address())] {
            if !client.state().presences.contains_key(&peer) {
                client.dispatch(Action::Presence(Presence::request((), PresenceMeta { address: peer })));
            }
            client.wait_for("the partner's presence", |s| s.presences.contains_key(&peer)).await?;
        }
        Ok(())
    }

    /// Alice sends `AMOUNT` (plus `FEE`) to Bob, locked on `secret`, and Bob processes it.
    pub async fn ensure_transfer_pending(&self, secret: Secret) -> anyhow::Result<TransferKey> {
        self.deposited(DEPOSIT).await?;
        let meta = TransferKey::sent(secret.secrethash());
        if self.alice.state().transfer(&meta).is_none() {
            let request = TransferRequest {
                token_network: self.token_network,
                target: self.bob.address(),
                value: TokenAmount::new(AMOUNT),
                fee: TokenAmount::new(FEE),
                payment_id: PAYMENT_ID,
                secret: Some(secret),
            };
            self.alice.dispatch(Action::Transfer(Transfer::request(request, meta)));
        }
        let received = TransferKey::received(secret.secrethash());
        self.bob.wait_for("the received transfer", |s| s.transfer(&received).is_some()).await?;
        let processed = |s: &EngineState| s.transfer(&meta).is_some_and(|t| t.transfer_processed);
        self.alice.wait_for("the transfer to be processed", processed).await?;
        Ok(meta)
    }

    /// Alice unlocks the transfer locked on `secret`, and both sides see the unlock processed.
    pub async fn ensure_transfer_unlocked(&self, secret: Secret) -> anyhow::Result<TransferKey> {
        let meta = self.ensure_transfer_pending(secret).await?;
        let unlocked = self.alice.state().transfer(&meta).is_some_and(|t| t.unlock.is_some());
        if !unlocked {
            self.alice.dispatch(Action::TransferUnlock(TransferUnlock::request((), meta)));
        }
        let received = TransferKey::received(secret.secrethash());
        let processed = |key: TransferKey| move |s: &EngineState| s.transfer(&key).is_some_and(|t| t.unlock_processed);
        self.alice.wait_for("the unlock to be processed", processed(meta)).await?;
        self.bob.wait_for("the unlock", processed(received)).await?;
        Ok(meta)
    }

    /// Each client's own end of the channel must be the other's partner end.
    pub fn expect_channels_in_sync(&self) -> anyhow::Result<()> {
        let alice = self.alice_channel().ok_or_else(|| anyhow!("alice has no channel"))?;
        let bob = self.bob_channel().ok_or_else(|| anyhow!("bob has no channel"))?;
        ensure!(alice.id == bob.id, "channel ids differ: {} != {}", alice.id, bob.id);
        ensure!(alice.state == bob.state, "channel states differ: {} != {}", alice.state, bob.state);
        ensure!(alice.own == bob.partner, "alice's own end {:?} is not bob's partner end {:?}", alice.own, bob.partner);
        ensure!(alice.partner == bob.own, "alice's partner end {:?} is not bob's own end {:?}", alice.partner, bob.own);
        Ok(())
    }

    pub async fn shutdown(self) {
        self.alice.shutdown().await;
        self.bob.shutdown().await;
    }
}
