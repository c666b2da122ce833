//! The action/state pipeline.
//!
//! A single reducer task owns the [`EngineState`]. It takes actions one at a time from an unbounded channel,
//! folds each into a new snapshot, publishes the snapshot on a `watch` channel and only then broadcasts the
//! action. Epics are independent tasks that read the broadcast and the latest snapshot, and feed further
//! actions back through a [`Dispatcher`].
//!
//! The broadcast is bounded by `action_buffer` in the [`EngineConfig`](crate::config::EngineConfig). A subscriber
//! that falls more than that many actions behind loses the oldest ones. Epic loops log the loss at error level and
//! carry on from the oldest action still held. [`ActionStream::wait_for`] fails with [`EngineError::Lagged`], since
//! the action it waits for may be among those lost.

mod flow;

pub use flow::{Concat, Exhaust, TaskSet};

use crate::actions::Action;
use crate::chain::Chain;
use crate::config::ConfigHandle;
use crate::error::EngineError;
use crate::reducer::reduce;
use crate::state::EngineState;
use futures::future::BoxFuture;
use futures::FutureExt;
use log::*;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// Feeds actions into the reducer. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Dispatcher {
    sender: mpsc::UnboundedSender<Action>,
}

impl Dispatcher {
    /// Queues `action` for the reducer. Returns `false` once the engine has shut down.
    pub fn dispatch(&self, action: Action) -> bool {
        trace!("Dispatching {action}");
        self.sender.send(action).is_ok()
    }
}

/// One subscriber's view of the ordered action broadcast. Only actions applied after the subscription are seen.
pub struct ActionStream {
    receiver: broadcast::Receiver<Arc<Action>>,
}

impl ActionStream {
    /// The next action. Fails with [`EngineError::Lagged`] if actions were lost since the last call, after which
    /// the stream resumes from the oldest action still buffered.
    pub async fn try_next(&mut self) -> Result<Arc<Action>, EngineError> {
        match self.receiver.recv().await {
            Ok(action) => Ok(action),
            Err(RecvError::Lagged(n)) => Err(EngineError::Lagged(n)),
            Err(RecvError::Closed) => Err(EngineError::Shutdown),
        }
    }

    /// The next action, or `None` once the engine has shut down. Lost actions are logged and skipped.
    pub async fn next(&mut self) -> Option<Arc<Action>> {
        loop {
            match self.try_next().await {
                Ok(action) => return Some(action),
                Err(EngineError::Lagged(n)) => error!("Action subscriber fell behind. {n} actions were lost"),
                Err(_) => return None,
            }
        }
    }

    /// Waits for the first action matching `predicate`.
    pub async fn wait_for<F>(&mut self, mut predicate: F) -> Result<Arc<Action>, EngineError>
    where
        F: FnMut(&Action) -> bool,
    {
        loop {
            let action = self.try_next().await?;
            if predicate(&action) {
                return Ok(action);
            }
        }
    }
}

/// The latest state snapshot, and a way to wait for future ones. Cheap to clone.
#[derive(Clone, Debug)]
pub struct StateWatch {
    receiver: watch::Receiver<Arc<EngineState>>,
}

impl StateWatch {
    pub fn current(&self) -> Arc<EngineState> {
        self.receiver.borrow().clone()
    }

    /// Resolves with the first snapshot (the current one included) that satisfies `predicate`.
    pub async fn wait_for<F>(&mut self, mut predicate: F) -> Result<Arc<EngineState>, EngineError>
    where
        F: FnMut(&EngineState) -> bool,
    {
        let state = self.receiver.wait_for(|s| predicate(s)).await.map_err(|_| EngineError::Shutdown)?;
        Ok(state.clone())
    }

    /// Resolves once the block number exceeds `block`. This is how epics wait "for the next block".
    pub async fn block_after(&mut self, block: u64) -> Result<u64, EngineError> {
        let state = self.wait_for(|s| s.block_number > block).await?;
        Ok(state.block_number)
    }
}

/// What every epic is given: its dependencies, the action stream, the state snapshots, a dispatcher, and the
/// engine's task set for any work it spawns.
pub struct EpicContext<C: Chain> {
    pub chain: Arc<C>,
    pub config: ConfigHandle,
    pub actions: ActionStream,
    pub state: StateWatch,
    pub dispatcher: Dispatcher,
    pub tasks: TaskSet,
}

impl<C: Chain> EpicContext<C> {
    pub fn dispatch(&self, action: Action) -> bool {
        self.dispatcher.dispatch(action)
    }

    /// Spawns `task` so that it is aborted with the engine.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(task);
    }
}

pub type Epic<C> = Box<dyn FnOnce(EpicContext<C>) -> BoxFuture<'static, ()> + Send>;

pub struct EngineBuilder<C: Chain> {
    chain: Arc<C>,
    config: ConfigHandle,
    state: EngineState,
    epics: Vec<(String, Epic<C>)>,
}

impl<C: Chain> EngineBuilder<C> {
    pub fn new(chain: C, config: ConfigHandle) -> Self {
        let state = EngineState::new(chain.account());
        Self { chain: Arc::new(chain), config, state, epics: Vec::new() }
    }

    /// Starts from a previously persisted snapshot instead of an empty one.
    pub fn with_state(mut self, state: EngineState) -> Self {
        self.state = state;
        self
    }

    pub fn with_epic<F, Fut>(mut self, name: impl Into<String>, epic: F) -> Self
    where
        F: FnOnce(EpicContext<C>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.epics.push((name.into(), Box::new(move |ctx| epic(ctx).boxed())));
        self
    }

    /// Registers the chain epics: block and channel monitoring, confirmations, and the UDC flows.
    pub fn with_default_epics(self) -> Self {
        crate::epics::register_default_epics(self)
    }

    /// Spawns the reducer and every registered epic. All epics are subscribed before the first action is applied.
    pub fn start(self) -> Engine {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Action>();
        let buffer = self.config.current().action_buffer.max(1);
        let (action_tx, _) = broadcast::channel::<Arc<Action>>(buffer);
        let (state_tx, state_rx) = watch::channel(Arc::new(self.state));
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let dispatcher = Dispatcher { sender };
        let state = StateWatch { receiver: state_rx };
        let tasks = TaskSet::new();

        for (name, epic) in self.epics {
            debug!("Starting epic {name}");
            let ctx = EpicContext {
                chain: self.chain.clone(),
                config: self.config.clone(),
                actions: ActionStream { receiver: action_tx.subscribe() },
                state: state.clone(),
                dispatcher: dispatcher.clone(),
                tasks: tasks.clone(),
            };
            tasks.spawn(epic(ctx));
        }

        let broadcaster = action_tx.clone();
        let reducer = tokio::spawn(async move {
            loop {
                let action = tokio::select! {
                    _ = &mut shutdown_rx => break,
                    next = receiver.recv() => match next {
                        Some(action) => action,
                        None => break,
                    },
                };
                let mut next = EngineState::clone(&state_tx.borrow());
                reduce(&mut next, &action);
                state_tx.send_replace(Arc::new(next));
                debug!("Applied {action}");
                if broadcaster.send(Arc::new(action)).is_err() {
                    trace!("No action subscribers");
                }
            }
            debug!("Reducer task stopped");
        });

        Engine { dispatcher, state, action_tx, tasks, reducer, shutdown: shutdown_tx }
    }
}

/// A running engine.
pub struct Engine {
    dispatcher: Dispatcher,
    state: StateWatch,
    action_tx: broadcast::Sender<Arc<Action>>,
    tasks: TaskSet,
    reducer: JoinHandle<()>,
    shutdown: oneshot::Sender<()>,
}

impl Engine {
    pub fn dispatch(&self, action: Action) -> bool {
        self.dispatcher.dispatch(action)
    }

    pub fn dispatcher(&self) -> Dispatcher {
        self.dispatcher.clone()
    }

    /// The current state snapshot.
    pub fn state(&self) -> Arc<EngineState> {
        self.state.current()
    }

    pub fn state_watch(&self) -> StateWatch {
        self.state.clone()
    }

    /// A stream of every action applied from now on.
    pub fn subscribe(&self) -> ActionStream {
        ActionStream { receiver: self.action_tx.subscribe() }
    }

    pub async fn wait_for<F>(&self, predicate: F) -> Result<Arc<EngineState>, EngineError>
    where
        F: FnMut(&EngineState) -> bool,
    {
        self.state.clone().wait_for(predicate).await
    }

    /// Dispatches `action` and waits for the first action matching `is_response`. The subscription is taken before
    /// dispatching, so a response can never be missed.
    pub async fn request<F>(&self, action: Action, is_response: F) -> Result<Arc<Action>, EngineError>
    where
        F: FnMut(&Action) -> bool,
    {
        let mut actions = self.subscribe();
        if !self.dispatch(action) {
            return Err(EngineError::Shutdown);
        }
        actions.wait_for(is_response).await
    }

    /// Stops every epic and every task the epics spawned, then the reducer.
    pub async fn shutdown(self) {
        self.tasks.abort_all();
        let _ = self.shutdown.send(());
        if let Err(e) = self.reducer.await {
            error!("Reducer task ended abnormally: {e}");
        }
        info!("Engine stopped");
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::EngineConfig;
    use crate::dummy_impl::DummyChain;
    use crate::primitives::Address;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn actions_are_applied_in_order_and_state_precedes_broadcast() {
        let chain = DummyChain::new(100).account(Address::random());
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<(u64, u64)>();
        let engine = EngineBuilder::new(chain, ConfigHandle::new(Default::default()))
            .with_epic("observer", move |mut ctx| async move {
                while let Some(action) = ctx.actions.next().await {
                    if let Some(block) = action.new_block() {
                        let _ = seen_tx.send((block, ctx.state.current().block_number));
                    }
                }
            })
            .start();
        for block_number in [101, 102, 103] {
            engine.dispatch(Action::NewBlock { block_number });
        }
        for expected in [101, 102, 103] {
            let (block, state_block) = seen_rx.recv().await.unwrap();
            assert_eq!(block, expected);
            assert!(state_block >= expected);
        }
        let state = engine.wait_for(|s| s.block_number == 103).await.unwrap();
        assert_eq!(state.block_number, 103);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn lagging_waiter_fails_instead_of_hanging() {
        let chain = DummyChain::new(100).account(Address::random());
        let config = EngineConfig { action_buffer: 2, ..Default::default() };
        let engine = EngineBuilder::new(chain, ConfigHandle::new(config)).start();
        let mut actions = engine.subscribe();
        for block_number in 101..=110 {
            engine.dispatch(Action::NewBlock { block_number });
        }
        engine.wait_for(|s| s.block_number == 110).await.unwrap();
        let result = actions.wait_for(|a| a.new_block() == Some(101)).await;
        assert_eq!(result.unwrap_err(), EngineError::Lagged(8));
        // The stream carries on from the oldest action still buffered.
        assert_eq!(actions.next().await.unwrap().new_block(), Some(109));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_aborts_spawned_work() {
        let chain = DummyChain::new(100).account(Address::random());
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let (started_tx, started_rx) = oneshot::channel::<()>();
        let engine = EngineBuilder::new(chain, ConfigHandle::new(Default::default()))
            .with_epic("spawner", move |ctx| async move {
                ctx.spawn(async move {
                    let _ = started_tx.send(());
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    flag.store(true, Ordering::SeqCst);
                });
            })
            .start();
        started_rx.await.unwrap();
        engine.shutdown().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }
}
