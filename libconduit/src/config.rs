use crate::amount::TokenAmount;
use crate::caps::{Capability, Caps, CapsValue};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Engine configuration.
///
/// Every field has a default, so a configuration file only needs to name the values it overrides.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// How often the chain is polled for new blocks, in milliseconds.
    pub polling_interval: u64,
    /// The interval between retries of failed chain calls and transactions, in milliseconds. Defaults to the
    /// polling interval when omitted.
    pub retry_interval: Option<u64>,
    /// How many times a transaction is re-submitted after a recoverable error before the failure is surfaced.
    pub tx_max_retries: usize,
    /// Blocks after inclusion before an on-chain event is considered final.
    pub confirmation_blocks: u64,
    /// The smallest allowance granted when an approval is needed.
    pub minimum_allowance: TokenAmount,
    /// Blocks before a lock of a transfer we send expires.
    pub reveal_timeout: u64,
    /// The capabilities we advertise to peers.
    pub caps: Caps,
    /// How many applied actions the broadcast holds for a subscriber that has not read them yet. A subscriber that
    /// falls further behind loses the oldest ones and is told so. Read once, when the engine starts.
    pub action_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let caps = [
            (Capability::Delivery.to_string(), CapsValue::from(true)),
            (Capability::Receive.to_string(), CapsValue::from(true)),
            (Capability::Mediate.to_string(), CapsValue::from(true)),
        ]
        .into_iter()
        .collect();
        EngineConfig {
            polling_interval: 5000,
            retry_interval: None,
            tx_max_retries: 10,
            confirmation_blocks: 5,
            minimum_allowance: TokenAmount::MAX,
            reveal_timeout: 50,
            caps,
            action_buffer: 1024,
        }
    }
}

impl EngineConfig {
    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval.unwrap_or(self.polling_interval))
    }
}

/// Something that yields the interval to wait before the next retry. It is queried on every retry, so a
/// hot-reloaded configuration takes effect on the next tick.
pub trait IntervalSource {
    fn interval(&self) -> Duration;
}

impl IntervalSource for Duration {
    fn interval(&self) -> Duration {
        *self
    }
}

/// A live, hot-reloadable handle on the engine configuration. Cheap to clone.
#[derive(Clone, Debug)]
pub struct ConfigHandle {
    sender: Arc<watch::Sender<EngineConfig>>,
}

impl ConfigHandle {
    pub fn new(config: EngineConfig) -> Self {
        let (sender, _) = watch::channel(config);
        ConfigHandle { sender: Arc::new(sender) }
    }

    /// A snapshot of the current configuration.
    pub fn current(&self) -> EngineConfig {
        self.sender.borrow().clone()
    }

    /// Publishes a modified configuration to every holder of this handle.
    pub fn update<F: FnOnce(&mut EngineConfig)>(&self, f: F) {
        self.sender.send_modify(f);
    }

    /// A receiver that is notified of every configuration change.
    pub fn subscribe(&self) -> watch::Receiver<EngineConfig> {
        self.sender.subscribe()
    }

    pub fn polling_interval(&self) -> Duration {
        self.sender.borrow().polling_interval()
    }
}

impl IntervalSource for ConfigHandle {
    fn interval(&self) -> Duration {
        self.sender.borrow().retry_interval()
    }
}
