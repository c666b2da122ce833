//! The narrow boundary through which the engine reaches the blockchain.
mod data_objects;
mod traits;

pub use data_objects::{ChannelEvent, ChannelEventLog, Receipt, TxHandle, WithdrawPlanRecord};
pub use traits::{Chain, Provider, TokenContract, TokenNetworkContract, UserDepositContract};
