pub mod actions;
pub mod amount;
pub mod caps;
pub mod chain;
pub mod config;
pub mod crypto;
pub mod epics;
pub mod error;
pub mod pipeline;
pub mod primitives;
pub mod reducer;
pub mod retry;
pub mod state;
pub mod storage;
pub mod tx;

#[cfg(feature = "dummy_chain")]
pub mod dummy_impl;
