//! The chain-facing epics. Each one is a long-running task over an [`EpicContext`](crate::pipeline::EpicContext).
pub mod blocks;
pub mod channels;
pub mod udc;

use crate::chain::Chain;
use crate::pipeline::EngineBuilder;

pub fn register_default_epics<C: Chain>(builder: EngineBuilder<C>) -> EngineBuilder<C> {
    builder
        .with_epic("block_monitor", blocks::block_monitor)
        .with_epic("confirmations", blocks::confirmation_monitor)
        .with_epic("channel_monitor", channels::channel_monitor)
        .with_epic("udc_monitor", udc::udc_monitor)
        .with_epic("udc_deposit", udc::udc_deposit)
        .with_epic("udc_withdraw_plan", udc::udc_withdraw_plan)
        .with_epic("udc_check_withdraw_planned", udc::udc_check_withdraw_planned)
        .with_epic("udc_withdraw_planned", udc::udc_withdraw_planned)
}
