use crate::state::{TransferKey, TransferState};

pub trait StateStore {
    fn write_transfer(&mut self, transfer: &TransferState) -> Result<(), anyhow::Error>;
    fn load_transfer(&self, key: &TransferKey) -> Result<TransferState, anyhow::Error>;
    /// The keys of every stored transfer, in no particular order.
    fn list_transfers(&self) -> Result<Vec<TransferKey>, anyhow::Error>;
}
