use crate::primitives::Hash;
use crate::state::{Direction, TransferKey, TransferState};
use crate::storage::StateStore;
use ron::ser::PrettyConfig;
use std::fs;
use std::path::PathBuf;

/// A file-based store for transfer records.
///
/// Each transfer is saved in a file named after its key, with the `:` replaced, e.g. `sent_0x2a3b...9f.ron`
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Creates a new file store with the given path.
    ///
    /// # Arguments
    /// * `path` - The path to the directory where the transfer files will be stored.
    pub fn new(path: PathBuf) -> Result<Self, std::io::Error> {
        if !path.exists() {
            fs::create_dir_all(&path)?;
        }
        Ok(Self { path })
    }

    /// Returns the path to the directory where the transfer files are stored.
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn file_name(key: &TransferKey) -> String {
        format!("{}_{}.ron", key.direction, key.secrethash)
    }

    fn parse_file_name(name: &str) -> Option<TransferKey> {
        let stem = name.strip_suffix(".ron")?;
        let (direction, secrethash) = stem.split_once('_')?;
        let direction = match direction {
            "sent" => Direction::Sent,
            "received" => Direction::Received,
            _ => return None,
        };
        let secrethash: Hash = secrethash.parse().ok()?;
        Some(TransferKey::new(direction, secrethash))
    }
}

impl StateStore for FileStore {
    fn write_transfer(&mut self, transfer: &TransferState) -> Result<(), anyhow::Error> {
        let file_path = self.path.join(Self::file_name(&transfer.key()));
        let config = PrettyConfig::new().compact_arrays(true).compact_maps(true);
        let val = ron::ser::to_string_pretty(transfer, config)?;
        fs::write(&file_path, &val)?;
        Ok(())
    }

    fn load_transfer(&self, key: &TransferKey) -> Result<TransferState, anyhow::Error> {
        let file_path = self.path.join(Self::file_name(key));
        let val = fs::read_to_string(&file_path)?;
        let transfer: TransferState = ron::de::from_str(&val)?;
        Ok(transfer)
    }

    fn list_transfers(&self) -> Result<Vec<TransferKey>, anyhow::Error> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let name = entry?.file_name();
            if let Some(key) = name.to_str().and_then(Self::parse_file_name) {
                keys.push(key);
            }
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::amount::TokenAmount;
    use crate::primitives::{Address, Secret};
    use crate::state::{BalanceProof, Lock};

    fn transfer(direction: Direction) -> TransferState {
        let secret = Secret::random();
        let secrethash = secret.secrethash();
        TransferState {
            direction,
            secrethash,
            token_network: Address::random(),
            channel_id: 17,
            partner: Address::random(),
            initiator: Address::random(),
            target: Address::random(),
            amount: TokenAmount::new(10),
            fee: TokenAmount::new(3),
            payment_id: 99,
            lock: Lock { amount: TokenAmount::new(13), expiration: 300, secrethash },
            balance_proof: BalanceProof::default(),
            message_id: 5,
            secret: Some(secret),
            transfer_processed: true,
            unlock: Some(BalanceProof::default()),
            unlock_message_id: Some(6),
            unlock_processed: true,
        }
    }

    /// Resolved transfers survive a reload of the store.
    #[test]
    fn test_file_store() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut store = FileStore::new(dir.path().join("transfers")).expect("directory to exist");
        let sent = transfer(Direction::Sent);
        let received = transfer(Direction::Received);
        store.write_transfer(&sent).expect("Failed to write transfer");
        store.write_transfer(&received).expect("Failed to write transfer");
        fs::write(store.path().join("notes.txt"), "not a transfer").unwrap();

        let store = FileStore::new(store.path().clone()).expect("directory to exist");
        assert_eq!(store.load_transfer(&sent.key()).expect("Failed to load transfer"), sent);
        let mut keys = store.list_transfers().unwrap();
        keys.sort();
        let mut expected = vec![sent.key(), received.key()];
        expected.sort();
        assert_eq!(keys, expected);
        assert!(store.load_transfer(&TransferKey::sent(Hash::random())).is_err());
    }
}
