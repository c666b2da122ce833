use libconduit::crypto::AccountKey;
use libconduit::primitives::Address;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Debug, Display};
use std::path::Path;
use thiserror::Error;

/// Extracts the address embedded in a peer's user id, e.g. `@0xabc...def:server.example` or
/// `@0xabc...def.1:server.example`. The address may be in any case, but a mixed-case address must carry a valid
/// checksum.
pub fn address_from_peer_id(user_id: &str) -> Option<Address> {
    let candidate = user_id.strip_prefix('@')?.get(..42)?;
    let separator = user_id.as_bytes().get(43)?;
    if !matches!(separator, b'.' | b':') {
        return None;
    }
    let hex = candidate.strip_prefix("0x").or_else(|| candidate.strip_prefix("0X"))?;
    if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    Address::parse_checksummed(&format!("0x{hex}")).ok()
}

/// The user id under which `address` is reachable on `server`.
pub fn peer_id_of(address: &Address, server: &str) -> String {
    format!("@{}:{server}", address.to_checksum().to_lowercase())
}

/// Orders two addresses by their lowercase hex form.
pub fn sorted_addresses(a: Address, b: Address) -> (Address, Address) {
    if a.to_checksum().to_lowercase() <= b.to_checksum().to_lowercase() {
        (a, b)
    } else {
        (b, a)
    }
}

/// The identity a node uses on the transport: a human-friendly name and the account key that signs its messages.
#[derive(Clone, Serialize, Deserialize)]
pub struct NodeIdentity {
    name: String,
    #[serde(serialize_with = "serialize_key", deserialize_with = "deserialize_key")]
    key: AccountKey,
    address: Address,
}

impl NodeIdentity {
    pub fn new<S: Into<String>>(name: S, key: AccountKey) -> Self {
        let address = key.address();
        NodeIdentity { name: name.into(), key, address }
    }

    pub fn random_with_name<S: Into<String>>(name: S) -> Self {
        Self::new(name, AccountKey::random())
    }

    /// Create a new identity with a random name and key.
    pub fn random() -> Self {
        Self::random_with_name(random_name())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> &AccountKey {
        &self.key
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), IdentityError> {
        let text = self.to_yml()?;
        std::fs::write(path, text)?;
        Ok(())
    }

    pub fn to_yml(&self) -> Result<String, IdentityError> {
        let s = serde_yml::to_string(self)?;
        Ok(s)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, IdentityError> {
        let text = std::fs::read_to_string(path)?;
        let identity: NodeIdentity = serde_yml::from_str(&text)?;
        if !identity.check() {
            return Err(IdentityError::AddressMismatch(identity.address));
        }
        Ok(identity)
    }

    /// Return an internal consistency check, that the address corresponds to the key.
    pub fn check(&self) -> bool {
        self.address == self.key.address()
    }
}

impl Display for NodeIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.name, self.address)
    }
}

impl Debug for NodeIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NodeIdentity({self})")
    }
}

impl PartialEq for NodeIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.address == other.address && self.key.address() == other.key.address()
    }
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Error reading/writing identity: {0}")]
    Io(#[from] std::io::Error),
    #[error("Error de/encoding identity: {0}")]
    Serde(#[from] serde_yml::Error),
    #[error("The stored address {0} does not belong to the stored key")]
    AddressMismatch(Address),
}

const ADJECTIVES: [&str; 12] =
    ["Brisk", "Quiet", "Amber", "Nimble", "Rusty", "Lucky", "Mellow", "Swift", "Sly", "Bold", "Dusty", "Keen"];

const NOUNS: [&str; 12] =
    ["Otter", "Heron", "Badger", "Falcon", "Marten", "Lynx", "Beaver", "Plover", "Stoat", "Wren", "Ibex", "Moth"];

fn random_name() -> String {
    let i = rand::random_range(0..ADJECTIVES.len());
    let j = rand::random_range(0..NOUNS.len());
    format!("{}{}", ADJECTIVES[i], NOUNS[j])
}

fn serialize_key<S>(key: &AccountKey, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&hex::encode(key.to_bytes()))
}

fn deserialize_key<'de, D>(deserializer: D) -> Result<AccountKey, D::Error>
where
    D: Deserializer<'de>,
{
    let encoded = String::deserialize(deserializer)?;
    let bytes = hex::decode(encoded).map_err(serde::de::Error::custom)?;
    AccountKey::from_bytes(&bytes).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::str::FromStr;

    const ADDRESS: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";

    #[test]
    fn addresses_from_peer_ids() {
        let expected = Address::from_str(ADDRESS).unwrap();
        let lower = ADDRESS.to_lowercase();
        assert_eq!(address_from_peer_id(&format!("@{lower}:matrix.raiden.test")), Some(expected));
        assert_eq!(address_from_peer_id(&format!("@{lower}.2:matrix.raiden.test")), Some(expected));
        assert_eq!(address_from_peer_id(&format!("@{ADDRESS}:server")), Some(expected));
        let upper = format!("0x{}", ADDRESS[2..].to_uppercase());
        assert_eq!(address_from_peer_id(&format!("@{upper}:server")), Some(expected));
        assert_eq!(address_from_peer_id(&peer_id_of(&expected, "matrix.raiden.test")), Some(expected));
    }

    #[test]
    fn non_matching_peer_ids() {
        let lower = ADDRESS.to_lowercase();
        // bad checksum
        assert_eq!(address_from_peer_id("@0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAeD:server"), None);
        assert_eq!(address_from_peer_id(&format!("{lower}:server")), None);
        assert_eq!(address_from_peer_id(&format!("@{lower}")), None);
        assert_eq!(address_from_peer_id(&format!("@{lower}-server")), None);
        assert_eq!(address_from_peer_id(&format!("@{}:server", &lower[..41])), None);
        assert_eq!(address_from_peer_id("@0xzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz:server"), None);
        assert_eq!(address_from_peer_id("@alice:server"), None);
        assert_eq!(address_from_peer_id(""), None);
    }

    #[test]
    fn address_ordering_ignores_case() {
        let a = Address::from_str("0x00000000000000000000000000000000000000aa").unwrap();
        let b = Address::from_str("0x00000000000000000000000000000000000000BB").unwrap();
        assert_eq!(sorted_addresses(a, b), (a, b));
        assert_eq!(sorted_addresses(b, a), (a, b));
    }

    #[test]
    fn test_identity_save_load() {
        let identity = NodeIdentity::random();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.yml");
        identity.save(&path).expect("save identity");
        let loaded = NodeIdentity::load(&path).expect("load identity");
        assert_eq!(identity, loaded);
        assert!(loaded.check(), "identity check failed");
        assert_eq!(loaded.key().to_bytes(), identity.key().to_bytes());
    }

    #[test]
    fn tampered_identity_is_rejected() {
        let identity = NodeIdentity::random();
        let other = Address::random().to_string();
        let yml = identity.to_yml().unwrap().replace(&identity.address().to_string(), &other);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.yml");
        std::fs::write(&path, yml).unwrap();
        assert!(matches!(NodeIdentity::load(&path), Err(IdentityError::AddressMismatch(_))));
    }
}
