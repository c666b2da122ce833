use crate::error::CliError;
use conduit_p2p::NodeIdentity;
use libconduit::config::EngineConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// The contents of the configuration file: the local identities, keyed by name, and the engine settings.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct LocalConfig {
    #[serde(default)]
    pub identities: BTreeMap<String, NodeIdentity>,
    #[serde(default)]
    pub engine: EngineConfig,
}

impl LocalConfig {
    pub fn try_load<P: AsRef<Path>>(path: Option<P>) -> Result<Self, CliError> {
        load_config_file(path)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), CliError> {
        save_config_file(path, self)
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.identities.contains_key(name)
    }

    pub fn insert(&mut self, identity: NodeIdentity) -> Option<NodeIdentity> {
        self.identities.insert(identity.name().to_string(), identity)
    }

    pub fn remove<S: AsRef<str>>(&mut self, name: S) -> Option<NodeIdentity> {
        self.identities.remove(name.as_ref())
    }

    /// Identities whose stored address does not match their key.
    pub fn invalid_identities(&self) -> Vec<&str> {
        self.identities.values().filter(|id| !id.check()).map(|id| id.name()).collect()
    }
}

pub fn conduit_home() -> PathBuf {
    let mut home = std::env::home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.push(".conduit");
    home
}

pub fn default_config_path() -> PathBuf {
    conduit_home().join("config.yml")
}

pub fn default_data_dir() -> PathBuf {
    conduit_home().join("transfers")
}

pub fn load_config_file<P: AsRef<Path>>(path: Option<P>) -> Result<LocalConfig, CliError> {
    let path = path.map(|p| p.as_ref().to_path_buf()).unwrap_or_else(default_config_path);
    let file = std::fs::File::open(path)?;
    let reader = std::io::BufReader::new(file);
    let config = serde_yml::from_reader(reader)?;
    Ok(config)
}

pub fn save_config_file<P: AsRef<Path>>(path: P, config: &LocalConfig) -> Result<(), CliError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)?;
    let writer = std::io::BufWriter::new(file);
    serde_yml::to_writer(writer, config)?;
    Ok(())
}
