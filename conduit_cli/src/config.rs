use clap::{Args, Parser, Subcommand};
use libconduit::amount::TokenAmount;
use std::path::PathBuf;

/// Conduit payment channels.
///
/// Identity management and a development node for the conduit payment channel engine.
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Config {
    /// Path to the configuration file. The default is `$HOME/.conduit/config.yml`.
    #[arg(long = "config-file", short = 'c', env = "CONDUIT_CONFIG")]
    pub config_file: Option<PathBuf>,
    /// Identity name to use. If omitted, the first identity in the configuration file is used.
    #[arg(long = "id")]
    pub id_name: Option<String>,
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Add, list or delete local identities.
    #[command(subcommand, name = "id")]
    Id(IdCommand),
    /// Run a node against the in-memory development chain.
    #[command(name = "run", alias = "start")]
    Run(RunCommand),
    /// Encode or decode capability urls.
    #[command(subcommand, name = "caps")]
    Caps(CapsCommand),
    /// Inspect the engine configuration.
    #[command(subcommand, name = "config")]
    Config(ConfigCommand),
}

#[derive(Debug, Subcommand)]
pub enum IdCommand {
    /// Create a new identity.
    #[command(name = "new", alias = "create")]
    Create {
        /// The name of the new identity. If omitted, a random name is generated.
        name: Option<String>,
    },
    /// List all identities.
    #[command(name = "list", alias = "ls")]
    List,
    /// Delete an identity.
    #[command(name = "delete", alias = "del", alias = "rm")]
    Delete {
        /// The name of the identity to delete.
        name: String,
    },
}

#[derive(Debug, Args)]
pub struct RunCommand {
    /// Overrides the configured block polling interval, in milliseconds.
    #[arg(long = "polling-interval", short = 'p')]
    pub polling_interval: Option<u64>,
    /// Tokens minted to the node's account on the development chain.
    #[arg(long = "mint", default_value = "1000")]
    pub mint: TokenAmount,
    /// Deposit this amount into the user deposit contract once the node is running.
    #[arg(long = "udc-deposit")]
    pub udc_deposit: Option<TokenAmount>,
    /// Where transfer records are stored. The default is `$HOME/.conduit/transfers`.
    #[arg(long = "data-dir")]
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum CapsCommand {
    /// Print the caps url for `key=value` pairs, or for the configured caps if none are given.
    Encode {
        /// Capabilities as `key=value`. Repeat a key to build a list.
        caps: Vec<String>,
    },
    /// Print the capabilities a caps url carries.
    Decode { url: String },
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the effective engine configuration.
    Show,
}

pub struct GlobalOptions {
    pub config_file: Option<PathBuf>,
    pub id_name: Option<String>,
}

impl Config {
    pub fn to_parts(self) -> (GlobalOptions, CliCommand) {
        let global = GlobalOptions { config_file: self.config_file, id_name: self.id_name };
        (global, self.command)
    }
}
