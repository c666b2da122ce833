use anyhow::anyhow;
use clap::Parser;
use conduit_cli::config::{CapsCommand, CliCommand, Config, ConfigCommand, GlobalOptions, IdCommand};
use conduit_cli::error::CliError;
use conduit_cli::id_management::{default_config_path, LocalConfig};
use conduit_cli::node::run_node;
use conduit_p2p::caps::{encode_caps, try_decode_caps, CAPS_URL_BASE};
use conduit_p2p::NodeIdentity;
use log::*;
use std::path::PathBuf;

#[tokio::main]
async fn main() {
    env_logger::init();
    let config: Config = Config::parse();
    let (global_options, command) = config.to_parts();

    let result = match command {
        CliCommand::Id(id_command) => exec_id_command(id_command, global_options),
        CliCommand::Run(run_command) => match load_identity(&global_options) {
            Ok((identity, local)) => run_node(identity, local.engine, run_command).await,
            Err(e) => Err(e),
        },
        CliCommand::Caps(caps_command) => exec_caps_command(caps_command, global_options),
        CliCommand::Config(ConfigCommand::Show) => show_config(global_options),
    };

    match result {
        Ok(()) => {
            println!("Bye :)")
        }
        Err(err) => {
            eprintln!("** Error ** \n {err}");
            std::process::exit(1);
        }
    }
}

fn config_path(options: &GlobalOptions) -> PathBuf {
    options.config_file.clone().unwrap_or_else(default_config_path)
}

fn exec_id_command(cmd: IdCommand, options: GlobalOptions) -> Result<(), anyhow::Error> {
    let path = config_path(&options);
    let mut local = load_or_create_config(&path)?;
    match cmd {
        IdCommand::Create { name } => {
            let identity = match name {
                Some(name) => NodeIdentity::random_with_name(name),
                None => NodeIdentity::random(),
            };
            if local.contains(identity.name()) {
                return Err(anyhow!("Identity {} already exists.", identity.name()));
            }
            println!("Identity created: {identity}");
            local.insert(identity);
            println!("Saving identities to {}", path.display());
            local.save(&path)?;
        }
        IdCommand::List => {
            println!("{} Local identities found.", local.identities.len());
            for id in local.identities.values() {
                println!("{id}");
            }
        }
        IdCommand::Delete { name } => match local.remove(&name) {
            Some(identity) => {
                println!("Identity deleted: {identity}");
                local.save(&path)?;
            }
            None => return Err(anyhow!("Identity {name} not found.")),
        },
    }
    Ok(())
}

fn load_or_create_config(path: &PathBuf) -> Result<LocalConfig, anyhow::Error> {
    match LocalConfig::try_load(Some(path)) {
        Ok(local) => Ok(local),
        Err(CliError::IoError(err)) if err.kind() == std::io::ErrorKind::NotFound => {
            println!("No configuration file found at {}", path.display());
            Ok(LocalConfig::default())
        }
        Err(CliError::IoError(err)) => Err(anyhow!("Error reading configuration file: {err}")),
        Err(err) => Err(anyhow!("{err}")),
    }
}

fn load_identity(options: &GlobalOptions) -> Result<(NodeIdentity, LocalConfig), anyhow::Error> {
    let path = config_path(options);
    info!("Loading identities from {}", path.display());
    let mut local = load_or_create_config(&path)?;
    if let Some(name) = local.invalid_identities().first() {
        return Err(anyhow!("Identity {name} does not match its key."));
    }
    let identity = match options.id_name.as_ref() {
        Some(name) => local.remove(name).ok_or_else(|| anyhow!("Identity not found: {name}"))?,
        None => {
            let first = local.identities.keys().next().cloned();
            first
                .and_then(|name| local.remove(name))
                .ok_or_else(|| anyhow!("No identities found. Use `conduit id new` to create one."))?
        }
    };
    Ok((identity, local))
}

fn exec_caps_command(cmd: CapsCommand, options: GlobalOptions) -> Result<(), anyhow::Error> {
    match cmd {
        CapsCommand::Encode { caps } if caps.is_empty() => {
            let local = load_or_create_config(&config_path(&options))?;
            println!("{}", encode_caps(&local.engine.caps));
        }
        CapsCommand::Encode { caps } => {
            // Parsing through the url decoder gives the pairs the same type inference as received caps.
            let url = format!("{CAPS_URL_BASE}?{}", caps.join("&"));
            let parsed = try_decode_caps(&url)?;
            println!("{}", encode_caps(&parsed));
        }
        CapsCommand::Decode { url } => {
            let caps = try_decode_caps(&url)?;
            println!("{}", serde_json::to_string_pretty(&caps)?);
        }
    }
    Ok(())
}

fn show_config(options: GlobalOptions) -> Result<(), anyhow::Error> {
    let local = load_or_create_config(&config_path(&options))?;
    print!("{}", serde_yml::to_string(&local.engine)?);
    Ok(())
}
