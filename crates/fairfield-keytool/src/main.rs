//! Fairfield Keytool: command-line custody of a Fairfield Nostr identity
//!
//! Generates or restores the identity, keeps it sealed in the local store,
//! signs and verifies events, and inspects the inactivity session.
//!
//! # Usage
//!
//! ```bash
//! fairfield-keytool generate
//! fairfield-keytool restore --secret nsec1...
//! fairfield-keytool sign --kind 1 --content "hello"
//! fairfield-keytool verify - < event.json
//! ```

mod commands;
mod config;

use anyhow::{Context, Result};
use std::path::PathBuf;

fn main() -> Result<()> {
    // Security hardening: keep key material out of core files
    fairfield_identity::secret::disable_core_dumps();

    // Parse CLI args (minimal, no clap)
    let args: Vec<String> = std::env::args().collect();

    let mut config_path: Option<PathBuf> = None;
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                i += 1;
                if i < args.len() {
                    config_path = Some(PathBuf::from(&args[i]));
                } else {
                    anyhow::bail!("--config requires a path argument");
                }
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            "--version" | "-V" => {
                println!("fairfield-keytool {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            _ => break,
        }
        i += 1;
    }

    let command = commands::Command::parse(&args[i..])?;

    // Load config
    let mut keytool_config = config::KeytoolConfig::load(config_path.as_deref())
        .context("Failed to load configuration")?;

    // Apply env overrides
    keytool_config.apply_env_overrides();

    // Validate
    keytool_config
        .validate()
        .context("Configuration validation failed")?;

    // Init logger
    std::env::set_var("RUST_LOG", &keytool_config.log_level);
    env_logger::init();

    commands::run(command, &keytool_config, &mut commands::EnvOrStdin)
}

fn print_help() {
    println!(
        r#"Fairfield Keytool: Nostr identity custody

USAGE:
    fairfield-keytool [OPTIONS] <COMMAND>

COMMANDS:
    generate [--force]                     Create a new identity (prints the recovery phrase once)
    restore --mnemonic <words|-> [--force] Restore from a 12-word recovery phrase
    restore --secret <nsec|hex|-> [--force]
                                           Import an existing private key
                                           (`-` reads the value from stdin)
    pubkey                                 Show the stored public key
    sign --kind <n> --content <text>       Sign an event and print its JSON
         [--tag a,b,...]... [--created-at <unix secs>]
    verify <json|->                        Check an event's id and signature
    session status                         Show the inactivity session
    session touch                          Extend the session (asks for the
                                           password once it has expired)
    passwd                                 Change the vault password
    forget                                 Remove the stored identity

OPTIONS:
    -c, --config <PATH>   Config file path (default: ~/.fairfield/keytool.toml if present)
    -h, --help            Show this help message
    -V, --version         Show version

ENVIRONMENT VARIABLES:
    FAIRFIELD_PASSWORD         Vault password (otherwise read from stdin)
    FAIRFIELD_NEW_PASSWORD     New password for `passwd`
    FAIRFIELD_DATA_DIR         Data directory path
    FAIRFIELD_LOG_LEVEL        Log level (error/warn/info/debug/trace)
    FAIRFIELD_KDF_ITERATIONS   PBKDF2 rounds (>= 600000)
    FAIRFIELD_SESSION_TIMEOUT  Inactivity timeout in seconds

EXAMPLES:
    # Sign a reply
    fairfield-keytool sign --kind 1 --content "agreed" --tag e,<event id>,,reply

    # Verify an event from a relay dump
    fairfield-keytool verify - < event.json
"#
    );
}
