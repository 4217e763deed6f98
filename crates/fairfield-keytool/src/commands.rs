//! Keytool subcommands

use crate::config::KeytoolConfig;
use anyhow::{Context, Result};
use fairfield_identity::event::{self, Tags};
use fairfield_identity::{
    format_remaining, generate_identity, restore_from_mnemonic, restore_from_secret,
    EventTemplate, FileStore, Identity, IdentityContext, KeyValueStore, SessionPhase,
};
use std::io::{BufRead, Read};
use std::sync::Arc;
use zeroize::Zeroizing;

/// How an existing key is imported. A value of `-` is read from stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreSource {
    Mnemonic(String),
    Secret(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Generate {
        force: bool,
    },
    Restore {
        source: RestoreSource,
        force: bool,
    },
    Pubkey,
    Sign {
        kind: u16,
        content: String,
        tags: Tags,
        created_at: Option<u64>,
    },
    /// Event JSON, or `-` for stdin
    Verify {
        input: String,
    },
    SessionStatus,
    SessionTouch,
    Passwd,
    Forget,
}

impl Command {
    /// Parse a subcommand and its arguments (everything after the global
    /// options).
    pub fn parse(args: &[String]) -> Result<Self> {
        let Some((name, rest)) = args.split_first() else {
            anyhow::bail!("Missing command (try --help)");
        };

        match name.as_str() {
            "generate" => Ok(Command::Generate {
                force: parse_force_only(rest)?,
            }),
            "restore" => parse_restore(rest),
            "pubkey" => {
                expect_no_args(name, rest)?;
                Ok(Command::Pubkey)
            }
            "sign" => parse_sign(rest),
            "verify" => match rest {
                [input] => Ok(Command::Verify {
                    input: input.clone(),
                }),
                _ => anyhow::bail!("verify takes exactly one argument: <json|->"),
            },
            "session" => match rest {
                [sub] if sub == "status" => Ok(Command::SessionStatus),
                [sub] if sub == "touch" => Ok(Command::SessionTouch),
                _ => anyhow::bail!("session takes one of: status, touch"),
            },
            "passwd" => {
                expect_no_args(name, rest)?;
                Ok(Command::Passwd)
            }
            "forget" => {
                expect_no_args(name, rest)?;
                Ok(Command::Forget)
            }
            other => anyhow::bail!("Unknown command: {}", other),
        }
    }
}

fn expect_no_args(name: &str, rest: &[String]) -> Result<()> {
    anyhow::ensure!(rest.is_empty(), "{} takes no arguments", name);
    Ok(())
}

fn parse_force_only(rest: &[String]) -> Result<bool> {
    let mut force = false;
    for arg in rest {
        match arg.as_str() {
            "--force" | "-f" => force = true,
            other => anyhow::bail!("Unknown argument: {}", other),
        }
    }
    Ok(force)
}

fn parse_restore(rest: &[String]) -> Result<Command> {
    let mut source = None;
    let mut force = false;

    let mut i = 0;
    while i < rest.len() {
        match rest[i].as_str() {
            "--mnemonic" | "--secret" => {
                let flag = rest[i].as_str();
                i += 1;
                let Some(value) = rest.get(i) else {
                    anyhow::bail!("{} requires a value", flag);
                };
                anyhow::ensure!(source.is_none(), "Give either --mnemonic or --secret, not both");
                source = Some(if flag == "--mnemonic" {
                    RestoreSource::Mnemonic(value.clone())
                } else {
                    RestoreSource::Secret(value.clone())
                });
            }
            "--force" | "-f" => force = true,
            other => anyhow::bail!("Unknown argument: {}", other),
        }
        i += 1;
    }

    let source = source.context("restore requires --mnemonic <words> or --secret <nsec|hex>")?;
    Ok(Command::Restore { source, force })
}

fn parse_sign(rest: &[String]) -> Result<Command> {
    let mut kind = None;
    let mut content = None;
    let mut tags = Vec::new();
    let mut created_at = None;

    let mut i = 0;
    while i < rest.len() {
        let flag = rest[i].as_str();
        i += 1;
        let Some(value) = rest.get(i) else {
            anyhow::bail!("{} requires a value", flag);
        };
        match flag {
            "--kind" | "-k" => {
                kind = Some(
                    value
                        .parse::<u16>()
                        .with_context(|| format!("Invalid kind: {}", value))?,
                );
            }
            "--content" => content = Some(value.clone()),
            "--tag" | "-t" => tags.push(value.split(',').map(str::to_string).collect()),
            "--created-at" => {
                created_at = Some(
                    value
                        .parse::<u64>()
                        .with_context(|| format!("Invalid timestamp: {}", value))?,
                );
            }
            other => anyhow::bail!("Unknown argument: {}", other),
        }
        i += 1;
    }

    Ok(Command::Sign {
        kind: kind.context("sign requires --kind <n>")?,
        content: content.context("sign requires --content <text>")?,
        tags,
        created_at,
    })
}

// ============================================================================
// Execution
// ============================================================================

/// Where passwords and other secret input come from
pub trait SecretSource {
    /// One line of secret input, without the line ending
    fn read_secret(&mut self, prompt: &str) -> Result<Zeroizing<String>>;

    /// Environment variable first, else one line of input
    fn password(&mut self, env_var: &str, prompt: &str) -> Result<Zeroizing<String>> {
        if let Ok(v) = std::env::var(env_var) {
            return Ok(Zeroizing::new(v));
        }
        let password = self.read_secret(prompt)?;
        anyhow::ensure!(!password.is_empty(), "Empty password");
        Ok(password)
    }
}

/// Environment variables and stdin
pub struct EnvOrStdin;

impl SecretSource for EnvOrStdin {
    fn read_secret(&mut self, prompt: &str) -> Result<Zeroizing<String>> {
        eprint!("{}: ", prompt);
        let mut line = Zeroizing::new(String::new());
        std::io::stdin()
            .lock()
            .read_line(&mut line)
            .with_context(|| format!("Failed to read {} from stdin", prompt.to_lowercase()))?;
        Ok(Zeroizing::new(
            line.trim_end_matches(|c| c == '\r' || c == '\n').to_string(),
        ))
    }
}

pub fn run(
    command: Command,
    config: &KeytoolConfig,
    secrets: &mut dyn SecretSource,
) -> Result<()> {
    let path = config.store_path();
    let store: Arc<dyn KeyValueStore> = Arc::new(
        FileStore::open(&path)
            .with_context(|| format!("Failed to open identity store {}", path.display()))?,
    );
    let ctx = IdentityContext::new(store, config.settings());
    log::debug!("Using identity store {}", path.display());

    match command {
        Command::Generate { force } => {
            ensure_replaceable(&ctx, force)?;
            let identity = generate_identity()?;
            let phrase = Zeroizing::new(identity.mnemonic().unwrap_or_default().to_string());
            let pk = store_new(&ctx, identity, secrets)?;
            println!("Recovery phrase (write it down, it is shown once):\n");
            println!("    {}\n", phrase.as_str());
            println!("npub: {}", pk.to_npub());
            println!("hex:  {}", pk);
        }
        Command::Restore { source, force } => {
            ensure_replaceable(&ctx, force)?;
            let identity = match &source {
                RestoreSource::Mnemonic(words) => {
                    restore_from_mnemonic(&resolve_secret(words, "Recovery phrase", secrets)?)?
                }
                RestoreSource::Secret(text) => {
                    restore_from_secret(&resolve_secret(text, "Secret key", secrets)?)?
                }
            };
            let pk = store_new(&ctx, identity, secrets)?;
            println!("Restored identity");
            println!("npub: {}", pk.to_npub());
            println!("hex:  {}", pk);
        }
        Command::Pubkey => {
            let pk = ctx.keyring().public_key()?;
            println!("npub: {}", pk.to_npub());
            println!("hex:  {}", pk);
        }
        Command::Sign {
            kind,
            content,
            tags,
            created_at,
        } => {
            let state = ctx.session().check_timeout()?;
            anyhow::ensure!(
                state.is_active(),
                "Session expired; run `session touch` and re-enter your password"
            );

            let password = secrets.password("FAIRFIELD_PASSWORD", "Password")?;
            ctx.keyring().unlock(&password)?;

            let mut template = EventTemplate::new(kind, content, tags);
            if let Some(ts) = created_at {
                template = template.at(ts);
            }
            let signed = ctx.keyring().sign(&template);
            ctx.shutdown();
            let signed = signed?;

            ctx.session().touch()?;
            println!("{}", serde_json::to_string(&signed)?);
        }
        Command::Verify { input } => {
            let json = if input == "-" {
                let mut buf = String::new();
                std::io::stdin()
                    .read_to_string(&mut buf)
                    .context("Failed to read event from stdin")?;
                buf
            } else {
                input
            };
            anyhow::ensure!(event::verify_json(json.trim()), "Event is not authentic");
            println!("valid");
        }
        Command::SessionStatus => {
            let state = ctx.session().check_timeout()?;
            let phase = match state.phase {
                SessionPhase::Active => "active",
                SessionPhase::WarningWindow => "expiring",
                SessionPhase::Expired => "expired",
            };
            println!("{} ({} remaining)", phase, format_remaining(state.remaining));
        }
        Command::SessionTouch => {
            let state = ctx.session().check_timeout()?;
            if !state.is_active() && ctx.keyring().has_identity()? {
                // An expired session only comes back after re-authentication
                let password = secrets.password("FAIRFIELD_PASSWORD", "Password")?;
                let unlocked = ctx.keyring().unlock(&password);
                ctx.shutdown();
                unlocked?;
            }
            ctx.session().extend()?;
            println!(
                "Session extended ({} remaining)",
                format_remaining(ctx.session().state().remaining)
            );
        }
        Command::Passwd => {
            let old = secrets.password("FAIRFIELD_PASSWORD", "Current password")?;
            let new = secrets.password("FAIRFIELD_NEW_PASSWORD", "New password")?;
            ctx.keyring().change_password(&old, &new)?;
            println!("Password changed");
        }
        Command::Forget => {
            ctx.logout()?;
            println!("Identity removed from {}", path.display());
        }
    }

    Ok(())
}

/// `-` means one line from the secret source; anything else is the value itself
fn resolve_secret(
    value: &str,
    prompt: &str,
    secrets: &mut dyn SecretSource,
) -> Result<Zeroizing<String>> {
    if value == "-" {
        secrets.read_secret(prompt)
    } else {
        Ok(Zeroizing::new(value.to_string()))
    }
}

fn ensure_replaceable(ctx: &IdentityContext, force: bool) -> Result<()> {
    if !force && ctx.keyring().has_identity()? {
        anyhow::bail!("An identity is already stored; pass --force to replace it");
    }
    Ok(())
}

fn store_new(
    ctx: &IdentityContext,
    identity: Identity,
    secrets: &mut dyn SecretSource,
) -> Result<fairfield_identity::PublicKey> {
    let password = secrets.password("FAIRFIELD_PASSWORD", "New password")?;
    let pk = ctx.keyring().store_identity(identity, &password)?;
    ctx.session().touch()?;
    ctx.shutdown();
    Ok(pk)
}

// ============================================================================
// Tests
// ============================================================================
