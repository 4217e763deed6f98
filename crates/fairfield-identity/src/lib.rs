//! Fairfield Identity
//!
//! Identity and credential lifecycle for the Fairfield Nostr client.
//!
//! # Key Derivation
//!
//! From a 12-word BIP-39 phrase (English, empty passphrase), the Nostr key
//! is derived via NIP-06: m/44'/1237'/0'/0/0. Existing keys can be imported
//! as `nsec` or 64-character hex.
//!
//! # Encrypted Storage
//!
//! Private keys are encrypted at rest using PBKDF2-SHA256 (600 000 rounds)
//! + AES-256-GCM, stored as base64 `salt || iv || ciphertext`.
//!
//! # Sessions
//!
//! An inactivity guard locks the keyring after 30 minutes without user
//! activity, with a warning window in the last two minutes.

pub mod codec;
pub mod context;
pub mod event;
pub mod keyring;
pub mod keys;
pub mod secret;
pub mod seed;
pub mod session;
pub mod store;
pub mod vault;

pub use context::{IdentityContext, IdentitySettings};
pub use event::{EventTemplate, SignedEvent};
pub use keyring::{Keyring, KeyringError};
pub use keys::*;
pub use seed::{generate_mnemonic, parse_mnemonic, validate_mnemonic, SeedError};
pub use session::{
    format_remaining, ActivityKind, ActivitySender, SessionError, SessionGuard, SessionHandle,
    SessionPhase, SessionPolicy, SessionState,
};
pub use store::{FileStore, KeyValueStore, MemoryStore, StoreError};
pub use vault::{decrypt_private_key, encrypt_private_key, EncryptedKeyBlob, KdfParams, VaultError};
