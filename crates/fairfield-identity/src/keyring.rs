//! Unlocked-key custody
//!
//! At most one identity is unlocked at a time. It lives behind a mutex, so
//! signing and other key access is serialised, and locking drops it (the
//! private key wipes itself on drop).
//!
//! The persisted record under [`KEY_TOKEN_KEY`] is a small JSON object:
//!
//! ```json
//! { "publicKey": "<hex>", "encryptedPrivateKey": "<vault token>", "mnemonicBackedUp": false }
//! ```
//!
//! Only the vault token carries secret material.

use crate::event::{self, EventTemplate, SignedEvent};
use crate::keys::{Identity, KeyError, PublicKey};
use crate::store::{KeyValueStore, StoreError, KEY_TOKEN_KEY};
use crate::vault::{self, KdfParams, VaultError};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KeyringError {
    #[error("Keyring is locked")]
    Locked,

    #[error("No identity stored")]
    NoIdentity,

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Key(#[from] KeyError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredIdentity {
    public_key: String,
    encrypted_private_key: String,
    #[serde(default)]
    mnemonic_backed_up: bool,
}

/// Custody of the user's signing key
pub struct Keyring {
    store: Arc<dyn KeyValueStore>,
    kdf: KdfParams,
    unlocked: Mutex<Option<Identity>>,
}

impl Keyring {
    pub fn new(store: Arc<dyn KeyValueStore>, kdf: KdfParams) -> Self {
        if !kdf.is_recommended() {
            log::warn!(
                "Key vault configured with {} PBKDF2 rounds (below the recommended minimum)",
                kdf.iterations
            );
        }
        Self {
            store,
            kdf,
            unlocked: Mutex::new(None),
        }
    }

    /// Encrypt and persist `identity`, replacing any stored one, and keep it
    /// unlocked.
    pub fn store_identity(
        &self,
        identity: Identity,
        password: &str,
    ) -> Result<PublicKey, KeyringError> {
        let blob = vault::encrypt_private_key_with(identity.private_key(), password, &self.kdf)?;
        let public_key = identity.public_key();

        let record = StoredIdentity {
            public_key: public_key.to_hex(),
            encrypted_private_key: blob.to_token(),
            // Restored identities have no fresh phrase to back up
            mnemonic_backed_up: identity.mnemonic().is_none(),
        };
        self.write_record(&record)?;

        *self.lock_slot() = Some(identity);
        log::info!("Stored identity {}", public_key.to_npub());
        Ok(public_key)
    }

    /// Decrypt the stored key with `password` and keep it unlocked
    pub fn unlock(&self, password: &str) -> Result<PublicKey, KeyringError> {
        let record = self.read_record()?.ok_or(KeyringError::NoIdentity)?;
        let private_key =
            vault::decrypt_private_key_with(&record.encrypted_private_key, password, &self.kdf)?;
        let identity = Identity::from_private_key(private_key);
        let public_key = identity.public_key();

        if public_key.to_hex() != record.public_key.to_ascii_lowercase() {
            log::warn!("Stored public key does not match the decrypted private key");
            return Err(VaultError::InvalidFormat("public key mismatch".into()).into());
        }

        *self.lock_slot() = Some(identity);
        log::debug!("Keyring unlocked");
        Ok(public_key)
    }

    /// Drop the unlocked identity. Idempotent.
    pub fn lock(&self) {
        if self.lock_slot().take().is_some() {
            log::debug!("Keyring locked");
        }
    }

    pub fn is_unlocked(&self) -> bool {
        self.lock_slot().is_some()
    }

    /// Whether an encrypted identity is persisted
    pub fn has_identity(&self) -> Result<bool, KeyringError> {
        Ok(self.read_record()?.is_some())
    }

    /// Public key of the unlocked identity, or of the stored one while locked
    pub fn public_key(&self) -> Result<PublicKey, KeyringError> {
        if let Some(identity) = self.lock_slot().as_ref() {
            return Ok(identity.public_key());
        }
        let record = self.read_record()?.ok_or(KeyringError::NoIdentity)?;
        Ok(PublicKey::parse(&record.public_key)?)
    }

    /// Sign with the unlocked identity
    pub fn sign(&self, template: &EventTemplate) -> Result<SignedEvent, KeyringError> {
        self.with_identity(|identity| event::sign(template, identity.private_key()))
    }

    /// Run `f` with the unlocked identity
    pub fn with_identity<R>(&self, f: impl FnOnce(&Identity) -> R) -> Result<R, KeyringError> {
        let slot = self.lock_slot();
        let identity = slot.as_ref().ok_or(KeyringError::Locked)?;
        Ok(f(identity))
    }

    /// Re-encrypt the stored key under a new password.
    ///
    /// Works whether or not the keyring is unlocked; a wrong `old` password
    /// leaves the stored record untouched.
    pub fn change_password(&self, old: &str, new: &str) -> Result<(), KeyringError> {
        let mut record = self.read_record()?.ok_or(KeyringError::NoIdentity)?;
        let private_key =
            vault::decrypt_private_key_with(&record.encrypted_private_key, old, &self.kdf)?;
        let blob = vault::encrypt_private_key_with(&private_key, new, &self.kdf)?;
        record.encrypted_private_key = blob.to_token();
        self.write_record(&record)?;
        log::info!("Vault password changed");
        Ok(())
    }

    /// The user has written down the recovery phrase: drop it from memory
    /// and remember that the backup happened.
    pub fn confirm_mnemonic_backup(&self) -> Result<(), KeyringError> {
        let mut record = self.read_record()?.ok_or(KeyringError::NoIdentity)?;
        record.mnemonic_backed_up = true;
        self.write_record(&record)?;
        if let Some(identity) = self.lock_slot().as_mut() {
            identity.forget_mnemonic();
        }
        Ok(())
    }

    pub fn mnemonic_backed_up(&self) -> Result<bool, KeyringError> {
        Ok(self
            .read_record()?
            .map(|r| r.mnemonic_backed_up)
            .unwrap_or(false))
    }

    /// Remove the stored identity and lock
    pub fn forget(&self) -> Result<(), KeyringError> {
        self.lock();
        self.store.remove(KEY_TOKEN_KEY)?;
        log::info!("Stored identity removed");
        Ok(())
    }

    fn read_record(&self) -> Result<Option<StoredIdentity>, KeyringError> {
        match self.store.get(KEY_TOKEN_KEY)? {
            None => Ok(None),
            Some(raw) => {
                let record = serde_json::from_str(&raw).map_err(StoreError::from)?;
                Ok(Some(record))
            }
        }
    }

    fn write_record(&self, record: &StoredIdentity) -> Result<(), KeyringError> {
        let raw = serde_json::to_string(record).map_err(StoreError::from)?;
        self.store.set(KEY_TOKEN_KEY, &raw)?;
        Ok(())
    }

    fn lock_slot(&self) -> MutexGuard<'_, Option<Identity>> {
        self.unlocked.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
