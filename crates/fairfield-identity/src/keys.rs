//! Identity derivation
//!
//! A BIP-39 phrase is stretched into a seed and walked down the NIP-06 path
//! to a secp256k1 secret. The x-only public key is always computed from the
//! secret; the two are never set independently.

use crate::codec::{self, CodecError};
use crate::seed::{self, SeedError};
use bitcoin::bip32::{DerivationPath, Xpriv};
use bitcoin::Network;
use nostr_sdk::Keys as NostrKeys;
use secp256k1::{Keypair, Secp256k1, SecretKey, XOnlyPublicKey};
use std::fmt;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// NIP-06 derivation path for Nostr keys
pub const NIP06_PATH: &str = "m/44'/1237'/0'/0/0";

#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Invalid mnemonic phrase: {0}")]
    InvalidMnemonic(String),
    #[error("Invalid private key: must be 64 hex characters or nsec format ({0})")]
    InvalidSecretFormat(String),
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),
    #[error("Derivation failed: {0}")]
    Derivation(String),
}

impl From<SeedError> for KeyError {
    fn from(e: SeedError) -> Self {
        match e {
            SeedError::InvalidMnemonic(msg) => KeyError::InvalidMnemonic(msg),
            SeedError::GenerationFailed(msg) => KeyError::Derivation(msg),
        }
    }
}

/// A validated secp256k1 secret scalar.
///
/// Wiped on drop. Not `Clone`: duplicating a secret is an explicit
/// [`PrivateKey::duplicate`] call.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey([u8; 32]);

impl PrivateKey {
    /// Validate 32 bytes as a secret scalar (non-zero, below the curve order).
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, KeyError> {
        let mut sk = SecretKey::from_slice(bytes)
            .map_err(|e| KeyError::InvalidSecretFormat(e.to_string()))?;
        sk.non_secure_erase();
        Ok(Self(*bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex rendering, wiped when dropped
    pub fn to_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(codec::hex_encode(&self.0))
    }

    /// Explicit copy of the secret for a second owner
    pub fn duplicate(&self) -> Self {
        Self(self.0)
    }

    /// Build the secp256k1 keypair for a signing operation.
    ///
    /// The caller must `non_secure_erase` the keypair when done.
    pub(crate) fn keypair<C: secp256k1::Signing>(&self, secp: &Secp256k1<C>) -> Keypair {
        // Validity was checked at construction
        match Keypair::from_seckey_slice(secp, &self.0) {
            Ok(kp) => kp,
            Err(_) => unreachable!("PrivateKey holds a validated scalar"),
        }
    }

    /// Compute the x-only public key
    pub fn public_key(&self) -> PublicKey {
        let secp = Secp256k1::signing_only();
        let mut kp = self.keypair(&secp);
        let (xonly, _parity) = XOnlyPublicKey::from_keypair(&kp);
        kp.non_secure_erase();
        PublicKey(xonly.serialize())
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(<redacted>)")
    }
}

/// A 32-byte x-only public key
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    /// Validate 32 bytes as an x-only curve point
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, KeyError> {
        XOnlyPublicKey::from_slice(bytes).map_err(|e| KeyError::InvalidPublicKey(e.to_string()))?;
        Ok(Self(*bytes))
    }

    /// Parse either `npub1…` or 64 hex characters
    pub fn parse(text: &str) -> Result<Self, KeyError> {
        let trimmed = text.trim();
        let bytes = if trimmed.starts_with("npub1") {
            codec::decode_npub(trimmed)
        } else {
            codec::decode_hex32(trimmed)
        }
        .map_err(|e| KeyError::InvalidPublicKey(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        codec::hex_encode(&self.0)
    }

    /// NIP-19 `npub1…`
    pub fn to_npub(&self) -> String {
        codec::encode_npub(&self.0)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

/// A signing identity: private key, derived public key and, for freshly
/// generated identities only, the recovery phrase.
pub struct Identity {
    mnemonic: Option<Zeroizing<String>>,
    private_key: PrivateKey,
    public_key: PublicKey,
}

impl Identity {
    /// Build an identity from a private key; the public key is derived.
    pub fn from_private_key(private_key: PrivateKey) -> Self {
        let public_key = private_key.public_key();
        Self {
            mnemonic: None,
            private_key,
            public_key,
        }
    }

    /// The recovery phrase, present only right after [`generate_identity`]
    pub fn mnemonic(&self) -> Option<&str> {
        self.mnemonic.as_deref().map(String::as_str)
    }

    /// Drop the recovery phrase from memory once the user has backed it up
    pub fn forget_mnemonic(&mut self) {
        self.mnemonic = None;
    }

    pub fn private_key(&self) -> &PrivateKey {
        &self.private_key
    }

    pub fn public_key(&self) -> PublicKey {
        self.public_key
    }

    /// Convert to `nostr-sdk` keys for the transport layer
    pub fn to_nostr_keys(&self) -> Result<NostrKeys, KeyError> {
        let secret_key = nostr_sdk::SecretKey::from_slice(self.private_key.as_bytes())
            .map_err(|e| KeyError::Derivation(e.to_string()))?;
        Ok(NostrKeys::new(secret_key))
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("public_key", &self.public_key)
            .field("has_mnemonic", &self.mnemonic.is_some())
            .finish_non_exhaustive()
    }
}

/// Derive the private key at [`NIP06_PATH`] from a 64-byte seed
pub fn derive_private_key(seed: &[u8; 64]) -> Result<PrivateKey, KeyError> {
    let master = Xpriv::new_master(Network::Bitcoin, seed)
        .map_err(|e| KeyError::Derivation(e.to_string()))?;

    let path: DerivationPath = NIP06_PATH
        .parse()
        .map_err(|e: bitcoin::bip32::Error| KeyError::Derivation(e.to_string()))?;

    let derived = master
        .derive_priv(&bitcoin::secp256k1::Secp256k1::new(), &path)
        .map_err(|e| KeyError::Derivation(e.to_string()))?;

    let secret = Zeroizing::new(derived.private_key.secret_bytes());
    PrivateKey::from_bytes(&secret).map_err(|e| KeyError::Derivation(e.to_string()))
}

/// Create a fresh identity: new 12-word phrase, NIP-06 keypair
pub fn generate_identity() -> Result<Identity, KeyError> {
    let mnemonic = seed::generate_mnemonic()?;
    let seed = seed::derive_seed(&mnemonic);
    let private_key = derive_private_key(&seed)?;

    let mut identity = Identity::from_private_key(private_key);
    identity.mnemonic = Some(seed::phrase(&mnemonic));

    log::info!("Generated new identity {}", identity.public_key.to_npub());
    Ok(identity)
}

/// Restore the identity encoded by a recovery phrase.
///
/// The phrase is not echoed back in the returned identity.
pub fn restore_from_mnemonic(phrase: &str) -> Result<Identity, KeyError> {
    let mnemonic = seed::parse_mnemonic(phrase)?;
    let seed = seed::derive_seed(&mnemonic);
    let private_key = derive_private_key(&seed)?;
    Ok(Identity::from_private_key(private_key))
}

/// Restore an identity from `nsec1…` or a 64-character hex secret
pub fn restore_from_secret(text: &str) -> Result<Identity, KeyError> {
    let trimmed = text.trim();

    let bytes: Zeroizing<[u8; 32]> = if trimmed.starts_with("nsec1") {
        codec::decode_nsec(trimmed).map_err(invalid_secret)?
    } else {
        Zeroizing::new(codec::decode_hex32(trimmed).map_err(invalid_secret)?)
    };

    let private_key = PrivateKey::from_bytes(&bytes)?;
    Ok(Identity::from_private_key(private_key))
}

fn invalid_secret(e: CodecError) -> KeyError {
    KeyError::InvalidSecretFormat(e.to_string())
}

/// Encode a public key for display (`npub1…`)
pub fn encode_public(public_key: &PublicKey) -> String {
    public_key.to_npub()
}

/// Encode a private key for backup (`nsec1…`)
pub fn encode_private(private_key: &PrivateKey) -> Zeroizing<String> {
    Zeroizing::new(codec::encode_nsec(private_key.as_bytes()))
}

/// Decode a displayed public key (`npub1…` or hex)
pub fn decode_public(text: &str) -> Result<PublicKey, KeyError> {
    PublicKey::parse(text)
}
