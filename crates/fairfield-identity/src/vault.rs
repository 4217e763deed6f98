//! Private key encryption at rest
//!
//! PBKDF2-HMAC-SHA256 stretches the password into an AES-256-GCM key; the
//! private key is sealed under a fresh salt and nonce and persisted as one
//! base64 token.
//!
//! # Token format
//!
//! `base64( salt (16) || iv (12) || ciphertext + tag )`
//!
//! The iteration count is not stored in the token: it is part of the
//! storage compatibility contract, like the layout itself.
//!
//! # Security Notes
//!
//! - 600 000 PBKDF2 rounds (OWASP 2023 guidance for PBKDF2-SHA256)
//! - Salt and nonce come from the OS CSPRNG on every encryption
//! - A failed tag check reports one generic error, whatever the cause
//! - The derived key and the decrypted plaintext are wiped on every path

use crate::codec;
use crate::keys::{KeyError, PrivateKey};
use crate::secret::SecretBuffer;
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// PBKDF2 rounds used when no explicit parameters are given
pub const PBKDF2_ITERATIONS: u32 = 600_000;

/// Salt length for PBKDF2
pub const SALT_LEN: usize = 16;

/// Nonce length for AES-256-GCM
pub const NONCE_LEN: usize = 12;

/// GCM authentication tag length
pub const TAG_LEN: usize = 16;

/// Symmetric key length (AES-256)
pub const KEY_LEN: usize = 32;

#[derive(Error, Debug)]
pub enum VaultError {
    /// Wrong password or tampered token
    #[error("Invalid password or corrupted data")]
    Authentication,
    #[error("Invalid token format: {0}")]
    InvalidFormat(String),
    #[error("Encryption failed: {0}")]
    Encryption(String),
}

/// Key-derivation parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    pub iterations: u32,
}

impl KdfParams {
    pub const fn new(iterations: u32) -> Self {
        Self { iterations }
    }

    /// Whether the iteration count meets the at-rest recommendation
    pub fn is_recommended(&self) -> bool {
        self.iterations >= PBKDF2_ITERATIONS
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::new(PBKDF2_ITERATIONS)
    }
}

/// AES-256 key derived from a password. Wiped on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_LEN]);

impl SymmetricKey {
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

/// Stretch a password into a symmetric key
pub fn derive_key(password: &str, salt: &[u8; SALT_LEN], params: &KdfParams) -> SymmetricKey {
    let mut key = SymmetricKey([0u8; KEY_LEN]);
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, params.iterations, &mut key.0);
    key
}

/// Encrypted private key: `salt || iv || ciphertext`
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptedKeyBlob {
    salt: [u8; SALT_LEN],
    iv: [u8; NONCE_LEN],
    /// Ciphertext + authentication tag
    ciphertext: Vec<u8>,
}

impl EncryptedKeyBlob {
    pub fn salt(&self) -> &[u8; SALT_LEN] {
        &self.salt
    }

    pub fn iv(&self) -> &[u8; NONCE_LEN] {
        &self.iv
    }

    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    /// Serialize to bytes: salt || iv || ciphertext
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(SALT_LEN + NONCE_LEN + self.ciphertext.len());
        bytes.extend_from_slice(&self.salt);
        bytes.extend_from_slice(&self.iv);
        bytes.extend_from_slice(&self.ciphertext);
        bytes
    }

    /// Deserialize from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, VaultError> {
        // At least one byte of plaintext plus the tag
        if bytes.len() < SALT_LEN + NONCE_LEN + TAG_LEN + 1 {
            return Err(VaultError::InvalidFormat(format!(
                "token too short ({} bytes)",
                bytes.len()
            )));
        }

        let mut salt = [0u8; SALT_LEN];
        let mut iv = [0u8; NONCE_LEN];
        salt.copy_from_slice(&bytes[..SALT_LEN]);
        iv.copy_from_slice(&bytes[SALT_LEN..SALT_LEN + NONCE_LEN]);

        Ok(Self {
            salt,
            iv,
            ciphertext: bytes[SALT_LEN + NONCE_LEN..].to_vec(),
        })
    }

    /// The persisted base64 token
    pub fn to_token(&self) -> String {
        codec::encode_token(&self.to_bytes())
    }

    pub fn from_token(token: &str) -> Result<Self, VaultError> {
        let bytes =
            codec::decode_token(token).map_err(|e| VaultError::InvalidFormat(e.to_string()))?;
        Self::from_bytes(&bytes)
    }
}

impl std::fmt::Debug for EncryptedKeyBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedKeyBlob")
            .field("ciphertext_len", &self.ciphertext.len())
            .finish_non_exhaustive()
    }
}

/// Encrypt a private key with the default parameters
pub fn encrypt_private_key(
    private_key: &PrivateKey,
    password: &str,
) -> Result<EncryptedKeyBlob, VaultError> {
    encrypt_private_key_with(private_key, password, &KdfParams::default())
}

/// Encrypt a private key.
///
/// Each call draws a new salt and nonce, so two encryptions of the same key
/// under the same password never share either.
pub fn encrypt_private_key_with(
    private_key: &PrivateKey,
    password: &str,
    params: &KdfParams,
) -> Result<EncryptedKeyBlob, VaultError> {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);

    let nonce_arr = Aes256Gcm::generate_nonce(&mut OsRng);
    let mut iv = [0u8; NONCE_LEN];
    iv.copy_from_slice(&nonce_arr);

    let key = derive_key(password, &salt, params);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), private_key.as_bytes().as_slice())
        .map_err(|e| VaultError::Encryption(e.to_string()))?;

    Ok(EncryptedKeyBlob {
        salt,
        iv,
        ciphertext,
    })
}

/// Decrypt a persisted token with the default parameters
pub fn decrypt_private_key(token: &str, password: &str) -> Result<PrivateKey, VaultError> {
    decrypt_private_key_with(token, password, &KdfParams::default())
}

/// Decrypt a persisted token
pub fn decrypt_private_key_with(
    token: &str,
    password: &str,
    params: &KdfParams,
) -> Result<PrivateKey, VaultError> {
    let blob = EncryptedKeyBlob::from_token(token)?;
    decrypt_blob(&blob, password, params)
}

/// Decrypt a parsed blob.
///
/// The plaintext is either the 32 raw key bytes or, for tokens written by
/// the earlier web client, the key as 64 hex characters.
pub fn decrypt_blob(
    blob: &EncryptedKeyBlob,
    password: &str,
    params: &KdfParams,
) -> Result<PrivateKey, VaultError> {
    let key = derive_key(password, &blob.salt, params);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));

    let plaintext = cipher
        .decrypt(Nonce::from_slice(&blob.iv), blob.ciphertext.as_slice())
        .map(|mut p| {
            let buffer = SecretBuffer::from_slice(&p);
            p.zeroize();
            buffer
        })
        .map_err(|_| VaultError::Authentication)?;

    let secret = plaintext_to_secret(&plaintext)?;
    PrivateKey::from_bytes(&secret).map_err(|e: KeyError| VaultError::InvalidFormat(e.to_string()))
}

fn plaintext_to_secret(plaintext: &[u8]) -> Result<Zeroizing<[u8; 32]>, VaultError> {
    match plaintext.len() {
        32 => {
            let mut secret = Zeroizing::new([0u8; 32]);
            secret.copy_from_slice(plaintext);
            Ok(secret)
        }
        64 => {
            let text = std::str::from_utf8(plaintext)
                .map_err(|_| VaultError::InvalidFormat("plaintext is not a key".into()))?;
            codec::decode_hex32(text)
                .map(Zeroizing::new)
                .map_err(|e| VaultError::InvalidFormat(e.to_string()))
        }
        n => Err(VaultError::InvalidFormat(format!(
            "unexpected plaintext length {n}"
        ))),
    }
}
