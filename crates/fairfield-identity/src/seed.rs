//! BIP-39 mnemonic management
//!
//! Phrases are 12 English words (128 bits of entropy). The word count, the
//! wordlist and the empty passphrase are part of the identity compatibility
//! contract: changing any of them silently yields a different identity from
//! the same phrase.

use bip39::{Language, Mnemonic};
use thiserror::Error;
use zeroize::Zeroizing;

/// Number of words in a generated phrase
pub const MNEMONIC_WORDS: usize = 12;

/// BIP-39 passphrase used for identity derivation (NIP-06: empty)
pub const MNEMONIC_PASSPHRASE: &str = "";

#[derive(Error, Debug)]
pub enum SeedError {
    #[error("Invalid mnemonic: {0}")]
    InvalidMnemonic(String),
    #[error("Mnemonic generation failed: {0}")]
    GenerationFailed(String),
}

/// Generate a new 12-word BIP-39 mnemonic
pub fn generate_mnemonic() -> Result<Mnemonic, SeedError> {
    Mnemonic::generate_in(Language::English, MNEMONIC_WORDS)
        .map_err(|e| SeedError::GenerationFailed(e.to_string()))
}

/// Parse and validate a mnemonic (wordlist membership and checksum).
///
/// Surrounding whitespace is ignored.
pub fn parse_mnemonic(words: &str) -> Result<Mnemonic, SeedError> {
    Mnemonic::parse_in(Language::English, words.trim())
        .map_err(|e| SeedError::InvalidMnemonic(e.to_string()))
}

/// Whether `words` is a valid English BIP-39 phrase
pub fn validate_mnemonic(words: &str) -> bool {
    parse_mnemonic(words).is_ok()
}

/// Derive the 64-byte BIP-39 seed (with the fixed empty passphrase)
pub fn derive_seed(mnemonic: &Mnemonic) -> Zeroizing<[u8; 64]> {
    Zeroizing::new(mnemonic.to_seed(MNEMONIC_PASSPHRASE))
}

/// Render a mnemonic as a space-separated phrase
pub fn phrase(mnemonic: &Mnemonic) -> Zeroizing<String> {
    Zeroizing::new(mnemonic.to_string())
}
