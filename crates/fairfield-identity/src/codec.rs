//! Text encodings for keys, event ids and vault tokens
//!
//! - Hex: lowercase on output, either case accepted on input
//! - NIP-19 bech32: `npub`, `nsec`, `note` (32-byte payloads only)
//! - Base64 (standard alphabet, padded) for vault tokens

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bitcoin::bech32::{self, Bech32, Hrp};
use thiserror::Error;
use zeroize::Zeroizing;

/// NIP-19 prefix for public keys
pub const NPUB_PREFIX: &str = "npub";

/// NIP-19 prefix for private keys
pub const NSEC_PREFIX: &str = "nsec";

/// NIP-19 prefix for event ids
pub const NOTE_PREFIX: &str = "note";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Invalid hex: {0}")]
    InvalidHex(String),
    #[error("Invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("Invalid bech32: {0}")]
    InvalidBech32(String),
    #[error("Wrong prefix: expected {expected}, got {actual}")]
    WrongPrefix { expected: &'static str, actual: String },
    #[error("Invalid base64: {0}")]
    InvalidBase64(String),
}

/// Encode bytes as lowercase hex
pub fn hex_encode(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// Decode exactly 64 hex characters into 32 bytes.
pub fn decode_hex32(text: &str) -> Result<[u8; 32], CodecError> {
    if text.len() != 64 {
        return Err(CodecError::InvalidLength {
            expected: 32,
            actual: text.len() / 2,
        });
    }
    let mut out = [0u8; 32];
    hex::decode_to_slice(text, &mut out).map_err(|e| CodecError::InvalidHex(e.to_string()))?;
    Ok(out)
}

/// Decode exactly 64 hex characters into a fixed-size array, returning `None`
/// instead of an error. Used on untrusted input where the reason is irrelevant.
pub fn parse_hex32(text: &str) -> Option<[u8; 32]> {
    decode_hex32(text).ok()
}

/// Decode exactly 128 hex characters (a Schnorr signature).
pub fn parse_hex64(text: &str) -> Option<[u8; 64]> {
    if text.len() != 128 {
        return None;
    }
    let mut out = [0u8; 64];
    hex::decode_to_slice(text, &mut out).ok()?;
    Some(out)
}

fn bech32_encode(prefix: &'static str, data: &[u8; 32]) -> String {
    let hrp = Hrp::parse_unchecked(prefix);
    // 32 bytes under a 4-character prefix is far below the bech32 length limit
    bech32::encode::<Bech32>(hrp, data).unwrap_or_default()
}

fn bech32_decode(prefix: &'static str, text: &str) -> Result<Zeroizing<Vec<u8>>, CodecError> {
    let (hrp, data) =
        bech32::decode(text).map_err(|e| CodecError::InvalidBech32(e.to_string()))?;
    let data = Zeroizing::new(data);

    if hrp != Hrp::parse_unchecked(prefix) {
        return Err(CodecError::WrongPrefix {
            expected: prefix,
            actual: hrp.to_string(),
        });
    }
    if data.len() != 32 {
        return Err(CodecError::InvalidLength {
            expected: 32,
            actual: data.len(),
        });
    }
    Ok(data)
}

fn to_array(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(data);
    out
}

/// Encode a 32-byte x-only public key as `npub1…`
pub fn encode_npub(public_key: &[u8; 32]) -> String {
    bech32_encode(NPUB_PREFIX, public_key)
}

/// Decode `npub1…` into the 32-byte x-only public key
pub fn decode_npub(text: &str) -> Result<[u8; 32], CodecError> {
    bech32_decode(NPUB_PREFIX, text).map(|d| to_array(&d))
}

/// Encode a 32-byte secret as `nsec1…`
///
/// The returned string is secret material; callers should keep it in a
/// `Zeroizing<String>` when it is not immediately displayed.
pub fn encode_nsec(secret: &[u8; 32]) -> String {
    bech32_encode(NSEC_PREFIX, secret)
}

/// Decode `nsec1…` into the 32-byte secret
pub fn decode_nsec(text: &str) -> Result<Zeroizing<[u8; 32]>, CodecError> {
    bech32_decode(NSEC_PREFIX, text).map(|d| Zeroizing::new(to_array(&d)))
}

/// Encode a 32-byte event id as `note1…`
pub fn encode_note(event_id: &[u8; 32]) -> String {
    bech32_encode(NOTE_PREFIX, event_id)
}

/// Decode `note1…` into the 32-byte event id
pub fn decode_note(text: &str) -> Result<[u8; 32], CodecError> {
    bech32_decode(NOTE_PREFIX, text).map(|d| to_array(&d))
}

/// Encode bytes as a base64 token
pub fn encode_token(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode a base64 token
pub fn decode_token(token: &str) -> Result<Vec<u8>, CodecError> {
    STANDARD
        .decode(token.trim())
        .map_err(|e| CodecError::InvalidBase64(e.to_string()))
}
