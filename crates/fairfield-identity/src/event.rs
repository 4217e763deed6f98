//! NIP-01 events: canonical id, BIP-340 signatures, verification
//!
//! The id is `sha256` of the compact JSON array
//! `[0, pubkey, created_at, kind, tags, content]`. The signature is a
//! Schnorr signature over the 32-byte id by the x-only `pubkey`.
//!
//! Verification runs continuously against untrusted relay input, so it
//! returns `bool` and never errors: anything malformed is simply not
//! authentic.

use crate::codec;
use crate::keys::{PrivateKey, PublicKey};
use secp256k1::{schnorr::Signature, Message, Secp256k1, XOnlyPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

/// Event kinds used by the client
pub mod kind {
    pub const METADATA: u16 = 0;
    pub const TEXT_NOTE: u16 = 1;
    pub const DELETION: u16 = 5;
    pub const REACTION: u16 = 7;
    pub const CHANNEL_MESSAGE: u16 = 42;
}

/// Ordered list of ordered string tuples
pub type Tags = Vec<Vec<String>>;

/// The six author-controlled fields of an event, before signing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTemplate {
    pub created_at: u64,
    pub kind: u16,
    pub tags: Tags,
    pub content: String,
}

impl EventTemplate {
    pub fn new(kind: u16, content: impl Into<String>, tags: Tags) -> Self {
        Self {
            created_at: now_seconds(),
            kind,
            tags,
            content: content.into(),
        }
    }

    /// Override the timestamp (backdating, tests, replay)
    pub fn at(mut self, created_at: u64) -> Self {
        self.created_at = created_at;
        self
    }
}

/// A signed NIP-01 event in wire form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedEvent {
    pub id: String,
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u16,
    pub tags: Tags,
    pub content: String,
    pub sig: String,
}

/// Canonical serialisation of the id preimage.
///
/// serde_json emits no whitespace and escapes exactly the characters NIP-01
/// requires, leaving other UTF-8 untouched.
pub fn canonical_json(
    pubkey_hex: &str,
    created_at: u64,
    kind: u16,
    tags: &Tags,
    content: &str,
) -> String {
    serde_json::json!([0, pubkey_hex, created_at, kind, tags, content]).to_string()
}

fn digest(pubkey_hex: &str, created_at: u64, kind: u16, tags: &Tags, content: &str) -> [u8; 32] {
    let serialized = canonical_json(pubkey_hex, created_at, kind, tags, content);
    Sha256::digest(serialized.as_bytes()).into()
}

/// Compute the event id of `template` as authored by `pubkey`
pub fn compute_id(template: &EventTemplate, pubkey: &PublicKey) -> [u8; 32] {
    digest(
        &pubkey.to_hex(),
        template.created_at,
        template.kind,
        &template.tags,
        &template.content,
    )
}

/// Sign a template.
///
/// All template fields are carried over unchanged; `id` and `sig` are
/// attached.
pub fn sign(template: &EventTemplate, private_key: &PrivateKey) -> SignedEvent {
    let secp = Secp256k1::signing_only();
    let mut keypair = private_key.keypair(&secp);
    let (xonly, _parity) = XOnlyPublicKey::from_keypair(&keypair);
    let pubkey_hex = codec::hex_encode(&xonly.serialize());

    let id = digest(
        &pubkey_hex,
        template.created_at,
        template.kind,
        &template.tags,
        &template.content,
    );
    let sig = secp.sign_schnorr(&Message::from_digest(id), &keypair);
    keypair.non_secure_erase();

    SignedEvent {
        id: codec::hex_encode(&id),
        pubkey: pubkey_hex,
        created_at: template.created_at,
        kind: template.kind,
        tags: template.tags.clone(),
        content: template.content.clone(),
        sig: codec::hex_encode(&sig.serialize()),
    }
}

/// Verify an event.
///
/// Both checks must pass: the stored id equals the id recomputed from the
/// other fields, and the signature over the stored id verifies against
/// `pubkey`.
pub fn verify(event: &SignedEvent) -> bool {
    let recomputed = digest(
        &event.pubkey,
        event.created_at,
        event.kind,
        &event.tags,
        &event.content,
    );
    if codec::hex_encode(&recomputed) != event.id {
        return false;
    }

    let Some(pubkey) = codec::parse_hex32(&event.pubkey)
        .and_then(|bytes| XOnlyPublicKey::from_slice(&bytes).ok())
    else {
        return false;
    };
    let Some(sig) =
        codec::parse_hex64(&event.sig).and_then(|bytes| Signature::from_slice(&bytes).ok())
    else {
        return false;
    };

    Secp256k1::verification_only()
        .verify_schnorr(&sig, &Message::from_digest(recomputed), &pubkey)
        .is_ok()
}

/// Parse untrusted JSON and verify it as an event.
///
/// Structurally invalid input (missing fields, wrong types) is `false`.
pub fn verify_json(json: &str) -> bool {
    match serde_json::from_str::<SignedEvent>(json) {
        Ok(event) => verify(&event),
        Err(e) => {
            log::debug!("Rejected malformed event: {}", e);
            false
        }
    }
}

impl SignedEvent {
    pub fn verify(&self) -> bool {
        verify(self)
    }

    /// The author as a typed key, if `pubkey` is a valid point
    pub fn author(&self) -> Option<PublicKey> {
        codec::parse_hex32(&self.pubkey).and_then(|bytes| PublicKey::from_bytes(&bytes).ok())
    }

    /// NIP-19 `note1…` for the event id
    pub fn note_id(&self) -> Option<String> {
        codec::parse_hex32(&self.id).map(|bytes| codec::encode_note(&bytes))
    }

    /// Values (second element) of all tags named `name`
    pub fn tag_values(&self, name: &str) -> Vec<&str> {
        self.tags
            .iter()
            .filter(|tag| tag.first().map(String::as_str) == Some(name))
            .filter_map(|tag| tag.get(1))
            .map(String::as_str)
            .filter(|v| !v.is_empty())
            .collect()
    }

    /// Value of the first tag named `name`
    pub fn first_tag(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| tag.first().map(String::as_str) == Some(name))
            .and_then(|tag| tag.get(1))
            .map(String::as_str)
    }

    /// Whether the event references `event_id` in an `e` tag
    pub fn references(&self, event_id: &str) -> bool {
        self.tag_values("e").contains(&event_id)
    }

    /// Whether the event mentions `pubkey` in a `p` tag
    pub fn mentions(&self, pubkey: &str) -> bool {
        self.tag_values("p").contains(&pubkey)
    }

    fn marked_e_tag(&self, marker: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| {
                tag.first().map(String::as_str) == Some("e")
                    && tag.get(3).map(String::as_str) == Some(marker)
            })
            .and_then(|tag| tag.get(1))
            .map(String::as_str)
    }

    pub fn is_reply(&self) -> bool {
        self.marked_e_tag("reply").is_some()
    }

    pub fn is_root_post(&self) -> bool {
        !self.is_reply()
    }

    /// Root of the thread (`e` tag marked `root`)
    pub fn root_event_id(&self) -> Option<&str> {
        self.marked_e_tag("root")
    }

    /// Direct reply target (`e` tag marked `reply`)
    pub fn reply_target_id(&self) -> Option<&str> {
        self.marked_e_tag("reply")
    }
}

/// Current Unix time in seconds
pub fn now_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn tag(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

/// Kind 1 text note, optionally replying to an event
pub fn text_note(content: &str, reply_to: Option<&str>) -> EventTemplate {
    let tags = reply_to
        .map(|id| vec![tag(&["e", id, "", "reply"])])
        .unwrap_or_default();
    EventTemplate::new(kind::TEXT_NOTE, content, tags)
}

/// Kind 0 profile metadata; `profile` is serialised as the content
pub fn metadata<T: Serialize>(profile: &T) -> Result<EventTemplate, serde_json::Error> {
    let content = serde_json::to_string(profile)?;
    Ok(EventTemplate::new(kind::METADATA, content, Vec::new()))
}

/// Kind 5 deletion request for `event_ids`
pub fn deletion(event_ids: &[&str], reason: Option<&str>) -> EventTemplate {
    let tags = event_ids.iter().map(|id| tag(&["e", *id])).collect();
    EventTemplate::new(kind::DELETION, reason.unwrap_or_default(), tags)
}

/// Kind 7 reaction to an event by `author`
pub fn reaction(event_id: &str, author: &str, content: &str) -> EventTemplate {
    EventTemplate::new(
        kind::REACTION,
        content,
        vec![tag(&["e", event_id]), tag(&["p", author])],
    )
}

/// Kind 42 message in the channel created by `channel_id`
pub fn channel_message(content: &str, channel_id: &str) -> EventTemplate {
    EventTemplate::new(
        kind::CHANNEL_MESSAGE,
        content,
        vec![tag(&["e", channel_id, "", "root"])],
    )
}
