//! Generate an identity, seal it and sign a first note
//! Run with: cargo run --example new_identity

use fairfield_identity::event::{self, kind};
use fairfield_identity::{encrypt_private_key, generate_identity, EventTemplate};

fn main() {
    let identity = generate_identity().unwrap();
    println!("=== NEW IDENTITY ===\n");
    println!("SAVE THIS RECOVERY PHRASE:\n");
    println!("{}\n", identity.mnemonic().unwrap_or_default());
    println!("npub: {}", identity.public_key().to_npub());
    println!("hex:  {}\n", identity.public_key());

    let token = encrypt_private_key(identity.private_key(), "correct-horse").unwrap();
    println!("Vault token (password \"correct-horse\"):\n{}\n", token.to_token());

    let note = event::sign(
        &EventTemplate::new(kind::TEXT_NOTE, "hello", vec![]),
        identity.private_key(),
    );
    println!("{}", serde_json::to_string_pretty(&note).unwrap());
    println!("\nverifies: {}", note.verify());
}
