//! End-to-end test of the identity lifecycle.
//!
//! Exercises, against the public API only:
//!
//! 1. Generate → seal → unseal → sign → verify
//! 2. Restore from phrase and from nsec/hex yields the same key
//! 3. Persisted keyring across a reopened file store
//! 4. Session expiry locking the keyring
//!
//! Run with: cargo test --test identity_lifecycle

use fairfield_identity::event::{self, kind};
use fairfield_identity::session::{ManualClock, SESSION_TIMEOUT};
use fairfield_identity::store::{KEY_TOKEN_KEY, LAST_ACTIVITY_KEY};
use fairfield_identity::*;
use std::sync::Arc;
use std::time::Duration;

const NIP06_PHRASE: &str =
    "leader monkey parrot ring guide accident before fence cannon height naive bean";
const NIP06_NSEC: &str = "nsec10allq0gjx7fddtzef0ax00mdps9t2kmtrldkyjfs8l5xruwvh2dq0lhhkp";
const NIP06_PRIVKEY: &str = "7f7ff03d123792d6ac594bfa67bf6d0c0ab55b6b1fdb6249303fe861f1ccba9a";
const NIP06_NPUB: &str = "npub1zutzeysacnf9rru6zqwmxd54mud0k44tst6l70ja5mhv8jjumytsd2x7nu";

#[test]
fn test_generate_seal_sign_verify() {
    let identity = generate_identity().unwrap();
    assert_eq!(identity.mnemonic().unwrap().split_whitespace().count(), 12);

    let token = encrypt_private_key(identity.private_key(), "correct-horse")
        .unwrap()
        .to_token();

    let key = decrypt_private_key(&token, "correct-horse").unwrap();
    assert_eq!(key.as_bytes(), identity.private_key().as_bytes());

    let template = EventTemplate::new(kind::TEXT_NOTE, "hello", vec![]).at(1_700_000_000);
    let signed = event::sign(&template, &key);
    assert!(event::verify(&signed));
    assert_eq!(signed.pubkey, identity.public_key().to_hex());

    assert!(matches!(
        decrypt_private_key(&token, "wrong-password"),
        Err(VaultError::Authentication)
    ));
}

#[test]
fn test_restore_paths_agree() {
    let from_phrase = restore_from_mnemonic(NIP06_PHRASE).unwrap();
    let from_nsec = restore_from_secret(NIP06_NSEC).unwrap();
    let from_hex = restore_from_secret(&NIP06_PRIVKEY.to_uppercase()).unwrap();

    assert_eq!(from_phrase.public_key(), from_nsec.public_key());
    assert_eq!(from_phrase.public_key(), from_hex.public_key());
    assert_eq!(encode_public(&from_phrase.public_key()), NIP06_NPUB);
    assert_eq!(&*encode_private(from_phrase.private_key()), NIP06_NSEC);
}

#[test]
fn test_signed_event_survives_json_and_mutation_fails() {
    let identity = restore_from_mnemonic(NIP06_PHRASE).unwrap();
    let reply = event::text_note("gm", Some("ab".repeat(32).as_str())).at(1_700_000_000);
    let signed = event::sign(&reply, identity.private_key());

    let json = serde_json::to_string(&signed).unwrap();
    assert!(event::verify_json(&json));
    assert!(signed.is_reply());

    let mut tampered = signed.clone();
    tampered.content.push('!');
    assert!(!tampered.verify());

    let mut tampered = signed;
    tampered.created_at += 1;
    assert!(!tampered.verify());
}

#[test]
fn test_keyring_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("identity.json");
    let kdf = KdfParams::new(10_000);

    let pk = {
        let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::open(&path).unwrap());
        let keyring = Keyring::new(store, kdf);
        keyring
            .store_identity(restore_from_mnemonic(NIP06_PHRASE).unwrap(), "correct-horse")
            .unwrap()
    };

    let contents = std::fs::read_to_string(&path).unwrap();
    assert!(contents.contains(KEY_TOKEN_KEY));
    assert!(!contents.contains(NIP06_PRIVKEY));

    let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::open(&path).unwrap());
    let keyring = Keyring::new(store, kdf);
    assert!(!keyring.is_unlocked());
    assert_eq!(keyring.public_key().unwrap(), pk);
    assert!(matches!(
        keyring.unlock("wrong-password"),
        Err(KeyringError::Vault(VaultError::Authentication))
    ));
    assert_eq!(keyring.unlock("correct-horse").unwrap(), pk);
}

#[tokio::test(start_paused = true)]
async fn test_session_expiry_locks_keyring() {
    let start = 1_700_000_000_000;
    let clock = Arc::new(ManualClock::new(start));
    let store = Arc::new(MemoryStore::new());
    let settings = IdentitySettings {
        kdf: KdfParams::new(1_000),
        ..Default::default()
    };
    let ctx = IdentityContext::with_clock(store.clone(), settings, clock.clone());

    ctx.keyring()
        .store_identity(generate_identity().unwrap(), "correct-horse")
        .unwrap();
    let activity = ctx.begin_session().unwrap();
    let mut state = ctx.session().subscribe();
    state.borrow_and_update();

    // Activity in the warning window keeps the session alive
    clock.advance(SESSION_TIMEOUT - Duration::from_secs(60));
    assert!(activity.notify(ActivityKind::Keyboard));
    state.changed().await.unwrap();
    let last = (start + (SESSION_TIMEOUT - Duration::from_secs(60)).as_millis() as u64).to_string();
    while store.get(LAST_ACTIVITY_KEY).unwrap().as_deref() != Some(last.as_str()) {
        state.changed().await.unwrap();
    }
    assert_eq!(state.borrow_and_update().remaining, SESSION_TIMEOUT);
    assert!(ctx.keyring().is_unlocked());

    // One second short of the timeout, measured from that activity
    clock.advance(SESSION_TIMEOUT - Duration::from_secs(1));
    state.changed().await.unwrap();
    assert!(state.borrow_and_update().show_warning());
    assert!(ctx.keyring().is_unlocked());

    clock.advance(Duration::from_secs(2));
    state.changed().await.unwrap();
    assert_eq!(state.borrow_and_update().phase, SessionPhase::Expired);
    assert!(!ctx.keyring().is_unlocked());

    // Activity cannot revive an expired session
    assert!(activity.notify(ActivityKind::Pointer));
    state.changed().await.unwrap();
    assert_eq!(state.borrow_and_update().phase, SessionPhase::Expired);

    ctx.logout().unwrap();
    assert_eq!(store.get(KEY_TOKEN_KEY).unwrap(), None);
}
