#![no_main]

use fairfield_identity::{decode_public, restore_from_secret};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = restore_from_secret(s);
        let _ = decode_public(s);

        // Exercise the bech32 paths past the prefix check
        let _ = restore_from_secret(&format!("nsec1{}", s));
        let _ = decode_public(&format!("npub1{}", s));
    }
});
