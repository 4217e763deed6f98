#![no_main]

use fairfield_identity::restore_from_mnemonic;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Arbitrary text as a recovery phrase: Ok or Err, never a panic.
    // Valid phrases go all the way through NIP-06 derivation.
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = restore_from_mnemonic(s);
    }
});
