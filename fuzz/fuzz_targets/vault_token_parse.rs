#![no_main]

use fairfield_identity::EncryptedKeyBlob;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Raw layout: salt || iv || ciphertext
    if let Ok(blob) = EncryptedKeyBlob::from_bytes(data) {
        let bytes = blob.to_bytes();
        assert_eq!(bytes, data);
        let _ = EncryptedKeyBlob::from_token(&blob.to_token());
    }

    // Persisted form: base64 text
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = EncryptedKeyBlob::from_token(s);
    }
});
