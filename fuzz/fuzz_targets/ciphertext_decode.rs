//! Fuzz target for ciphertext envelope decoding
//!
//! Feeds stored-record text to both strategies and tampers with genuine
//! shared-secret ciphertexts.
//!
//! # Invariants
//!
//! - Decryption never panics, whatever the input text
//! - Untampered ciphertexts decrypt back to the original plaintext
//! - Any single flipped byte in a genuine ciphertext fails decryption
//! - A ciphertext never decodes under the other scheme's tag

#![no_main]

use arbitrary::Arbitrary;
use duet_crypto::{
    EncryptionStrategy, NONCE_SIZE, Scheme, SharedSecret, SharedSecretCipher, scheme_of,
};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input {
    key: [u8; 32],
    nonce: [u8; NONCE_SIZE],
    plaintext: String,
    /// Raw text handed to `decrypt` as if read from the log
    stored: String,
    /// Byte offset and mask for tampering
    flip: (usize, u8),
}

fuzz_target!(|input: Input| {
    let cipher = SharedSecretCipher::new(SharedSecret::from_bytes(input.key));

    // Arbitrary stored text must fail cleanly or decrypt
    let _ = cipher.decrypt(&input.stored);
    let _ = scheme_of(&input.stored);

    let Ok(sealed) = cipher.encrypt_with_nonce(&input.plaintext, input.nonce) else {
        return;
    };
    assert_eq!(scheme_of(&sealed), Some(Scheme::SharedSecret));
    assert_eq!(cipher.decrypt(&sealed).as_deref(), Ok(input.plaintext.as_str()));

    let relabelled = sealed.replacen("ss1:", "kp1:", 1);
    assert!(cipher.decrypt(&relabelled).is_err());

    let (offset, mask) = input.flip;
    if mask != 0 {
        let mut bytes = sealed.into_bytes();
        let index = offset % bytes.len();
        bytes[index] ^= mask;
        if let Ok(tampered) = String::from_utf8(bytes) {
            // Base64 padding bits can absorb a flip; the decoded bytes must
            // then still authenticate, so only a changed plaintext is a bug
            if let Ok(text) = cipher.decrypt(&tampered) {
                assert_eq!(text, input.plaintext);
            }
        }
    }
});
