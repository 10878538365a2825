//! Fuzz target for public key import
//!
//! Directory entries carry peer public keys as base64 text. Import must reject
//! anything that is not a well-formed RSA SPKI key of acceptable size.
//!
//! # Invariants
//!
//! - Import never panics on arbitrary text
//! - Accepted keys meet the minimum modulus size
//! - Accepted keys re-export to text that imports to the same fingerprint

#![no_main]

use duet_crypto::{MIN_MODULUS_BITS, PublicKeyHandle};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    let Ok(key) = PublicKeyHandle::from_base64(text) else {
        return;
    };

    assert!(key.modulus_bits() >= MIN_MODULUS_BITS);

    let exported = key.to_base64().expect("accepted key must export");
    let again = PublicKeyHandle::from_base64(&exported).expect("exported key must import");
    assert_eq!(key.fingerprint(), again.fingerprint());
});
