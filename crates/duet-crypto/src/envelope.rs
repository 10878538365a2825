//! Text envelope for ciphertexts.
//!
//! Records store ciphertext as text. Every envelope starts with a scheme tag
//! so a ciphertext produced by one strategy is rejected by the other at decode
//! time instead of being fed to the wrong cipher.
//!
//! ```text
//! ss1:<base64(nonce || ciphertext || tag)>     shared secret
//! kp1:<base64(rsa-oaep ciphertext)>            key pair
//! ```

use base64::{Engine as _, engine::general_purpose::STANDARD};

use crate::{error::DecryptionFailed, strategy::Scheme};

/// Separator between the scheme tag and the payload.
const TAG_SEPARATOR: char = ':';

fn tag(scheme: Scheme) -> &'static str {
    match scheme {
        Scheme::SharedSecret => "ss1",
        Scheme::KeyPair => "kp1",
    }
}

/// Wrap raw ciphertext bytes in a tagged text envelope.
pub(crate) fn seal(scheme: Scheme, bytes: &[u8]) -> String {
    let tag = tag(scheme);
    let mut out = String::with_capacity(tag.len() + 1 + bytes.len().div_ceil(3) * 4);
    out.push_str(tag);
    out.push(TAG_SEPARATOR);
    STANDARD.encode_string(bytes, &mut out);
    out
}

/// Unwrap a text envelope, checking that it was produced by `scheme`.
pub(crate) fn open(scheme: Scheme, text: &str) -> Result<Vec<u8>, DecryptionFailed> {
    let Some((found, payload)) = text.split_once(TAG_SEPARATOR) else {
        return Err(DecryptionFailed::new("missing scheme tag"));
    };

    if found != tag(scheme) {
        return Err(DecryptionFailed::new(format!(
            "scheme mismatch: expected {}, found {found:?}",
            tag(scheme)
        )));
    }

    STANDARD.decode(payload).map_err(|e| DecryptionFailed::new(format!("invalid base64: {e}")))
}

/// Scheme that produced an envelope, if the tag is recognised.
pub fn scheme_of(text: &str) -> Option<Scheme> {
    match text.split_once(TAG_SEPARATOR)?.0 {
        "ss1" => Some(Scheme::SharedSecret),
        "kp1" => Some(Scheme::KeyPair),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_then_open() {
        let sealed = seal(Scheme::SharedSecret, b"\x00\x01\xfe\xff");
        assert!(sealed.starts_with("ss1:"));
        assert_eq!(open(Scheme::SharedSecret, &sealed).unwrap(), b"\x00\x01\xfe\xff");
    }

    #[test]
    fn wrong_scheme_is_rejected() {
        let sealed = seal(Scheme::KeyPair, b"payload");
        let err = open(Scheme::SharedSecret, &sealed).unwrap_err();
        assert!(err.reason.contains("scheme mismatch"));
    }

    #[test]
    fn untagged_text_is_rejected() {
        // Plaintext accidentally stored without encryption
        assert!(open(Scheme::SharedSecret, "hello").is_err());
    }

    #[test]
    fn invalid_base64_is_rejected() {
        let err = open(Scheme::KeyPair, "kp1:not base64!").unwrap_err();
        assert!(err.reason.contains("base64"));
    }

    #[test]
    fn scheme_of_recognises_tags() {
        assert_eq!(scheme_of("ss1:AAAA"), Some(Scheme::SharedSecret));
        assert_eq!(scheme_of("kp1:AAAA"), Some(Scheme::KeyPair));
        assert_eq!(scheme_of("U2FsdGVkX1"), None);
        assert_eq!(scheme_of("zz9:AAAA"), None);
    }
}
