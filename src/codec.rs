//! Cookie-safe encoding of digests
//!
//! Digests are rendered with the standard base64 alphabet, except `+` and
//! `/` become `-` and `.`, and padding is dropped. The result can sit in a
//! cookie value without escaping. Encoding is one-way in practice: ids are
//! compared, never decoded.

use base64::alphabet::Alphabet;
use base64::engine::general_purpose::NO_PAD;
use base64::engine::GeneralPurpose;
use base64::Engine;

/// Number of digest bytes embedded in each half of a client id
pub const DIGEST_LEN: usize = 20;

/// Encoded length of a `DIGEST_LEN`-byte digest
pub const ENCODED_DIGEST_LEN: usize = 27;

const COOKIE_SAFE_ALPHABET: Alphabet =
    match Alphabet::new("ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-.") {
        Ok(alphabet) => alphabet,
        Err(_) => panic!("cookie-safe base64 alphabet is invalid"),
    };

const COOKIE_SAFE: GeneralPurpose = GeneralPurpose::new(&COOKIE_SAFE_ALPHABET, NO_PAD);

/// Encode raw digest bytes into a cookie-safe string
pub fn digest_encode(digest: &[u8]) -> String {
    COOKIE_SAFE.encode(digest)
}

/// Whether `s` only uses characters `digest_encode` can produce
pub fn is_cookie_safe(s: &str) -> bool {
    s.bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'.')
}
