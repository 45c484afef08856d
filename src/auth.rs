//! Challenge signing for hub authentication
//!
//! The hub issues an authentication challenge via `GetAuthContext`; the
//! client signs it with the API secret and presents the signature to
//! `Authenticate`.

use hmac::{Hmac, Mac};
use sha2::Sha512;

type HmacSha512 = Hmac<Sha512>;

/// Sign an authentication challenge.
///
/// HMAC-SHA-512 of the UTF-8 challenge keyed by the UTF-8 secret,
/// rendered as uppercase hex with no separators (128 chars).
pub fn sign_challenge(api_secret: &str, challenge: &str) -> String {
    let mut mac =
        HmacSha512::new_from_slice(api_secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(challenge.as_bytes());
    hex::encode_upper(mac.finalize().into_bytes())
}
