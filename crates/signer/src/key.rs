//! Shared-secret key for request signatures.

use crate::error::{SignerError, SignerResult};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use std::fmt;

type HmacSha1 = Hmac<Sha1>;

/// An HMAC-SHA1 key. The secret never appears in `Debug` output.
#[derive(Clone)]
pub struct HmacKey(Vec<u8>);

impl HmacKey {
    pub fn new(secret: impl AsRef<[u8]>) -> SignerResult<Self> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(SignerError::EmptyKey);
        }
        Ok(Self(secret.to_vec()))
    }

    fn mac(&self, data: &[u8]) -> HmacSha1 {
        let mut mac =
            HmacSha1::new_from_slice(&self.0).expect("HMAC accepts keys of any length");
        mac.update(data);
        mac
    }

    /// Lowercase hex digest of `data`.
    pub fn digest_hex(&self, data: &str) -> String {
        hex::encode(self.mac(data.as_bytes()).finalize().into_bytes())
    }

    /// Constant-time comparison of a hex digest against `data`.
    pub fn verify_hex(&self, provided: &str, data: &str) -> bool {
        match hex::decode(provided) {
            Ok(bytes) => self.mac(data.as_bytes()).verify_slice(&bytes).is_ok(),
            Err(_) => false,
        }
    }
}

impl fmt::Debug for HmacKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HmacKey(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digests() {
        let key = HmacKey::new("secret").unwrap();
        assert_eq!(
            key.digest_hex("hash"),
            "41482f0113cc9843f0aeaa10631936644a164059"
        );
        assert_eq!(
            key.digest_hex("S500x500hash"),
            "e9f14c0ae58cf300d6b9655889c2661c591d7b4b"
        );
    }

    #[test]
    fn test_verify_hex() {
        let key = HmacKey::new("secret").unwrap();
        assert!(key.verify_hex("41482f0113cc9843f0aeaa10631936644a164059", "hash"));
        assert!(!key.verify_hex("41482f0113cc9843f0aeaa10631936644a164058", "hash"));
        assert!(!key.verify_hex("not-hex", "hash"));
        assert!(!key.verify_hex("", "hash"));
    }

    #[test]
    fn test_empty_key_rejected() {
        assert!(HmacKey::new("").is_err());
        assert_eq!(format!("{:?}", HmacKey::new("x").unwrap()), "HmacKey(..)");
    }
}
