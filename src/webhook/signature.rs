use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Verifies `X-Hub-Signature-256` headers against a shared webhook secret.
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: Vec<u8>,
}

impl SignatureVerifier {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    /// Check `signature` (optionally prefixed with `sha256=`) against the HMAC of
    /// the raw request body. Never errors: anything malformed is simply `false`.
    ///
    /// `raw_body` must be the bytes exactly as received; a re-serialized JSON body
    /// will not match.
    pub fn verify(&self, raw_body: &[u8], signature: &str) -> bool {
        if raw_body.is_empty() || self.secret.is_empty() {
            return false;
        }

        let signature = signature.trim();
        let signature_hex = signature.strip_prefix("sha256=").unwrap_or(signature);
        if signature_hex.is_empty() {
            return false;
        }

        let signature_bytes = match hex::decode(signature_hex) {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };

        let mut mac = match HmacSha256::new_from_slice(&self.secret) {
            Ok(mac) => mac,
            Err(_) => return false,
        };
        mac.update(raw_body);

        // constant time; also rejects length mismatches
        mac.verify_slice(&signature_bytes).is_ok()
    }

    /// Produce the header value GitHub would send for `raw_body`.
    #[cfg(test)]
    pub fn sign(&self, raw_body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC accepts keys of any length");
        mac.update(raw_body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier").finish_non_exhaustive()
    }
}
