//! `apiSig` generation.
//!
//! `apiSig = nonce + hex(sha512("<nonce>/<method>?<sorted params>#<secret>"))`
//! where the params are sorted by name, then value, and joined as
//! `name=value` with `&`. The nonce is six random lowercase letters drawn
//! per call, so the same request never carries the same signature twice.

use crate::protocol::ParamPair;
use rand::Rng;
use sha2::{Digest, Sha512};

pub const NONCE_LEN: usize = 6;

const NONCE_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz";

/// Signs requests with the shared API secret.
#[derive(Clone)]
pub struct RequestSigner {
    secret: String,
}

impl RequestSigner {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Sign with a freshly drawn nonce.
    pub fn sign(&self, method: &str, params: &[ParamPair]) -> String {
        let nonce = random_nonce(&mut rand::thread_rng());
        self.sign_with_nonce(&nonce, method, params)
    }

    /// Deterministic signature for a given nonce.
    pub fn sign_with_nonce(&self, nonce: &str, method: &str, params: &[ParamPair]) -> String {
        let canonical = format!(
            "{}/{}?{}#{}",
            nonce,
            method,
            canonical_query(params),
            self.secret
        );
        let mut hasher = Sha512::new();
        hasher.update(canonical.as_bytes());
        let digest: String = hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();
        format!("{}{}", nonce, digest)
    }
}

impl std::fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSigner")
            .field("secret", &"<hidden>")
            .finish()
    }
}

/// `name=value` pairs sorted by (name, value) and joined with `&`.
pub fn canonical_query(params: &[ParamPair]) -> String {
    let mut sorted: Vec<&ParamPair> = params.iter().collect();
    sorted.sort();
    sorted
        .iter()
        .map(|p| format!("{}={}", p.name, p.value))
        .collect::<Vec<_>>()
        .join("&")
}

pub fn random_nonce<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..NONCE_LEN)
        .map(|_| NONCE_ALPHABET[rng.gen_range(0..NONCE_ALPHABET.len())] as char)
        .collect()
}
