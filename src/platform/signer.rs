//! Request signing capability
//!
//! Some comment endpoints require per-request signature headers computed by
//! the site's own script. The core only sees the resulting header values.

use rand::Rng;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    /// `x-s`
    pub xs: String,
    /// `x-t`
    pub xt: String,
}

#[derive(Debug, Error)]
#[error("Signing failed: {0}")]
pub struct SignError(pub String);

pub trait Signer: Send + Sync {
    /// Sign a request path including its query string
    fn sign(&self, path: &str) -> Result<SignedHeaders, SignError>;
}

/// Random 16-char lowercase hex trace id for `x-b3-traceid`
pub fn trace_id() -> String {
    const HEX: &[u8] = b"abcdef0123456789";
    let mut rng = rand::thread_rng();
    (0..16)
        .map(|_| HEX[rng.gen_range(0..HEX.len())] as char)
        .collect()
}
