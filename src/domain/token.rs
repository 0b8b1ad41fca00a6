//! Content tokens.
//!
//! Tables and pages are addressed by a canonical-serialize-then-hash token:
//! the input is converted to a `serde_json::Value` (object keys sort into
//! BTreeMap order), written as compact JSON, digested with SHA-256, and the
//! digest encoded as URL-safe unpadded base64. Independent implementations
//! that serialize the same field order produce the same token.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::Serialize;
use sha2::{Digest, Sha256};

pub fn hash_token<T: Serialize>(value: &T) -> String {
    let canonical = serde_json::to_value(value).expect("token input should serialize");
    let bytes = serde_json::to_vec(&canonical).expect("canonical value should serialize");
    URL_SAFE_NO_PAD.encode(Sha256::digest(&bytes))
}
