// Stable content fingerprints for specs and registry data

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Prefix identifying the hash algorithm in stored fingerprints.
const PREFIX: &str = "sha256:";

/// Hash raw bytes into the canonical `sha256:<hex>` form.
pub fn content_hash(data: &[u8]) -> String {
	let digest = Sha256::digest(data);
	format!("{}{}", PREFIX, hex::encode(digest))
}

/// Fingerprint a spec by hashing its canonical JSON serialization.
///
/// Serialization of the API types is deterministic (maps are `BTreeMap`,
/// unset optionals are omitted), so the hash changes iff the spec changes.
pub fn spec_hash<T: Serialize>(spec: &T) -> Result<String, serde_json::Error> {
	let bytes = serde_json::to_vec(spec)?;
	Ok(content_hash(&bytes))
}
