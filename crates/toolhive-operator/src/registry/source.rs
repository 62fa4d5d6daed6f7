// Source fetch contract. The sync engine depends only on this trait so the
// concrete fetchers (cluster objects, HTTP, filesystem) can be swapped or
// mocked in tests.

use std::time::Duration;

use async_trait::async_trait;

use crate::api::SubRegistry;
use crate::error::{Error, Result};
use crate::hash;

/// Raw bytes fetched from a source, with a transport-level hash for logging
/// and debugging. The sync gate hashes the canonical form, not this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
	pub bytes: Vec<u8>,
	pub fetch_hash: String,
}

impl Fetched {
	pub fn new(bytes: Vec<u8>) -> Self {
		let fetch_hash = hash::content_hash(&bytes);
		Self { bytes, fetch_hash }
	}
}

/// External collaborator contract: fetch the raw bytes of a sub-registry
/// source within the sync deadline.
#[async_trait]
pub trait Fetcher: Send + Sync {
	async fn fetch(
		&self,
		namespace: &str,
		sub: &SubRegistry,
		deadline: Duration,
	) -> Result<Fetched>;
}

/// Check that a sub-registry declares exactly one source kind.
pub fn validate_source(sub: &SubRegistry) -> Result<()> {
	match sub.source_count() {
		1 => Ok(()),
		0 => Err(Error::spec_invalid(
			"subRegistries",
			format!("sub-registry {:?} declares no source", sub.name),
		)),
		n => Err(Error::spec_invalid(
			"subRegistries",
			format!("sub-registry {:?} declares {n} sources, expected one", sub.name),
		)),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::api::ConfigMapSource;

	#[test]
	fn test_fetched_hash() {
		let fetched = Fetched::new(b"data".to_vec());
		assert!(fetched.fetch_hash.starts_with("sha256:"));
		assert_eq!(fetched, Fetched::new(b"data".to_vec()));
	}

	#[test]
	fn test_validate_source_counts() {
		let mut sub = SubRegistry {
			name: "community".to_string(),
			..Default::default()
		};
		assert!(validate_source(&sub).is_err());

		sub.config_map = Some(ConfigMapSource {
			name: "cm".to_string(),
			key: "registry.json".to_string(),
		});
		assert!(validate_source(&sub).is_ok());

		sub.api = Some(crate::api::ApiSource {
			url: "https://example.com".to_string(),
		});
		assert!(validate_source(&sub).is_err());
	}
}
