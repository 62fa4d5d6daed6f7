// Canonical ToolHive registry schema: servers keyed by name, with image,
// tier, status, transport, tools and tags. BTreeMaps keep serialization
// deterministic so content hashes are stable.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::hash;

const TRANSPORTS: &[&str] = &["stdio", "sse", "streamable-http"];

/// An environment variable a registry server documents.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEnvVar {
	pub name: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	#[serde(default)]
	pub required: bool,
	#[serde(default)]
	pub secret: bool,
}

/// A single container-based registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryServer {
	/// Redundant with the map key; must match it when set.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	pub image: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tier: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub status: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub transport: Option<String>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub tools: Vec<String>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub tags: Vec<String>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub env_vars: Vec<RegistryEnvVar>,
}

/// A remotely hosted registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryRemoteServer {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	pub url: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub transport: Option<String>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub tools: Vec<String>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub tags: Vec<String>,
}

/// The canonical registry document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryData {
	#[serde(default = "default_version")]
	pub version: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub last_updated: Option<String>,
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub servers: BTreeMap<String, RegistryServer>,
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub remote_servers: BTreeMap<String, RegistryRemoteServer>,
}

impl Default for RegistryData {
	fn default() -> Self {
		Self {
			version: default_version(),
			last_updated: None,
			servers: BTreeMap::new(),
			remote_servers: BTreeMap::new(),
		}
	}
}

fn default_version() -> String {
	"1.0".to_string()
}

impl RegistryData {
	/// Parse and validate a canonical-format document.
	pub fn parse(bytes: &[u8]) -> Result<Self, String> {
		let data: RegistryData =
			serde_json::from_slice(bytes).map_err(|e| format!("invalid registry JSON: {e}"))?;
		data.validate()?;
		Ok(data)
	}

	/// Structural validation; the error names the offending entry.
	pub fn validate(&self) -> Result<(), String> {
		for (key, server) in &self.servers {
			if key.is_empty() {
				return Err("server entry with empty name key".to_string());
			}
			if let Some(name) = &server.name {
				if name != key {
					return Err(format!(
						"server entry {key:?} has mismatched name {name:?}"
					));
				}
			}
			if server.image.is_empty() {
				return Err(format!("server {key:?} has no image"));
			}
			if let Some(transport) = &server.transport {
				if !TRANSPORTS.contains(&transport.as_str()) {
					return Err(format!(
						"server {key:?} has unknown transport {transport:?}"
					));
				}
			}
		}
		for (key, remote) in &self.remote_servers {
			if key.is_empty() {
				return Err("remote server entry with empty name key".to_string());
			}
			if remote.url.is_empty() {
				return Err(format!("remote server {key:?} has no url"));
			}
		}
		Ok(())
	}

	/// Fold another document into this one. First writer wins on name
	/// collisions across sub-registries.
	pub fn merge(&mut self, other: RegistryData) {
		for (name, server) in other.servers {
			self.servers.entry(name).or_insert(server);
		}
		for (name, remote) in other.remote_servers {
			self.remote_servers.entry(name).or_insert(remote);
		}
	}

	/// Total entry count, container and remote.
	pub fn server_count(&self) -> usize {
		self.servers.len() + self.remote_servers.len()
	}

	/// Canonical serialized form.
	pub fn to_canonical_json(&self) -> Result<Vec<u8>, serde_json::Error> {
		serde_json::to_vec(self)
	}

	/// Content hash of the canonical form; the sync gate compares this
	/// against `status.syncStatus.lastSyncHash`.
	pub fn content_hash(&self) -> Result<String, serde_json::Error> {
		Ok(hash::content_hash(&self.to_canonical_json()?))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn server(image: &str) -> RegistryServer {
		RegistryServer {
			image: image.to_string(),
			..Default::default()
		}
	}

	#[test]
	fn test_parse_minimal() {
		let data = RegistryData::parse(
			br#"{
				"version": "1.0",
				"servers": {
					"github": {"image": "ghcr.io/github/github-mcp-server:latest"}
				}
			}"#,
		)
		.unwrap();
		assert_eq!(data.server_count(), 1);
		assert_eq!(
			data.servers["github"].image,
			"ghcr.io/github/github-mcp-server:latest"
		);
	}

	#[test]
	fn test_validate_name_mismatch() {
		let err = RegistryData::parse(
			br#"{"servers": {"github": {"name": "gitlab", "image": "img"}}}"#,
		)
		.unwrap_err();
		assert!(err.contains("mismatched name"), "{err}");
	}

	#[test]
	fn test_validate_missing_image() {
		let err =
			RegistryData::parse(br#"{"servers": {"github": {"image": ""}}}"#).unwrap_err();
		assert!(err.contains("no image"), "{err}");
	}

	#[test]
	fn test_validate_unknown_transport() {
		let err = RegistryData::parse(
			br#"{"servers": {"x": {"image": "img", "transport": "grpc"}}}"#,
		)
		.unwrap_err();
		assert!(err.contains("unknown transport"), "{err}");
	}

	#[test]
	fn test_merge_first_wins() {
		let mut base = RegistryData::default();
		base.servers.insert("github".to_string(), server("first"));
		let mut other = RegistryData::default();
		other.servers.insert("github".to_string(), server("second"));
		other.servers.insert("fetch".to_string(), server("fetch-img"));

		base.merge(other);
		assert_eq!(base.servers["github"].image, "first");
		assert_eq!(base.server_count(), 2);
	}

	#[test]
	fn test_content_hash_stable_and_sensitive() {
		let mut a = RegistryData::default();
		a.servers.insert("github".to_string(), server("img"));
		let b = a.clone();
		assert_eq!(a.content_hash().unwrap(), b.content_hash().unwrap());

		a.servers.insert("fetch".to_string(), server("img2"));
		assert_ne!(a.content_hash().unwrap(), b.content_hash().unwrap());
	}
}
