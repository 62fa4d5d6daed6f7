// MCPRegistry: named sub-registries of MCP server images, with sync policy,
// filters, and optional image-admission enforcement.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::status::{Condition, Phase};

/// On-the-wire format of a sub-registry source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum RegistryDataFormat {
	/// Canonical ToolHive registry JSON.
	#[default]
	Toolhive,
	/// Upstream MCP registry format, converted during sync.
	Upstream,
}

/// ConfigMap-backed source.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMapSource {
	pub name: String,
	#[serde(default = "default_registry_key")]
	pub key: String,
}

fn default_registry_key() -> String {
	"registry.json".to_string()
}

/// HTTP basic-auth credentials for a git source, stored in a Secret.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GitBasicAuth {
	pub secret_name: String,
	#[serde(default = "default_username_key")]
	pub username_key: String,
	#[serde(default = "default_password_key")]
	pub password_key: String,
}

fn default_username_key() -> String {
	"username".to_string()
}

fn default_password_key() -> String {
	"password".to_string()
}

/// Git-hosted source, fetched over HTTP(S).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GitSource {
	pub url: String,
	#[serde(default = "default_git_ref", rename = "ref")]
	pub ref_: String,
	#[serde(default = "default_registry_key")]
	pub path: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub basic_auth: Option<GitBasicAuth>,
}

fn default_git_ref() -> String {
	"main".to_string()
}

/// PVC-backed source, mounted into the operator pod at
/// `/config/registry/<subRegistryName>/<path>`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PvcSource {
	pub claim_name: String,
	#[serde(default = "default_registry_key")]
	pub path: String,
}

/// Remote registry API source. The format is autodetected: ToolHive-format
/// endpoints answer `/v0/info`, upstream-format endpoints serve `/openapi.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApiSource {
	pub url: String,
}

/// Include/exclude glob patterns.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NameFilter {
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub include: Vec<String>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub exclude: Vec<String>,
}

/// Filters applied to a sub-registry after fetch.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegistryFilter {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub names: Option<NameFilter>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tags: Option<NameFilter>,
}

/// One named source inside an MCPRegistry.
///
/// Exactly one of `configMap`, `git`, `pvc`, `api` must be set.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubRegistry {
	pub name: String,
	#[serde(default)]
	pub format: RegistryDataFormat,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub config_map: Option<ConfigMapSource>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub git: Option<GitSource>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub pvc: Option<PvcSource>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub api: Option<ApiSource>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub filter: Option<RegistryFilter>,
	/// When set, servers in this namespace must resolve to an entry here.
	#[serde(default)]
	pub enforce_servers: bool,
}

impl SubRegistry {
	/// Number of source kinds populated; must be exactly one.
	pub fn source_count(&self) -> usize {
		[
			self.config_map.is_some(),
			self.git.is_some(),
			self.pvc.is_some(),
			self.api.is_some(),
		]
		.iter()
		.filter(|set| **set)
		.count()
	}
}

/// Periodic sync configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SyncPolicy {
	/// Go-style duration string, e.g. `30m`, `1h`.
	pub interval: String,
}

/// Desired state of a registry.
#[derive(Debug, Clone, PartialEq, Default, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
	group = "toolhive.stacklok.dev",
	version = "v1alpha1",
	kind = "MCPRegistry",
	namespaced,
	status = "MCPRegistryStatus",
	shortname = "mcpreg",
	printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
	printcolumn = r#"{"name":"Servers","type":"integer","jsonPath":".status.syncStatus.serverCount"}"#,
	printcolumn = r#"{"name":"LastSync","type":"string","jsonPath":".status.syncStatus.lastSyncTime"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MCPRegistrySpec {
	pub sub_registries: Vec<SubRegistry>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub sync_policy: Option<SyncPolicy>,
}

impl MCPRegistrySpec {
	/// Whether any sub-registry enforces image admission.
	pub fn enforcing(&self) -> bool {
		self.sub_registries.iter().any(|s| s.enforce_servers)
	}
}

/// Sub-phase of the sync machine, orthogonal to the registry phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
pub enum SyncPhase {
	#[default]
	Idle,
	Syncing,
	Complete,
	Failed,
}

/// Outcome of the most recent sync.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySyncStatus {
	#[serde(default)]
	pub phase: SyncPhase,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub last_sync_time: Option<String>,
	/// Content hash of the canonical data at last successful sync.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub last_sync_hash: Option<String>,
	#[serde(default)]
	pub server_count: i32,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub message: Option<String>,
}

/// State of the registry-api child deployment.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegistryApiStatus {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub phase: Option<String>,
	/// In-cluster endpoint of the registry API.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub endpoint: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub ready_since: Option<String>,
}

/// Observed state of an MCPRegistry.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MCPRegistryStatus {
	#[serde(default)]
	pub phase: Phase,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub conditions: Vec<Condition>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub observed_generation: Option<i64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub sync_status: Option<RegistrySyncStatus>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub api_status: Option<RegistryApiStatus>,
	/// Last observed value of the manual-sync annotation.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub last_manual_sync_trigger: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub message: Option<String>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_sub_registry_source_count() {
		let mut sub = SubRegistry {
			name: "community".to_string(),
			..Default::default()
		};
		assert_eq!(sub.source_count(), 0);

		sub.config_map = Some(ConfigMapSource {
			name: "data".to_string(),
			key: default_registry_key(),
		});
		assert_eq!(sub.source_count(), 1);

		sub.api = Some(ApiSource {
			url: "https://registry.example.com".to_string(),
		});
		assert_eq!(sub.source_count(), 2);
	}

	#[test]
	fn test_enforcing() {
		let spec: MCPRegistrySpec = serde_json::from_str(
			r#"{
				"subRegistries": [
					{"name": "a", "configMap": {"name": "cm"}},
					{"name": "b", "configMap": {"name": "cm2"}, "enforceServers": true}
				]
			}"#,
		)
		.unwrap();
		assert!(spec.enforcing());
		assert_eq!(spec.sub_registries[0].config_map.as_ref().unwrap().key, "registry.json");
	}

	#[test]
	fn test_git_source_defaults() {
		let git: GitSource =
			serde_json::from_str(r#"{"url": "https://github.com/acme/registry.git"}"#).unwrap();
		assert_eq!(git.ref_, "main");
		assert_eq!(git.path, "registry.json");
	}
}
