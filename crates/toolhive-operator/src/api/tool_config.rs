// MCPToolConfig: allow/deny filter over tool names plus per-tool overrides

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::status::{Condition, Phase};

/// Rename or re-describe a single tool.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ToolOverride {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
}

/// Desired state of a tool filter.
#[derive(Debug, Clone, PartialEq, Default, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
	group = "toolhive.stacklok.dev",
	version = "v1alpha1",
	kind = "MCPToolConfig",
	namespaced,
	status = "MCPToolConfigStatus",
	shortname = "mcptc",
	printcolumn = r#"{"name":"Hash","type":"string","jsonPath":".status.configHash"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MCPToolConfigSpec {
	/// Tools to expose. Empty means all tools pass (subject to `deny`).
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub allow: Vec<String>,
	/// Tools to hide. Deny wins over allow.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub deny: Vec<String>,
	/// Per-tool rename/re-description, keyed by original tool name.
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub overrides: BTreeMap<String, ToolOverride>,
}

/// Observed state of an MCPToolConfig.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MCPToolConfigStatus {
	#[serde(default)]
	pub phase: Phase,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub conditions: Vec<Condition>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub observed_generation: Option<i64>,
	/// Stable fingerprint of the spec; dependents compare against this.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub config_hash: Option<String>,
	/// Names of servers currently referencing this config.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub referencing_servers: Vec<String>,
}
