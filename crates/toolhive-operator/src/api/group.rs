// MCPGroup: a named collection of servers; membership is computed from
// Server.spec.groupRef, never stored on the group itself.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::status::{Condition, Phase};

/// Desired state of a server group.
#[derive(Debug, Clone, PartialEq, Default, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
	group = "toolhive.stacklok.dev",
	version = "v1alpha1",
	kind = "MCPGroup",
	namespaced,
	status = "MCPGroupStatus",
	shortname = "mcpg",
	printcolumn = r#"{"name":"Servers","type":"integer","jsonPath":".status.serverCount"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MCPGroupSpec {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
}

/// Observed state of an MCPGroup.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MCPGroupStatus {
	#[serde(default)]
	pub phase: Phase,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub conditions: Vec<Condition>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub observed_generation: Option<i64>,
	/// Names of member servers, sorted.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub servers: Vec<String>,
	#[serde(default)]
	pub server_count: i32,
}
