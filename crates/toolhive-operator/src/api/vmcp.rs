// VirtualMCPServer: an aggregating proxy over a group of member servers,
// plus the composite tool definitions it can reference.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::external_auth::OidcConfigRef;
use super::status::{Condition, Phase};

fn default_vmcp_port() -> i32 {
	8080
}

/// How tool-name collisions between member servers are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum ConflictResolution {
	/// Prefix every tool with `<server>_` (default).
	#[default]
	Prefix,
	/// First server in priority order wins the bare name.
	Priority,
	/// Only tools listed in `toolOverrides` are exposed.
	Manual,
}

/// Aggregation behavior of the virtual server.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AggregationConfig {
	#[serde(default)]
	pub conflict_resolution: ConflictResolution,
	/// Member ordering for `priority` resolution; unlisted members sort last.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub priorities: Vec<String>,
	/// Explicit `exposed name -> server/tool` entries for `manual` resolution.
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub tool_overrides: BTreeMap<String, String>,
}

/// Authentication the virtual server demands from callers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IncomingAuthConfig {
	/// `oidc` or `anonymous`.
	#[serde(rename = "type", default = "default_incoming_type")]
	pub type_: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub oidc: Option<OidcConfigRef>,
}

fn default_incoming_type() -> String {
	"anonymous".to_string()
}

/// Per-backend outgoing authentication overrides.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingAuthConfig {
	/// MCPExternalAuthConfig used for backends with no explicit entry.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub default_ref: Option<String>,
	/// `backend server name -> MCPExternalAuthConfig name`.
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub per_backend: BTreeMap<String, String>,
}

/// Reference to a VirtualMCPCompositeToolDefinition in the same namespace.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct CompositeToolRef {
	pub name: String,
}

/// Tool-routing search tuning for the aggregating proxy.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OptimizerConfig {
	/// Percentage of results drawn from semantic search, 0-100.
	#[serde(default = "default_semantic_ratio")]
	pub semantic_ratio: u8,
}

fn default_semantic_ratio() -> u8 {
	70
}

/// Desired state of a virtual aggregating server.
#[derive(Debug, Clone, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
	group = "toolhive.stacklok.dev",
	version = "v1alpha1",
	kind = "VirtualMCPServer",
	namespaced,
	status = "VirtualMCPServerStatus",
	shortname = "vmcp",
	printcolumn = r#"{"name":"Group","type":"string","jsonPath":".spec.groupRef"}"#,
	printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMCPServerSpec {
	/// Group whose members this virtual server aggregates.
	pub group_ref: String,

	#[serde(default = "default_vmcp_port")]
	pub port: i32,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub incoming_auth: Option<IncomingAuthConfig>,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub outgoing_auth: Option<OutgoingAuthConfig>,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub aggregation: Option<AggregationConfig>,

	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub composite_tool_refs: Vec<CompositeToolRef>,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub optimizer: Option<OptimizerConfig>,
}

/// Observed state of a VirtualMCPServer.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMCPServerStatus {
	#[serde(default)]
	pub phase: Phase,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub conditions: Vec<Condition>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub observed_generation: Option<i64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub url: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub message: Option<String>,
	/// Member servers aggregated at last reconcile, sorted.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub backends: Vec<String>,
}

/// One step of a composite workflow.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ToolStep {
	/// Step name, unique within the definition.
	pub name: String,
	/// Backend tool invoked, `server.tool` form.
	pub tool: String,
	/// Argument templates; `{{ steps.<name>.output }}` references prior steps.
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub arguments: BTreeMap<String, String>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub depends_on: Vec<String>,
}

/// Desired state of a named composite workflow.
#[derive(Debug, Clone, PartialEq, Default, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
	group = "toolhive.stacklok.dev",
	version = "v1alpha1",
	kind = "VirtualMCPCompositeToolDefinition",
	namespaced,
	status = "VirtualMCPCompositeToolDefinitionStatus",
	shortname = "vmcpctd",
	printcolumn = r#"{"name":"Steps","type":"integer","jsonPath":".status.stepCount"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMCPCompositeToolDefinitionSpec {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	/// JSON Schema of the workflow parameters.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	#[schemars(with = "Option<serde_json::Value>")]
	pub parameters: Option<serde_json::Value>,
	pub steps: Vec<ToolStep>,
	/// Overall timeout, Go-style duration string.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub timeout: Option<String>,
}

impl VirtualMCPServerSpec {
	/// Structural validation shared by the reconciler and the admission
	/// webhook. Returns the offending detail.
	pub fn validate(&self) -> Result<(), String> {
		if self.group_ref.is_empty() {
			return Err("groupRef must not be empty".to_string());
		}
		if let Some(incoming) = &self.incoming_auth {
			match incoming.type_.as_str() {
				"anonymous" => {},
				"oidc" => {
					if incoming.oidc.is_none() {
						return Err("incomingAuth type is oidc but oidc is not set".to_string());
					}
				},
				other => return Err(format!("unknown incomingAuth type {other:?}")),
			}
		}
		if let Some(aggregation) = &self.aggregation {
			if aggregation.conflict_resolution == ConflictResolution::Manual
				&& aggregation.tool_overrides.is_empty()
			{
				return Err(
					"manual conflict resolution requires toolOverrides entries".to_string()
				);
			}
		}
		Ok(())
	}
}

impl VirtualMCPCompositeToolDefinitionSpec {
	/// Structural validation shared by the reconciler and the admission
	/// webhook: steps present, names unique, dependencies and argument
	/// templates refer only to earlier steps.
	pub fn validate(&self) -> Result<(), String> {
		if self.steps.is_empty() {
			return Err("steps must not be empty".to_string());
		}
		let mut seen: Vec<&str> = Vec::with_capacity(self.steps.len());
		for step in &self.steps {
			if step.name.is_empty() {
				return Err("step name must not be empty".to_string());
			}
			if seen.contains(&step.name.as_str()) {
				return Err(format!("duplicate step name {:?}", step.name));
			}
			for dep in &step.depends_on {
				if !seen.contains(&dep.as_str()) {
					return Err(format!(
						"step {:?} depends on {:?} which is not an earlier step",
						step.name, dep
					));
				}
			}
			for (arg, template) in &step.arguments {
				if template.contains(&format!("steps.{}.", step.name)) {
					return Err(format!(
						"step {:?} argument {:?} references its own output",
						step.name, arg
					));
				}
			}
			seen.push(&step.name);
		}
		Ok(())
	}
}

/// Observed state of a VirtualMCPCompositeToolDefinition.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMCPCompositeToolDefinitionStatus {
	#[serde(default)]
	pub phase: Phase,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub conditions: Vec<Condition>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub observed_generation: Option<i64>,
	#[serde(default)]
	pub step_count: i32,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub config_hash: Option<String>,
}
