// Server-shaped kinds: MCPServer, MCPRemoteProxy, EmbeddingServer

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::external_auth::{OidcConfigRef, SecretKeyRef};
use super::status::{Condition, Phase};

fn default_proxy_port() -> i32 {
	8080
}

/// Wire transport an MCP server speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum Transport {
	/// Process speaks MCP over stdin/stdout; the proxy owns the process.
	#[default]
	Stdio,
	/// Server-sent events endpoint.
	Sse,
	/// Streamable HTTP endpoint.
	StreamableHttp,
}

impl std::fmt::Display for Transport {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let s = match self {
			Transport::Stdio => "stdio",
			Transport::Sse => "sse",
			Transport::StreamableHttp => "streamable-http",
		};
		f.write_str(s)
	}
}

/// Transport the proxy exposes to clients when the backend is stdio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum ProxyMode {
	#[default]
	Sse,
	StreamableHttp,
}

/// A name/value environment variable passed to the managed workload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct EnvVar {
	pub name: String,
	pub value: String,
}

/// Volume to mount into the workload.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSpec {
	pub name: String,
	/// Host path to mount from.
	pub host_path: String,
	/// Path inside the container.
	pub mount_path: String,
	#[serde(default)]
	pub read_only: bool,
}

/// Requested cpu/memory quantities, as Kubernetes quantity strings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
pub struct ResourceList {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub cpu: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub memory: Option<String>,
}

/// Resource hints applied to the workload container.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
pub struct ResourceHints {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub limits: Option<ResourceList>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub requests: Option<ResourceList>,
}

/// OpenTelemetry export settings for the proxy.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySpec {
	#[serde(default)]
	pub enabled: bool,
	/// OTLP endpoint; any `http://`/`https://` prefix is stripped during
	/// translation since the exporter expects host:port.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub endpoint: Option<String>,
	/// Defaults to the owning resource's name.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub service_name: Option<String>,
	#[serde(default)]
	pub insecure: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub sampling_ratio: Option<f64>,
}

/// Audit logging settings for the proxy.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuditSpec {
	#[serde(default)]
	pub enabled: bool,
}

/// Inline Cedar authorization policies.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthzSpec {
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub policies: Vec<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub entities_json: Option<String>,
}

/// Reference to a permission profile, either builtin by name or a ConfigMap key.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PermissionProfileRef {
	/// `builtin` or `configmap`.
	#[serde(rename = "type")]
	pub type_: String,
	pub name: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub key: Option<String>,
}

/// Desired state of an individual MCP server.
#[derive(Debug, Clone, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
	group = "toolhive.stacklok.dev",
	version = "v1alpha1",
	kind = "MCPServer",
	namespaced,
	status = "MCPServerStatus",
	shortname = "mcps",
	printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
	printcolumn = r#"{"name":"URL","type":"string","jsonPath":".status.url"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MCPServerSpec {
	/// Container image of the MCP server.
	pub image: String,

	#[serde(default)]
	pub transport: Transport,

	/// Transport the proxy exposes for stdio backends.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub proxy_mode: Option<ProxyMode>,

	/// Port the proxy service listens on.
	#[serde(default = "default_proxy_port")]
	pub port: i32,

	/// Container port, defaults to `port`.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub target_port: Option<i32>,

	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub args: Vec<String>,

	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub env: Vec<EnvVar>,

	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub volumes: Vec<VolumeSpec>,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub resources: Option<ResourceHints>,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub permission_profile: Option<PermissionProfileRef>,

	/// Name of an MCPToolConfig in the same namespace.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tool_config_ref: Option<String>,

	/// Inline allow-list of tool names. Mutually exclusive with `toolConfigRef`.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub tools_filter: Vec<String>,

	/// Name of an MCPExternalAuthConfig in the same namespace.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub external_auth_config_ref: Option<String>,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub oidc_config: Option<OidcConfigRef>,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub telemetry: Option<TelemetrySpec>,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub audit: Option<AuditSpec>,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub authz: Option<AuthzSpec>,

	/// Name of an MCPGroup this server belongs to.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub group_ref: Option<String>,

	/// Service account to run the proxy under; defaults to `<name>-proxy-runner`.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub service_account: Option<String>,

	/// Strategic-merge style patch applied to the generated pod template.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	#[schemars(with = "Option<serde_json::Value>")]
	pub pod_template_spec: Option<serde_json::Value>,
}

impl Default for MCPServerSpec {
	fn default() -> Self {
		Self {
			image: String::new(),
			transport: Transport::default(),
			proxy_mode: None,
			port: default_proxy_port(),
			target_port: None,
			args: Vec::new(),
			env: Vec::new(),
			volumes: Vec::new(),
			resources: None,
			permission_profile: None,
			tool_config_ref: None,
			tools_filter: Vec::new(),
			external_auth_config_ref: None,
			oidc_config: None,
			telemetry: None,
			audit: None,
			authz: None,
			group_ref: None,
			service_account: None,
			pod_template_spec: None,
		}
	}
}

/// Observed state of an MCPServer.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MCPServerStatus {
	#[serde(default)]
	pub phase: Phase,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub conditions: Vec<Condition>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub observed_generation: Option<i64>,
	/// In-cluster URL of the proxy service.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub url: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub message: Option<String>,
	/// Fingerprint of the referenced MCPToolConfig spec at last reconcile.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tool_config_hash: Option<String>,
	/// Fingerprint of the referenced MCPExternalAuthConfig spec at last reconcile.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub external_auth_config_hash: Option<String>,
}

/// Desired state of a proxy fronting an externally hosted MCP endpoint.
#[derive(Debug, Clone, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
	group = "toolhive.stacklok.dev",
	version = "v1alpha1",
	kind = "MCPRemoteProxy",
	namespaced,
	status = "MCPRemoteProxyStatus",
	shortname = "mcprp",
	printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MCPRemoteProxySpec {
	/// URL of the remote MCP endpoint this proxy fronts.
	pub remote_url: String,

	#[serde(default = "default_proxy_port")]
	pub port: i32,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tool_config_ref: Option<String>,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub external_auth_config_ref: Option<String>,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub oidc_config: Option<OidcConfigRef>,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub telemetry: Option<TelemetrySpec>,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub audit: Option<AuditSpec>,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub group_ref: Option<String>,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub resources: Option<ResourceHints>,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	#[schemars(with = "Option<serde_json::Value>")]
	pub pod_template_spec: Option<serde_json::Value>,
}

impl Default for MCPRemoteProxySpec {
	fn default() -> Self {
		Self {
			remote_url: String::new(),
			port: default_proxy_port(),
			tool_config_ref: None,
			external_auth_config_ref: None,
			oidc_config: None,
			telemetry: None,
			audit: None,
			group_ref: None,
			resources: None,
			pod_template_spec: None,
		}
	}
}

/// Observed state of an MCPRemoteProxy.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MCPRemoteProxyStatus {
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
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tool_config_hash: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub external_auth_config_hash: Option<String>,
}

/// Persistent cache for downloaded model weights.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ModelCacheSpec {
	/// Requested size, e.g. `10Gi`.
	pub size: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub storage_class: Option<String>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub access_modes: Vec<String>,
}

/// Desired state of an embedding-model workload.
#[derive(Debug, Clone, PartialEq, Default, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
	group = "toolhive.stacklok.dev",
	version = "v1alpha1",
	kind = "EmbeddingServer",
	namespaced,
	status = "EmbeddingServerStatus",
	shortname = "embsrv",
	printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingServerSpec {
	/// Serving image, e.g. a text-embeddings-inference build.
	pub image: String,

	/// Model identifier passed to the server.
	pub model: String,

	/// Secret key holding a Hugging Face token for gated models.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub hf_token_secret_ref: Option<SecretKeyRef>,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub model_cache: Option<ModelCacheSpec>,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub resources: Option<ResourceHints>,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	#[schemars(with = "Option<serde_json::Value>")]
	pub pod_template_spec: Option<serde_json::Value>,
}

/// Observed state of an EmbeddingServer.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingServerStatus {
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
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_transport_serde() {
		assert_eq!(
			serde_json::to_string(&Transport::StreamableHttp).unwrap(),
			"\"streamable-http\""
		);
		let t: Transport = serde_json::from_str("\"sse\"").unwrap();
		assert_eq!(t, Transport::Sse);
	}

	#[test]
	fn test_server_spec_defaults() {
		let spec: MCPServerSpec = serde_json::from_str(
			r#"{
				"image": "docker.io/mcp/fetch"
			}"#,
		)
		.unwrap();
		assert_eq!(spec.transport, Transport::Stdio);
		assert_eq!(spec.port, 8080);
		assert_eq!(spec.target_port, None);
		assert!(spec.args.is_empty());
	}

	#[test]
	fn test_server_spec_full_round_trip() {
		let spec: MCPServerSpec = serde_json::from_str(
			r#"{
				"image": "ghcr.io/github/github-mcp-server:latest",
				"transport": "streamable-http",
				"port": 9090,
				"targetPort": 8080,
				"toolConfigRef": "filters",
				"groupRef": "dev-tools",
				"env": [{"name": "LOG_LEVEL", "value": "debug"}]
			}"#,
		)
		.unwrap();
		assert_eq!(spec.transport, Transport::StreamableHttp);
		assert_eq!(spec.target_port, Some(8080));
		assert_eq!(spec.group_ref.as_deref(), Some("dev-tools"));

		let json = serde_json::to_value(&spec).unwrap();
		assert_eq!(json["toolConfigRef"], "filters");
		// Unset optionals are omitted entirely
		assert!(json.get("podTemplateSpec").is_none());
	}
}
