// Spec-to-config translation layer.
//
// Translators are pure: all referents are resolved by the reconciler first
// and passed in, so the same inputs always serialize to identical bytes and
// the runconfig hash is a stable change detector. Maps are BTreeMaps for the
// same reason.

mod audit;
mod auth_server;
mod authz;
mod external_auth;
mod oidc;
mod telemetry;
mod token_exchange;

pub use audit::translate_audit;
pub use auth_server::{AUTH_SERVER_HMAC_PATH, AUTH_SERVER_KEYS_PATH, translate_auth_server};
pub use authz::translate_authz;
pub use external_auth::{TranslatedAuth, translate_external_auth};
pub use oidc::{ResolvedOidc, parse_oidc_document, translate_oidc};
pub use telemetry::{normalize_endpoint, translate_telemetry};
pub use token_exchange::translate_token_exchange;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::api::{ToolOverride, Transport};
use crate::hash;

/// Current runconfig schema version.
pub const SCHEMA_VERSION: &str = "v1";

/// Telemetry block of the runtime config.
///
/// There is deliberately no service-version field here: the runner resolves
/// its own version at serialization time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
	/// host:port, no scheme.
	pub endpoint: String,
	pub service_name: String,
	#[serde(default)]
	pub insecure: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub sampling_ratio: Option<f64>,
}

/// Audit block of the runtime config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditConfig {
	pub component: String,
}

/// Authorization block of the runtime config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthzConfig {
	pub version: String,
	#[serde(rename = "type")]
	pub type_: String,
	pub policies: Vec<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub entities_json: Option<String>,
}

/// OIDC block of the runtime config.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OidcRuntimeConfig {
	pub issuer: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub audience: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub jwks_url: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub client_id: Option<String>,
	/// Env-var name holding the client secret; never the value itself.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub client_secret_env: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub ca_cert_path: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub resource_url: Option<String>,
}

/// One proxy middleware entry, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Middleware {
	TokenExchange {
		token_url: String,
		client_id: String,
		/// Env-var name the runner reads the client secret from.
		client_secret_env: String,
		audience: String,
		#[serde(default, skip_serializing_if = "Vec::is_empty")]
		scopes: Vec<String>,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		subject_token_type: Option<String>,
	},
	HeaderInjection {
		header_name: String,
		/// Env-var name the runner reads the header value from.
		value_env: String,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		prefix: Option<String>,
	},
	BearerToken {
		token_env: String,
	},
	AwsSts {
		role_arn: String,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		region: Option<String>,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		audience: Option<String>,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		session_name: Option<String>,
	},
	AuthServer {
		resource_url: String,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		issuer: Option<String>,
		#[serde(default, skip_serializing_if = "Vec::is_empty")]
		signing_key_paths: Vec<String>,
		#[serde(default, skip_serializing_if = "Vec::is_empty")]
		hmac_paths: Vec<String>,
	},
}

/// The runtime configuration artifact consumed by the proxy runner.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RunConfig {
	pub schema_version: String,
	pub name: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub image: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub remote_url: Option<String>,
	pub transport: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub proxy_mode: Option<String>,
	pub host: String,
	pub port: i32,
	pub target_port: i32,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub cmd_args: Vec<String>,
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub env_vars: BTreeMap<String, String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tools_filter: Option<Vec<String>>,
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub tools_override: BTreeMap<String, ToolOverride>,
	/// Resolved permission profile document, builtin or ConfigMap-sourced.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub permission_profile: Option<serde_json::Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub telemetry: Option<TelemetryConfig>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub audit: Option<AuditConfig>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub authz: Option<AuthzConfig>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub oidc: Option<OidcRuntimeConfig>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub middlewares: Vec<Middleware>,
}

impl RunConfig {
	/// Canonical serialized form; input to the config hash.
	pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
		serde_json::to_vec(self)
	}

	/// Stable fingerprint of this config.
	pub fn config_hash(&self) -> Result<String, serde_json::Error> {
		Ok(hash::content_hash(&self.to_json_bytes()?))
	}
}

/// Pipeline carrier for assembling a [`RunConfig`].
///
/// Each step either records a section or no-ops when the corresponding spec
/// sub-structure is absent, so the call site reads as a flat pipeline.
#[derive(Debug)]
pub struct RunConfigBuilder {
	config: RunConfig,
}

impl RunConfigBuilder {
	pub fn new(name: &str, transport: Transport, port: i32, target_port: Option<i32>) -> Self {
		Self {
			config: RunConfig {
				schema_version: SCHEMA_VERSION.to_string(),
				name: name.to_string(),
				transport: transport.to_string(),
				host: "0.0.0.0".to_string(),
				port,
				target_port: target_port.unwrap_or(port),
				..Default::default()
			},
		}
	}

	pub fn image(mut self, image: &str) -> Self {
		self.config.image = Some(image.to_string());
		self
	}

	pub fn remote_url(mut self, url: &str) -> Self {
		self.config.remote_url = Some(url.to_string());
		self
	}

	pub fn proxy_mode(mut self, mode: Option<String>) -> Self {
		self.config.proxy_mode = mode;
		self
	}

	pub fn args(mut self, args: &[String]) -> Self {
		self.config.cmd_args = args.to_vec();
		self
	}

	pub fn env_vars(mut self, vars: BTreeMap<String, String>) -> Self {
		self.config.env_vars = vars;
		self
	}

	pub fn tools_filter(mut self, filter: Option<Vec<String>>) -> Self {
		self.config.tools_filter = filter;
		self
	}

	pub fn tools_override(mut self, overrides: BTreeMap<String, ToolOverride>) -> Self {
		self.config.tools_override = overrides;
		self
	}

	pub fn permission_profile(mut self, profile: Option<serde_json::Value>) -> Self {
		self.config.permission_profile = profile;
		self
	}

	pub fn telemetry(mut self, telemetry: Option<TelemetryConfig>) -> Self {
		self.config.telemetry = telemetry;
		self
	}

	pub fn audit(mut self, audit: Option<AuditConfig>) -> Self {
		self.config.audit = audit;
		self
	}

	pub fn authz(mut self, authz: Option<AuthzConfig>) -> Self {
		self.config.authz = authz;
		self
	}

	pub fn oidc(mut self, oidc: Option<OidcRuntimeConfig>) -> Self {
		self.config.oidc = oidc;
		self
	}

	pub fn middleware(mut self, middleware: Option<Middleware>) -> Self {
		if let Some(mw) = middleware {
			self.config.middlewares.push(mw);
		}
		self
	}

	pub fn build(self) -> RunConfig {
		self.config
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn minimal() -> RunConfig {
		RunConfigBuilder::new("fetch", Transport::Stdio, 8080, None)
			.image("docker.io/mcp/fetch")
			.build()
	}

	#[test]
	fn test_builder_defaults() {
		let config = minimal();
		assert_eq!(config.schema_version, "v1");
		assert_eq!(config.transport, "stdio");
		assert_eq!(config.target_port, 8080);
		assert_eq!(config.host, "0.0.0.0");
	}

	#[test]
	fn test_serialization_deterministic() {
		let a = minimal().to_json_bytes().unwrap();
		let b = minimal().to_json_bytes().unwrap();
		assert_eq!(a, b);
		assert_eq!(minimal().config_hash().unwrap(), minimal().config_hash().unwrap());
	}

	#[test]
	fn test_hash_changes_with_spec() {
		let base = minimal();
		let changed = RunConfigBuilder::new("fetch", Transport::Stdio, 8080, Some(9000))
			.image("docker.io/mcp/fetch")
			.build();
		assert_ne!(
			base.config_hash().unwrap(),
			changed.config_hash().unwrap()
		);
	}

	#[test]
	fn test_middleware_tagging() {
		let config = RunConfigBuilder::new("x", Transport::Sse, 8080, None)
			.middleware(Some(Middleware::BearerToken {
				token_env: "TOOLHIVE_SECRET_BEARER".to_string(),
			}))
			.build();
		let json = serde_json::to_value(&config).unwrap();
		assert_eq!(json["middlewares"][0]["type"], "bearerToken");
	}

	#[test]
	fn test_round_trip() {
		let config = minimal();
		let bytes = config.to_json_bytes().unwrap();
		let parsed: RunConfig = serde_json::from_slice(&bytes).unwrap();
		assert_eq!(parsed, config);
	}
}
