// MCPExternalAuthConfig: discriminated union over outgoing-auth variants,
// plus the OIDC configuration sub-structures shared by the server kinds.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::status::{Condition, Phase};

/// Reference to a single key inside a Secret in the same namespace.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct SecretKeyRef {
	pub name: String,
	pub key: String,
}

/// Which authentication variant an MCPExternalAuthConfig carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum ExternalAuthType {
	TokenExchange,
	HeaderInjection,
	BearerToken,
	AwsSts,
	EmbeddedAuthServer,
	Unauthenticated,
}

impl std::fmt::Display for ExternalAuthType {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let s = match self {
			ExternalAuthType::TokenExchange => "tokenExchange",
			ExternalAuthType::HeaderInjection => "headerInjection",
			ExternalAuthType::BearerToken => "bearerToken",
			ExternalAuthType::AwsSts => "awsSts",
			ExternalAuthType::EmbeddedAuthServer => "embeddedAuthServer",
			ExternalAuthType::Unauthenticated => "unauthenticated",
		};
		f.write_str(s)
	}
}

/// RFC 8693 token exchange against an OAuth token endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TokenExchangeConfig {
	pub token_url: String,
	pub client_id: String,
	/// Client secret is only ever referenced, never inlined.
	pub client_secret_ref: SecretKeyRef,
	pub audience: String,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub scopes: Vec<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub subject_token_type: Option<String>,
}

/// Inject a static header (from a secret) into upstream requests.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HeaderInjectionConfig {
	pub header_name: String,
	pub value_secret_ref: SecretKeyRef,
	/// Optional literal prefix, e.g. `Bearer `.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub prefix: Option<String>,
}

/// Forward a static bearer token from a secret.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BearerTokenConfig {
	pub token_secret_ref: SecretKeyRef,
}

/// Exchange the incoming identity for AWS credentials via STS.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AwsStsConfig {
	pub role_arn: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub region: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub audience: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub session_name: Option<String>,
}

/// Run the embedded auth server alongside the proxy.
///
/// Key material is mounted read-only from the referenced secrets; the
/// translator never inlines it into the runtime config.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddedAuthServerConfig {
	/// PEM signing keys, mounted as `key-<idx>.pem`.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub signing_key_refs: Vec<SecretKeyRef>,
	/// HMAC secrets, mounted as `hmac-<idx>`.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub hmac_secret_refs: Vec<SecretKeyRef>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub issuer: Option<String>,
}

/// OIDC configuration, either inline or loaded from a ConfigMap.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OidcConfigRef {
	/// `inline` or `configmap`.
	#[serde(rename = "type", default = "default_oidc_type")]
	pub type_: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub inline: Option<OidcInlineConfig>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub config_map: Option<OidcConfigMapRef>,
	/// Extra CA bundle for the issuer, from a ConfigMap.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub ca_bundle_ref: Option<OidcCaBundleRef>,
	/// Resource URL advertised in protected-resource metadata.
	/// Required when used together with an embedded auth server.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub resource_url: Option<String>,
}

fn default_oidc_type() -> String {
	"inline".to_string()
}

/// Inline OIDC issuer details.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OidcInlineConfig {
	pub issuer: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub audience: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub jwks_url: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub client_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub client_secret_ref: Option<SecretKeyRef>,
}

/// ConfigMap-backed OIDC document.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OidcConfigMapRef {
	pub name: String,
	#[serde(default = "default_oidc_key")]
	pub key: String,
}

fn default_oidc_key() -> String {
	"oidc.json".to_string()
}

/// ConfigMap key carrying a PEM CA bundle.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OidcCaBundleRef {
	pub name: String,
	#[serde(default = "default_ca_key")]
	pub key: String,
}

fn default_ca_key() -> String {
	"ca.crt".to_string()
}

/// Desired state of an external-auth configuration.
///
/// Exactly the sub-structure matching `type` must be present; the admission
/// webhook and the reconciler both enforce this.
#[derive(Debug, Clone, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
	group = "toolhive.stacklok.dev",
	version = "v1alpha1",
	kind = "MCPExternalAuthConfig",
	namespaced,
	status = "MCPExternalAuthConfigStatus",
	shortname = "mcpeac",
	printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.type"}"#,
	printcolumn = r#"{"name":"Hash","type":"string","jsonPath":".status.configHash"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MCPExternalAuthConfigSpec {
	#[serde(rename = "type")]
	pub type_: ExternalAuthType,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub token_exchange: Option<TokenExchangeConfig>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub header_injection: Option<HeaderInjectionConfig>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub bearer_token: Option<BearerTokenConfig>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub aws_sts: Option<AwsStsConfig>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub embedded_auth_server: Option<EmbeddedAuthServerConfig>,
}

impl MCPExternalAuthConfigSpec {
	/// Check that exactly the variant named by `type` is populated.
	/// Returns the offending detail on mismatch.
	pub fn validate_variant(&self) -> Result<(), String> {
		let populated: Vec<&str> = [
			("tokenExchange", self.token_exchange.is_some()),
			("headerInjection", self.header_injection.is_some()),
			("bearerToken", self.bearer_token.is_some()),
			("awsSts", self.aws_sts.is_some()),
			("embeddedAuthServer", self.embedded_auth_server.is_some()),
		]
		.iter()
		.filter(|(_, set)| *set)
		.map(|(name, _)| *name)
		.collect();

		let expected = match self.type_ {
			ExternalAuthType::TokenExchange => Some("tokenExchange"),
			ExternalAuthType::HeaderInjection => Some("headerInjection"),
			ExternalAuthType::BearerToken => Some("bearerToken"),
			ExternalAuthType::AwsSts => Some("awsSts"),
			ExternalAuthType::EmbeddedAuthServer => Some("embeddedAuthServer"),
			ExternalAuthType::Unauthenticated => None,
		};

		match (expected, populated.as_slice()) {
			(None, []) => Ok(()),
			(None, extra) => Err(format!(
				"type is unauthenticated but {} is set",
				extra.join(", ")
			)),
			(Some(want), [got]) if *got == want => Ok(()),
			(Some(want), []) => Err(format!("type is {} but {} is not set", self.type_, want)),
			(Some(_), got) => Err(format!(
				"exactly one variant must be set for type {}, found: {}",
				self.type_,
				got.join(", ")
			)),
		}
	}
}

/// Observed state of an MCPExternalAuthConfig.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MCPExternalAuthConfigStatus {
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

#[cfg(test)]
mod tests {
	use super::*;

	fn token_exchange_spec() -> MCPExternalAuthConfigSpec {
		MCPExternalAuthConfigSpec {
			type_: ExternalAuthType::TokenExchange,
			token_exchange: Some(TokenExchangeConfig {
				token_url: "https://oauth.example.com/token".to_string(),
				client_id: "cid".to_string(),
				client_secret_ref: SecretKeyRef {
					name: "S".to_string(),
					key: "k".to_string(),
				},
				audience: "aud".to_string(),
				scopes: vec!["read".to_string(), "write".to_string()],
				subject_token_type: None,
			}),
			header_injection: None,
			bearer_token: None,
			aws_sts: None,
			embedded_auth_server: None,
		}
	}

	#[test]
	fn test_validate_variant_ok() {
		assert!(token_exchange_spec().validate_variant().is_ok());
	}

	#[test]
	fn test_validate_variant_missing() {
		let mut spec = token_exchange_spec();
		spec.token_exchange = None;
		let err = spec.validate_variant().unwrap_err();
		assert!(err.contains("tokenExchange is not set"), "{err}");
	}

	#[test]
	fn test_validate_variant_extra() {
		let mut spec = token_exchange_spec();
		spec.bearer_token = Some(BearerTokenConfig {
			token_secret_ref: SecretKeyRef {
				name: "t".to_string(),
				key: "k".to_string(),
			},
		});
		assert!(spec.validate_variant().is_err());
	}

	#[test]
	fn test_unauthenticated_rejects_payload() {
		let mut spec = token_exchange_spec();
		spec.type_ = ExternalAuthType::Unauthenticated;
		let err = spec.validate_variant().unwrap_err();
		assert!(err.contains("unauthenticated"), "{err}");
	}

	#[test]
	fn test_type_serde_camel_case() {
		let json = serde_json::to_string(&ExternalAuthType::TokenExchange).unwrap();
		assert_eq!(json, "\"tokenExchange\"");
		let t: ExternalAuthType = serde_json::from_str("\"embeddedAuthServer\"").unwrap();
		assert_eq!(t, ExternalAuthType::EmbeddedAuthServer);
	}
}
