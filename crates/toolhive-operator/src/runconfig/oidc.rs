// OIDC translation. The reconciler resolves configmap-backed documents and
// CA bundles up front; this module only maps resolved data.

use serde::Deserialize;

use super::OidcRuntimeConfig;
use crate::resources::env::OIDC_CLIENT_SECRET_VAR;

/// Mount path of a resolved OIDC CA bundle inside the proxy container.
pub const OIDC_CA_CERT_PATH: &str = "/etc/toolhive/oidc/ca.crt";

/// OIDC details after reference resolution, independent of whether they came
/// from the inline form or a ConfigMap document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedOidc {
	pub issuer: String,
	pub audience: Option<String>,
	pub jwks_url: Option<String>,
	pub client_id: Option<String>,
	/// Whether a client-secret reference exists; the value stays in the
	/// secret, only the env binding is recorded.
	pub has_client_secret: bool,
	/// Set when a CA bundle ConfigMap was resolved and mounted.
	pub has_ca_bundle: bool,
	pub resource_url: Option<String>,
}

/// Document shape accepted from a ConfigMap-backed OIDC config.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OidcDocument {
	issuer: String,
	#[serde(default)]
	audience: Option<String>,
	#[serde(default)]
	jwks_url: Option<String>,
	#[serde(default)]
	client_id: Option<String>,
}

/// Parse a ConfigMap-sourced OIDC document. The error string names the
/// problem for the ReferentInvalid condition.
pub fn parse_oidc_document(doc: &str) -> Result<ResolvedOidc, String> {
	let doc: OidcDocument =
		serde_json::from_str(doc).map_err(|e| format!("invalid OIDC document: {e}"))?;
	if doc.issuer.is_empty() {
		return Err("OIDC document has empty issuer".to_string());
	}
	Ok(ResolvedOidc {
		issuer: doc.issuer,
		audience: doc.audience,
		jwks_url: doc.jwks_url,
		client_id: doc.client_id,
		has_client_secret: false,
		has_ca_bundle: false,
		resource_url: None,
	})
}

/// Map resolved OIDC details into the runtime config block.
pub fn translate_oidc(resolved: Option<&ResolvedOidc>) -> Option<OidcRuntimeConfig> {
	let resolved = resolved?;
	Some(OidcRuntimeConfig {
		issuer: resolved.issuer.clone(),
		audience: resolved.audience.clone(),
		jwks_url: resolved.jwks_url.clone(),
		client_id: resolved.client_id.clone(),
		client_secret_env: resolved
			.has_client_secret
			.then(|| OIDC_CLIENT_SECRET_VAR.to_string()),
		ca_cert_path: resolved
			.has_ca_bundle
			.then(|| OIDC_CA_CERT_PATH.to_string()),
		resource_url: resolved.resource_url.clone(),
	})
}
