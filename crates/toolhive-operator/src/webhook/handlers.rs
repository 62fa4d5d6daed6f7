// Admission handlers for the validated kinds. Each handler parses the
// admission review, evaluates a structured verdict, and maps it onto the
// cluster admission protocol.

use axum::Json;
use kube::core::DynamicObject;
use kube::core::admission::{AdmissionResponse, AdmissionReview, Operation};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::api::{
	MCPExternalAuthConfig, MCPExternalAuthConfigSpec, VirtualMCPCompositeToolDefinition,
	VirtualMCPCompositeToolDefinitionSpec, VirtualMCPServer, VirtualMCPServerSpec,
};

/// Structured validation verdict, independent of the wire protocol.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Verdict {
	pub allow: bool,
	pub warnings: Vec<String>,
	pub error: Option<String>,
}

impl Verdict {
	pub fn allow() -> Self {
		Self {
			allow: true,
			warnings: Vec::new(),
			error: None,
		}
	}

	pub fn deny(error: impl Into<String>) -> Self {
		Self {
			allow: false,
			warnings: Vec::new(),
			error: Some(error.into()),
		}
	}

	pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
		self.warnings.push(warning.into());
		self
	}
}

/// Validate a VirtualMCPServer spec.
pub fn validate_virtual_server(spec: &VirtualMCPServerSpec) -> Verdict {
	match spec.validate() {
		Ok(()) => {
			let mut verdict = Verdict::allow();
			if spec.composite_tool_refs.is_empty()
				&& spec.aggregation.is_none()
			{
				verdict = verdict.with_warning(
					"no aggregation policy set; tool-name conflicts resolve by prefixing",
				);
			}
			verdict
		},
		Err(message) => Verdict::deny(message),
	}
}

/// Validate a composite tool definition spec.
pub fn validate_composite_tool(spec: &VirtualMCPCompositeToolDefinitionSpec) -> Verdict {
	match spec.validate() {
		Ok(()) => Verdict::allow(),
		Err(message) => Verdict::deny(message),
	}
}

/// Validate an external-auth config spec.
pub fn validate_external_auth(spec: &MCPExternalAuthConfigSpec) -> Verdict {
	if let Err(message) = spec.validate_variant() {
		return Verdict::deny(message);
	}
	if let Some(token_exchange) = &spec.token_exchange {
		if token_exchange.token_url.is_empty() {
			return Verdict::deny("tokenExchange.tokenUrl must not be empty");
		}
		if token_exchange.audience.is_empty() {
			return Verdict::deny("tokenExchange.audience must not be empty");
		}
	}
	if let Some(header_injection) = &spec.header_injection {
		if header_injection.header_name.is_empty() {
			return Verdict::deny("headerInjection.headerName must not be empty");
		}
	}
	if let Some(aws_sts) = &spec.aws_sts {
		if aws_sts.role_arn.is_empty() {
			return Verdict::deny("awsSts.roleArn must not be empty");
		}
	}
	Verdict::allow()
}

fn respond<K>(
	review: AdmissionReview<K>,
	validate: impl Fn(&K) -> Verdict,
) -> Json<AdmissionReview<DynamicObject>>
where
	K: DeserializeOwned + Clone + kube::Resource,
{
	let request = match review.request {
		Some(request) => request,
		None => {
			warn!(target: "webhook", "admission review without request");
			return Json(
				AdmissionResponse::invalid("admission review has no request").into_review(),
			);
		},
	};

	let mut response = AdmissionResponse::from(&request);

	// Deletions carry no new object to validate.
	if matches!(request.operation, Operation::Delete) {
		return Json(response.into_review());
	}

	let verdict = match &request.object {
		Some(object) => validate(object),
		None => Verdict::deny("admission request has no object"),
	};
	debug!(target: "webhook", allow = verdict.allow, "admission evaluated");

	if !verdict.warnings.is_empty() {
		response.warnings = Some(verdict.warnings);
	}
	if !verdict.allow {
		response = response.deny(verdict.error.unwrap_or_else(|| "denied".to_string()));
	}
	Json(response.into_review())
}

/// `POST /validate-toolhive-stacklok-dev-v1alpha1-virtualmcpserver`
pub async fn admit_virtual_server(
	Json(review): Json<AdmissionReview<VirtualMCPServer>>,
) -> Json<AdmissionReview<DynamicObject>> {
	respond(review, |vmcp| validate_virtual_server(&vmcp.spec))
}

/// `POST /validate-toolhive-stacklok-dev-v1alpha1-virtualmcpcompositetooldefinition`
pub async fn admit_composite_tool(
	Json(review): Json<AdmissionReview<VirtualMCPCompositeToolDefinition>>,
) -> Json<AdmissionReview<DynamicObject>> {
	respond(review, |def| validate_composite_tool(&def.spec))
}

/// `POST /validate-toolhive-stacklok-dev-v1alpha1-mcpexternalauthconfig`
pub async fn admit_external_auth(
	Json(review): Json<AdmissionReview<MCPExternalAuthConfig>>,
) -> Json<AdmissionReview<DynamicObject>> {
	respond(review, |config| validate_external_auth(&config.spec))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::api::{ExternalAuthType, SecretKeyRef, TokenExchangeConfig};

	#[test]
	fn test_validate_virtual_server_ok() {
		let spec: VirtualMCPServerSpec =
			serde_json::from_str(r#"{"groupRef": "dev"}"#).unwrap();
		let verdict = validate_virtual_server(&spec);
		assert!(verdict.allow);
		assert_eq!(verdict.warnings.len(), 1);
	}

	#[test]
	fn test_validate_virtual_server_empty_group() {
		let spec: VirtualMCPServerSpec = serde_json::from_str(r#"{"groupRef": ""}"#).unwrap();
		let verdict = validate_virtual_server(&spec);
		assert!(!verdict.allow);
		assert!(verdict.error.unwrap().contains("groupRef"));
	}

	#[test]
	fn test_validate_composite_tool() {
		let spec: VirtualMCPCompositeToolDefinitionSpec = serde_json::from_str(
			r#"{"steps": [{"name": "a", "tool": "x.y"}]}"#,
		)
		.unwrap();
		assert!(validate_composite_tool(&spec).allow);

		let empty = VirtualMCPCompositeToolDefinitionSpec::default();
		assert!(!validate_composite_tool(&empty).allow);
	}

	#[test]
	fn test_validate_external_auth_requires_fields() {
		let spec = MCPExternalAuthConfigSpec {
			type_: ExternalAuthType::TokenExchange,
			token_exchange: Some(TokenExchangeConfig {
				token_url: String::new(),
				client_id: "cid".to_string(),
				client_secret_ref: SecretKeyRef {
					name: "s".to_string(),
					key: "k".to_string(),
				},
				audience: "aud".to_string(),
				scopes: vec![],
				subject_token_type: None,
			}),
			header_injection: None,
			bearer_token: None,
			aws_sts: None,
			embedded_auth_server: None,
		};
		let verdict = validate_external_auth(&spec);
		assert!(!verdict.allow);
		assert!(verdict.error.unwrap().contains("tokenUrl"));
	}

	#[test]
	fn test_validate_external_auth_variant_mismatch() {
		let spec = MCPExternalAuthConfigSpec {
			type_: ExternalAuthType::BearerToken,
			token_exchange: None,
			header_injection: None,
			bearer_token: None,
			aws_sts: None,
			embedded_auth_server: None,
		};
		assert!(!validate_external_auth(&spec).allow);
	}
}
