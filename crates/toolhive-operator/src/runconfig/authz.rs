// Authorization policy translation

use super::AuthzConfig;
use crate::api::AuthzSpec;
use crate::error::{Error, Result};

/// Translate inline Cedar policies. An authz block with no policies is a
/// spec error rather than an implicit allow-all.
pub fn translate_authz(spec: Option<&AuthzSpec>) -> Result<Option<AuthzConfig>> {
	let Some(spec) = spec else {
		return Ok(None);
	};
	if spec.policies.is_empty() {
		return Err(Error::spec_invalid(
			"authz.policies",
			"authz is set but contains no policies",
		));
	}
	Ok(Some(AuthzConfig {
		version: "v1".to_string(),
		type_: "cedarv1".to_string(),
		policies: spec.policies.clone(),
		entities_json: spec.entities_json.clone(),
	}))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_translate_policies() {
		let spec = AuthzSpec {
			policies: vec!["permit(principal, action, resource);".to_string()],
			entities_json: None,
		};
		let config = translate_authz(Some(&spec)).unwrap().unwrap();
		assert_eq!(config.type_, "cedarv1");
		assert_eq!(config.policies.len(), 1);
	}

	#[test]
	fn test_empty_policies_rejected() {
		let err = translate_authz(Some(&AuthzSpec::default())).unwrap_err();
		assert!(matches!(err, Error::SpecInvalid { .. }));
	}

	#[test]
	fn test_absent_is_none() {
		assert!(translate_authz(None).unwrap().is_none());
	}
}
