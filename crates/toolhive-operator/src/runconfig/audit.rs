// Audit translation

use super::AuditConfig;
use crate::api::AuditSpec;

/// Translate the audit spec; the component is the owning resource's name.
pub fn translate_audit(spec: Option<&AuditSpec>, resource_name: &str) -> Option<AuditConfig> {
	let spec = spec?;
	if !spec.enabled {
		return None;
	}
	Some(AuditConfig {
		component: resource_name.to_string(),
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_enabled() {
		let spec = AuditSpec { enabled: true };
		let config = translate_audit(Some(&spec), "fetch").unwrap();
		assert_eq!(config.component, "fetch");
	}

	#[test]
	fn test_disabled_or_absent() {
		assert!(translate_audit(Some(&AuditSpec { enabled: false }), "x").is_none());
		assert!(translate_audit(None, "x").is_none());
	}
}
