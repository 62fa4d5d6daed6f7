// Label and annotation sets stamped on every managed child object

use std::collections::BTreeMap;

/// Value of `app.kubernetes.io/managed-by` on every child.
pub const MANAGED_BY: &str = "toolhive-operator";

/// Label tying a child back to its owning server resource.
pub const SERVER_LABEL: &str = "toolhive.stacklok.dev/server";

/// Label tying a child back to its owning registry resource.
pub const REGISTRY_LABEL: &str = "toolhive.stacklok.dev/registry";

/// Annotation on pod templates carrying the runconfig hash, so a config
/// change rolls the workload.
pub const RUNCONFIG_HASH_ANNOTATION: &str = "toolhive.stacklok.dev/runconfig-hash";

/// Standard label set for a managed child.
pub fn standard_labels(name: &str, instance: &str, component: &str) -> BTreeMap<String, String> {
	BTreeMap::from([
		("app.kubernetes.io/name".to_string(), name.to_string()),
		("app.kubernetes.io/instance".to_string(), instance.to_string()),
		("app.kubernetes.io/component".to_string(), component.to_string()),
		("app.kubernetes.io/managed-by".to_string(), MANAGED_BY.to_string()),
	])
}

/// Merge `overlay` into `base`; overlay wins on key collisions.
pub fn merge(
	base: BTreeMap<String, String>,
	overlay: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
	let mut merged = base;
	for (k, v) in overlay {
		merged.insert(k.clone(), v.clone());
	}
	merged
}
