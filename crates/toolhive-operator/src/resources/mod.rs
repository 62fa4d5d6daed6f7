// Builders for the child objects materialized by the reconcilers

pub mod deployment;
pub mod env;
pub mod labels;
pub mod probes;
pub mod rbac;
pub mod service;

use k8s_openapi::api::core::v1::{PodTemplateSpec, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{Patch, PatchParams};
use kube::{Api, Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::api::{ResourceHints, ResourceList};
use crate::error::{Error, Result};
use crate::status::FIELD_MANAGER;

/// Controller owner reference pointing a child at its owning custom
/// resource, so cluster garbage collection reaps children on deletion.
pub fn owner_reference<K>(owner: &K) -> Result<OwnerReference>
where
	K: Resource<DynamicType = ()>,
{
	owner.controller_owner_ref(&()).ok_or_else(|| {
		Error::Transient(format!(
			"owner {} has no name yet",
			owner.name_any()
		))
	})
}

/// Server-side apply of a child object under the operator's field manager.
///
/// Apply is used instead of update so concurrently-edited fields owned by
/// other managers are left alone.
pub async fn apply<K>(api: &Api<K>, name: &str, object: &K) -> Result<K>
where
	K: Resource + Clone + std::fmt::Debug + Serialize + DeserializeOwned,
{
	let params = PatchParams::apply(FIELD_MANAGER).force();
	api.patch(name, &params, &Patch::Apply(object))
		.await
		.map_err(Error::Kube)
}

/// Translate declared resource hints into container requirements.
pub fn to_resource_requirements(hints: &ResourceHints) -> ResourceRequirements {
	fn quantities(list: &ResourceList) -> BTreeMap<String, Quantity> {
		let mut out = BTreeMap::new();
		if let Some(cpu) = &list.cpu {
			out.insert("cpu".to_string(), Quantity(cpu.clone()));
		}
		if let Some(memory) = &list.memory {
			out.insert("memory".to_string(), Quantity(memory.clone()));
		}
		out
	}

	ResourceRequirements {
		limits: hints.limits.as_ref().map(quantities),
		requests: hints.requests.as_ref().map(quantities),
		..Default::default()
	}
}

/// RFC 7386 merge of `patch` into `base`; nulls delete, objects recurse,
/// everything else replaces.
fn json_merge(base: &mut Value, patch: &Value) {
	match (base, patch) {
		(Value::Object(base_map), Value::Object(patch_map)) => {
			for (key, value) in patch_map {
				if value.is_null() {
					base_map.remove(key);
				} else {
					json_merge(base_map.entry(key.clone()).or_insert(Value::Null), value);
				}
			}
		},
		(slot, value) => *slot = value.clone(),
	}
}

/// Apply a user-declared pod-template patch to the generated template.
///
/// Returns `Ok(None)`-like no-op when the patch is absent; a patch that does
/// not deserialize back into a pod template is a spec error, surfaced as the
/// `PodTemplateValid` condition by the caller.
pub fn apply_pod_template_patch(
	template: PodTemplateSpec,
	patch: Option<&Value>,
) -> Result<PodTemplateSpec> {
	let Some(patch) = patch else {
		return Ok(template);
	};
	if !patch.is_object() {
		return Err(Error::spec_invalid(
			"podTemplateSpec",
			"pod template patch must be an object",
		));
	}

	let mut merged = serde_json::to_value(&template).map_err(|e| {
		Error::Transient(format!("serializing pod template: {e}"))
	})?;
	json_merge(&mut merged, patch);
	serde_json::from_value(merged).map_err(|e| {
		Error::spec_invalid("podTemplateSpec", format!("malformed pod template patch: {e}"))
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use k8s_openapi::api::core::v1::{Container, PodSpec};
	use serde_json::json;

	fn base_template() -> PodTemplateSpec {
		PodTemplateSpec {
			metadata: None,
			spec: Some(PodSpec {
				containers: vec![Container {
					name: "toolhive-proxy".to_string(),
					image: Some("proxy:latest".to_string()),
					..Default::default()
				}],
				..Default::default()
			}),
		}
	}

	#[test]
	fn test_patch_absent_is_noop() {
		let template = base_template();
		let out = apply_pod_template_patch(template.clone(), None).unwrap();
		assert_eq!(out, template);
	}

	#[test]
	fn test_patch_merges_node_selector() {
		let patch = json!({
			"spec": {"nodeSelector": {"disktype": "ssd"}}
		});
		let out = apply_pod_template_patch(base_template(), Some(&patch)).unwrap();
		let selector = out.spec.unwrap().node_selector.unwrap();
		assert_eq!(selector["disktype"], "ssd");
	}

	#[test]
	fn test_malformed_patch_is_spec_invalid() {
		let patch = json!({
			"spec": {"containers": "not-a-list"}
		});
		let err = apply_pod_template_patch(base_template(), Some(&patch)).unwrap_err();
		assert!(matches!(err, Error::SpecInvalid { .. }));
	}

	#[test]
	fn test_non_object_patch_rejected() {
		let patch = json!("nope");
		let err = apply_pod_template_patch(base_template(), Some(&patch)).unwrap_err();
		assert!(matches!(err, Error::SpecInvalid { .. }));
	}

	#[test]
	fn test_resource_requirements() {
		let hints = ResourceHints {
			limits: Some(ResourceList {
				cpu: Some("500m".to_string()),
				memory: Some("256Mi".to_string()),
			}),
			requests: Some(ResourceList {
				cpu: Some("100m".to_string()),
				memory: None,
			}),
		};
		let reqs = to_resource_requirements(&hints);
		assert_eq!(reqs.limits.unwrap()["memory"], Quantity("256Mi".to_string()));
		let requests = reqs.requests.unwrap();
		assert_eq!(requests["cpu"], Quantity("100m".to_string()));
		assert!(!requests.contains_key("memory"));
	}
}
