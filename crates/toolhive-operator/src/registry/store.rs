// Persistence of canonical registry data in a ConfigMap owned by the
// registry object. Ownership releases old versions to cluster GC.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::ObjectMeta;
use kube::{Api, Client, ResourceExt};

use super::schema::RegistryData;
use crate::api::MCPRegistry;
use crate::error::{Error, Result};
use crate::resources::{apply, labels, owner_reference};

/// Key under which the canonical document is stored.
pub const STORAGE_KEY: &str = "registry.json";

/// Name of the storage ConfigMap for a registry.
pub fn storage_name(registry: &str) -> String {
	format!("{registry}-registry-storage")
}

/// Write the canonical document into the registry's storage ConfigMap.
pub async fn persist(
	client: &Client,
	namespace: &str,
	registry: &MCPRegistry,
	data: &RegistryData,
) -> Result<()> {
	let registry_name = registry.name_any();
	let owner = owner_reference(registry)?;
	let json = serde_json::to_string_pretty(data)
		.map_err(|e| Error::Transient(format!("serializing registry data: {e}")))?;

	let mut cm_labels =
		labels::standard_labels(&registry_name, &registry_name, "registry-storage");
	cm_labels.insert(labels::REGISTRY_LABEL.to_string(), registry_name.clone());

	let name = storage_name(&registry_name);
	let config_map = ConfigMap {
		metadata: ObjectMeta {
			name: Some(name.clone()),
			namespace: Some(namespace.to_string()),
			labels: Some(cm_labels),
			owner_references: Some(vec![owner]),
			..Default::default()
		},
		data: Some(BTreeMap::from([(STORAGE_KEY.to_string(), json)])),
		..Default::default()
	};

	let api: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
	apply(&api, &name, &config_map).await?;
	Ok(())
}

/// Load the stored canonical document, if any.
pub async fn load(
	client: &Client,
	namespace: &str,
	registry_name: &str,
) -> Result<Option<RegistryData>> {
	let api: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
	let Some(config_map) = api.get_opt(&storage_name(registry_name)).await? else {
		return Ok(None);
	};
	let Some(json) = config_map
		.data
		.as_ref()
		.and_then(|data| data.get(STORAGE_KEY))
	else {
		return Ok(None);
	};
	let data = RegistryData::parse(json.as_bytes()).map_err(|message| {
		Error::referent_invalid("ConfigMap", storage_name(registry_name), message)
	})?;
	Ok(Some(data))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_storage_name() {
		assert_eq!(storage_name("community"), "community-registry-storage");
	}
}
