// Image admission: a server in a namespace with at least one enforcing
// registry is materialized only when some enforcing registry contains an
// entry matching its `server-registry-name` label and image.

use kube::{Api, Client, ResourceExt};

use super::schema::RegistryData;
use super::store;
use crate::api::{MCPRegistry, MCPServer, SERVER_REGISTRY_NAME_LABEL};
use crate::error::{Error, Result};

/// Decision against a single registry document.
fn entry_matches(data: &RegistryData, registry_entry: &str, image: &str) -> bool {
	data.servers
		.get(registry_entry)
		.is_some_and(|entry| entry.image == image)
}

/// Enforce registry admission for a server. No enforcing registry in the
/// namespace means admission passes.
pub async fn enforce_server(client: &Client, namespace: &str, server: &MCPServer) -> Result<()> {
	let registries: Api<MCPRegistry> = Api::namespaced(client.clone(), namespace);
	let enforcing: Vec<MCPRegistry> = registries
		.list(&Default::default())
		.await?
		.items
		.into_iter()
		.filter(|registry| registry.spec.enforcing())
		.collect();
	if enforcing.is_empty() {
		return Ok(());
	}

	let server_name = server.name_any();
	let Some(registry_entry) = server
		.labels()
		.get(SERVER_REGISTRY_NAME_LABEL)
		.cloned()
	else {
		return Err(Error::referent_invalid(
			"MCPServer",
			&server_name,
			format!(
				"registry enforcement is active but label {SERVER_REGISTRY_NAME_LABEL:?} is not set"
			),
		));
	};

	for registry in &enforcing {
		let Some(data) = store::load(client, namespace, &registry.name_any()).await? else {
			continue;
		};
		if entry_matches(&data, &registry_entry, &server.spec.image) {
			return Ok(());
		}
	}

	Err(Error::referent_invalid(
		"MCPServer",
		&server_name,
		format!(
			"no enforcing registry has an entry {:?} with image {:?}",
			registry_entry, server.spec.image
		),
	))
}

/// Tool documents for hybrid routing: `server/tool` ids mapped to a text
/// document built from the registry entry's description and tool name.
pub async fn member_tool_documents(
	client: &Client,
	namespace: &str,
	members: &[MCPServer],
) -> Result<Vec<(String, String)>> {
	let registries: Api<MCPRegistry> = Api::namespaced(client.clone(), namespace);
	let mut documents = Vec::new();

	for registry in registries.list(&Default::default()).await?.items {
		let Some(data) = store::load(client, namespace, &registry.name_any()).await? else {
			continue;
		};
		for member in members {
			let Some(entry_name) = member.labels().get(SERVER_REGISTRY_NAME_LABEL) else {
				continue;
			};
			let Some(entry) = data.servers.get(entry_name) else {
				continue;
			};
			let description = entry.description.clone().unwrap_or_default();
			for tool in &entry.tools {
				documents.push((
					format!("{}/{}", member.name_any(), tool),
					format!("{tool} {description}"),
				));
			}
		}
	}
	Ok(documents)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::registry::schema::RegistryServer;

	fn data_with(name: &str, image: &str) -> RegistryData {
		let mut data = RegistryData::default();
		data.servers.insert(
			name.to_string(),
			RegistryServer {
				image: image.to_string(),
				..Default::default()
			},
		);
		data
	}

	#[test]
	fn test_entry_matches() {
		let data = data_with("github", "ghcr.io/github/github-mcp-server:latest");
		assert!(entry_matches(
			&data,
			"github",
			"ghcr.io/github/github-mcp-server:latest"
		));
		assert!(!entry_matches(&data, "github", "ghcr.io/evil/image:latest"));
		assert!(!entry_matches(
			&data,
			"gitlab",
			"ghcr.io/github/github-mcp-server:latest"
		));
	}
}
