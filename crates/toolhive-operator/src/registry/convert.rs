// Conversion from the upstream MCP registry format into the canonical
// ToolHive schema. Upstream entries list packages and remotes; the first
// docker/OCI package becomes the image, the first remote the URL.

use serde::Deserialize;

use super::schema::{RegistryData, RegistryRemoteServer, RegistryServer};

#[derive(Debug, Deserialize)]
struct UpstreamList {
	#[serde(default)]
	servers: Vec<UpstreamServer>,
}

#[derive(Debug, Deserialize)]
struct UpstreamServer {
	name: String,
	#[serde(default)]
	description: Option<String>,
	#[serde(default)]
	packages: Vec<UpstreamPackage>,
	#[serde(default)]
	remotes: Vec<UpstreamRemote>,
}

#[derive(Debug, Deserialize)]
struct UpstreamPackage {
	#[serde(default)]
	registry_name: Option<String>,
	name: String,
	#[serde(default)]
	version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpstreamRemote {
	#[serde(default)]
	transport_type: Option<String>,
	url: String,
}

/// Short entry name from a reverse-DNS upstream name like
/// `io.github.acme/fetch`.
fn short_name(name: &str) -> String {
	name.rsplit('/')
		.next()
		.unwrap_or(name)
		.to_string()
}

fn map_transport(upstream: &str) -> Option<String> {
	match upstream {
		"sse" => Some("sse".to_string()),
		"streamable" | "streamable-http" => Some("streamable-http".to_string()),
		"stdio" => Some("stdio".to_string()),
		_ => None,
	}
}

/// Convert an upstream-format document. Entries with neither a container
/// package nor a remote endpoint are skipped; a malformed document is an
/// error so sync fails loudly rather than storing partial data.
pub fn convert_upstream(bytes: &[u8]) -> Result<RegistryData, String> {
	let list: UpstreamList = serde_json::from_slice(bytes)
		.map_err(|e| format!("invalid upstream registry JSON: {e}"))?;

	let mut data = RegistryData::default();
	for server in list.servers {
		let name = short_name(&server.name);
		if name.is_empty() {
			return Err(format!("upstream entry {:?} has empty name", server.name));
		}

		let image_package = server.packages.iter().find(|pkg| {
			matches!(
				pkg.registry_name.as_deref(),
				Some("docker") | Some("oci") | None
			)
		});
		if let Some(package) = image_package {
			let image = match &package.version {
				Some(version) => format!("{}:{}", package.name, version),
				None => package.name.clone(),
			};
			data.servers.insert(
				name.clone(),
				RegistryServer {
					name: None,
					image,
					description: server.description.clone(),
					transport: server
						.remotes
						.first()
						.and_then(|remote| remote.transport_type.as_deref())
						.and_then(map_transport)
						.or(Some("stdio".to_string())),
					..Default::default()
				},
			);
		} else if let Some(remote) = server.remotes.first() {
			data.remote_servers.insert(
				name,
				RegistryRemoteServer {
					name: None,
					url: remote.url.clone(),
					description: server.description,
					transport: remote.transport_type.as_deref().and_then(map_transport),
					..Default::default()
				},
			);
		}
		// Entries with neither package nor remote cannot be deployed; skip.
	}

	data.validate()?;
	Ok(data)
}
