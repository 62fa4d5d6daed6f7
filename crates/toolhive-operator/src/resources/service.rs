// Proxy service builder and service URL naming

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::labels;

/// Name of the proxy service for a server: `mcp-<name>-proxy`.
pub fn proxy_service_name(server: &str) -> String {
	format!("mcp-{server}-proxy")
}

/// In-cluster URL of the proxy service.
pub fn service_url(server: &str, namespace: &str, port: i32) -> String {
	format!(
		"http://{}.{}.svc.cluster.local:{}",
		proxy_service_name(server),
		namespace,
		port
	)
}

/// Build the proxy Service selecting the server's workload pods.
pub fn proxy_service(
	server: &str,
	namespace: &str,
	component: &str,
	port: i32,
	target_port: i32,
	owner: OwnerReference,
) -> Service {
	let mut svc_labels = labels::standard_labels(server, server, component);
	svc_labels.insert(labels::SERVER_LABEL.to_string(), server.to_string());

	let selector = BTreeMap::from([
		("app.kubernetes.io/name".to_string(), server.to_string()),
		("app.kubernetes.io/instance".to_string(), server.to_string()),
	]);

	Service {
		metadata: ObjectMeta {
			name: Some(proxy_service_name(server)),
			namespace: Some(namespace.to_string()),
			labels: Some(svc_labels),
			owner_references: Some(vec![owner]),
			..Default::default()
		},
		spec: Some(ServiceSpec {
			selector: Some(selector),
			ports: Some(vec![ServicePort {
				name: Some("mcp".to_string()),
				port,
				target_port: Some(IntOrString::Int(target_port)),
				protocol: Some("TCP".to_string()),
				..Default::default()
			}]),
			..Default::default()
		}),
		..Default::default()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn owner() -> OwnerReference {
		OwnerReference {
			api_version: "toolhive.stacklok.dev/v1alpha1".to_string(),
			kind: "MCPServer".to_string(),
			name: "fetch".to_string(),
			uid: "uid-1".to_string(),
			controller: Some(true),
			block_owner_deletion: Some(true),
		}
	}

	#[test]
	fn test_service_url() {
		assert_eq!(
			service_url("fetch", "default", 8080),
			"http://mcp-fetch-proxy.default.svc.cluster.local:8080"
		);
	}

	#[test]
	fn test_proxy_service_shape() {
		let svc = proxy_service("fetch", "default", "mcp-server", 8080, 9000, owner());
		assert_eq!(svc.metadata.name.as_deref(), Some("mcp-fetch-proxy"));
		let spec = svc.spec.unwrap();
		let port = &spec.ports.as_ref().unwrap()[0];
		assert_eq!(port.port, 8080);
		assert_eq!(port.target_port, Some(IntOrString::Int(9000)));
		assert_eq!(
			spec.selector.unwrap()["app.kubernetes.io/name"],
			"fetch"
		);
	}
}
