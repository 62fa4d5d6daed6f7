// Registry-api child workload: a small HTTP server exposing the stored
// canonical data at /api/v1/registry/*, owned by the registry object.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
	ConfigMapVolumeSource, Container, ContainerPort, PodSpec, PodTemplateSpec, Service,
	ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Api, Client};

use super::store;
use crate::error::Result;
use crate::resources::{apply, labels, probes};

/// Port the registry API serves on.
pub const API_PORT: i32 = 8080;

/// Name of the API deployment and service for a registry.
pub fn api_name(registry: &str) -> String {
	format!("{registry}-api")
}

/// In-cluster endpoint surfaced in `status.apiStatus.endpoint`.
pub fn api_endpoint(registry: &str, namespace: &str) -> String {
	format!(
		"http://{}.{}.svc.cluster.local:{}",
		api_name(registry),
		namespace,
		API_PORT
	)
}

/// Deploy (or converge) the API workload and service. Returns whether the
/// deployment currently reports a ready replica.
pub async fn deploy(
	client: &Client,
	namespace: &str,
	registry_name: &str,
	image: &str,
	owner: OwnerReference,
) -> Result<bool> {
	let name = api_name(registry_name);
	let mut api_labels = labels::standard_labels(&name, &name, "registry-api");
	api_labels.insert(labels::REGISTRY_LABEL.to_string(), registry_name.to_string());
	let selector = BTreeMap::from([
		("app.kubernetes.io/name".to_string(), name.clone()),
		("app.kubernetes.io/instance".to_string(), name.clone()),
	]);

	let container = Container {
		name: "registry-api".to_string(),
		image: Some(image.to_string()),
		args: Some(vec![
			"serve".to_string(),
			format!("--registry-file=/var/lib/registry/{}", store::STORAGE_KEY),
			format!("--port={API_PORT}"),
		]),
		ports: Some(vec![ContainerPort {
			container_port: API_PORT,
			name: Some("http".to_string()),
			protocol: Some("TCP".to_string()),
			..Default::default()
		}]),
		volume_mounts: Some(vec![VolumeMount {
			name: "registry-data".to_string(),
			mount_path: "/var/lib/registry".to_string(),
			read_only: Some(true),
			..Default::default()
		}]),
		readiness_probe: Some(probes::readiness(API_PORT, "/readiness")),
		liveness_probe: Some(probes::liveness(API_PORT, "/health")),
		..Default::default()
	};

	let deployment = Deployment {
		metadata: ObjectMeta {
			name: Some(name.clone()),
			namespace: Some(namespace.to_string()),
			labels: Some(api_labels.clone()),
			owner_references: Some(vec![owner.clone()]),
			..Default::default()
		},
		spec: Some(DeploymentSpec {
			replicas: Some(1),
			selector: LabelSelector {
				match_labels: Some(selector.clone()),
				..Default::default()
			},
			template: PodTemplateSpec {
				metadata: Some(ObjectMeta {
					labels: Some(api_labels.clone()),
					..Default::default()
				}),
				spec: Some(PodSpec {
					containers: vec![container],
					volumes: Some(vec![Volume {
						name: "registry-data".to_string(),
						config_map: Some(ConfigMapVolumeSource {
							name: store::storage_name(registry_name),
							..Default::default()
						}),
						..Default::default()
					}]),
					..Default::default()
				}),
			},
			..Default::default()
		}),
		..Default::default()
	};

	let deployments: Api<Deployment> = Api::namespaced(client.clone(), namespace);
	let applied = apply(&deployments, &name, &deployment).await?;

	let service = Service {
		metadata: ObjectMeta {
			name: Some(name.clone()),
			namespace: Some(namespace.to_string()),
			labels: Some(api_labels),
			owner_references: Some(vec![owner]),
			..Default::default()
		},
		spec: Some(ServiceSpec {
			selector: Some(selector),
			ports: Some(vec![ServicePort {
				name: Some("http".to_string()),
				port: API_PORT,
				target_port: Some(IntOrString::Int(API_PORT)),
				protocol: Some("TCP".to_string()),
				..Default::default()
			}]),
			..Default::default()
		}),
		..Default::default()
	};
	let services: Api<Service> = Api::namespaced(client.clone(), namespace);
	apply(&services, &name, &service).await?;

	let ready = applied
		.status
		.as_ref()
		.and_then(|status| status.ready_replicas)
		.unwrap_or(0)
		> 0;
	Ok(ready)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_api_naming() {
		assert_eq!(api_name("community"), "community-api");
		assert_eq!(
			api_endpoint("community", "default"),
			"http://community-api.default.svc.cluster.local:8080"
		);
	}
}
