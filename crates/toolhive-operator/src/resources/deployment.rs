// Proxy workload builder.
//
// Every server-shaped kind materializes one Deployment running the proxy
// runner with its runconfig mounted from a ConfigMap. The runconfig hash is
// stamped on the pod template so a config change rolls the workload.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
	ConfigMapVolumeSource, Container, ContainerPort, EnvVar, HostPathVolumeSource, KeyToPath,
	PodSecurityContext, PodSpec, PodTemplateSpec, SecretVolumeSource, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use serde_json::Value;

use super::{apply_pod_template_patch, labels, probes, to_resource_requirements};
use crate::api::{ResourceHints, VolumeSpec};
use crate::error::Result;
use crate::platform::Platform;

/// Path the runconfig ConfigMap is mounted at inside the proxy container.
pub const RUNCONFIG_MOUNT_PATH: &str = "/etc/toolhive/runconfig";

/// Key under which the runconfig is stored in its ConfigMap.
pub const RUNCONFIG_KEY: &str = "runconfig.json";

/// A secret mounted as files, e.g. embedded-auth-server key material.
#[derive(Debug, Clone)]
pub struct SecretFileMount {
	pub volume_name: String,
	pub secret_name: String,
	/// `(secret key, file name)` pairs.
	pub items: Vec<(String, String)>,
	pub mount_path: String,
}

/// A ConfigMap mounted as files, e.g. an OIDC CA bundle.
#[derive(Debug, Clone)]
pub struct ConfigMapFileMount {
	pub volume_name: String,
	pub config_map_name: String,
	/// `(configmap key, file name)` pairs.
	pub items: Vec<(String, String)>,
	pub mount_path: String,
}

/// Carrier for everything that goes into the proxy Deployment.
#[derive(Debug)]
pub struct ProxyWorkload<'a> {
	pub name: &'a str,
	pub namespace: &'a str,
	pub component: &'a str,
	pub proxy_image: &'a str,
	pub port: i32,
	pub target_port: i32,
	pub runconfig_hash: &'a str,
	pub service_account: String,
	pub env: Vec<EnvVar>,
	pub volumes: &'a [VolumeSpec],
	pub secret_mounts: Vec<SecretFileMount>,
	pub config_map_mounts: Vec<ConfigMapFileMount>,
	pub resources: Option<&'a ResourceHints>,
	pub pod_template_patch: Option<&'a Value>,
	pub owner: OwnerReference,
}

impl ProxyWorkload<'_> {
	/// Build the Deployment, applying the user's pod-template patch last.
	pub fn build(self, platform: Platform) -> Result<Deployment> {
		let mut child_labels = labels::standard_labels(self.name, self.name, self.component);
		child_labels.insert(labels::SERVER_LABEL.to_string(), self.name.to_string());

		let selector = BTreeMap::from([
			("app.kubernetes.io/name".to_string(), self.name.to_string()),
			("app.kubernetes.io/instance".to_string(), self.name.to_string()),
		]);

		let mut volume_mounts = vec![VolumeMount {
			name: "runconfig".to_string(),
			mount_path: RUNCONFIG_MOUNT_PATH.to_string(),
			read_only: Some(true),
			..Default::default()
		}];
		let mut volumes = vec![Volume {
			name: "runconfig".to_string(),
			config_map: Some(ConfigMapVolumeSource {
				name: format!("{}-runconfig", self.name),
				..Default::default()
			}),
			..Default::default()
		}];

		for vol in self.volumes {
			volume_mounts.push(VolumeMount {
				name: vol.name.clone(),
				mount_path: vol.mount_path.clone(),
				read_only: Some(vol.read_only),
				..Default::default()
			});
			volumes.push(Volume {
				name: vol.name.clone(),
				host_path: Some(HostPathVolumeSource {
					path: vol.host_path.clone(),
					type_: None,
				}),
				..Default::default()
			});
		}

		for mount in &self.secret_mounts {
			volume_mounts.push(VolumeMount {
				name: mount.volume_name.clone(),
				mount_path: mount.mount_path.clone(),
				read_only: Some(true),
				..Default::default()
			});
			volumes.push(Volume {
				name: mount.volume_name.clone(),
				secret: Some(SecretVolumeSource {
					secret_name: Some(mount.secret_name.clone()),
					default_mode: Some(0o400),
					items: Some(
						mount
							.items
							.iter()
							.map(|(key, path)| KeyToPath {
								key: key.clone(),
								path: path.clone(),
								mode: Some(0o400),
							})
							.collect(),
					),
					..Default::default()
				}),
				..Default::default()
			});
		}

		for mount in &self.config_map_mounts {
			volume_mounts.push(VolumeMount {
				name: mount.volume_name.clone(),
				mount_path: mount.mount_path.clone(),
				read_only: Some(true),
				..Default::default()
			});
			volumes.push(Volume {
				name: mount.volume_name.clone(),
				config_map: Some(ConfigMapVolumeSource {
					name: mount.config_map_name.clone(),
					items: Some(
						mount
							.items
							.iter()
							.map(|(key, path)| KeyToPath {
								key: key.clone(),
								path: path.clone(),
								mode: None,
							})
							.collect(),
					),
					..Default::default()
				}),
				..Default::default()
			});
		}

		let container = Container {
			name: "toolhive-proxy".to_string(),
			image: Some(self.proxy_image.to_string()),
			args: Some(vec![
				"run".to_string(),
				format!("--runconfig={RUNCONFIG_MOUNT_PATH}/{RUNCONFIG_KEY}"),
			]),
			ports: Some(vec![ContainerPort {
				container_port: self.target_port,
				name: Some("mcp".to_string()),
				protocol: Some("TCP".to_string()),
				..Default::default()
			}]),
			env: Some(self.env),
			volume_mounts: Some(volume_mounts),
			readiness_probe: Some(probes::readiness(self.target_port, "/health")),
			liveness_probe: Some(probes::liveness(self.target_port, "/health")),
			resources: self.resources.map(to_resource_requirements),
			..Default::default()
		};

		// On OpenShift the security context service assigns UIDs; setting
		// one here would conflict with the assigned SCC.
		let security_context = match platform {
			Platform::OpenShift => None,
			Platform::Kubernetes => Some(PodSecurityContext {
				run_as_non_root: Some(true),
				..Default::default()
			}),
		};

		let template = PodTemplateSpec {
			metadata: Some(ObjectMeta {
				labels: Some(child_labels.clone()),
				annotations: Some(BTreeMap::from([(
					labels::RUNCONFIG_HASH_ANNOTATION.to_string(),
					self.runconfig_hash.to_string(),
				)])),
				..Default::default()
			}),
			spec: Some(PodSpec {
				service_account_name: Some(self.service_account.clone()),
				security_context,
				containers: vec![container],
				volumes: Some(volumes),
				..Default::default()
			}),
		};
		let template = apply_pod_template_patch(template, self.pod_template_patch)?;

		Ok(Deployment {
			metadata: ObjectMeta {
				name: Some(self.name.to_string()),
				namespace: Some(self.namespace.to_string()),
				labels: Some(child_labels),
				owner_references: Some(vec![self.owner]),
				..Default::default()
			},
			spec: Some(DeploymentSpec {
				replicas: Some(1),
				selector: LabelSelector {
					match_labels: Some(selector),
					..Default::default()
				},
				template,
				..Default::default()
			}),
			..Default::default()
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

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

	fn workload() -> ProxyWorkload<'static> {
		ProxyWorkload {
			name: "fetch",
			namespace: "default",
			component: "mcp-server",
			proxy_image: "ghcr.io/stacklok/toolhive/proxyrunner:latest",
			port: 8080,
			target_port: 8080,
			runconfig_hash: "sha256:abc",
			service_account: "fetch-proxy-runner".to_string(),
			env: Vec::new(),
			volumes: &[],
			secret_mounts: Vec::new(),
			config_map_mounts: Vec::new(),
			resources: None,
			pod_template_patch: None,
			owner: owner(),
		}
	}

	#[test]
	fn test_build_basic_workload() {
		let deployment = workload().build(Platform::Kubernetes).unwrap();
		assert_eq!(deployment.metadata.name.as_deref(), Some("fetch"));
		let spec = deployment.spec.unwrap();
		let pod = spec.template.spec.unwrap();
		assert_eq!(pod.containers.len(), 1);
		assert_eq!(
			pod.containers[0].ports.as_ref().unwrap()[0].container_port,
			8080
		);
		assert_eq!(
			pod.service_account_name.as_deref(),
			Some("fetch-proxy-runner")
		);
	}

	#[test]
	fn test_runconfig_hash_annotation() {
		let deployment = workload().build(Platform::Kubernetes).unwrap();
		let annotations = deployment
			.spec
			.unwrap()
			.template
			.metadata
			.unwrap()
			.annotations
			.unwrap();
		assert_eq!(annotations[labels::RUNCONFIG_HASH_ANNOTATION], "sha256:abc");
	}

	#[test]
	fn test_openshift_drops_security_context() {
		let deployment = workload().build(Platform::OpenShift).unwrap();
		let pod = deployment.spec.unwrap().template.spec.unwrap();
		assert!(pod.security_context.is_none());
	}

	#[test]
	fn test_secret_mounts_read_only_0400() {
		let mut wl = workload();
		wl.secret_mounts = vec![SecretFileMount {
			volume_name: "authserver-keys".to_string(),
			secret_name: "signing".to_string(),
			items: vec![("tls.key".to_string(), "key-0.pem".to_string())],
			mount_path: "/etc/toolhive/authserver/keys".to_string(),
		}];
		let deployment = wl.build(Platform::Kubernetes).unwrap();
		let pod = deployment.spec.unwrap().template.spec.unwrap();
		let volume = pod
			.volumes
			.unwrap()
			.into_iter()
			.find(|v| v.name == "authserver-keys")
			.unwrap();
		let secret = volume.secret.unwrap();
		assert_eq!(secret.default_mode, Some(0o400));
		assert_eq!(secret.items.unwrap()[0].path, "key-0.pem");
	}

	#[test]
	fn test_pod_template_patch_applied() {
		let patch = json!({"spec": {"priorityClassName": "high"}});
		let mut wl = workload();
		wl.pod_template_patch = Some(&patch);
		let deployment = wl.build(Platform::Kubernetes).unwrap();
		let pod = deployment.spec.unwrap().template.spec.unwrap();
		assert_eq!(pod.priority_class_name.as_deref(), Some("high"));
	}
}
