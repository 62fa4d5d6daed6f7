// EmbeddingServer reconciler: an embedding-model workload with an optional
// persistent model cache and Hugging Face token.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
	Container, ContainerPort, EnvVar, PersistentVolumeClaim, PersistentVolumeClaimSpec,
	PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec, Service, Volume, VolumeMount,
	VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use kube::runtime::Controller;
use kube::runtime::controller::Action;
use kube::runtime::finalizer::{Event, finalizer};
use kube::runtime::watcher;
use kube::{Api, ResourceExt};
use tracing::{info, warn};

use super::{
	Context, STEADY_REQUEUE, ensure_secret_key, error_policy, object_key, scoped_apis, trap_panics,
};
use crate::api::{ConditionStatus, EmbeddingServer, Phase, conditions, finalizer_name};
use crate::error::{Error, Result};
use crate::resources::env::{ensure_required_env_vars, from_secret};
use crate::resources::{
	apply, apply_pod_template_patch, labels, owner_reference, probes, to_resource_requirements,
};
use crate::status::StatusCollector;

const COMPONENT: &str = "embedding-server";

/// Service port of the embedding server; the container serves on 8000.
const SERVICE_PORT: i32 = 80;
const CONTAINER_PORT: i32 = 8000;

/// Mount point of the model cache volume.
const MODEL_CACHE_PATH: &str = "/models";

pub async fn reconcile(server: Arc<EmbeddingServer>, ctx: Arc<Context>) -> Result<Action> {
	let namespace = server
		.namespace()
		.ok_or_else(|| Error::Transient("object has no namespace".to_string()))?;
	let api: Api<EmbeddingServer> = Api::namespaced(ctx.client.clone(), &namespace);
	let name = server.name_any();

	finalizer(
		&api,
		&finalizer_name("EmbeddingServer"),
		server,
		|event| async {
			match event {
				Event::Apply(server) => apply_embedding(server, &ctx).await,
				Event::Cleanup(server) => {
					info!(target: "embedding", server = %server.name_any(), "cleaning up");
					Ok(Action::await_change())
				},
			}
		},
	)
	.await
	.map_err(|err| Error::Finalizer {
		name,
		message: err.to_string(),
	})
}

async fn apply_embedding(server: Arc<EmbeddingServer>, ctx: &Context) -> Result<Action> {
	let namespace = server.namespace().unwrap_or_default();
	let name = server.name_any();
	let api: Api<EmbeddingServer> = Api::namespaced(ctx.client.clone(), &namespace);

	let mut collector = StatusCollector::new();
	collector.observed_generation(server.metadata.generation);

	let outcome = materialize(&server, ctx, &namespace).await;
	match &outcome {
		Ok(()) => {
			collector
				.phase(Phase::Ready)
				.clear_message()
				.condition(conditions::READY, ConditionStatus::True, "Reconciled", None)
				.field(
					"url",
					serde_json::json!(format!(
						"http://{name}.{namespace}.svc.cluster.local:{SERVICE_PORT}"
					)),
				);
		},
		Err(err) => {
			collector
				.phase(Phase::Failed)
				.message(err.to_string())
				.condition(
					conditions::READY,
					ConditionStatus::False,
					err.reason(),
					Some(err.to_string()),
				);
		},
	}

	let existing = server
		.status
		.as_ref()
		.map(|s| s.conditions.clone())
		.unwrap_or_default();
	collector.flush(&api, &name, &existing).await?;

	outcome.map(|()| {
		ctx.backoff.reset(&object_key(server.as_ref()));
		Action::requeue(STEADY_REQUEUE)
	})
}

async fn materialize(server: &EmbeddingServer, ctx: &Context, namespace: &str) -> Result<()> {
	let name = server.name_any();
	let owner = owner_reference(server)?;

	let mut env = Vec::new();
	if let Some(token_ref) = &server.spec.hf_token_secret_ref {
		ensure_secret_key(&ctx.client, namespace, token_ref).await?;
		env.push(from_secret("HF_TOKEN", &token_ref.name, &token_ref.key));
	}
	ensure_required_env_vars(&mut env, &name, namespace);

	let (pvc, deployment, svc) = build_workload(server, namespace, env, owner)?;

	if let Some(pvc) = pvc {
		let claim_name = format!("{name}-model-cache");
		let pvcs: Api<PersistentVolumeClaim> = Api::namespaced(ctx.client.clone(), namespace);
		apply(&pvcs, &claim_name, &pvc).await?;
	}

	let deployments: Api<Deployment> = Api::namespaced(ctx.client.clone(), namespace);
	apply(&deployments, &name, &deployment).await?;

	let services: Api<Service> = Api::namespaced(ctx.client.clone(), namespace);
	apply(&services, &name, &svc).await?;

	Ok(())
}

/// Build the embedding workload's children. The model cache, when declared,
/// adds an owned PVC mounted at the model path; otherwise the pod carries no
/// volumes at all.
fn build_workload(
	server: &EmbeddingServer,
	namespace: &str,
	env: Vec<EnvVar>,
	owner: OwnerReference,
) -> Result<(Option<PersistentVolumeClaim>, Deployment, Service)> {
	let name = server.name_any();
	let spec = &server.spec;

	let mut child_labels = labels::standard_labels(&name, &name, COMPONENT);
	child_labels.insert(labels::SERVER_LABEL.to_string(), name.clone());
	let selector = BTreeMap::from([
		("app.kubernetes.io/name".to_string(), name.clone()),
		("app.kubernetes.io/instance".to_string(), name.clone()),
	]);

	let mut pvc = None;
	let mut volumes = Vec::new();
	let mut mounts = Vec::new();
	if let Some(cache) = &spec.model_cache {
		let claim_name = format!("{name}-model-cache");
		pvc = Some(PersistentVolumeClaim {
			metadata: ObjectMeta {
				name: Some(claim_name.clone()),
				namespace: Some(namespace.to_string()),
				labels: Some(child_labels.clone()),
				owner_references: Some(vec![owner.clone()]),
				..Default::default()
			},
			spec: Some(PersistentVolumeClaimSpec {
				access_modes: Some(if cache.access_modes.is_empty() {
					vec!["ReadWriteOnce".to_string()]
				} else {
					cache.access_modes.clone()
				}),
				storage_class_name: cache.storage_class.clone(),
				resources: Some(VolumeResourceRequirements {
					requests: Some(BTreeMap::from([(
						"storage".to_string(),
						Quantity(cache.size.clone()),
					)])),
					..Default::default()
				}),
				..Default::default()
			}),
			..Default::default()
		});

		volumes.push(Volume {
			name: "model-cache".to_string(),
			persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
				claim_name,
				read_only: None,
			}),
			..Default::default()
		});
		mounts.push(VolumeMount {
			name: "model-cache".to_string(),
			mount_path: MODEL_CACHE_PATH.to_string(),
			..Default::default()
		});
	}

	let container = Container {
		name: "embedding-server".to_string(),
		image: Some(spec.image.clone()),
		args: Some(vec!["--model-id".to_string(), spec.model.clone()]),
		ports: Some(vec![ContainerPort {
			container_port: CONTAINER_PORT,
			name: Some("http".to_string()),
			protocol: Some("TCP".to_string()),
			..Default::default()
		}]),
		env: Some(env),
		volume_mounts: (!mounts.is_empty()).then_some(mounts),
		readiness_probe: Some(probes::readiness(CONTAINER_PORT, "/health")),
		liveness_probe: Some(probes::liveness(CONTAINER_PORT, "/health")),
		resources: spec.resources.as_ref().map(to_resource_requirements),
		..Default::default()
	};

	let template = PodTemplateSpec {
		metadata: Some(ObjectMeta {
			labels: Some(child_labels.clone()),
			..Default::default()
		}),
		spec: Some(PodSpec {
			containers: vec![container],
			volumes: (!volumes.is_empty()).then_some(volumes),
			..Default::default()
		}),
	};
	let template = apply_pod_template_patch(template, spec.pod_template_spec.as_ref())?;

	let deployment = Deployment {
		metadata: ObjectMeta {
			name: Some(name.clone()),
			namespace: Some(namespace.to_string()),
			labels: Some(child_labels.clone()),
			owner_references: Some(vec![owner.clone()]),
			..Default::default()
		},
		spec: Some(DeploymentSpec {
			replicas: Some(1),
			selector: LabelSelector {
				match_labels: Some(selector.clone()),
				..Default::default()
			},
			template,
			..Default::default()
		}),
		..Default::default()
	};

	let svc = Service {
		metadata: ObjectMeta {
			name: Some(name.clone()),
			namespace: Some(namespace.to_string()),
			labels: Some(child_labels),
			owner_references: Some(vec![owner]),
			..Default::default()
		},
		spec: Some(k8s_openapi::api::core::v1::ServiceSpec {
			selector: Some(selector),
			ports: Some(vec![k8s_openapi::api::core::v1::ServicePort {
				name: Some("http".to_string()),
				port: SERVICE_PORT,
				target_port: Some(
					k8s_openapi::apimachinery::pkg::util::intstr::IntOrString::Int(CONTAINER_PORT),
				),
				protocol: Some("TCP".to_string()),
				..Default::default()
			}]),
			..Default::default()
		}),
		..Default::default()
	};

	Ok((pvc, deployment, svc))
}

pub async fn run(ctx: Arc<Context>) {
	let apis = scoped_apis::<EmbeddingServer>(&ctx.client, &ctx.config);
	let controllers = apis.into_iter().map(|api| {
		let ctx = ctx.clone();
		Controller::new(api, watcher::Config::default())
			.shutdown_on_signal()
			.run(
				|obj, ctx| async move { trap_panics(reconcile(obj, ctx)).await },
				error_policy,
				ctx,
			)
			.for_each(|result| async move {
				match result {
					Ok((obj, _)) => info!(target: "embedding", object = %obj, "reconciled"),
					Err(err) => warn!(target: "embedding", error = %err, "reconcile failed"),
				}
			})
	});
	futures::future::join_all(controllers).await;
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::api::{EmbeddingServerSpec, ModelCacheSpec};

	fn owner() -> OwnerReference {
		OwnerReference {
			api_version: "toolhive.stacklok.dev/v1alpha1".to_string(),
			kind: "EmbeddingServer".to_string(),
			name: "embed".to_string(),
			uid: "uid-1".to_string(),
			controller: Some(true),
			block_owner_deletion: Some(true),
		}
	}

	fn server(model_cache: Option<ModelCacheSpec>) -> EmbeddingServer {
		EmbeddingServer::new(
			"embed",
			EmbeddingServerSpec {
				image: "ghcr.io/huggingface/text-embeddings-inference:latest".to_string(),
				model: "BAAI/bge-small-en-v1.5".to_string(),
				model_cache,
				..Default::default()
			},
		)
	}

	#[test]
	fn test_no_cache_means_no_volumes() {
		let (pvc, deployment, _) =
			build_workload(&server(None), "default", Vec::new(), owner()).unwrap();
		assert!(pvc.is_none());
		let pod = deployment.spec.unwrap().template.spec.unwrap();
		assert!(pod.volumes.is_none());
		assert!(pod.containers[0].volume_mounts.is_none());
	}

	#[test]
	fn test_cache_defaults_access_mode() {
		let cache = ModelCacheSpec {
			size: "10Gi".to_string(),
			storage_class: None,
			access_modes: vec![],
		};
		let (pvc, deployment, _) =
			build_workload(&server(Some(cache)), "default", Vec::new(), owner()).unwrap();
		let pvc = pvc.unwrap();
		assert_eq!(pvc.metadata.name.as_deref(), Some("embed-model-cache"));
		let pvc_spec = pvc.spec.unwrap();
		assert_eq!(
			pvc_spec.access_modes,
			Some(vec!["ReadWriteOnce".to_string()])
		);
		assert_eq!(
			pvc_spec.resources.unwrap().requests.unwrap()["storage"],
			Quantity("10Gi".to_string())
		);

		let pod = deployment.spec.unwrap().template.spec.unwrap();
		let mounts = pod.containers[0].volume_mounts.as_ref().unwrap();
		assert_eq!(mounts[0].mount_path, MODEL_CACHE_PATH);
		assert_eq!(pod.volumes.unwrap()[0].name, "model-cache");
	}

	#[test]
	fn test_cache_explicit_access_modes_kept() {
		let cache = ModelCacheSpec {
			size: "10Gi".to_string(),
			storage_class: Some("fast".to_string()),
			access_modes: vec!["ReadWriteMany".to_string()],
		};
		let (pvc, _, _) =
			build_workload(&server(Some(cache)), "default", Vec::new(), owner()).unwrap();
		let pvc_spec = pvc.unwrap().spec.unwrap();
		assert_eq!(
			pvc_spec.access_modes,
			Some(vec!["ReadWriteMany".to_string()])
		);
		assert_eq!(pvc_spec.storage_class_name.as_deref(), Some("fast"));
	}

	#[test]
	fn test_service_maps_80_to_container_port() {
		let (_, _, svc) = build_workload(&server(None), "default", Vec::new(), owner()).unwrap();
		let port = &svc.spec.unwrap().ports.unwrap()[0];
		assert_eq!(port.port, SERVICE_PORT);
		assert_eq!(
			port.target_port,
			Some(k8s_openapi::apimachinery::pkg::util::intstr::IntOrString::Int(CONTAINER_PORT))
		);
	}
}
