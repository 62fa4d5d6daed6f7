// VirtualMCPServer reconciler: synthesize an aggregating proxy over the
// member servers of a group, with merged capabilities, per-backend outgoing
// auth, composite tools, and hybrid-search tool routing.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kube::api::ObjectMeta;
use kube::runtime::Controller;
use kube::runtime::controller::Action;
use kube::runtime::finalizer::{Event, finalizer};
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::watcher;
use kube::{Api, ResourceExt};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{
	Context, STEADY_REQUEUE, error_policy, index, object_key, scoped_apis, trap_panics,
};
use crate::api::{
	AggregationConfig, ConditionStatus, ConflictResolution, MCPExternalAuthConfig, MCPGroup,
	MCPServer, Phase, VirtualMCPCompositeToolDefinition, VirtualMCPServer, conditions,
	finalizer_name,
};
use crate::error::{Error, Result};
use crate::optimizer::HybridSearch;
use crate::platform;
use crate::resources::deployment::{ProxyWorkload, RUNCONFIG_KEY};
use crate::resources::env::ensure_required_env_vars;
use crate::resources::{apply, labels, owner_reference, service};
use crate::status::StatusCollector;

const COMPONENT: &str = "vmcp-server";

/// Aggregation config artifact consumed by the virtual proxy.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VmcpConfig {
	pub schema_version: String,
	pub name: String,
	pub group: String,
	pub port: i32,
	pub conflict_resolution: String,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub priorities: Vec<String>,
	/// `exposed name -> server/tool`, fully qualified after routing.
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub tool_overrides: BTreeMap<String, String>,
	/// `member server -> in-cluster proxy URL`.
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub backends: BTreeMap<String, String>,
	/// `member server -> MCPExternalAuthConfig name`.
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub outgoing_auth: BTreeMap<String, String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub incoming_auth_issuer: Option<String>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub composite_tools: Vec<CompositeTool>,
	pub semantic_ratio: u8,
}

/// A composite workflow carried into the proxy config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeTool {
	pub name: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub parameters: Option<serde_json::Value>,
	pub steps: Vec<crate::api::ToolStep>,
}

pub async fn reconcile(vmcp: Arc<VirtualMCPServer>, ctx: Arc<Context>) -> Result<Action> {
	let namespace = vmcp
		.namespace()
		.ok_or_else(|| Error::Transient("object has no namespace".to_string()))?;
	let api: Api<VirtualMCPServer> = Api::namespaced(ctx.client.clone(), &namespace);
	let name = vmcp.name_any();

	finalizer(
		&api,
		&finalizer_name("VirtualMCPServer"),
		vmcp,
		|event| async {
			match event {
				Event::Apply(vmcp) => apply_vmcp(vmcp, &ctx).await,
				Event::Cleanup(vmcp) => {
					info!(target: "vmcp", vmcp = %vmcp.name_any(), "cleaning up");
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

async fn apply_vmcp(vmcp: Arc<VirtualMCPServer>, ctx: &Context) -> Result<Action> {
	let namespace = vmcp.namespace().unwrap_or_default();
	let name = vmcp.name_any();
	let api: Api<VirtualMCPServer> = Api::namespaced(ctx.client.clone(), &namespace);

	let mut collector = StatusCollector::new();
	collector.observed_generation(vmcp.metadata.generation);

	let outcome = materialize(&vmcp, ctx, &namespace, &mut collector).await;
	match &outcome {
		Ok(()) => {
			collector
				.phase(Phase::Ready)
				.clear_message()
				.condition(conditions::READY, ConditionStatus::True, "Reconciled", None)
				.field(
					"url",
					serde_json::json!(service::service_url(&name, &namespace, vmcp.spec.port)),
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
			if matches!(
				err,
				Error::ReferentMissing { .. } | Error::ReferentInvalid { .. }
			) {
				collector.condition(
					conditions::REFERENT_RESOLVED,
					ConditionStatus::False,
					err.reason(),
					Some(err.to_string()),
				);
			}
		},
	}

	let existing = vmcp
		.status
		.as_ref()
		.map(|s| s.conditions.clone())
		.unwrap_or_default();
	collector.flush(&api, &name, &existing).await?;

	outcome.map(|()| {
		ctx.backoff.reset(&object_key(vmcp.as_ref()));
		Action::requeue(STEADY_REQUEUE)
	})
}

async fn materialize(
	vmcp: &VirtualMCPServer,
	ctx: &Context,
	namespace: &str,
	collector: &mut StatusCollector,
) -> Result<()> {
	let name = vmcp.name_any();
	let spec = &vmcp.spec;

	spec.validate()
		.map_err(|message| Error::spec_invalid("spec", message))?;

	// Group and members
	let groups: Api<MCPGroup> = Api::namespaced(ctx.client.clone(), namespace);
	groups
		.get_opt(&spec.group_ref)
		.await?
		.ok_or_else(|| Error::referent_missing("MCPGroup", &spec.group_ref))?;

	let servers: Api<MCPServer> = Api::namespaced(ctx.client.clone(), namespace);
	let members: Vec<MCPServer> = servers
		.list(&Default::default())
		.await?
		.items
		.into_iter()
		.filter(|srv| srv.spec.group_ref.as_deref() == Some(spec.group_ref.as_str()))
		.collect();

	let mut backends = BTreeMap::new();
	for member in &members {
		backends.insert(
			member.name_any(),
			service::service_url(&member.name_any(), namespace, member.spec.port),
		);
	}
	collector.field(
		"backends",
		serde_json::json!(backends.keys().cloned().collect::<Vec<_>>()),
	);

	// Outgoing auth references must resolve
	let mut outgoing_auth = BTreeMap::new();
	if let Some(outgoing) = &spec.outgoing_auth {
		let auth_api: Api<MCPExternalAuthConfig> = Api::namespaced(ctx.client.clone(), namespace);
		for (backend, auth_name) in &outgoing.per_backend {
			auth_api
				.get_opt(auth_name)
				.await?
				.ok_or_else(|| Error::referent_missing("MCPExternalAuthConfig", auth_name))?;
			outgoing_auth.insert(backend.clone(), auth_name.clone());
		}
		if let Some(default_ref) = &outgoing.default_ref {
			auth_api
				.get_opt(default_ref)
				.await?
				.ok_or_else(|| Error::referent_missing("MCPExternalAuthConfig", default_ref))?;
			for member in &members {
				outgoing_auth
					.entry(member.name_any())
					.or_insert_with(|| default_ref.clone());
			}
		}
	}

	// Composite tool definitions
	let mut composite_tools = Vec::new();
	let defs: Api<VirtualMCPCompositeToolDefinition> =
		Api::namespaced(ctx.client.clone(), namespace);
	for tool_ref in &spec.composite_tool_refs {
		let def = defs
			.get_opt(&tool_ref.name)
			.await?
			.ok_or_else(|| {
				Error::referent_missing("VirtualMCPCompositeToolDefinition", &tool_ref.name)
			})?;
		def.spec.validate().map_err(|message| {
			Error::referent_invalid(
				"VirtualMCPCompositeToolDefinition",
				&tool_ref.name,
				message,
			)
		})?;
		composite_tools.push(CompositeTool {
			name: def.name_any(),
			description: def.spec.description.clone(),
			parameters: def.spec.parameters.clone(),
			steps: def.spec.steps.clone(),
		});
	}

	let aggregation = spec.aggregation.clone().unwrap_or_default();
	let tool_overrides =
		route_tool_overrides(&aggregation, &members, ctx, namespace).await?;

	let semantic_ratio = spec
		.optimizer
		.as_ref()
		.map(|opt| opt.semantic_ratio)
		.unwrap_or(70);

	let config = VmcpConfig {
		schema_version: "v1".to_string(),
		name: name.clone(),
		group: spec.group_ref.clone(),
		port: spec.port,
		conflict_resolution: match aggregation.conflict_resolution {
			ConflictResolution::Prefix => "prefix".to_string(),
			ConflictResolution::Priority => "priority".to_string(),
			ConflictResolution::Manual => "manual".to_string(),
		},
		priorities: aggregation.priorities.clone(),
		tool_overrides,
		backends,
		outgoing_auth,
		incoming_auth_issuer: spec
			.incoming_auth
			.as_ref()
			.and_then(|incoming| incoming.oidc.as_ref())
			.and_then(|oidc| oidc.inline.as_ref())
			.map(|inline| inline.issuer.clone()),
		composite_tools,
		semantic_ratio,
	};

	let config_json = serde_json::to_string_pretty(&config)
		.map_err(|e| Error::Transient(format!("serializing vmcp config: {e}")))?;
	let config_hash = crate::hash::content_hash(config_json.as_bytes());

	let owner = owner_reference(vmcp)?;
	let detected = platform::detect(&ctx.client).await?;

	let config_map = ConfigMap {
		metadata: ObjectMeta {
			name: Some(format!("{name}-runconfig")),
			namespace: Some(namespace.to_string()),
			labels: Some(labels::standard_labels(&name, &name, COMPONENT)),
			owner_references: Some(vec![owner.clone()]),
			..Default::default()
		},
		data: Some(BTreeMap::from([(RUNCONFIG_KEY.to_string(), config_json)])),
		..Default::default()
	};
	let config_maps: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), namespace);
	apply(&config_maps, &format!("{name}-runconfig"), &config_map).await?;

	let mut env = Vec::new();
	ensure_required_env_vars(&mut env, &name, namespace);

	let workload = ProxyWorkload {
		name: &name,
		namespace,
		component: COMPONENT,
		proxy_image: &ctx.config.proxy_image,
		port: spec.port,
		target_port: spec.port,
		runconfig_hash: &config_hash,
		service_account: "default".to_string(),
		env,
		volumes: &[],
		secret_mounts: Vec::new(),
		config_map_mounts: Vec::new(),
		resources: None,
		pod_template_patch: None,
		owner: owner.clone(),
	};
	let deployment = workload.build(detected)?;
	let deployments: Api<Deployment> = Api::namespaced(ctx.client.clone(), namespace);
	apply(&deployments, &name, &deployment).await?;

	let svc = service::proxy_service(&name, namespace, COMPONENT, spec.port, spec.port, owner);
	let services: Api<Service> = Api::namespaced(ctx.client.clone(), namespace);
	apply(&services, &service::proxy_service_name(&name), &svc).await?;

	Ok(())
}

/// Resolve manual tool overrides to fully qualified `server/tool` targets.
///
/// Unqualified targets are routed with hybrid search over the member tool
/// descriptions recorded in registry storage; keyword-only here since no
/// embedder runs inside the operator.
async fn route_tool_overrides(
	aggregation: &AggregationConfig,
	members: &[MCPServer],
	ctx: &Context,
	namespace: &str,
) -> Result<BTreeMap<String, String>> {
	let needs_routing = aggregation
		.tool_overrides
		.values()
		.any(|target| !target.contains('/'));
	let tool_docs = if needs_routing {
		crate::registry::enforcement::member_tool_documents(&ctx.client, namespace, members)
			.await?
	} else {
		Vec::new()
	};
	route_against_documents(aggregation, &tool_docs).await
}

/// Routing core: qualified targets pass through untouched; unqualified ones
/// resolve to the best keyword match over the tool documents, or fail as a
/// spec error when nothing matches.
async fn route_against_documents(
	aggregation: &AggregationConfig,
	tool_docs: &[(String, String)],
) -> Result<BTreeMap<String, String>> {
	let mut routed = BTreeMap::new();
	let unqualified: Vec<(&String, &String)> = aggregation
		.tool_overrides
		.iter()
		.filter(|(_, target)| !target.contains('/'))
		.collect();

	for (exposed, target) in &aggregation.tool_overrides {
		if target.contains('/') {
			routed.insert(exposed.clone(), target.clone());
		}
	}
	if unqualified.is_empty() {
		return Ok(routed);
	}

	let search = HybridSearch::new();
	for (tool_id, document) in tool_docs {
		search
			.upsert(tool_id, document, None)
			.await
			.map_err(|e| Error::Transient(format!("indexing tool documents: {e}")))?;
	}
	// Detached mirror writes land before the first search on a fresh runtime
	// tick; yield to be explicit.
	tokio::task::yield_now().await;

	for (exposed, target) in unqualified {
		let hits = search
			.search(target, None, 1, 0)
			.await
			.map_err(|_| {
				Error::spec_invalid(
					"aggregation.toolOverrides",
					format!("no backend tool matches {target:?}"),
				)
			})?;
		let best = hits.first().ok_or_else(|| {
			Error::spec_invalid(
				"aggregation.toolOverrides",
				format!("no backend tool matches {target:?}"),
			)
		})?;
		routed.insert(exposed.clone(), best.tool_id.clone());
	}
	Ok(routed)
}

pub async fn run(ctx: Arc<Context>) {
	let apis = scoped_apis::<VirtualMCPServer>(&ctx.client, &ctx.config);
	let controllers = apis.into_iter().map(|api| {
		let ctx = ctx.clone();
		let controller = Controller::new(api, watcher::Config::default());
		let store = controller.store();

		let groups: Api<MCPGroup> = Api::all(ctx.client.clone());
		let defs: Api<VirtualMCPCompositeToolDefinition> = Api::all(ctx.client.clone());
		let servers: Api<MCPServer> = Api::all(ctx.client.clone());

		let group_store = store.clone();
		let def_store = store.clone();
		let server_store = store.clone();

		controller
			.watches(groups, watcher::Config::default(), move |group: MCPGroup| {
				map_group(&group_store, &group)
			})
			.watches(
				defs,
				watcher::Config::default(),
				move |def: VirtualMCPCompositeToolDefinition| map_definition(&def_store, &def),
			)
			.watches(servers, watcher::Config::default(), move |srv: MCPServer| {
				map_member(&server_store, &srv)
			})
			.shutdown_on_signal()
			.run(
				|obj, ctx| async move { trap_panics(reconcile(obj, ctx)).await },
				error_policy,
				ctx,
			)
			.for_each(|result| async move {
				match result {
					Ok((obj, _)) => info!(target: "vmcp", object = %obj, "reconciled"),
					Err(err) => warn!(target: "vmcp", error = %err, "reconcile failed"),
				}
			})
	});
	futures::future::join_all(controllers).await;
}

fn map_group(store: &Store<VirtualMCPServer>, group: &MCPGroup) -> Vec<ObjectRef<VirtualMCPServer>> {
	let Some(namespace) = group.namespace() else {
		return Vec::new();
	};
	let name = group.name_any();
	index::referrers(store, &namespace, |vmcp: &VirtualMCPServer| {
		vmcp.spec.group_ref == name
	})
}

fn map_definition(
	store: &Store<VirtualMCPServer>,
	def: &VirtualMCPCompositeToolDefinition,
) -> Vec<ObjectRef<VirtualMCPServer>> {
	let Some(namespace) = def.namespace() else {
		return Vec::new();
	};
	let name = def.name_any();
	index::referrers(store, &namespace, |vmcp: &VirtualMCPServer| {
		vmcp.spec
			.composite_tool_refs
			.iter()
			.any(|tool_ref| tool_ref.name == name)
	})
}

/// A member server change re-aggregates every virtual server over its group.
fn map_member(store: &Store<VirtualMCPServer>, srv: &MCPServer) -> Vec<ObjectRef<VirtualMCPServer>> {
	let (Some(namespace), Some(group)) = (srv.namespace(), srv.spec.group_ref.clone()) else {
		return Vec::new();
	};
	index::referrers(store, &namespace, |vmcp: &VirtualMCPServer| {
		vmcp.spec.group_ref == group
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	fn aggregation_with(overrides: &[(&str, &str)]) -> AggregationConfig {
		AggregationConfig {
			conflict_resolution: ConflictResolution::Manual,
			priorities: Vec::new(),
			tool_overrides: overrides
				.iter()
				.map(|(exposed, target)| (exposed.to_string(), target.to_string()))
				.collect(),
		}
	}

	fn docs(entries: &[(&str, &str)]) -> Vec<(String, String)> {
		entries
			.iter()
			.map(|(id, text)| (id.to_string(), text.to_string()))
			.collect()
	}

	#[tokio::test]
	async fn test_route_qualified_passthrough() {
		let aggregation = aggregation_with(&[("search", "web/search"), ("now", "weather/now")]);
		let routed = route_against_documents(&aggregation, &[]).await.unwrap();
		assert_eq!(routed.len(), 2);
		assert_eq!(routed["search"], "web/search");
		assert_eq!(routed["now"], "weather/now");
	}

	#[tokio::test]
	async fn test_route_empty_overrides() {
		let aggregation = aggregation_with(&[]);
		let routed = route_against_documents(&aggregation, &[]).await.unwrap();
		assert!(routed.is_empty());
	}

	#[tokio::test]
	async fn test_route_unqualified_resolves_best_match() {
		let aggregation = aggregation_with(&[("find", "search")]);
		let tool_docs = docs(&[
			("web/search", "search the web for pages"),
			("weather/now", "current weather for a city"),
		]);
		let routed = route_against_documents(&aggregation, &tool_docs)
			.await
			.unwrap();
		assert_eq!(routed["find"], "web/search");
	}

	#[tokio::test]
	async fn test_route_no_match_is_spec_invalid() {
		let aggregation = aggregation_with(&[("find", "blockchain")]);
		let tool_docs = docs(&[("web/search", "search the web for pages")]);
		let err = route_against_documents(&aggregation, &tool_docs)
			.await
			.unwrap_err();
		assert!(matches!(err, Error::SpecInvalid { .. }));
		assert!(err.to_string().contains("blockchain"), "{err}");
	}

	#[tokio::test]
	async fn test_route_mixed_qualified_and_unqualified() {
		let aggregation = aggregation_with(&[("pin", "weather/now"), ("find", "search")]);
		let tool_docs = docs(&[("web/search", "search the web for pages")]);
		let routed = route_against_documents(&aggregation, &tool_docs)
			.await
			.unwrap();
		assert_eq!(routed["pin"], "weather/now");
		assert_eq!(routed["find"], "web/search");
	}
}
