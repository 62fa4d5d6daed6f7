// MCPServer reconciler: resolve referents, translate the spec into a
// runconfig, and materialize the proxy workload, service and RBAC.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, EnvVar, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use kube::api::ObjectMeta;
use kube::runtime::Controller;
use kube::runtime::controller::Action;
use kube::runtime::finalizer::{Event, finalizer};
use kube::runtime::reflector::Store;
use kube::runtime::watcher;
use kube::{Api, ResourceExt};
use tracing::{info, warn};

use super::{
	Context, STEADY_REQUEUE, ensure_secret_key, error_policy, get_config_map_key, index,
	object_key, scoped_apis, trap_panics,
};
use crate::api::{
	ConditionStatus, MCPExternalAuthConfig, MCPRegistry, MCPServer, MCPToolConfig, OidcConfigRef,
	Phase, conditions, finalizer_name,
};
use crate::error::{Error, Result};
use crate::hash;
use crate::platform;
use crate::registry::enforcement;
use crate::resources::deployment::{ConfigMapFileMount, ProxyWorkload, RUNCONFIG_KEY};
use crate::resources::env::{
	OIDC_CLIENT_SECRET_VAR, ensure_required_env_vars, from_secret,
};
use crate::resources::{apply, labels, owner_reference, rbac, service};
use crate::runconfig::{
	ResolvedOidc, RunConfigBuilder, TranslatedAuth, translate_audit, translate_authz,
	translate_external_auth, translate_oidc, translate_telemetry,
};
use crate::status::StatusCollector;

const COMPONENT: &str = "mcp-server";

/// Referents resolved before translation; translators never read the
/// cluster themselves.
#[derive(Default)]
struct ResolvedRefs {
	tool_config: Option<MCPToolConfig>,
	tool_config_hash: Option<String>,
	auth: TranslatedAuth,
	external_auth_hash: Option<String>,
	oidc: Option<ResolvedOidc>,
	oidc_env: Vec<EnvVar>,
	ca_bundle_mount: Option<ConfigMapFileMount>,
	permission_profile: Option<serde_json::Value>,
}

pub async fn reconcile(server: Arc<MCPServer>, ctx: Arc<Context>) -> Result<Action> {
	let namespace = server
		.namespace()
		.ok_or_else(|| Error::Transient("object has no namespace".to_string()))?;
	let api: Api<MCPServer> = Api::namespaced(ctx.client.clone(), &namespace);
	let name = server.name_any();

	finalizer(
		&api,
		&finalizer_name("MCPServer"),
		server,
		|event| async {
			match event {
				Event::Apply(server) => apply_server(server, &ctx).await,
				Event::Cleanup(server) => cleanup(server, &ctx).await,
			}
		},
	)
	.await
	.map_err(|err| Error::Finalizer {
		name,
		message: err.to_string(),
	})
}

async fn apply_server(server: Arc<MCPServer>, ctx: &Context) -> Result<Action> {
	let namespace = server.namespace().unwrap_or_default();
	let name = server.name_any();
	let api: Api<MCPServer> = Api::namespaced(ctx.client.clone(), &namespace);

	let mut collector = StatusCollector::new();
	collector.observed_generation(server.metadata.generation);

	let outcome = materialize(&server, ctx, &namespace, &mut collector).await;
	match &outcome {
		Ok(()) => {
			collector
				.phase(Phase::Ready)
				.clear_message()
				.condition(conditions::READY, ConditionStatus::True, "Reconciled", None)
				.condition(
					conditions::REFERENT_RESOLVED,
					ConditionStatus::True,
					"Resolved",
					None,
				)
				.field(
					"url",
					serde_json::json!(service::service_url(&name, &namespace, server.spec.port)),
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
			if matches!(err, Error::SpecInvalid { field, .. } if field == "podTemplateSpec") {
				collector.condition(
					conditions::POD_TEMPLATE_VALID,
					ConditionStatus::False,
					err.reason(),
					Some(err.to_string()),
				);
			}
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

async fn cleanup(server: Arc<MCPServer>, ctx: &Context) -> Result<Action> {
	// Children carry controller owner references; cluster GC reaps them once
	// the finalizer is gone. Nothing external to release for a server.
	info!(target: "server", server = %server.name_any(), "cleaning up deleted server");
	let namespace = server.namespace().unwrap_or_default();
	let api: Api<MCPServer> = Api::namespaced(ctx.client.clone(), &namespace);
	let mut collector = StatusCollector::new();
	collector.phase(Phase::Terminating);
	// Best effort: the object is on its way out.
	if let Err(err) = collector.flush(&api, &server.name_any(), &[]).await {
		warn!(target: "server", error = %err, "terminating status patch failed");
	}
	Ok(Action::await_change())
}

async fn materialize(
	server: &MCPServer,
	ctx: &Context,
	namespace: &str,
	collector: &mut StatusCollector,
) -> Result<()> {
	let name = server.name_any();
	let spec = &server.spec;

	if spec.tool_config_ref.is_some() && !spec.tools_filter.is_empty() {
		return Err(Error::spec_invalid(
			"toolsFilter",
			"toolsFilter and toolConfigRef are mutually exclusive",
		));
	}

	enforcement::enforce_server(&ctx.client, namespace, server).await?;

	let refs = resolve_refs(server, ctx, namespace).await?;
	if let Some(tool_hash) = &refs.tool_config_hash {
		collector.field("toolConfigHash", serde_json::json!(tool_hash));
	}
	if let Some(auth_hash) = &refs.external_auth_hash {
		collector.field("externalAuthConfigHash", serde_json::json!(auth_hash));
	}

	let runconfig = build_runconfig(server, &refs)?;
	let runconfig_hash = runconfig
		.config_hash()
		.map_err(|e| Error::Transient(format!("hashing runconfig: {e}")))?;

	let owner = owner_reference(server)?;
	let detected = platform::detect(&ctx.client).await?;

	// Runconfig ConfigMap
	let runconfig_json = serde_json::to_string_pretty(&runconfig)
		.map_err(|e| Error::Transient(format!("serializing runconfig: {e}")))?;
	let mut cm_labels = labels::standard_labels(&name, &name, COMPONENT);
	cm_labels.insert(labels::SERVER_LABEL.to_string(), name.clone());
	let config_map = ConfigMap {
		metadata: ObjectMeta {
			name: Some(format!("{name}-runconfig")),
			namespace: Some(namespace.to_string()),
			labels: Some(cm_labels),
			owner_references: Some(vec![owner.clone()]),
			..Default::default()
		},
		data: Some(BTreeMap::from([(
			RUNCONFIG_KEY.to_string(),
			runconfig_json,
		)])),
		..Default::default()
	};
	let config_maps: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), namespace);
	apply(&config_maps, &format!("{name}-runconfig"), &config_map).await?;

	// RBAC, unless the user brings their own service account
	let service_account = match &spec.service_account {
		Some(account) => account.clone(),
		None => {
			let sa = rbac::runner_service_account(&name, namespace, COMPONENT, &owner);
			let role = rbac::runner_role(&name, namespace, COMPONENT, &owner);
			let binding = rbac::runner_role_binding(&name, namespace, COMPONENT, &owner);
			let sa_name = rbac::runner_service_account_name(&name);
			let sas: Api<ServiceAccount> = Api::namespaced(ctx.client.clone(), namespace);
			let roles: Api<Role> = Api::namespaced(ctx.client.clone(), namespace);
			let bindings: Api<RoleBinding> = Api::namespaced(ctx.client.clone(), namespace);
			apply(&sas, &sa_name, &sa).await?;
			apply(&roles, &sa_name, &role).await?;
			apply(&bindings, &sa_name, &binding).await?;
			sa_name
		},
	};

	// Workload env: required vars plus secret bindings from auth and OIDC
	let mut env = Vec::new();
	env.extend(refs.auth.env.iter().cloned());
	env.extend(refs.oidc_env.iter().cloned());
	ensure_required_env_vars(&mut env, &name, namespace);

	let workload = ProxyWorkload {
		name: &name,
		namespace,
		component: COMPONENT,
		proxy_image: &ctx.config.proxy_image,
		port: spec.port,
		target_port: spec.target_port.unwrap_or(spec.port),
		runconfig_hash: &runconfig_hash,
		service_account,
		env,
		volumes: &spec.volumes,
		secret_mounts: refs.auth.mounts.clone(),
		config_map_mounts: refs.ca_bundle_mount.clone().into_iter().collect(),
		resources: spec.resources.as_ref(),
		pod_template_patch: spec.pod_template_spec.as_ref(),
		owner: owner.clone(),
	};
	let deployment = workload.build(detected)?;
	let deployments: Api<Deployment> = Api::namespaced(ctx.client.clone(), namespace);
	apply(&deployments, &name, &deployment).await?;

	let svc = service::proxy_service(
		&name,
		namespace,
		COMPONENT,
		spec.port,
		spec.target_port.unwrap_or(spec.port),
		owner,
	);
	let services: Api<Service> = Api::namespaced(ctx.client.clone(), namespace);
	apply(&services, &service::proxy_service_name(&name), &svc).await?;

	Ok(())
}

async fn resolve_refs(server: &MCPServer, ctx: &Context, namespace: &str) -> Result<ResolvedRefs> {
	let name = server.name_any();
	let mut refs = ResolvedRefs::default();

	if let Some(profile) = &server.spec.permission_profile {
		refs.permission_profile = Some(match profile.type_.as_str() {
			"builtin" => serde_json::json!({"type": "builtin", "name": profile.name}),
			"configmap" => {
				let key = profile.key.as_deref().unwrap_or("permissions.json");
				let document =
					get_config_map_key(&ctx.client, namespace, &profile.name, key).await?;
				serde_json::from_str(&document).map_err(|e| {
					Error::referent_invalid(
						"ConfigMap",
						&profile.name,
						format!("invalid permission profile: {e}"),
					)
				})?
			},
			other => {
				return Err(Error::spec_invalid(
					"permissionProfile.type",
					format!("unknown permission profile type {other:?}"),
				));
			},
		});
	}

	if let Some(tool_config_name) = &server.spec.tool_config_ref {
		let api: Api<MCPToolConfig> = Api::namespaced(ctx.client.clone(), namespace);
		let tool_config = api
			.get_opt(tool_config_name)
			.await?
			.ok_or_else(|| Error::referent_missing("MCPToolConfig", tool_config_name))?;
		refs.tool_config_hash = Some(
			hash::spec_hash(&tool_config.spec)
				.map_err(|e| Error::Transient(format!("hashing tool config: {e}")))?,
		);
		refs.tool_config = Some(tool_config);
	}

	// OIDC resolution must precede external auth: the embedded auth server
	// needs the resolved resource URL.
	if let Some(oidc) = &server.spec.oidc_config {
		let (resolved, env, ca_mount) = resolve_oidc(oidc, ctx, namespace).await?;
		refs.oidc = Some(resolved);
		refs.oidc_env = env;
		refs.ca_bundle_mount = ca_mount;
	}

	if let Some(auth_name) = &server.spec.external_auth_config_ref {
		let api: Api<MCPExternalAuthConfig> = Api::namespaced(ctx.client.clone(), namespace);
		let auth = api
			.get_opt(auth_name)
			.await?
			.ok_or_else(|| Error::referent_missing("MCPExternalAuthConfig", auth_name))?;
		auth.spec.validate_variant().map_err(|message| {
			Error::referent_invalid("MCPExternalAuthConfig", auth_name, message)
		})?;
		for secret_ref in super::external_auth::referenced_secrets(&auth) {
			ensure_secret_key(&ctx.client, namespace, &secret_ref).await?;
		}
		refs.external_auth_hash = Some(
			hash::spec_hash(&auth.spec)
				.map_err(|e| Error::Transient(format!("hashing auth config: {e}")))?,
		);
		let resource_url = refs
			.oidc
			.as_ref()
			.and_then(|oidc| oidc.resource_url.as_deref());
		refs.auth = translate_external_auth(&auth.spec, &name, resource_url)?;
	}

	Ok(refs)
}

async fn resolve_oidc(
	oidc: &OidcConfigRef,
	ctx: &Context,
	namespace: &str,
) -> Result<(ResolvedOidc, Vec<EnvVar>, Option<ConfigMapFileMount>)> {
	let mut env = Vec::new();

	let mut resolved = match oidc.type_.as_str() {
		"inline" => {
			let inline = oidc.inline.as_ref().ok_or_else(|| {
				Error::spec_invalid("oidcConfig.inline", "type is inline but inline is not set")
			})?;
			if inline.issuer.is_empty() {
				return Err(Error::spec_invalid("oidcConfig.inline.issuer", "issuer is required"));
			}
			if let Some(secret_ref) = &inline.client_secret_ref {
				ensure_secret_key(&ctx.client, namespace, secret_ref).await?;
				env.push(from_secret(
					OIDC_CLIENT_SECRET_VAR,
					&secret_ref.name,
					&secret_ref.key,
				));
			}
			ResolvedOidc {
				issuer: inline.issuer.clone(),
				audience: inline.audience.clone(),
				jwks_url: inline.jwks_url.clone(),
				client_id: inline.client_id.clone(),
				has_client_secret: inline.client_secret_ref.is_some(),
				has_ca_bundle: false,
				resource_url: None,
			}
		},
		"configmap" => {
			let cm_ref = oidc.config_map.as_ref().ok_or_else(|| {
				Error::spec_invalid(
					"oidcConfig.configMap",
					"type is configmap but configMap is not set",
				)
			})?;
			let document =
				get_config_map_key(&ctx.client, namespace, &cm_ref.name, &cm_ref.key).await?;
			crate::runconfig::parse_oidc_document(&document).map_err(|message| {
				Error::referent_invalid("ConfigMap", &cm_ref.name, message)
			})?
		},
		other => {
			return Err(Error::spec_invalid(
				"oidcConfig.type",
				format!("unknown OIDC config type {other:?}"),
			));
		},
	};
	resolved.resource_url = oidc.resource_url.clone();

	let ca_mount = match &oidc.ca_bundle_ref {
		Some(ca_ref) => {
			// Existence check also validates the key.
			get_config_map_key(&ctx.client, namespace, &ca_ref.name, &ca_ref.key).await?;
			resolved.has_ca_bundle = true;
			Some(ConfigMapFileMount {
				volume_name: "oidc-ca-bundle".to_string(),
				config_map_name: ca_ref.name.clone(),
				items: vec![(ca_ref.key.clone(), "ca.crt".to_string())],
				mount_path: "/etc/toolhive/oidc".to_string(),
			})
		},
		None => None,
	};

	Ok((resolved, env, ca_mount))
}

fn build_runconfig(server: &MCPServer, refs: &ResolvedRefs) -> Result<crate::runconfig::RunConfig> {
	let spec = &server.spec;
	let name = server.name_any();

	let env_vars: BTreeMap<String, String> = spec
		.env
		.iter()
		.map(|var| (var.name.clone(), var.value.clone()))
		.collect();

	let (tools_filter, tools_override) = match &refs.tool_config {
		Some(tool_config) => {
			let allowed: Vec<String> = tool_config
				.spec
				.allow
				.iter()
				.filter(|tool| !tool_config.spec.deny.contains(tool))
				.cloned()
				.collect();
			let filter = if allowed.is_empty() && tool_config.spec.deny.is_empty() {
				None
			} else {
				Some(allowed)
			};
			(filter, tool_config.spec.overrides.clone())
		},
		None if !spec.tools_filter.is_empty() => (Some(spec.tools_filter.clone()), BTreeMap::new()),
		None => (None, BTreeMap::new()),
	};

	let config = RunConfigBuilder::new(
		&name,
		spec.transport,
		spec.port,
		spec.target_port,
	)
	.image(&spec.image)
	.proxy_mode(spec.proxy_mode.map(|mode| {
		match mode {
			crate::api::ProxyMode::Sse => "sse".to_string(),
			crate::api::ProxyMode::StreamableHttp => "streamable-http".to_string(),
		}
	}))
	.args(&spec.args)
	.env_vars(env_vars)
	.tools_filter(tools_filter)
	.tools_override(tools_override)
	.permission_profile(refs.permission_profile.clone())
	.telemetry(translate_telemetry(spec.telemetry.as_ref(), &name))
	.audit(translate_audit(spec.audit.as_ref(), &name))
	.authz(translate_authz(spec.authz.as_ref())?)
	.oidc(translate_oidc(refs.oidc.as_ref()))
	.middleware(refs.auth.middleware.clone())
	.build();
	Ok(config)
}

/// Wire the MCPServer controller: reconcile on server changes and requeue
/// referrers when a referenced ToolConfig, ExternalAuthConfig or enforcing
/// Registry changes.
pub async fn run(ctx: Arc<Context>) {
	let apis = scoped_apis::<MCPServer>(&ctx.client, &ctx.config);
	let controllers = apis.into_iter().map(|api| {
		let ctx = ctx.clone();
		let controller = Controller::new(api, watcher::Config::default());
		let store = controller.store();

		let tool_configs: Api<MCPToolConfig> = Api::all(ctx.client.clone());
		let auth_configs: Api<MCPExternalAuthConfig> = Api::all(ctx.client.clone());
		let registries: Api<MCPRegistry> = Api::all(ctx.client.clone());

		let tool_store = store.clone();
		let auth_store = store.clone();
		let registry_store = store.clone();

		controller
			.watches(tool_configs, watcher::Config::default(), move |config: MCPToolConfig| {
				map_tool_config(&tool_store, &config)
			})
			.watches(
				auth_configs,
				watcher::Config::default(),
				move |config: MCPExternalAuthConfig| map_auth_config(&auth_store, &config),
			)
			.watches(
				registries,
				watcher::Config::default(),
				move |registry: MCPRegistry| map_registry(&registry_store, &registry),
			)
			.shutdown_on_signal()
			.run(
				|obj, ctx| async move { trap_panics(reconcile(obj, ctx)).await },
				error_policy,
				ctx,
			)
			.for_each(|result| async move {
				match result {
					Ok((obj, _)) => info!(target: "server", object = %obj, "reconciled"),
					Err(err) => warn!(target: "server", error = %err, "reconcile failed"),
				}
			})
	});
	futures::future::join_all(controllers).await;
}

fn map_tool_config(
	store: &Store<MCPServer>,
	config: &MCPToolConfig,
) -> Vec<kube::runtime::reflector::ObjectRef<MCPServer>> {
	let Some(namespace) = config.namespace() else {
		return Vec::new();
	};
	let name = config.name_any();
	index::referrers(store, &namespace, |srv: &MCPServer| {
		srv.spec.tool_config_ref.as_deref() == Some(name.as_str())
	})
}

fn map_auth_config(
	store: &Store<MCPServer>,
	config: &MCPExternalAuthConfig,
) -> Vec<kube::runtime::reflector::ObjectRef<MCPServer>> {
	let Some(namespace) = config.namespace() else {
		return Vec::new();
	};
	let name = config.name_any();
	index::referrers(store, &namespace, |srv: &MCPServer| {
		srv.spec.external_auth_config_ref.as_deref() == Some(name.as_str())
	})
}

/// An enforcing registry change re-gates every server in its namespace.
fn map_registry(
	store: &Store<MCPServer>,
	registry: &MCPRegistry,
) -> Vec<kube::runtime::reflector::ObjectRef<MCPServer>> {
	let Some(namespace) = registry.namespace() else {
		return Vec::new();
	};
	if !registry.spec.enforcing() {
		return Vec::new();
	}
	index::referrers(store, &namespace, |_srv: &MCPServer| true)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::api::MCPServerSpec;

	#[test]
	fn test_build_runconfig_minimal() {
		let server = MCPServer::new(
			"fetch",
			MCPServerSpec {
				image: "docker.io/mcp/fetch".to_string(),
				..Default::default()
			},
		);
		let config = build_runconfig(&server, &ResolvedRefs::default()).unwrap();
		assert_eq!(config.name, "fetch");
		assert_eq!(config.image.as_deref(), Some("docker.io/mcp/fetch"));
		assert_eq!(config.port, 8080);
		assert_eq!(config.target_port, 8080);
		assert!(config.tools_filter.is_none());
	}

	#[test]
	fn test_build_runconfig_inline_filter() {
		let server = MCPServer::new(
			"fetch",
			MCPServerSpec {
				image: "img".to_string(),
				tools_filter: vec!["get".to_string(), "head".to_string()],
				..Default::default()
			},
		);
		let config = build_runconfig(&server, &ResolvedRefs::default()).unwrap();
		assert_eq!(
			config.tools_filter,
			Some(vec!["get".to_string(), "head".to_string()])
		);
	}

	#[test]
	fn test_build_runconfig_tool_config_deny_wins() {
		use crate::api::MCPToolConfigSpec;
		let server = MCPServer::new(
			"fetch",
			MCPServerSpec {
				image: "img".to_string(),
				tool_config_ref: Some("filters".to_string()),
				..Default::default()
			},
		);
		let refs = ResolvedRefs {
			tool_config: Some(MCPToolConfig::new(
				"filters",
				MCPToolConfigSpec {
					allow: vec!["get".to_string(), "delete".to_string()],
					deny: vec!["delete".to_string()],
					overrides: BTreeMap::new(),
				},
			)),
			..Default::default()
		};
		let config = build_runconfig(&server, &refs).unwrap();
		assert_eq!(config.tools_filter, Some(vec!["get".to_string()]));
	}

	#[test]
	fn test_runconfig_hash_stable_across_builds() {
		let server = MCPServer::new(
			"fetch",
			MCPServerSpec {
				image: "img".to_string(),
				..Default::default()
			},
		);
		let a = build_runconfig(&server, &ResolvedRefs::default()).unwrap();
		let b = build_runconfig(&server, &ResolvedRefs::default()).unwrap();
		assert_eq!(a.config_hash().unwrap(), b.config_hash().unwrap());
	}
}
