// MCPRemoteProxy reconciler: the proxy workload fronts an externally hosted
// MCP endpoint, so no runner RBAC and no server image are materialized.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kube::api::ObjectMeta;
use kube::runtime::Controller;
use kube::runtime::controller::Action;
use kube::runtime::finalizer::{Event, finalizer};
use kube::runtime::watcher;
use kube::{Api, ResourceExt};
use tracing::{info, warn};

use super::{
	Context, STEADY_REQUEUE, ensure_secret_key, error_policy, object_key, scoped_apis, trap_panics,
};
use crate::api::{
	ConditionStatus, MCPExternalAuthConfig, MCPRemoteProxy, MCPToolConfig, MCPToolConfigSpec,
	OidcConfigRef, Phase, ToolOverride, Transport, conditions, finalizer_name,
};
use crate::error::{Error, Result};
use crate::hash;
use crate::platform;
use crate::resources::deployment::{ProxyWorkload, RUNCONFIG_KEY};
use crate::resources::env::{UPSTREAM_CLIENT_SECRET_VAR, ensure_required_env_vars, from_secret};
use crate::resources::{apply, labels, owner_reference, service};
use crate::runconfig::{
	ResolvedOidc, RunConfigBuilder, translate_audit, translate_external_auth, translate_oidc,
	translate_telemetry,
};
use crate::status::StatusCollector;

const COMPONENT: &str = "mcp-remote-proxy";

/// The remote endpoint must be a non-empty, parseable URL.
fn validate_remote_url(remote_url: &str) -> Result<()> {
	if remote_url.is_empty() {
		return Err(Error::spec_invalid("remoteUrl", "remoteUrl is required"));
	}
	url::Url::parse(remote_url)
		.map_err(|e| Error::spec_invalid("remoteUrl", format!("invalid URL: {e}")))?;
	Ok(())
}

/// Remote proxies only support the inline OIDC form; the resolved view
/// carries the resource URL along for outgoing-auth translation.
fn resolve_inline_oidc(oidc: &OidcConfigRef) -> Result<ResolvedOidc> {
	let inline = oidc.inline.as_ref().ok_or_else(|| {
		Error::spec_invalid(
			"oidcConfig",
			"remote proxies support inline OIDC configuration only",
		)
	})?;
	if inline.issuer.is_empty() {
		return Err(Error::spec_invalid("oidcConfig.inline.issuer", "issuer is required"));
	}
	Ok(ResolvedOidc {
		issuer: inline.issuer.clone(),
		audience: inline.audience.clone(),
		jwks_url: inline.jwks_url.clone(),
		client_id: inline.client_id.clone(),
		has_client_secret: inline.client_secret_ref.is_some(),
		has_ca_bundle: false,
		resource_url: oidc.resource_url.clone(),
	})
}

/// Tool filter from a referenced config: deny wins over allow, and a config
/// with neither list yields no filter at all.
fn tools_from_config(
	spec: &MCPToolConfigSpec,
) -> (Option<Vec<String>>, BTreeMap<String, ToolOverride>) {
	let filter = if spec.allow.is_empty() && spec.deny.is_empty() {
		None
	} else {
		Some(
			spec.allow
				.iter()
				.filter(|tool| !spec.deny.contains(tool))
				.cloned()
				.collect::<Vec<_>>(),
		)
	};
	(filter, spec.overrides.clone())
}

pub async fn reconcile(proxy: Arc<MCPRemoteProxy>, ctx: Arc<Context>) -> Result<Action> {
	let namespace = proxy
		.namespace()
		.ok_or_else(|| Error::Transient("object has no namespace".to_string()))?;
	let api: Api<MCPRemoteProxy> = Api::namespaced(ctx.client.clone(), &namespace);
	let name = proxy.name_any();

	finalizer(
		&api,
		&finalizer_name("MCPRemoteProxy"),
		proxy,
		|event| async {
			match event {
				Event::Apply(proxy) => apply_proxy(proxy, &ctx).await,
				Event::Cleanup(proxy) => {
					info!(target: "remoteproxy", proxy = %proxy.name_any(), "cleaning up");
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

async fn apply_proxy(proxy: Arc<MCPRemoteProxy>, ctx: &Context) -> Result<Action> {
	let namespace = proxy.namespace().unwrap_or_default();
	let name = proxy.name_any();
	let api: Api<MCPRemoteProxy> = Api::namespaced(ctx.client.clone(), &namespace);

	let mut collector = StatusCollector::new();
	collector.observed_generation(proxy.metadata.generation);

	let outcome = materialize(&proxy, ctx, &namespace, &mut collector).await;
	match &outcome {
		Ok(()) => {
			collector
				.phase(Phase::Ready)
				.clear_message()
				.condition(conditions::READY, ConditionStatus::True, "Reconciled", None)
				.field(
					"url",
					serde_json::json!(service::service_url(&name, &namespace, proxy.spec.port)),
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

	let existing = proxy
		.status
		.as_ref()
		.map(|s| s.conditions.clone())
		.unwrap_or_default();
	collector.flush(&api, &name, &existing).await?;

	outcome.map(|()| {
		ctx.backoff.reset(&object_key(proxy.as_ref()));
		Action::requeue(STEADY_REQUEUE)
	})
}

async fn materialize(
	proxy: &MCPRemoteProxy,
	ctx: &Context,
	namespace: &str,
	collector: &mut StatusCollector,
) -> Result<()> {
	let name = proxy.name_any();
	let spec = &proxy.spec;

	validate_remote_url(&spec.remote_url)?;

	// Tool config
	let mut tools_filter = None;
	let mut tools_override = BTreeMap::new();
	if let Some(tool_config_name) = &spec.tool_config_ref {
		let api: Api<MCPToolConfig> = Api::namespaced(ctx.client.clone(), namespace);
		let tool_config = api
			.get_opt(tool_config_name)
			.await?
			.ok_or_else(|| Error::referent_missing("MCPToolConfig", tool_config_name))?;
		collector.field(
			"toolConfigHash",
			serde_json::json!(
				hash::spec_hash(&tool_config.spec)
					.map_err(|e| Error::Transient(format!("hashing tool config: {e}")))?
			),
		);
		(tools_filter, tools_override) = tools_from_config(&tool_config.spec);
	}

	// Incoming OIDC: the proxy validates caller tokens; its client secret
	// against the upstream issuer is bound through the env, never inlined.
	let mut oidc_env = Vec::new();
	let mut resolved_oidc: Option<ResolvedOidc> = None;
	if let Some(oidc) = &spec.oidc_config {
		let resolved = resolve_inline_oidc(oidc)?;
		if let Some(secret_ref) = oidc.inline.as_ref().and_then(|inline| inline.client_secret_ref.as_ref()) {
			ensure_secret_key(&ctx.client, namespace, secret_ref).await?;
			oidc_env.push(from_secret(
				UPSTREAM_CLIENT_SECRET_VAR,
				&secret_ref.name,
				&secret_ref.key,
			));
		}
		resolved_oidc = Some(resolved);
	}

	// Outgoing auth
	let mut auth = crate::runconfig::TranslatedAuth::default();
	if let Some(auth_name) = &spec.external_auth_config_ref {
		let api: Api<MCPExternalAuthConfig> = Api::namespaced(ctx.client.clone(), namespace);
		let auth_config = api
			.get_opt(auth_name)
			.await?
			.ok_or_else(|| Error::referent_missing("MCPExternalAuthConfig", auth_name))?;
		auth_config.spec.validate_variant().map_err(|message| {
			Error::referent_invalid("MCPExternalAuthConfig", auth_name, message)
		})?;
		for secret_ref in super::external_auth::referenced_secrets(&auth_config) {
			ensure_secret_key(&ctx.client, namespace, &secret_ref).await?;
		}
		collector.field(
			"externalAuthConfigHash",
			serde_json::json!(
				hash::spec_hash(&auth_config.spec)
					.map_err(|e| Error::Transient(format!("hashing auth config: {e}")))?
			),
		);
		let resource_url = spec
			.oidc_config
			.as_ref()
			.and_then(|oidc| oidc.resource_url.as_deref());
		auth = translate_external_auth(&auth_config.spec, &name, resource_url)?;
	}

	let mut oidc_config = translate_oidc(resolved_oidc.as_ref());
	if let Some(config) = oidc_config.as_mut() {
		if config.client_secret_env.is_some() {
			config.client_secret_env = Some(UPSTREAM_CLIENT_SECRET_VAR.to_string());
		}
	}

	let runconfig = RunConfigBuilder::new(&name, Transport::StreamableHttp, spec.port, None)
		.remote_url(&spec.remote_url)
		.tools_filter(tools_filter)
		.tools_override(tools_override)
		.telemetry(translate_telemetry(spec.telemetry.as_ref(), &name))
		.audit(translate_audit(spec.audit.as_ref(), &name))
		.oidc(oidc_config)
		.middleware(auth.middleware.clone())
		.build();
	let runconfig_hash = runconfig
		.config_hash()
		.map_err(|e| Error::Transient(format!("hashing runconfig: {e}")))?;

	let owner = owner_reference(proxy)?;
	let detected = platform::detect(&ctx.client).await?;

	let runconfig_json = serde_json::to_string_pretty(&runconfig)
		.map_err(|e| Error::Transient(format!("serializing runconfig: {e}")))?;
	let config_map = ConfigMap {
		metadata: ObjectMeta {
			name: Some(format!("{name}-runconfig")),
			namespace: Some(namespace.to_string()),
			labels: Some(labels::standard_labels(&name, &name, COMPONENT)),
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

	let mut env = auth.env.clone();
	env.extend(oidc_env);
	ensure_required_env_vars(&mut env, &name, namespace);

	let workload = ProxyWorkload {
		name: &name,
		namespace,
		component: COMPONENT,
		proxy_image: &ctx.config.proxy_image,
		port: spec.port,
		target_port: spec.port,
		runconfig_hash: &runconfig_hash,
		// Remote proxies own no process; the default account is enough.
		service_account: "default".to_string(),
		env,
		volumes: &[],
		secret_mounts: auth.mounts.clone(),
		config_map_mounts: Vec::new(),
		resources: spec.resources.as_ref(),
		pod_template_patch: spec.pod_template_spec.as_ref(),
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

pub async fn run(ctx: Arc<Context>) {
	let apis = scoped_apis::<MCPRemoteProxy>(&ctx.client, &ctx.config);
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
					Ok((obj, _)) => info!(target: "remoteproxy", object = %obj, "reconciled"),
					Err(err) => warn!(target: "remoteproxy", error = %err, "reconcile failed"),
				}
			})
	});
	futures::future::join_all(controllers).await;
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::api::{OidcConfigMapRef, OidcInlineConfig, SecretKeyRef};

	#[test]
	fn test_validate_remote_url() {
		assert!(validate_remote_url("https://mcp.example.com/sse").is_ok());

		let err = validate_remote_url("").unwrap_err();
		assert!(matches!(err, Error::SpecInvalid { .. }));

		let err = validate_remote_url("not a url").unwrap_err();
		assert!(matches!(err, Error::SpecInvalid { .. }));
		assert!(err.to_string().contains("invalid URL"), "{err}");
	}

	#[test]
	fn test_resolve_inline_oidc() {
		let oidc = OidcConfigRef {
			type_: "inline".to_string(),
			inline: Some(OidcInlineConfig {
				issuer: "https://issuer.example.com".to_string(),
				audience: Some("mcp".to_string()),
				jwks_url: None,
				client_id: Some("cid".to_string()),
				client_secret_ref: Some(SecretKeyRef {
					name: "oauth".to_string(),
					key: "secret".to_string(),
				}),
			}),
			config_map: None,
			ca_bundle_ref: None,
			resource_url: Some("https://mcp.example.com".to_string()),
		};
		let resolved = resolve_inline_oidc(&oidc).unwrap();
		assert_eq!(resolved.issuer, "https://issuer.example.com");
		assert!(resolved.has_client_secret);
		assert_eq!(resolved.resource_url.as_deref(), Some("https://mcp.example.com"));
	}

	#[test]
	fn test_resolve_inline_oidc_rejects_configmap_form() {
		let oidc = OidcConfigRef {
			type_: "configmap".to_string(),
			inline: None,
			config_map: Some(OidcConfigMapRef {
				name: "oidc".to_string(),
				key: "oidc.json".to_string(),
			}),
			ca_bundle_ref: None,
			resource_url: None,
		};
		let err = resolve_inline_oidc(&oidc).unwrap_err();
		assert!(matches!(err, Error::SpecInvalid { .. }));
		assert!(err.to_string().contains("inline"), "{err}");
	}

	#[test]
	fn test_resolve_inline_oidc_requires_issuer() {
		let oidc = OidcConfigRef {
			type_: "inline".to_string(),
			inline: Some(OidcInlineConfig::default()),
			config_map: None,
			ca_bundle_ref: None,
			resource_url: None,
		};
		let err = resolve_inline_oidc(&oidc).unwrap_err();
		assert!(err.to_string().contains("issuer"), "{err}");
	}

	#[test]
	fn test_tools_from_config_deny_wins() {
		let spec = MCPToolConfigSpec {
			allow: vec!["get".to_string(), "delete".to_string()],
			deny: vec!["delete".to_string()],
			overrides: BTreeMap::new(),
		};
		let (filter, overrides) = tools_from_config(&spec);
		assert_eq!(filter, Some(vec!["get".to_string()]));
		assert!(overrides.is_empty());
	}

	#[test]
	fn test_tools_from_config_empty_is_no_filter() {
		let (filter, _) = tools_from_config(&MCPToolConfigSpec::default());
		assert!(filter.is_none());
	}

	#[test]
	fn test_tools_from_config_deny_only_blocks_everything() {
		let spec = MCPToolConfigSpec {
			allow: vec![],
			deny: vec!["rm".to_string()],
			overrides: BTreeMap::new(),
		};
		let (filter, _) = tools_from_config(&spec);
		assert_eq!(filter, Some(vec![]));
	}
}
