// MCPToolConfig reconciler: fingerprint the spec, publish it in status, and
// track which servers reference the config. Referrer requeue on change is
// wired from the server controllers' watches.

use std::sync::Arc;

use futures_util::StreamExt;
use kube::runtime::Controller;
use kube::runtime::controller::Action;
use kube::runtime::watcher;
use kube::{Api, ResourceExt};
use tracing::{info, warn};

use super::{Context, STEADY_REQUEUE, error_policy, object_key, scoped_apis, trap_panics};
use crate::api::{ConditionStatus, MCPServer, MCPToolConfig, Phase, conditions};
use crate::error::{Error, Result};
use crate::hash;
use crate::status::StatusCollector;

/// Names of servers referencing this config, sorted for stable status.
fn referencing_servers(servers: &[MCPServer], config_name: &str) -> Vec<String> {
	let mut names: Vec<String> = servers
		.iter()
		.filter(|srv| srv.spec.tool_config_ref.as_deref() == Some(config_name))
		.map(|srv| srv.name_any())
		.collect();
	names.sort();
	names
}

pub async fn reconcile(config: Arc<MCPToolConfig>, ctx: Arc<Context>) -> Result<Action> {
	let namespace = config
		.namespace()
		.ok_or_else(|| Error::Transient("object has no namespace".to_string()))?;
	let name = config.name_any();
	let api: Api<MCPToolConfig> = Api::namespaced(ctx.client.clone(), &namespace);

	let config_hash = hash::spec_hash(&config.spec)
		.map_err(|e| Error::Transient(format!("hashing spec: {e}")))?;

	let servers: Api<MCPServer> = Api::namespaced(ctx.client.clone(), &namespace);
	let referencing = referencing_servers(&servers.list(&Default::default()).await?.items, &name);

	let mut collector = StatusCollector::new();
	collector
		.observed_generation(config.metadata.generation)
		.phase(Phase::Ready)
		.condition(conditions::READY, ConditionStatus::True, "Reconciled", None)
		.field("configHash", serde_json::json!(config_hash))
		.field("referencingServers", serde_json::json!(referencing));

	let existing = config
		.status
		.as_ref()
		.map(|s| s.conditions.clone())
		.unwrap_or_default();
	collector.flush(&api, &name, &existing).await?;

	ctx.backoff.reset(&object_key(config.as_ref()));
	Ok(Action::requeue(STEADY_REQUEUE))
}

pub async fn run(ctx: Arc<Context>) {
	let apis = scoped_apis::<MCPToolConfig>(&ctx.client, &ctx.config);
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
					Ok((obj, _)) => info!(target: "toolconfig", object = %obj, "reconciled"),
					Err(err) => warn!(target: "toolconfig", error = %err, "reconcile failed"),
				}
			})
	});
	futures::future::join_all(controllers).await;
}
