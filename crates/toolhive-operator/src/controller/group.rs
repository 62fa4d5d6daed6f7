// MCPGroup reconciler: membership is computed from server groupRefs, the
// group object itself never stores member lists in spec.

use std::sync::Arc;

use futures_util::StreamExt;
use kube::runtime::Controller;
use kube::runtime::controller::Action;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher;
use kube::{Api, ResourceExt};
use tracing::{info, warn};

use super::{Context, STEADY_REQUEUE, error_policy, object_key, scoped_apis, trap_panics};
use crate::api::{ConditionStatus, MCPGroup, MCPRemoteProxy, MCPServer, Phase, conditions};
use crate::error::{Error, Result};
use crate::status::StatusCollector;

/// Current member names of a group: servers plus remote proxies.
async fn members(ctx: &Context, namespace: &str, group: &str) -> Result<Vec<String>> {
	let servers: Api<MCPServer> = Api::namespaced(ctx.client.clone(), namespace);
	let proxies: Api<MCPRemoteProxy> = Api::namespaced(ctx.client.clone(), namespace);

	let mut names: Vec<String> = servers
		.list(&Default::default())
		.await?
		.items
		.into_iter()
		.filter(|srv| srv.spec.group_ref.as_deref() == Some(group))
		.map(|srv| srv.name_any())
		.collect();
	names.extend(
		proxies
			.list(&Default::default())
			.await?
			.items
			.into_iter()
			.filter(|proxy| proxy.spec.group_ref.as_deref() == Some(group))
			.map(|proxy| proxy.name_any()),
	);
	names.sort();
	names.dedup();
	Ok(names)
}

pub async fn reconcile(group: Arc<MCPGroup>, ctx: Arc<Context>) -> Result<Action> {
	let namespace = group
		.namespace()
		.ok_or_else(|| Error::Transient("object has no namespace".to_string()))?;
	let name = group.name_any();
	let api: Api<MCPGroup> = Api::namespaced(ctx.client.clone(), &namespace);

	let members = members(&ctx, &namespace, &name).await?;

	let mut collector = StatusCollector::new();
	collector
		.observed_generation(group.metadata.generation)
		.phase(Phase::Ready)
		.condition(conditions::READY, ConditionStatus::True, "Reconciled", None)
		.field("serverCount", serde_json::json!(members.len() as i32))
		.field("servers", serde_json::json!(members));

	let existing = group
		.status
		.as_ref()
		.map(|s| s.conditions.clone())
		.unwrap_or_default();
	collector.flush(&api, &name, &existing).await?;

	ctx.backoff.reset(&object_key(group.as_ref()));
	Ok(Action::requeue(STEADY_REQUEUE))
}

/// Map a member change to its group, if it names one.
fn map_member_to_group(group_ref: Option<&str>, namespace: Option<String>) -> Option<ObjectRef<MCPGroup>> {
	let group = group_ref?;
	let namespace = namespace?;
	Some(ObjectRef::new(group).within(&namespace))
}

pub async fn run(ctx: Arc<Context>) {
	let apis = scoped_apis::<MCPGroup>(&ctx.client, &ctx.config);
	let controllers = apis.into_iter().map(|api| {
		let ctx = ctx.clone();
		let servers: Api<MCPServer> = Api::all(ctx.client.clone());
		let proxies: Api<MCPRemoteProxy> = Api::all(ctx.client.clone());
		Controller::new(api, watcher::Config::default())
			.watches(servers, watcher::Config::default(), |srv: MCPServer| {
				map_member_to_group(srv.spec.group_ref.as_deref(), srv.namespace())
			})
			.watches(proxies, watcher::Config::default(), |proxy: MCPRemoteProxy| {
				map_member_to_group(proxy.spec.group_ref.as_deref(), proxy.namespace())
			})
			.shutdown_on_signal()
			.run(
				|obj, ctx| async move { trap_panics(reconcile(obj, ctx)).await },
				error_policy,
				ctx,
			)
			.for_each(|result| async move {
				match result {
					Ok((obj, _)) => info!(target: "group", object = %obj, "reconciled"),
					Err(err) => warn!(target: "group", error = %err, "reconcile failed"),
				}
			})
	});
	futures::future::join_all(controllers).await;
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_map_member_to_group() {
		let mapped = map_member_to_group(Some("dev"), Some("default".to_string())).unwrap();
		assert_eq!(mapped.name, "dev");
		assert_eq!(mapped.namespace.as_deref(), Some("default"));
	}

	#[test]
	fn test_map_member_without_group() {
		assert!(map_member_to_group(None, Some("default".to_string())).is_none());
	}
}
