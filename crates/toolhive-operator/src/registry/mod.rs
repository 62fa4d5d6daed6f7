// Registry subsystem: fetch, validate, hash-gate, filter, persist and serve
// canonical registry data, and enforce image admission for servers.

pub mod api_service;
pub mod convert;
pub mod enforcement;
pub mod fetch;
pub mod filter;
pub mod schema;
pub mod source;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use futures_util::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use kube::runtime::Controller;
use kube::runtime::controller::Action;
use kube::runtime::events::{Event as ClusterEvent, EventType};
use kube::runtime::finalizer::{Event, finalizer};
use kube::runtime::watcher;
use kube::{Api, Resource, ResourceExt};
use tracing::{info, warn};

use crate::api::{
	ConditionStatus, MCPRegistry, MANUAL_SYNC_ANNOTATION, Phase, SYNC_TRIGGER_ANNOTATION,
	SubRegistry, SyncPhase, conditions, finalizer_name,
};
use crate::controller::{Context, error_policy, object_key, scoped_apis, trap_panics};
use crate::error::{Error, Result};
use crate::resources::owner_reference;
use crate::status::StatusCollector;
use fetch::SourceFetcher;
use schema::RegistryData;

/// Per-source fetch deadline within a sync.
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Requeue used when no sync policy drives the cadence.
const IDLE_REQUEUE: Duration = Duration::from_secs(10 * 60);

/// Why a sync is due.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncTrigger {
	/// Never synced successfully.
	Initial,
	/// The spec generation moved past the observed one.
	SpecChange,
	/// The manual-sync annotation changed.
	Manual(String),
	/// The sync interval elapsed.
	Interval,
}

/// Parse a Go-style duration string like "30s", "5m", "1h".
pub fn parse_interval(raw: &str) -> Result<Duration> {
	let raw = raw.trim();
	if raw.is_empty() {
		return Err(Error::spec_invalid("syncPolicy.interval", "empty duration"));
	}

	let (number, unit) = if let Some(stripped) = raw.strip_suffix("ms") {
		(stripped, "ms")
	} else if let Some(stripped) = raw.strip_suffix('s') {
		(stripped, "s")
	} else if let Some(stripped) = raw.strip_suffix('m') {
		(stripped, "m")
	} else if let Some(stripped) = raw.strip_suffix('h') {
		(stripped, "h")
	} else if let Some(stripped) = raw.strip_suffix('d') {
		(stripped, "d")
	} else {
		(raw, "s")
	};

	let number: u64 = number.parse().map_err(|_| {
		Error::spec_invalid(
			"syncPolicy.interval",
			format!("invalid duration number {number:?}"),
		)
	})?;

	Ok(match unit {
		"ms" => Duration::from_millis(number),
		"s" => Duration::from_secs(number),
		"m" => Duration::from_secs(number * 60),
		"h" => Duration::from_secs(number * 60 * 60),
		_ => Duration::from_secs(number * 60 * 60 * 24),
	})
}

/// The manual-sync annotation value, honoring the historical alias.
fn manual_sync_annotation(registry: &MCPRegistry) -> Option<String> {
	let annotations = registry.annotations();
	annotations
		.get(MANUAL_SYNC_ANNOTATION)
		.or_else(|| annotations.get(SYNC_TRIGGER_ANNOTATION))
		.cloned()
}

/// Decide whether a sync is due. The annotation comparison observes
/// inequality against the recorded value, not value semantics.
pub fn needs_sync(registry: &MCPRegistry, now: DateTime<Utc>) -> Result<Option<SyncTrigger>> {
	let status = registry.status.clone().unwrap_or_default();
	let sync_status = status.sync_status.clone().unwrap_or_default();

	if sync_status.last_sync_hash.is_none() {
		return Ok(Some(SyncTrigger::Initial));
	}

	if let Some(annotation) = manual_sync_annotation(registry) {
		if status.last_manual_sync_trigger.as_deref() != Some(annotation.as_str()) {
			return Ok(Some(SyncTrigger::Manual(annotation)));
		}
	}

	if status.observed_generation != registry.metadata.generation {
		return Ok(Some(SyncTrigger::SpecChange));
	}

	if let Some(policy) = &registry.spec.sync_policy {
		let interval = parse_interval(&policy.interval)?;
		let due = match &sync_status.last_sync_time {
			Some(raw) => DateTime::parse_from_rfc3339(raw)
				.map(|last| now.signed_duration_since(last.with_timezone(&Utc)))
				.map(|elapsed| elapsed.num_seconds() >= interval.as_secs() as i64)
				.unwrap_or(true),
			None => true,
		};
		if due {
			return Ok(Some(SyncTrigger::Interval));
		}
	}

	Ok(None)
}

/// Result of a completed sync.
#[derive(Debug)]
pub struct SyncOutcome {
	pub hash: String,
	pub server_count: usize,
	/// False when the hash gate suppressed persistence.
	pub persisted: bool,
}

async fn fetch_sub(
	fetcher: &SourceFetcher,
	namespace: &str,
	sub: &SubRegistry,
) -> Result<RegistryData> {
	let (fetched, detected_upstream) = fetcher
		.fetch_detecting(namespace, sub, FETCH_TIMEOUT)
		.await?;

	let upstream = detected_upstream
		|| matches!(sub.format, crate::api::RegistryDataFormat::Upstream);
	let mut data = if upstream {
		convert::convert_upstream(&fetched.bytes).map_err(Error::Sync)?
	} else {
		RegistryData::parse(&fetched.bytes).map_err(Error::Sync)?
	};

	let compiled = filter::compile(sub.filter.as_ref())?;
	filter::apply(&mut data, &compiled);
	Ok(data)
}

/// Run a full sync: fetch every sub-registry, validate, filter, merge, and
/// persist when the content hash moved.
pub async fn sync(
	registry: &MCPRegistry,
	ctx: &Context,
	fetcher: &SourceFetcher,
) -> Result<SyncOutcome> {
	let namespace = registry.namespace().unwrap_or_default();
	if registry.spec.sub_registries.is_empty() {
		return Err(Error::spec_invalid(
			"subRegistries",
			"registry declares no sub-registries",
		));
	}

	let mut merged = RegistryData::default();
	for sub in &registry.spec.sub_registries {
		let data = fetch_sub(fetcher, &namespace, sub).await?;
		merged.merge(data);
	}
	merged.last_updated = Some(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));

	// Hash over content only, so the timestamp does not defeat the gate.
	let hash = {
		let mut hashable = merged.clone();
		hashable.last_updated = None;
		hashable
			.content_hash()
			.map_err(|e| Error::Transient(format!("hashing registry data: {e}")))?
	};

	let last_hash = registry
		.status
		.as_ref()
		.and_then(|status| status.sync_status.as_ref())
		.and_then(|sync_status| sync_status.last_sync_hash.clone());

	let persisted = if last_hash.as_deref() == Some(hash.as_str()) {
		false
	} else {
		store::persist(&ctx.client, &namespace, registry, &merged).await?;
		true
	};

	Ok(SyncOutcome {
		hash,
		server_count: merged.server_count(),
		persisted,
	})
}

pub async fn reconcile(registry: Arc<MCPRegistry>, ctx: Arc<Context>) -> Result<Action> {
	let namespace = registry
		.namespace()
		.ok_or_else(|| Error::Transient("object has no namespace".to_string()))?;
	let api: Api<MCPRegistry> = Api::namespaced(ctx.client.clone(), &namespace);
	let name = registry.name_any();

	finalizer(
		&api,
		&finalizer_name("MCPRegistry"),
		registry,
		|event| async {
			match event {
				Event::Apply(registry) => apply_registry(registry, &ctx).await,
				Event::Cleanup(registry) => cleanup(registry, &ctx).await,
			}
		},
	)
	.await
	.map_err(|err| Error::Finalizer {
		name,
		message: err.to_string(),
	})
}

async fn apply_registry(registry: Arc<MCPRegistry>, ctx: &Context) -> Result<Action> {
	let namespace = registry.namespace().unwrap_or_default();
	let name = registry.name_any();
	let api: Api<MCPRegistry> = Api::namespaced(ctx.client.clone(), &namespace);

	let mut collector = StatusCollector::new();
	collector.observed_generation(registry.metadata.generation);

	let requeue = run_sync_step(&registry, ctx, &namespace, &mut collector).await;

	// The API workload converges on every reconcile, independent of sync.
	match deploy_api(&registry, ctx, &namespace).await {
		Ok(ready) => {
			// A readiness timestamp survives across reconciles; it only
			// resets when the deployment goes unready.
			let ready_since = if ready {
				registry
					.status
					.as_ref()
					.and_then(|status| status.api_status.as_ref())
					.and_then(|api_status| api_status.ready_since.clone())
					.or_else(|| Some(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)))
			} else {
				None
			};
			collector
				.condition(
					conditions::API_READY,
					if ready {
						ConditionStatus::True
					} else {
						ConditionStatus::False
					},
					if ready { "Ready" } else { "Deploying" },
					None,
				)
				.field(
					"apiStatus",
					serde_json::json!({
						"phase": if ready { "Ready" } else { "Deploying" },
						"endpoint": api_service::api_endpoint(&name, &namespace),
						"readySince": ready_since,
					}),
				);
		},
		Err(err) => {
			collector.condition(
				conditions::API_READY,
				ConditionStatus::False,
				"DeployFailed",
				Some(err.to_string()),
			);
		},
	}

	let existing = registry
		.status
		.as_ref()
		.map(|status| status.conditions.clone())
		.unwrap_or_default();
	collector.flush(&api, &name, &existing).await?;

	requeue.inspect(|_| ctx.backoff.reset(&object_key(registry.as_ref())))
}

/// One step of the sync machine. Status mutations go through the collector;
/// the return value is the requeue decision.
async fn run_sync_step(
	registry: &MCPRegistry,
	ctx: &Context,
	namespace: &str,
	collector: &mut StatusCollector,
) -> Result<Action> {
	let now = Utc::now();
	let trigger = match needs_sync(registry, now) {
		Ok(trigger) => trigger,
		Err(err) => {
			collector
				.phase(Phase::Failed)
				.message(err.to_string())
				.condition(
					conditions::SYNC_SUCCESSFUL,
					ConditionStatus::False,
					err.reason(),
					Some(err.to_string()),
				);
			return Err(err);
		},
	};

	let Some(trigger) = trigger else {
		// No trigger: the phase still reflects the last sync outcome.
		let last_failed = registry
			.status
			.as_ref()
			.and_then(|status| status.sync_status.as_ref())
			.is_some_and(|sync_status| sync_status.phase == SyncPhase::Failed);
		collector.phase(if last_failed { Phase::Failed } else { Phase::Ready });
		return Ok(next_requeue(registry, now));
	};

	info!(target: "registry", registry = %registry.name_any(), ?trigger, "sync triggered");
	collector.phase(Phase::Syncing);
	// Record the annotation on every sync, not just manual ones, so an
	// annotation set before the first sync does not double-trigger.
	if let Some(value) = manual_sync_annotation(registry) {
		collector.field("lastManualSyncTrigger", serde_json::json!(value));
	}

	let fetcher = SourceFetcher::new(ctx.client.clone());
	let sync_result = sync(registry, ctx, &fetcher).await;
	publish_sync_event(registry, ctx, &sync_result).await;
	match sync_result {
		Ok(outcome) => {
			info!(
				target: "registry",
				registry = %registry.name_any(),
				hash = %outcome.hash,
				servers = outcome.server_count,
				persisted = outcome.persisted,
				"sync complete"
			);
			collector
				.phase(Phase::Ready)
				.clear_message()
				.condition(
					conditions::SYNC_SUCCESSFUL,
					ConditionStatus::True,
					"SyncComplete",
					None,
				)
				.field(
					"syncStatus",
					serde_json::json!({
						"phase": SyncPhase::Complete,
						"lastSyncTime": now.to_rfc3339_opts(SecondsFormat::Secs, true),
						"lastSyncHash": outcome.hash,
						"serverCount": outcome.server_count as i32,
					}),
				);
			Ok(next_requeue(registry, now))
		},
		Err(err) => {
			warn!(
				target: "registry",
				registry = %registry.name_any(),
				error = %err,
				"sync failed"
			);
			collector
				.phase(Phase::Failed)
				.message(err.to_string())
				.condition(
					conditions::SYNC_SUCCESSFUL,
					ConditionStatus::False,
					err.reason(),
					Some(err.to_string()),
				)
				.field(
					"syncStatus",
					serde_json::json!({
						"phase": SyncPhase::Failed,
						"message": err.to_string(),
					}),
				);
			// Failed syncs retry on the next trigger; an interval policy is
			// such a trigger, spec errors wait for a change.
			match err {
				Error::SpecInvalid { .. } => Err(err),
				_ => Ok(next_requeue(registry, now)),
			}
		},
	}
}

async fn publish_sync_event(
	registry: &MCPRegistry,
	ctx: &Context,
	result: &Result<SyncOutcome>,
) {
	let event = match result {
		Ok(outcome) => ClusterEvent {
			type_: EventType::Normal,
			reason: "SyncCompleted".to_string(),
			note: Some(format!("synced {} servers", outcome.server_count)),
			action: "Sync".to_string(),
			secondary: None,
		},
		Err(err) => ClusterEvent {
			type_: EventType::Warning,
			reason: "SyncFailed".to_string(),
			note: Some(err.to_string()),
			action: "Sync".to_string(),
			secondary: None,
		},
	};
	if let Err(err) = ctx
		.recorder()
		.publish(&event, &registry.object_ref(&()))
		.await
	{
		warn!(target: "registry", error = %err, "publishing sync event failed");
	}
}

fn next_requeue(registry: &MCPRegistry, _now: DateTime<Utc>) -> Action {
	match &registry.spec.sync_policy {
		Some(policy) => match parse_interval(&policy.interval) {
			Ok(interval) => Action::requeue(interval.min(IDLE_REQUEUE).max(Duration::from_secs(1))),
			Err(_) => Action::requeue(IDLE_REQUEUE),
		},
		None => Action::requeue(IDLE_REQUEUE),
	}
}

async fn deploy_api(registry: &MCPRegistry, ctx: &Context, namespace: &str) -> Result<bool> {
	let owner = owner_reference(registry)?;
	api_service::deploy(
		&ctx.client,
		namespace,
		&registry.name_any(),
		&ctx.config.registry_api_image,
		owner,
	)
	.await
}

async fn cleanup(registry: Arc<MCPRegistry>, ctx: &Context) -> Result<Action> {
	// Release the API workload before the finalizer token is removed; the
	// storage ConfigMap follows through ownership.
	let namespace = registry.namespace().unwrap_or_default();

	let api: Api<MCPRegistry> = Api::namespaced(ctx.client.clone(), &namespace);
	let mut collector = StatusCollector::new();
	collector.phase(Phase::Terminating);
	if let Err(err) = collector.flush(&api, &registry.name_any(), &[]).await {
		warn!(target: "registry", error = %err, "terminating status patch failed");
	}

	let name = api_service::api_name(&registry.name_any());
	let deployments: Api<Deployment> = Api::namespaced(ctx.client.clone(), &namespace);
	match deployments.delete(&name, &Default::default()).await {
		Ok(_) => info!(target: "registry", deployment = %name, "released registry api"),
		Err(kube::Error::Api(err)) if err.code == 404 => {},
		Err(err) => return Err(Error::Kube(err)),
	}
	Ok(Action::await_change())
}

pub async fn run(ctx: Arc<Context>) {
	let apis = scoped_apis::<MCPRegistry>(&ctx.client, &ctx.config);
	let controllers = apis.into_iter().map(|api| {
		let ctx = ctx.clone();
		let deployments: Api<Deployment> = Api::all(ctx.client.clone());
		Controller::new(api, watcher::Config::default())
			.owns(deployments, watcher::Config::default())
			.shutdown_on_signal()
			.run(
				|obj, ctx| async move { trap_panics(reconcile(obj, ctx)).await },
				error_policy,
				ctx,
			)
			.for_each(|result| async move {
				match result {
					Ok((obj, _)) => info!(target: "registry", object = %obj, "reconciled"),
					Err(err) => warn!(target: "registry", error = %err, "reconcile failed"),
				}
			})
	});
	futures::future::join_all(controllers).await;
}
