// Reconciler framework: shared context, backoff, panic trapping, error
// policy, and controller wiring per feature gate.

pub mod embedding;
pub mod external_auth;
pub mod group;
pub mod index;
pub mod remote_proxy;
pub mod server;
pub mod tool_config;
pub mod vmcp;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::runtime::controller::Action;
use kube::runtime::events::{Recorder, Reporter};
use kube::{Api, Client, Resource, ResourceExt};
use parking_lot::Mutex;
use rand::Rng;
use serde::de::DeserializeOwned;
use tracing::{error, info, warn};

use crate::api::SecretKeyRef;
use crate::config::OperatorConfig;
use crate::error::{Error, Result};
use crate::status::FIELD_MANAGER;

/// Maximum transient-failure requeue delay.
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Requeue interval for periodic re-resolution when everything is healthy.
pub const STEADY_REQUEUE: Duration = Duration::from_secs(10 * 60);

/// Per-key exponential backoff with jitter, reset on success.
#[derive(Debug, Default)]
pub struct Backoff {
	attempts: Mutex<HashMap<String, u32>>,
}

impl Backoff {
	/// Delay for the next retry of `key`: 1s doubling per attempt, capped at
	/// five minutes, with ±10% jitter.
	pub fn next_delay(&self, key: &str) -> Duration {
		let mut attempts = self.attempts.lock();
		let attempt = attempts.entry(key.to_string()).or_insert(0);
		*attempt += 1;
		let exp = attempt.saturating_sub(1).min(16);
		let base = Duration::from_secs(1 << exp).min(MAX_BACKOFF);
		jitter(base)
	}

	/// Forget the failure history of `key`.
	pub fn reset(&self, key: &str) {
		self.attempts.lock().remove(key);
	}

	#[cfg(test)]
	fn attempt_count(&self, key: &str) -> u32 {
		self.attempts.lock().get(key).copied().unwrap_or(0)
	}
}

fn jitter(base: Duration) -> Duration {
	let millis = base.as_millis() as i64;
	let spread = millis / 10;
	if spread == 0 {
		return base;
	}
	let offset = rand::rng().random_range(-spread..=spread);
	Duration::from_millis((millis + offset).max(1) as u64)
}

/// Shared state handed to every reconciler.
pub struct Context {
	pub client: Client,
	pub config: OperatorConfig,
	pub backoff: Backoff,
	pub reporter: Reporter,
}

impl Context {
	pub fn new(client: Client, config: OperatorConfig) -> Arc<Self> {
		Arc::new(Self {
			client,
			config,
			backoff: Backoff::default(),
			reporter: Reporter {
				controller: FIELD_MANAGER.into(),
				instance: None,
			},
		})
	}

	/// Event recorder for publishing to the cluster event stream.
	pub fn recorder(&self) -> Recorder {
		Recorder::new(self.client.clone(), self.reporter.clone())
	}
}

/// Stable reconcile key for an object.
pub fn object_key<K: Resource>(obj: &K) -> String {
	format!(
		"{}/{}",
		obj.namespace().unwrap_or_default(),
		obj.name_any()
	)
}

/// Shared error policy: transient failures requeue with backoff, spec-driven
/// failures wait for the next observed change to the object or a referent.
pub fn error_policy<K: Resource>(obj: Arc<K>, err: &Error, ctx: Arc<Context>) -> Action {
	let key = object_key(obj.as_ref());
	if err.is_transient() {
		let delay = ctx.backoff.next_delay(&key);
		warn!(target: "controller", %key, error = %err, ?delay, "transient reconcile failure");
		Action::requeue(delay)
	} else {
		warn!(target: "controller", %key, error = %err, "spec-driven reconcile failure, awaiting change");
		Action::await_change()
	}
}

/// Trap panics at the reconcile boundary and convert them into transient
/// errors so a single bad object cannot take the controller down.
pub async fn trap_panics<F>(fut: F) -> Result<Action>
where
	F: Future<Output = Result<Action>>,
{
	match std::panic::AssertUnwindSafe(fut).catch_unwind().await {
		Ok(result) => result,
		Err(payload) => {
			let message = payload
				.downcast_ref::<&str>()
				.map(|s| s.to_string())
				.or_else(|| payload.downcast_ref::<String>().cloned())
				.unwrap_or_else(|| "unknown panic".to_string());
			error!(target: "controller", panic = %message, "reconcile panicked");
			Err(Error::Panic(message))
		},
	}
}

/// Apis scoped to the configured watch namespaces: one cluster-wide Api, or
/// one per listed namespace.
pub fn scoped_apis<K>(client: &Client, config: &OperatorConfig) -> Vec<Api<K>>
where
	K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>
		+ Clone
		+ DeserializeOwned
		+ std::fmt::Debug,
{
	if config.cluster_scoped() {
		vec![Api::all(client.clone())]
	} else {
		config
			.watch_namespaces
			.iter()
			.map(|ns| Api::namespaced(client.clone(), ns))
			.collect()
	}
}

/// Fetch a Secret and check that the referenced key exists.
pub async fn ensure_secret_key(client: &Client, namespace: &str, secret_ref: &SecretKeyRef) -> Result<()> {
	let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
	let secret = match api.get_opt(&secret_ref.name).await? {
		Some(secret) => secret,
		None => return Err(Error::referent_missing("Secret", &secret_ref.name)),
	};
	let has_key = secret
		.data
		.as_ref()
		.is_some_and(|data| data.contains_key(&secret_ref.key))
		|| secret
			.string_data
			.as_ref()
			.is_some_and(|data| data.contains_key(&secret_ref.key));
	if !has_key {
		return Err(Error::referent_invalid(
			"Secret",
			&secret_ref.name,
			format!("missing key {:?}", secret_ref.key),
		));
	}
	Ok(())
}

/// Fetch a ConfigMap key's content.
pub async fn get_config_map_key(
	client: &Client,
	namespace: &str,
	name: &str,
	key: &str,
) -> Result<String> {
	let api: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
	let cm = match api.get_opt(name).await? {
		Some(cm) => cm,
		None => return Err(Error::referent_missing("ConfigMap", name)),
	};
	cm.data
		.as_ref()
		.and_then(|data| data.get(key))
		.cloned()
		.ok_or_else(|| {
			Error::referent_invalid("ConfigMap", name, format!("missing key {key:?}"))
		})
}

/// Run every enabled controller group until one of them exits.
pub async fn run_all(ctx: Arc<Context>) -> anyhow::Result<()> {
	let mut tasks: Vec<tokio::task::JoinHandle<()>> = Vec::new();

	if ctx.config.enable_server {
		info!(target: "operator", "starting server controllers");
		tasks.push(tokio::spawn(server::run(ctx.clone())));
		tasks.push(tokio::spawn(remote_proxy::run(ctx.clone())));
		tasks.push(tokio::spawn(embedding::run(ctx.clone())));
		tasks.push(tokio::spawn(group::run(ctx.clone())));
		tasks.push(tokio::spawn(tool_config::run(ctx.clone())));
		tasks.push(tokio::spawn(external_auth::run(ctx.clone())));
	} else {
		info!(target: "operator", "server controllers disabled");
	}

	if ctx.config.enable_registry {
		info!(target: "operator", "starting registry controller");
		tasks.push(tokio::spawn(crate::registry::run(ctx.clone())));
	} else {
		info!(target: "operator", "registry controller disabled");
	}

	if ctx.config.enable_vmcp {
		info!(target: "operator", "starting virtual-server controllers");
		tasks.push(tokio::spawn(vmcp::run(ctx.clone())));
	} else {
		info!(target: "operator", "virtual-server controllers disabled");
	}

	if tasks.is_empty() {
		anyhow::bail!("no controller group is enabled");
	}

	// Controllers run until shutdown; the first to exit brings the others
	// down so the process restarts in a clean state.
	let (result, _, rest) = futures::future::select_all(tasks).await;
	for task in rest {
		task.abort();
	}
	result?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_backoff_grows_and_caps() {
		let backoff = Backoff::default();
		let first = backoff.next_delay("default/x");
		let second = backoff.next_delay("default/x");
		assert!(second > first, "{second:?} should exceed {first:?}");

		for _ in 0..20 {
			backoff.next_delay("default/x");
		}
		let capped = backoff.next_delay("default/x");
		// 300s cap plus 10% jitter headroom
		assert!(capped <= Duration::from_secs(330));
		assert!(capped >= Duration::from_secs(270));
	}

	#[test]
	fn test_backoff_reset() {
		let backoff = Backoff::default();
		backoff.next_delay("default/x");
		backoff.next_delay("default/x");
		assert_eq!(backoff.attempt_count("default/x"), 2);
		backoff.reset("default/x");
		assert_eq!(backoff.attempt_count("default/x"), 0);
	}

	#[test]
	fn test_backoff_keys_independent() {
		let backoff = Backoff::default();
		backoff.next_delay("default/a");
		backoff.next_delay("default/a");
		assert_eq!(backoff.attempt_count("default/b"), 0);
	}

	#[tokio::test]
	async fn test_trap_panics_converts() {
		let result = trap_panics(async {
			panic!("boom");
		})
		.await;
		let err = result.unwrap_err();
		assert!(matches!(err, Error::Panic(_)));
		assert!(err.is_transient());
	}

	#[tokio::test]
	async fn test_trap_panics_passthrough() {
		let result = trap_panics(async { Ok(Action::await_change()) }).await;
		assert!(result.is_ok());
	}
}
