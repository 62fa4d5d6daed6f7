// Lease-based leader election. Exactly one replica runs the reconcilers;
// losing the lease terminates the process so in-flight reconciles stop and
// a clean follower takes over.

use std::time::Duration;

use chrono::Utc;
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use kube::api::{ObjectMeta, Patch, PatchParams, PostParams};
use kube::{Api, Client};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::status::FIELD_MANAGER;

/// How long a held lease is valid.
const LEASE_DURATION: Duration = Duration::from_secs(15);

/// How often the holder renews.
const RENEW_INTERVAL: Duration = Duration::from_secs(5);

/// Retry cadence while waiting to acquire.
const ACQUIRE_INTERVAL: Duration = Duration::from_secs(5);

/// A held leadership lease.
pub struct Leadership {
	api: Api<Lease>,
	name: String,
	identity: String,
}

fn lease_spec(identity: &str) -> LeaseSpec {
	LeaseSpec {
		holder_identity: Some(identity.to_string()),
		lease_duration_seconds: Some(LEASE_DURATION.as_secs() as i32),
		renew_time: Some(MicroTime(Utc::now())),
		..Default::default()
	}
}

fn lease_expired(lease: &Lease) -> bool {
	let Some(spec) = &lease.spec else {
		return true;
	};
	let Some(renewed) = &spec.renew_time else {
		return true;
	};
	let duration = spec
		.lease_duration_seconds
		.unwrap_or(LEASE_DURATION.as_secs() as i32);
	Utc::now()
		.signed_duration_since(renewed.0)
		.num_seconds()
		> i64::from(duration)
}

/// Block until this replica holds the lease.
pub async fn acquire(client: &Client, namespace: &str, name: &str) -> Result<Leadership> {
	let identity = format!(
		"{}-{}",
		std::env::var("HOSTNAME").unwrap_or_else(|_| "toolhive-operator".to_string()),
		uuid::Uuid::new_v4()
	);
	let api: Api<Lease> = Api::namespaced(client.clone(), namespace);

	loop {
		match api.get_opt(name).await? {
			None => {
				let lease = Lease {
					metadata: ObjectMeta {
						name: Some(name.to_string()),
						namespace: Some(namespace.to_string()),
						..Default::default()
					},
					spec: Some(lease_spec(&identity)),
				};
				match api.create(&PostParams::default(), &lease).await {
					Ok(_) => {
						info!(target: "leader", %identity, lease = %name, "acquired leadership");
						return Ok(Leadership {
							api,
							name: name.to_string(),
							identity,
						});
					},
					Err(kube::Error::Api(err)) if err.code == 409 => {
						// Lost the creation race; retry.
					},
					Err(err) => return Err(Error::Kube(err)),
				}
			},
			Some(lease) if lease_expired(&lease) => {
				debug!(target: "leader", lease = %name, "existing lease expired, taking over");
				let patch = serde_json::json!({ "spec": lease_spec(&identity) });
				match api
					.patch(name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Merge(&patch))
					.await
				{
					Ok(_) => {
						info!(target: "leader", %identity, lease = %name, "acquired leadership");
						return Ok(Leadership {
							api,
							name: name.to_string(),
							identity,
						});
					},
					Err(kube::Error::Api(err)) if err.code == 409 => {},
					Err(err) => return Err(Error::Kube(err)),
				}
			},
			Some(_) => {
				debug!(target: "leader", lease = %name, "lease held elsewhere, waiting");
			},
		}
		tokio::time::sleep(ACQUIRE_INTERVAL).await;
	}
}

impl Leadership {
	/// Renew the lease until renewal fails or the lease is stolen. Returns
	/// only on leadership loss.
	pub async fn renew_loop(self) -> Error {
		loop {
			tokio::time::sleep(RENEW_INTERVAL).await;

			let current = match self.api.get_opt(&self.name).await {
				Ok(Some(lease)) => lease,
				Ok(None) => {
					warn!(target: "leader", lease = %self.name, "lease disappeared");
					return Error::Transient("leadership lease deleted".to_string());
				},
				Err(err) => {
					warn!(target: "leader", error = %err, "lease read failed");
					return Error::Kube(err);
				},
			};
			let holder = current
				.spec
				.as_ref()
				.and_then(|spec| spec.holder_identity.clone());
			if holder.as_deref() != Some(self.identity.as_str()) {
				warn!(target: "leader", ?holder, "leadership lost to another holder");
				return Error::Transient("leadership lost".to_string());
			}

			let patch = serde_json::json!({ "spec": lease_spec(&self.identity) });
			if let Err(err) = self
				.api
				.patch(
					&self.name,
					&PatchParams::apply(FIELD_MANAGER).force(),
					&Patch::Merge(&patch),
				)
				.await
			{
				warn!(target: "leader", error = %err, "lease renewal failed");
				return Error::Kube(err);
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_lease_expired_no_spec() {
		let lease = Lease::default();
		assert!(lease_expired(&lease));
	}

	#[test]
	fn test_lease_expired_by_time() {
		let mut lease = Lease::default();
		lease.spec = Some(LeaseSpec {
			holder_identity: Some("other".to_string()),
			lease_duration_seconds: Some(15),
			renew_time: Some(MicroTime(Utc::now() - chrono::Duration::seconds(60))),
			..Default::default()
		});
		assert!(lease_expired(&lease));
	}

	#[test]
	fn test_lease_fresh_not_expired() {
		let mut lease = Lease::default();
		lease.spec = Some(lease_spec("me"));
		assert!(!lease_expired(&lease));
	}
}
