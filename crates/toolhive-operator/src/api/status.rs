// Shared phase and condition types used across every kind's status

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Lifecycle phase of a managed resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
pub enum Phase {
	/// Accepted but not yet materialized.
	#[default]
	Pending,
	/// Registry only: a sync is in flight.
	Syncing,
	/// Children are materialized and healthy.
	Ready,
	/// Reconciliation hit a non-transient failure.
	Failed,
	/// Deletion in progress, finalizer cleanup running.
	Terminating,
}

impl std::fmt::Display for Phase {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let s = match self {
			Phase::Pending => "Pending",
			Phase::Syncing => "Syncing",
			Phase::Ready => "Ready",
			Phase::Failed => "Failed",
			Phase::Terminating => "Terminating",
		};
		f.write_str(s)
	}
}

/// Condition status, mirroring the Kubernetes convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum ConditionStatus {
	True,
	False,
	Unknown,
}

/// A single status condition in the standard `{type, status, reason, ...}` shape.
///
/// `last_transition_time` only advances when `status` flips, so a condition
/// that stays stable across reconciles does not churn the object.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
	#[serde(rename = "type")]
	pub type_: String,
	pub status: ConditionStatus,
	pub reason: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub message: Option<String>,
	/// RFC 3339 timestamp of the last status flip.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub last_transition_time: Option<String>,
	/// Generation of the spec this condition was computed against.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub observed_generation: Option<i64>,
}

/// Well-known condition types.
pub mod conditions {
	pub const READY: &str = "Ready";
	pub const SYNC_SUCCESSFUL: &str = "SyncSuccessful";
	pub const API_READY: &str = "APIReady";
	pub const POD_TEMPLATE_VALID: &str = "PodTemplateValid";
	pub const REFERENT_RESOLVED: &str = "ReferentResolved";
	pub const AUTH_CONFIG_RESOLVED: &str = "AuthConfigResolved";
}
