// Status collector: accumulate phase, conditions and status fields during a
// reconcile, then emit exactly one status patch at the end.
//
// Per-field updates sprinkled through a reconcile race against the informer
// cache and produce conflict-on-update retries; batching through the
// collector is mandatory for every reconciler.

use chrono::{SecondsFormat, Utc};
use kube::Api;
use kube::api::{Patch, PatchParams};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};

use crate::api::{Condition, ConditionStatus, Phase};
use crate::error::{Error, Result};

/// Field manager recorded on patches issued by the operator.
pub const FIELD_MANAGER: &str = "toolhive-operator";

/// Accumulates a single status update.
#[derive(Debug, Default)]
pub struct StatusCollector {
	phase: Option<Phase>,
	message: Option<Option<String>>,
	observed_generation: Option<i64>,
	conditions: Vec<Condition>,
	fields: Map<String, Value>,
}

impl StatusCollector {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn phase(&mut self, phase: Phase) -> &mut Self {
		self.phase = Some(phase);
		self
	}

	pub fn message(&mut self, message: impl Into<String>) -> &mut Self {
		self.message = Some(Some(message.into()));
		self
	}

	pub fn clear_message(&mut self) -> &mut Self {
		self.message = Some(None);
		self
	}

	pub fn observed_generation(&mut self, generation: Option<i64>) -> &mut Self {
		self.observed_generation = generation;
		self
	}

	/// Record a condition computed this reconcile. Later calls for the same
	/// type overwrite earlier ones.
	pub fn condition(
		&mut self,
		type_: &str,
		status: ConditionStatus,
		reason: &str,
		message: Option<String>,
	) -> &mut Self {
		self.conditions.retain(|c| c.type_ != type_);
		self.conditions.push(Condition {
			type_: type_.to_string(),
			status,
			reason: reason.to_string(),
			message,
			last_transition_time: None,
			observed_generation: self.observed_generation,
		});
		self
	}

	/// Set an arbitrary extra status field, e.g. `url` or `syncStatus`.
	pub fn field(&mut self, key: &str, value: Value) -> &mut Self {
		self.fields.insert(key.to_string(), value);
		self
	}

	/// Whether anything was collected.
	pub fn is_empty(&self) -> bool {
		self.phase.is_none()
			&& self.message.is_none()
			&& self.conditions.is_empty()
			&& self.fields.is_empty()
	}

	/// Produce the status object, merging conditions against the previously
	/// stored ones so `lastTransitionTime` only advances on a status flip.
	pub fn render(&self, existing: &[Condition]) -> Value {
		let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
		let mut status = self.fields.clone();

		if let Some(phase) = self.phase {
			status.insert("phase".to_string(), json!(phase));
		}
		if let Some(message) = &self.message {
			// Explicit null clears a previously recorded message.
			status.insert("message".to_string(), json!(message));
		}
		if let Some(generation) = self.observed_generation {
			status.insert("observedGeneration".to_string(), json!(generation));
		}
		if !self.conditions.is_empty() {
			let merged = merge_conditions(existing, &self.conditions, &now);
			status.insert("conditions".to_string(), json!(merged));
		}

		Value::Object(status)
	}

	/// Apply the collected update as one status patch.
	pub async fn flush<K>(&self, api: &Api<K>, name: &str, existing: &[Condition]) -> Result<()>
	where
		K: kube::Resource + Clone + std::fmt::Debug + DeserializeOwned,
	{
		if self.is_empty() {
			return Ok(());
		}
		let patch = json!({ "status": self.render(existing) });
		api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
			.await
			.map_err(Error::Kube)?;
		Ok(())
	}
}

/// Merge desired conditions over existing ones. Conditions of types the
/// collector did not touch are preserved; a desired condition whose status
/// matches the existing one keeps its original transition time.
fn merge_conditions(existing: &[Condition], desired: &[Condition], now: &str) -> Vec<Condition> {
	let mut merged: Vec<Condition> = Vec::with_capacity(existing.len() + desired.len());

	for cond in existing {
		if !desired.iter().any(|d| d.type_ == cond.type_) {
			merged.push(cond.clone());
		}
	}

	for cond in desired {
		let mut cond = cond.clone();
		let prior = existing.iter().find(|e| e.type_ == cond.type_);
		cond.last_transition_time = match prior {
			Some(prior) if prior.status == cond.status => prior
				.last_transition_time
				.clone()
				.or_else(|| Some(now.to_string())),
			_ => Some(now.to_string()),
		};
		merged.push(cond);
	}

	merged.sort_by(|a, b| a.type_.cmp(&b.type_));
	merged
}
