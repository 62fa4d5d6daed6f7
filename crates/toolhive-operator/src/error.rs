// Error taxonomy shared by every reconciler.
//
// The variant, not the message, decides requeue behavior: transient errors
// are retried with backoff, spec-driven errors wait for the next observed
// change to the object or its referents.

use thiserror::Error;

/// Errors surfaced by reconcilers.
#[derive(Error, Debug)]
pub enum Error {
	/// Cluster API failure; retried with backoff.
	#[error("kubernetes api error: {0}")]
	Kube(#[from] kube::Error),

	/// Any other transient failure worth retrying.
	#[error("transient failure: {0}")]
	Transient(String),

	/// A referenced object does not exist.
	#[error("{kind} \"{name}\" not found")]
	ReferentMissing { kind: &'static str, name: String },

	/// A referenced object exists but is unusable.
	#[error("{kind} \"{name}\" invalid: {message}")]
	ReferentInvalid {
		kind: &'static str,
		name: String,
		message: String,
	},

	/// The object's own spec is invalid; requeued only on spec change.
	#[error("invalid spec: {message}")]
	SpecInvalid { field: String, message: String },

	/// Registry sync failure; retried on the next sync trigger.
	#[error("sync failed: {0}")]
	Sync(String),

	/// Admission evaluation failure inside the webhook.
	#[error("admission error: {0}")]
	Admission(String),

	/// A finalizer apply/cleanup cycle failed.
	#[error("finalizer error for {name}: {message}")]
	Finalizer { name: String, message: String },

	/// A reconcile panicked; trapped at the boundary and retried.
	#[error("reconcile panicked: {0}")]
	Panic(String),
}

impl Error {
	pub fn spec_invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
		Self::SpecInvalid {
			field: field.into(),
			message: message.into(),
		}
	}

	pub fn referent_missing(kind: &'static str, name: impl Into<String>) -> Self {
		Self::ReferentMissing {
			kind,
			name: name.into(),
		}
	}

	pub fn referent_invalid(
		kind: &'static str,
		name: impl Into<String>,
		message: impl Into<String>,
	) -> Self {
		Self::ReferentInvalid {
			kind,
			name: name.into(),
			message: message.into(),
		}
	}

	/// Whether this error should be retried with backoff rather than
	/// waiting for an observed change.
	pub fn is_transient(&self) -> bool {
		matches!(
			self,
			Error::Kube(_) | Error::Transient(_) | Error::Panic(_) | Error::Finalizer { .. }
		)
	}

	/// Condition reason string recorded on the object.
	pub fn reason(&self) -> &'static str {
		match self {
			Error::Kube(_) | Error::Transient(_) | Error::Panic(_) => "TransientError",
			Error::ReferentMissing { .. } => "ReferentMissing",
			Error::ReferentInvalid { .. } => "ReferentInvalid",
			Error::SpecInvalid { .. } => "SpecInvalid",
			Error::Sync(_) => "SyncFailed",
			Error::Admission(_) => "AdmissionError",
			Error::Finalizer { .. } => "FinalizerError",
		}
	}
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
