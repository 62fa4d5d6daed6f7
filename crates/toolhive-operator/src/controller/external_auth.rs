// MCPExternalAuthConfig reconciler: validate the discriminated union and its
// referenced secrets, fingerprint the spec, publish both in status.

use std::sync::Arc;

use futures_util::StreamExt;
use kube::runtime::Controller;
use kube::runtime::controller::Action;
use kube::runtime::watcher;
use kube::{Api, ResourceExt};
use tracing::{info, warn};

use super::{
	Context, STEADY_REQUEUE, ensure_secret_key, error_policy, object_key, scoped_apis, trap_panics,
};
use crate::api::{
	ConditionStatus, ExternalAuthType, MCPExternalAuthConfig, MCPServer, Phase, SecretKeyRef,
	conditions,
};
use crate::error::{Error, Result};
use crate::hash;
use crate::status::StatusCollector;

/// Secret references the config's active variant depends on.
pub fn referenced_secrets(config: &MCPExternalAuthConfig) -> Vec<SecretKeyRef> {
	let spec = &config.spec;
	match spec.type_ {
		ExternalAuthType::TokenExchange => spec
			.token_exchange
			.iter()
			.map(|c| c.client_secret_ref.clone())
			.collect(),
		ExternalAuthType::HeaderInjection => spec
			.header_injection
			.iter()
			.map(|c| c.value_secret_ref.clone())
			.collect(),
		ExternalAuthType::BearerToken => spec
			.bearer_token
			.iter()
			.map(|c| c.token_secret_ref.clone())
			.collect(),
		ExternalAuthType::EmbeddedAuthServer => spec
			.embedded_auth_server
			.iter()
			.flat_map(|c| {
				c.signing_key_refs
					.iter()
					.chain(c.hmac_secret_refs.iter())
					.cloned()
			})
			.collect(),
		ExternalAuthType::AwsSts | ExternalAuthType::Unauthenticated => Vec::new(),
	}
}

pub async fn reconcile(config: Arc<MCPExternalAuthConfig>, ctx: Arc<Context>) -> Result<Action> {
	let namespace = config
		.namespace()
		.ok_or_else(|| Error::Transient("object has no namespace".to_string()))?;
	let name = config.name_any();
	let api: Api<MCPExternalAuthConfig> = Api::namespaced(ctx.client.clone(), &namespace);

	let config_hash = hash::spec_hash(&config.spec)
		.map_err(|e| Error::Transient(format!("hashing spec: {e}")))?;

	let mut collector = StatusCollector::new();
	collector
		.observed_generation(config.metadata.generation)
		.field("configHash", serde_json::json!(config_hash));

	let validation = validate(&config, &ctx, &namespace).await;
	match &validation {
		Ok(()) => {
			let servers: Api<MCPServer> = Api::namespaced(ctx.client.clone(), &namespace);
			let mut referencing: Vec<String> = servers
				.list(&Default::default())
				.await?
				.items
				.into_iter()
				.filter(|srv| {
					srv.spec.external_auth_config_ref.as_deref() == Some(name.as_str())
				})
				.map(|srv| srv.name_any())
				.collect();
			referencing.sort();

			collector
				.phase(Phase::Ready)
				.condition(conditions::READY, ConditionStatus::True, "Reconciled", None)
				.condition(
					conditions::AUTH_CONFIG_RESOLVED,
					ConditionStatus::True,
					"SecretsResolved",
					None,
				)
				.field("referencingServers", serde_json::json!(referencing));
		},
		Err(err) => {
			collector
				.phase(Phase::Failed)
				.condition(
					conditions::READY,
					ConditionStatus::False,
					err.reason(),
					Some(err.to_string()),
				)
				.condition(
					conditions::AUTH_CONFIG_RESOLVED,
					ConditionStatus::False,
					err.reason(),
					Some(err.to_string()),
				);
		},
	}

	let existing = config
		.status
		.as_ref()
		.map(|s| s.conditions.clone())
		.unwrap_or_default();
	collector.flush(&api, &name, &existing).await?;

	match validation {
		Ok(()) => {
			ctx.backoff.reset(&object_key(config.as_ref()));
			Ok(Action::requeue(STEADY_REQUEUE))
		},
		Err(err) => Err(err),
	}
}

async fn validate(
	config: &MCPExternalAuthConfig,
	ctx: &Context,
	namespace: &str,
) -> Result<()> {
	config
		.spec
		.validate_variant()
		.map_err(|message| Error::spec_invalid("type", message))?;
	for secret_ref in referenced_secrets(config) {
		ensure_secret_key(&ctx.client, namespace, &secret_ref).await?;
	}
	Ok(())
}

pub async fn run(ctx: Arc<Context>) {
	let apis = scoped_apis::<MCPExternalAuthConfig>(&ctx.client, &ctx.config);
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
					Ok((obj, _)) => info!(target: "externalauth", object = %obj, "reconciled"),
					Err(err) => warn!(target: "externalauth", error = %err, "reconcile failed"),
				}
			})
	});
	futures::future::join_all(controllers).await;
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::api::{BearerTokenConfig, MCPExternalAuthConfigSpec, TokenExchangeConfig};

	fn config_with(spec: MCPExternalAuthConfigSpec) -> MCPExternalAuthConfig {
		MCPExternalAuthConfig::new("auth", spec)
	}

	#[test]
	fn test_referenced_secrets_token_exchange() {
		let config = config_with(MCPExternalAuthConfigSpec {
			type_: ExternalAuthType::TokenExchange,
			token_exchange: Some(TokenExchangeConfig {
				token_url: "https://t".to_string(),
				client_id: "c".to_string(),
				client_secret_ref: SecretKeyRef {
					name: "S".to_string(),
					key: "k".to_string(),
				},
				audience: "a".to_string(),
				scopes: vec![],
				subject_token_type: None,
			}),
			header_injection: None,
			bearer_token: None,
			aws_sts: None,
			embedded_auth_server: None,
		});
		let secrets = referenced_secrets(&config);
		assert_eq!(secrets.len(), 1);
		assert_eq!(secrets[0].name, "S");
	}

	#[test]
	fn test_referenced_secrets_ignore_inactive_variant() {
		// A stray populated variant that does not match `type` contributes
		// nothing; validate_variant rejects the object separately.
		let config = config_with(MCPExternalAuthConfigSpec {
			type_: ExternalAuthType::Unauthenticated,
			token_exchange: None,
			header_injection: None,
			bearer_token: Some(BearerTokenConfig {
				token_secret_ref: SecretKeyRef {
					name: "S".to_string(),
					key: "k".to_string(),
				},
			}),
			aws_sts: None,
			embedded_auth_server: None,
		});
		assert!(referenced_secrets(&config).is_empty());
	}
}
