// External-auth dispatch: map the discriminated union onto a middleware
// entry, the secret-backed env bindings, and the file mounts it needs.

use k8s_openapi::api::core::v1::EnvVar;

use super::auth_server::translate_auth_server;
use super::token_exchange::translate_token_exchange;
use super::Middleware;
use crate::api::{ExternalAuthType, MCPExternalAuthConfigSpec};
use crate::error::{Error, Result};
use crate::resources::deployment::SecretFileMount;
use crate::resources::env::{
	TOKEN_EXCHANGE_CLIENT_SECRET_VAR, env_for_bearer_token, env_for_header_forward, from_secret,
};

/// Everything an external-auth config contributes to the workload.
#[derive(Debug, Default)]
pub struct TranslatedAuth {
	pub middleware: Option<Middleware>,
	pub env: Vec<EnvVar>,
	pub mounts: Vec<SecretFileMount>,
}

/// Translate a validated external-auth spec for the named proxy.
///
/// `resource_url` is the resolved OIDC resource URL, required only by the
/// embedded-auth-server variant.
pub fn translate_external_auth(
	spec: &MCPExternalAuthConfigSpec,
	proxy_name: &str,
	resource_url: Option<&str>,
) -> Result<TranslatedAuth> {
	spec.validate_variant()
		.map_err(|message| Error::spec_invalid("type", message))?;

	match spec.type_ {
		ExternalAuthType::Unauthenticated => Ok(TranslatedAuth::default()),

		ExternalAuthType::TokenExchange => {
			// validate_variant guarantees presence
			let config = spec.token_exchange.as_ref().ok_or_else(|| {
				Error::spec_invalid("tokenExchange", "variant not set")
			})?;
			Ok(TranslatedAuth {
				middleware: Some(translate_token_exchange(config)),
				env: vec![from_secret(
					TOKEN_EXCHANGE_CLIENT_SECRET_VAR,
					&config.client_secret_ref.name,
					&config.client_secret_ref.key,
				)],
				mounts: Vec::new(),
			})
		},

		ExternalAuthType::HeaderInjection => {
			let config = spec.header_injection.as_ref().ok_or_else(|| {
				Error::spec_invalid("headerInjection", "variant not set")
			})?;
			let (secret_env, bare) = env_for_header_forward(proxy_name, &config.header_name);
			Ok(TranslatedAuth {
				middleware: Some(Middleware::HeaderInjection {
					header_name: config.header_name.clone(),
					value_env: bare,
					prefix: config.prefix.clone(),
				}),
				env: vec![from_secret(
					&secret_env,
					&config.value_secret_ref.name,
					&config.value_secret_ref.key,
				)],
				mounts: Vec::new(),
			})
		},

		ExternalAuthType::BearerToken => {
			let config = spec.bearer_token.as_ref().ok_or_else(|| {
				Error::spec_invalid("bearerToken", "variant not set")
			})?;
			let (secret_env, bare) = env_for_bearer_token(proxy_name);
			Ok(TranslatedAuth {
				middleware: Some(Middleware::BearerToken { token_env: bare }),
				env: vec![from_secret(
					&secret_env,
					&config.token_secret_ref.name,
					&config.token_secret_ref.key,
				)],
				mounts: Vec::new(),
			})
		},

		ExternalAuthType::AwsSts => {
			let config = spec
				.aws_sts
				.as_ref()
				.ok_or_else(|| Error::spec_invalid("awsSts", "variant not set"))?;
			Ok(TranslatedAuth {
				middleware: Some(Middleware::AwsSts {
					role_arn: config.role_arn.clone(),
					region: config.region.clone(),
					audience: config.audience.clone(),
					session_name: config.session_name.clone(),
				}),
				env: Vec::new(),
				mounts: Vec::new(),
			})
		},

		ExternalAuthType::EmbeddedAuthServer => {
			let config = spec.embedded_auth_server.as_ref().ok_or_else(|| {
				Error::spec_invalid("embeddedAuthServer", "variant not set")
			})?;
			let (middleware, mounts) = translate_auth_server(config, resource_url)?;
			Ok(TranslatedAuth {
				middleware: Some(middleware),
				env: Vec::new(),
				mounts,
			})
		},
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::api::{BearerTokenConfig, HeaderInjectionConfig, SecretKeyRef, TokenExchangeConfig};

	fn base_spec(type_: ExternalAuthType) -> MCPExternalAuthConfigSpec {
		MCPExternalAuthConfigSpec {
			type_,
			token_exchange: None,
			header_injection: None,
			bearer_token: None,
			aws_sts: None,
			embedded_auth_server: None,
		}
	}

	#[test]
	fn test_unauthenticated_is_empty() {
		let out =
			translate_external_auth(&base_spec(ExternalAuthType::Unauthenticated), "p", None)
				.unwrap();
		assert!(out.middleware.is_none());
		assert!(out.env.is_empty());
	}

	#[test]
	fn test_token_exchange_env_binding() {
		let mut spec = base_spec(ExternalAuthType::TokenExchange);
		spec.token_exchange = Some(TokenExchangeConfig {
			token_url: "https://oauth.example.com/token".to_string(),
			client_id: "cid".to_string(),
			client_secret_ref: SecretKeyRef {
				name: "S".to_string(),
				key: "k".to_string(),
			},
			audience: "aud".to_string(),
			scopes: vec![],
			subject_token_type: None,
		});
		let out = translate_external_auth(&spec, "my-proxy", None).unwrap();
		assert_eq!(out.env.len(), 1);
		assert_eq!(out.env[0].name, "TOOLHIVE_TOKEN_EXCHANGE_CLIENT_SECRET");
		let selector = out.env[0]
			.value_from
			.as_ref()
			.unwrap()
			.secret_key_ref
			.as_ref()
			.unwrap();
		assert_eq!(selector.name, "S");
		assert_eq!(selector.key, "k");
	}

	#[test]
	fn test_header_injection_names() {
		let mut spec = base_spec(ExternalAuthType::HeaderInjection);
		spec.header_injection = Some(HeaderInjectionConfig {
			header_name: "X-API-Key".to_string(),
			value_secret_ref: SecretKeyRef {
				name: "S".to_string(),
				key: "k".to_string(),
			},
			prefix: None,
		});
		let out = translate_external_auth(&spec, "my-proxy", None).unwrap();
		assert_eq!(
			out.env[0].name,
			"TOOLHIVE_SECRET_HEADER_FORWARD_X_API_KEY_MY_PROXY"
		);
		let Some(Middleware::HeaderInjection { value_env, .. }) = out.middleware else {
			panic!("wrong middleware");
		};
		assert_eq!(value_env, "HEADER_FORWARD_X_API_KEY_MY_PROXY");
	}

	#[test]
	fn test_bearer_token() {
		let mut spec = base_spec(ExternalAuthType::BearerToken);
		spec.bearer_token = Some(BearerTokenConfig {
			token_secret_ref: SecretKeyRef {
				name: "S".to_string(),
				key: "token".to_string(),
			},
		});
		let out = translate_external_auth(&spec, "my-proxy", None).unwrap();
		assert_eq!(out.env[0].name, "TOOLHIVE_SECRET_BEARER_TOKEN_MY_PROXY");
	}

	#[test]
	fn test_mismatched_variant_rejected() {
		let spec = base_spec(ExternalAuthType::TokenExchange);
		let err = translate_external_auth(&spec, "p", None).unwrap_err();
		assert!(matches!(err, Error::SpecInvalid { .. }));
	}
}
