// Integration tests for the spec-to-config translation layer

use std::collections::BTreeMap;

use toolhive_operator::api::{
	EmbeddedAuthServerConfig, ExternalAuthType, MCPExternalAuthConfigSpec, SecretKeyRef,
	TokenExchangeConfig, Transport,
};
use toolhive_operator::resources::env::{ensure_required_env_vars, env_for_header_forward};
use toolhive_operator::runconfig::{
	Middleware, RunConfigBuilder, normalize_endpoint, translate_external_auth,
};

fn token_exchange_spec() -> MCPExternalAuthConfigSpec {
	MCPExternalAuthConfigSpec {
		type_: ExternalAuthType::TokenExchange,
		token_exchange: Some(TokenExchangeConfig {
			token_url: "https://oauth.example.com/token".to_string(),
			client_id: "cid".to_string(),
			client_secret_ref: SecretKeyRef {
				name: "S".to_string(),
				key: "k".to_string(),
			},
			audience: "aud".to_string(),
			scopes: vec!["read".to_string(), "write".to_string()],
			subject_token_type: None,
		}),
		header_injection: None,
		bearer_token: None,
		aws_sts: None,
		embedded_auth_server: None,
	}
}

/// A token-exchange config flows into the runtime config as a middleware
/// entry carrying the declared values, while the secret stays behind an
/// env-var reference.
#[test]
fn test_token_exchange_propagation() {
	let auth = translate_external_auth(&token_exchange_spec(), "x", None).unwrap();

	let config = RunConfigBuilder::new("x", Transport::Stdio, 8080, None)
		.image("ghcr.io/acme/mcp:latest")
		.middleware(auth.middleware)
		.build();

	let json = serde_json::to_value(&config).unwrap();
	let middleware = &json["middlewares"][0];
	assert_eq!(middleware["type"], "tokenExchange");
	assert_eq!(middleware["tokenUrl"], "https://oauth.example.com/token");
	assert_eq!(middleware["clientId"], "cid");
	assert_eq!(middleware["audience"], "aud");
	assert_eq!(middleware["scopes"][0], "read");
	assert_eq!(middleware["scopes"][1], "write");

	// The secret value is referenced by env var, never inlined.
	assert_eq!(
		middleware["clientSecretEnv"],
		"TOOLHIVE_TOKEN_EXCHANGE_CLIENT_SECRET"
	);
	let rendered = json.to_string();
	assert!(!rendered.contains("\"S\""), "secret name leaked: {rendered}");

	// The workload env binds the secret for the runner to resolve.
	assert_eq!(auth.env.len(), 1);
	assert_eq!(auth.env[0].name, "TOOLHIVE_TOKEN_EXCHANGE_CLIENT_SECRET");
	assert!(auth.env[0].value.is_none());
}

/// An embedded auth server demands a resolved resource URL; absence is a
/// hard spec error with a fixed message.
#[test]
fn test_embedded_auth_server_requires_resource_url() {
	let spec = MCPExternalAuthConfigSpec {
		type_: ExternalAuthType::EmbeddedAuthServer,
		token_exchange: None,
		header_injection: None,
		bearer_token: None,
		aws_sts: None,
		embedded_auth_server: Some(EmbeddedAuthServerConfig {
			signing_key_refs: vec![SecretKeyRef {
				name: "signing".to_string(),
				key: "key.pem".to_string(),
			}],
			hmac_secret_refs: vec![],
			issuer: None,
		}),
	};
	let err = translate_external_auth(&spec, "x", None).unwrap_err();
	assert!(
		err.to_string()
			.contains("OIDC config resourceUrl is required for embedded auth server"),
		"{err}"
	);

	let ok = translate_external_auth(&spec, "x", Some("https://mcp.example.com")).unwrap();
	let Some(Middleware::AuthServer {
		signing_key_paths, ..
	}) = ok.middleware
	else {
		panic!("expected auth server middleware");
	};
	assert_eq!(
		signing_key_paths,
		vec!["/etc/toolhive/authserver/keys/key-0.pem"]
	);
}

/// Telemetry endpoints are normalized to host:port regardless of scheme.
#[test]
fn test_endpoint_normalization_round_trip() {
	assert_eq!(normalize_endpoint("https://h:4317"), "h:4317");
	assert_eq!(normalize_endpoint("http://h:4317"), "h:4317");
	assert_eq!(normalize_endpoint("h:4317"), "h:4317");
}

/// Env-var generator naming is deterministic and prefixed.
#[test]
fn test_header_forward_env_names() {
	let (secret, bare) = env_for_header_forward("my-proxy", "X-API-Key");
	assert_eq!(secret, "TOOLHIVE_SECRET_HEADER_FORWARD_X_API_KEY_MY_PROXY");
	assert_eq!(bare, "HEADER_FORWARD_X_API_KEY_MY_PROXY");
	assert_eq!(secret, format!("TOOLHIVE_SECRET_{bare}"));
}

/// The required-env injection never duplicates an existing variable.
#[test]
fn test_required_env_presence_wins() {
	let mut env = vec![k8s_openapi::api::core::v1::EnvVar {
		name: "TOOLHIVE_RUNTIME".to_string(),
		value: Some("docker".to_string()),
		value_from: None,
	}];
	ensure_required_env_vars(&mut env, "x", "default");
	let runtimes: Vec<_> = env
		.iter()
		.filter(|var| var.name == "TOOLHIVE_RUNTIME")
		.collect();
	assert_eq!(runtimes.len(), 1);
	assert_eq!(runtimes[0].value.as_deref(), Some("docker"));
}

/// Identical inputs always serialize to identical bytes; any change to the
/// declared spec moves the hash.
#[test]
fn test_runconfig_hash_stability() {
	let build = |args: &[String]| {
		RunConfigBuilder::new("fetch", Transport::Stdio, 8080, None)
			.image("docker.io/mcp/fetch")
			.args(args)
			.env_vars(BTreeMap::from([(
				"LOG_LEVEL".to_string(),
				"info".to_string(),
			)]))
			.build()
	};
	let base = build(&[]);
	let same = build(&[]);
	assert_eq!(
		base.config_hash().unwrap(),
		same.config_hash().unwrap()
	);

	let changed = build(&["--verbose".to_string()]);
	assert_ne!(
		base.config_hash().unwrap(),
		changed.config_hash().unwrap()
	);
}
