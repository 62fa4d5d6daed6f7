// Environment-variable injection for managed workloads

use k8s_openapi::api::core::v1::{EnvVar, EnvVarSource, SecretKeySelector};

/// Prefix identifying secret-backed variables the proxy resolves at runtime.
pub const SECRET_PREFIX: &str = "TOOLHIVE_SECRET_";

/// Variable selecting the in-environment secrets provider.
pub const SECRETS_PROVIDER_VAR: &str = "TOOLHIVE_SECRETS_PROVIDER";

/// Per-feature secret variable names.
pub const TOKEN_EXCHANGE_CLIENT_SECRET_VAR: &str = "TOOLHIVE_TOKEN_EXCHANGE_CLIENT_SECRET";
pub const UPSTREAM_CLIENT_SECRET_VAR: &str = "TOOLHIVE_UPSTREAM_CLIENT_SECRET";
pub const OIDC_CLIENT_SECRET_VAR: &str = "TOOLHIVE_OIDC_CLIENT_SECRET";

/// Plain name/value variable.
pub fn literal(name: &str, value: &str) -> EnvVar {
	EnvVar {
		name: name.to_string(),
		value: Some(value.to_string()),
		value_from: None,
	}
}

/// Variable bound to a secret key; the value never appears in any config
/// artifact, only this reference does.
pub fn from_secret(name: &str, secret: &str, key: &str) -> EnvVar {
	EnvVar {
		name: name.to_string(),
		value: None,
		value_from: Some(EnvVarSource {
			secret_key_ref: Some(SecretKeySelector {
				name: secret.to_string(),
				key: key.to_string(),
				optional: Some(false),
			}),
			..Default::default()
		}),
	}
}

/// Sanitize a fragment for use inside an env-var name: uppercase, with every
/// non-alphanumeric character mapped to `_`.
fn sanitize(fragment: &str) -> String {
	fragment
		.chars()
		.map(|c| {
			if c.is_ascii_alphanumeric() {
				c.to_ascii_uppercase()
			} else {
				'_'
			}
		})
		.collect()
}

/// Variable pair for a forwarded header: the secret-prefixed name the
/// workload env carries, and the bare name referenced from the runtime
/// config. The first is always `TOOLHIVE_SECRET_` + the second.
pub fn env_for_header_forward(proxy: &str, header: &str) -> (String, String) {
	let bare = format!("HEADER_FORWARD_{}_{}", sanitize(header), sanitize(proxy));
	(format!("{SECRET_PREFIX}{bare}"), bare)
}

/// Variable pair for a forwarded bearer token, same shape as
/// [`env_for_header_forward`].
pub fn env_for_bearer_token(proxy: &str) -> (String, String) {
	let bare = format!("BEARER_TOKEN_{}", sanitize(proxy));
	(format!("{SECRET_PREFIX}{bare}"), bare)
}

/// Inject the variables every managed workload requires. A variable already
/// present is never appended again, regardless of its value.
pub fn ensure_required_env_vars(env: &mut Vec<EnvVar>, name: &str, namespace: &str) {
	let required = [
		literal("XDG_CONFIG_HOME", "/tmp"),
		literal("HOME", "/tmp"),
		literal("TOOLHIVE_RUNTIME", "kubernetes"),
		literal("UNSTRUCTURED_LOGS", "false"),
		literal(
			"OTEL_RESOURCE_ATTRIBUTES",
			&format!("service.name={name},service.namespace={namespace}"),
		),
	];
	for var in required {
		if !env.iter().any(|e| e.name == var.name) {
			env.push(var);
		}
	}

	// The environment secrets provider is only selected when secret-backed
	// variables are actually present.
	let has_secrets = env.iter().any(|e| e.name.starts_with(SECRET_PREFIX));
	if has_secrets && !env.iter().any(|e| e.name == SECRETS_PROVIDER_VAR) {
		env.push(literal(SECRETS_PROVIDER_VAR, "environment"));
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_env_for_header_forward() {
		let (secret, bare) = env_for_header_forward("my-proxy", "X-API-Key");
		assert_eq!(secret, "TOOLHIVE_SECRET_HEADER_FORWARD_X_API_KEY_MY_PROXY");
		assert_eq!(bare, "HEADER_FORWARD_X_API_KEY_MY_PROXY");
	}

	#[test]
	fn test_header_forward_prefix_property() {
		for (proxy, header) in [
			("p", "h"),
			("my-proxy", "X-API-Key"),
			("UPPER", "Content-Type"),
			("a.b.c", "x-very_long-Header"),
		] {
			let (secret, bare) = env_for_header_forward(proxy, header);
			assert_eq!(secret, format!("{SECRET_PREFIX}{bare}"));
		}
	}

	#[test]
	fn test_ensure_required_env_vars_injects() {
		let mut env = Vec::new();
		ensure_required_env_vars(&mut env, "fetch", "default");
		let names: Vec<&str> = env.iter().map(|e| e.name.as_str()).collect();
		assert!(names.contains(&"XDG_CONFIG_HOME"));
		assert!(names.contains(&"TOOLHIVE_RUNTIME"));
		assert!(!names.contains(&SECRETS_PROVIDER_VAR));

		let otel = env
			.iter()
			.find(|e| e.name == "OTEL_RESOURCE_ATTRIBUTES")
			.unwrap();
		assert_eq!(
			otel.value.as_deref(),
			Some("service.name=fetch,service.namespace=default")
		);
	}

	#[test]
	fn test_secrets_provider_added_when_secret_vars_present() {
		let mut env = vec![from_secret(
			"TOOLHIVE_SECRET_HEADER_FORWARD_X_API_KEY_P",
			"s",
			"k",
		)];
		ensure_required_env_vars(&mut env, "p", "default");
		let provider = env.iter().find(|e| e.name == SECRETS_PROVIDER_VAR).unwrap();
		assert_eq!(provider.value.as_deref(), Some("environment"));
	}

	#[test]
	fn test_no_duplicate_when_caller_set_other_value() {
		// Presence wins: a caller-set provider is kept as-is, never doubled.
		let mut env = vec![
			literal(SECRETS_PROVIDER_VAR, "vault"),
			from_secret("TOOLHIVE_SECRET_X", "s", "k"),
		];
		ensure_required_env_vars(&mut env, "p", "default");
		let providers: Vec<&EnvVar> = env
			.iter()
			.filter(|e| e.name == SECRETS_PROVIDER_VAR)
			.collect();
		assert_eq!(providers.len(), 1);
		assert_eq!(providers[0].value.as_deref(), Some("vault"));
	}

	#[test]
	fn test_idempotent() {
		let mut env = Vec::new();
		ensure_required_env_vars(&mut env, "fetch", "default");
		let first = env.clone();
		ensure_required_env_vars(&mut env, "fetch", "default");
		assert_eq!(env, first);
	}
}
