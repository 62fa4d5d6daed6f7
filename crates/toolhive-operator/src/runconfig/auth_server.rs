// Embedded auth server translation.
//
// Key material is mounted read-only into fixed paths; the middleware entry
// only carries those paths. A missing OIDC resourceUrl is a hard error, not
// a defaultable value.

use super::Middleware;
use crate::api::EmbeddedAuthServerConfig;
use crate::error::{Error, Result};
use crate::resources::deployment::SecretFileMount;

/// Mount path of the signing keys.
pub const AUTH_SERVER_KEYS_PATH: &str = "/etc/toolhive/authserver/keys";

/// Mount path of the HMAC secrets.
pub const AUTH_SERVER_HMAC_PATH: &str = "/etc/toolhive/authserver/hmac";

/// Translate an embedded-auth-server config into its middleware entry plus
/// the secret file mounts the workload needs.
pub fn translate_auth_server(
	config: &EmbeddedAuthServerConfig,
	resource_url: Option<&str>,
) -> Result<(Middleware, Vec<SecretFileMount>)> {
	let resource_url = resource_url.filter(|url| !url.is_empty()).ok_or_else(|| {
		Error::spec_invalid(
			"oidcConfig.resourceUrl",
			"OIDC config resourceUrl is required for embedded auth server",
		)
	})?;

	let mut mounts = Vec::new();
	let mut signing_key_paths = Vec::new();
	let mut hmac_paths = Vec::new();

	if !config.signing_key_refs.is_empty() {
		let items: Vec<(String, String)> = config
			.signing_key_refs
			.iter()
			.enumerate()
			.map(|(idx, secret_ref)| (secret_ref.key.clone(), format!("key-{idx}.pem")))
			.collect();
		signing_key_paths = items
			.iter()
			.map(|(_, file)| format!("{AUTH_SERVER_KEYS_PATH}/{file}"))
			.collect();
		// All signing keys must come from the same secret so they share a volume.
		let secret_name = config.signing_key_refs[0].name.clone();
		if config
			.signing_key_refs
			.iter()
			.any(|r| r.name != secret_name)
		{
			return Err(Error::spec_invalid(
				"embeddedAuthServer.signingKeyRefs",
				"all signing keys must reference the same secret",
			));
		}
		mounts.push(SecretFileMount {
			volume_name: "authserver-keys".to_string(),
			secret_name,
			items,
			mount_path: AUTH_SERVER_KEYS_PATH.to_string(),
		});
	}

	if !config.hmac_secret_refs.is_empty() {
		let items: Vec<(String, String)> = config
			.hmac_secret_refs
			.iter()
			.enumerate()
			.map(|(idx, secret_ref)| (secret_ref.key.clone(), format!("hmac-{idx}")))
			.collect();
		hmac_paths = items
			.iter()
			.map(|(_, file)| format!("{AUTH_SERVER_HMAC_PATH}/{file}"))
			.collect();
		let secret_name = config.hmac_secret_refs[0].name.clone();
		if config.hmac_secret_refs.iter().any(|r| r.name != secret_name) {
			return Err(Error::spec_invalid(
				"embeddedAuthServer.hmacSecretRefs",
				"all HMAC secrets must reference the same secret",
			));
		}
		mounts.push(SecretFileMount {
			volume_name: "authserver-hmac".to_string(),
			secret_name,
			items,
			mount_path: AUTH_SERVER_HMAC_PATH.to_string(),
		});
	}

	let middleware = Middleware::AuthServer {
		resource_url: resource_url.to_string(),
		issuer: config.issuer.clone(),
		signing_key_paths,
		hmac_paths,
	};
	Ok((middleware, mounts))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::api::SecretKeyRef;

	fn config() -> EmbeddedAuthServerConfig {
		EmbeddedAuthServerConfig {
			signing_key_refs: vec![
				SecretKeyRef {
					name: "signing".to_string(),
					key: "rsa.pem".to_string(),
				},
				SecretKeyRef {
					name: "signing".to_string(),
					key: "ec.pem".to_string(),
				},
			],
			hmac_secret_refs: vec![SecretKeyRef {
				name: "hmac".to_string(),
				key: "current".to_string(),
			}],
			issuer: Some("https://auth.example.com".to_string()),
		}
	}

	#[test]
	fn test_missing_resource_url_is_hard_error() {
		let err = translate_auth_server(&config(), None).unwrap_err();
		assert!(matches!(err, Error::SpecInvalid { .. }));
		assert!(
			err.to_string()
				.contains("OIDC config resourceUrl is required for embedded auth server")
		);

		let err = translate_auth_server(&config(), Some("")).unwrap_err();
		assert!(matches!(err, Error::SpecInvalid { .. }));
	}

	#[test]
	fn test_key_paths_indexed() {
		let (mw, mounts) =
			translate_auth_server(&config(), Some("https://mcp.example.com")).unwrap();
		let Middleware::AuthServer {
			signing_key_paths,
			hmac_paths,
			resource_url,
			..
		} = mw
		else {
			panic!("wrong middleware variant");
		};
		assert_eq!(
			signing_key_paths,
			vec![
				"/etc/toolhive/authserver/keys/key-0.pem",
				"/etc/toolhive/authserver/keys/key-1.pem"
			]
		);
		assert_eq!(hmac_paths, vec!["/etc/toolhive/authserver/hmac/hmac-0"]);
		assert_eq!(resource_url, "https://mcp.example.com");
		assert_eq!(mounts.len(), 2);
		assert_eq!(mounts[0].items[1].1, "key-1.pem");
	}

	#[test]
	fn test_mixed_secret_names_rejected() {
		let mut cfg = config();
		cfg.signing_key_refs[1].name = "other".to_string();
		let err = translate_auth_server(&cfg, Some("https://mcp.example.com")).unwrap_err();
		assert!(matches!(err, Error::SpecInvalid { .. }));
	}
}
