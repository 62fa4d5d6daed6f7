// CA bundle injection into the cluster's validating-webhook configuration.
//
// Absence of the configuration is tolerated; insufficient permission is
// logged and reconciliation continues, leaving validation unenforced until
// the bundle is injected manually.

use k8s_openapi::ByteString;
use k8s_openapi::api::admissionregistration::v1::ValidatingWebhookConfiguration;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::status::FIELD_MANAGER;

/// Patch the CA bundle into every webhook of the named configuration.
pub async fn inject_ca_bundle(client: &Client, config_name: &str, ca_pem: &str) -> Result<()> {
	let api: Api<ValidatingWebhookConfiguration> = Api::all(client.clone());

	let Some(mut config) = api.get_opt(config_name).await? else {
		warn!(
			target: "webhook",
			config = %config_name,
			"validating webhook configuration not found, skipping CA injection"
		);
		return Ok(());
	};

	let bundle = ByteString(ca_pem.as_bytes().to_vec());
	for webhook in config.webhooks.iter_mut().flatten() {
		webhook.client_config.ca_bundle = Some(bundle.clone());
	}

	// Patch rather than update so fields owned by other managers, such as
	// the user-selected failurePolicy, are left untouched.
	let patch = serde_json::json!({ "webhooks": config.webhooks });
	match api
		.patch(config_name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Merge(&patch))
		.await
	{
		Ok(_) => {
			info!(target: "webhook", config = %config_name, "CA bundle injected");
			Ok(())
		},
		Err(kube::Error::Api(err)) if err.code == 403 => {
			warn!(
				target: "webhook",
				config = %config_name,
				"insufficient permission to inject CA bundle; validation unenforced until injected manually"
			);
			Ok(())
		},
		Err(err) => Err(Error::Kube(err)),
	}
}
