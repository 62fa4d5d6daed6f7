// Admission webhook server: self-bootstrapped TLS, fixed validation paths,
// CA bundle injection into the cluster webhook configuration.

pub mod certs;
pub mod handlers;
pub mod inject;

use std::sync::Arc;

use axum::Router;
use axum::routing::post;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::service::TowerToHyperService;
use kube::Client;
use rustls::ServerConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{info, warn};

use crate::config::OperatorConfig;
use crate::error::{Error, Result};

/// Port the webhook server listens on.
pub const WEBHOOK_PORT: u16 = 9443;

fn validation_path(kind: &str) -> String {
	format!("/validate-toolhive-stacklok-dev-v1alpha1-{kind}")
}

/// Router with the fixed validation paths.
pub fn router() -> Router {
	Router::new()
		.route(
			&validation_path("virtualmcpserver"),
			post(handlers::admit_virtual_server),
		)
		.route(
			&validation_path("virtualmcpcompositetooldefinition"),
			post(handlers::admit_composite_tool),
		)
		.route(
			&validation_path("mcpexternalauthconfig"),
			post(handlers::admit_external_auth),
		)
}

fn tls_config(certs: &certs::WebhookCerts) -> Result<ServerConfig> {
	let cert_chain: Vec<CertificateDer<'static>> =
		rustls_pemfile::certs(&mut certs.cert_pem.as_bytes())
			.collect::<std::io::Result<Vec<_>>>()
			.map_err(|e| Error::Transient(format!("parsing webhook certificate: {e}")))?;
	let key: PrivateKeyDer<'static> =
		rustls_pemfile::private_key(&mut certs.key_pem.as_bytes())
			.map_err(|e| Error::Transient(format!("parsing webhook key: {e}")))?
			.ok_or_else(|| Error::Transient("webhook key PEM contains no key".to_string()))?;

	ServerConfig::builder()
		.with_no_client_auth()
		.with_single_cert(cert_chain, key)
		.map_err(|e| Error::Transient(format!("building webhook TLS config: {e}")))
}

/// Bootstrap the webhook: generate certificates, write them to an ephemeral
/// directory, inject the CA bundle, and serve the validation endpoints.
pub async fn serve(client: Client, config: OperatorConfig) -> Result<()> {
	let material = certs::generate(&config.webhook_service_name, &config.pod_namespace)?;

	let dir = std::env::temp_dir().join("toolhive-webhook-certs");
	material.write_to(&dir)?;
	info!(target: "webhook", dir = %dir.display(), "webhook certificates written");

	inject::inject_ca_bundle(&client, &config.webhook_config_name, &material.ca_pem).await?;

	let tls = TlsAcceptor::from(Arc::new(tls_config(&material)?));
	let listener = TcpListener::bind(("0.0.0.0", WEBHOOK_PORT))
		.await
		.map_err(|e| Error::Admission(format!("binding webhook port {WEBHOOK_PORT}: {e}")))?;
	info!(target: "webhook", port = WEBHOOK_PORT, "webhook server listening");

	let app = router();
	loop {
		let (stream, peer) = listener
			.accept()
			.await
			.map_err(|e| Error::Transient(format!("accepting webhook connection: {e}")))?;
		let tls = tls.clone();
		let app = app.clone();
		tokio::spawn(async move {
			let stream = match tls.accept(stream).await {
				Ok(stream) => stream,
				Err(err) => {
					warn!(target: "webhook", %peer, error = %err, "TLS handshake failed");
					return;
				},
			};
			let service = TowerToHyperService::new(app);
			if let Err(err) = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
				.serve_connection(TokioIo::new(stream), service)
				.await
			{
				warn!(target: "webhook", %peer, error = %err, "webhook connection error");
			}
		});
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_validation_paths() {
		assert_eq!(
			validation_path("virtualmcpserver"),
			"/validate-toolhive-stacklok-dev-v1alpha1-virtualmcpserver"
		);
	}

	#[test]
	fn test_tls_config_from_generated_certs() {
		let _ = rustls::crypto::ring::default_provider().install_default();
		let material = certs::generate("webhook", "default").unwrap();
		assert!(tls_config(&material).is_ok());
	}
}
