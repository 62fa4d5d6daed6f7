// Self-signed webhook TLS material: an ephemeral CA plus a serving
// certificate covering the in-cluster DNS names of the webhook service.
// Generated once at startup, written to a local directory, then read-only.

use std::path::{Path, PathBuf};

use rcgen::{
	BasicConstraints, CertificateParams, Ia5String, IsCa, KeyPair, KeyUsagePurpose, SanType,
};
use time::{Duration, OffsetDateTime};

use crate::error::{Error, Result};

/// Validity of the generated CA and serving certificate.
const VALIDITY_DAYS: i64 = 365;

/// Generated webhook TLS material, PEM-encoded.
#[derive(Debug, Clone)]
pub struct WebhookCerts {
	/// CA certificate, injected as the webhook configuration's caBundle.
	pub ca_pem: String,
	/// Serving certificate signed by the CA.
	pub cert_pem: String,
	/// Serving private key.
	pub key_pem: String,
}

/// DNS names the serving certificate must cover.
pub fn dns_names(service: &str, namespace: &str) -> Vec<String> {
	vec![
		service.to_string(),
		format!("{service}.{namespace}"),
		format!("{service}.{namespace}.svc"),
		format!("{service}.{namespace}.svc.cluster.local"),
	]
}

fn generation_error(err: rcgen::Error) -> Error {
	Error::Transient(format!("generating webhook certificates: {err}"))
}

/// Generate the CA and serving certificate for the webhook service.
pub fn generate(service: &str, namespace: &str) -> Result<WebhookCerts> {
	let not_before = OffsetDateTime::now_utc();
	let not_after = not_before + Duration::days(VALIDITY_DAYS);

	let mut ca_params =
		CertificateParams::new(vec!["toolhive-operator-webhook-ca".to_string()])
			.map_err(generation_error)?;
	ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
	ca_params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
	ca_params.not_before = not_before;
	ca_params.not_after = not_after;
	let ca_key = KeyPair::generate().map_err(generation_error)?;
	let ca_cert = ca_params.self_signed(&ca_key).map_err(generation_error)?;

	let mut params = CertificateParams::new(vec![]).map_err(generation_error)?;
	params.subject_alt_names = dns_names(service, namespace)
		.into_iter()
		.map(|name| {
			Ia5String::try_from(name)
				.map(SanType::DnsName)
				.map_err(|e| Error::Transient(format!("invalid webhook DNS name: {e}")))
		})
		.collect::<Result<Vec<_>>>()?;
	params.not_before = not_before;
	params.not_after = not_after;
	let key = KeyPair::generate().map_err(generation_error)?;
	let cert = params
		.signed_by(&key, &ca_cert, &ca_key)
		.map_err(generation_error)?;

	Ok(WebhookCerts {
		ca_pem: ca_cert.pem(),
		cert_pem: cert.pem(),
		key_pem: key.serialize_pem(),
	})
}

impl WebhookCerts {
	/// Write the serving material into `dir`, returning the certificate and
	/// key paths the TLS server loads.
	pub fn write_to(&self, dir: &Path) -> Result<(PathBuf, PathBuf)> {
		std::fs::create_dir_all(dir)
			.map_err(|e| Error::Transient(format!("creating webhook cert dir: {e}")))?;
		let cert_path = dir.join("tls.crt");
		let key_path = dir.join("tls.key");
		std::fs::write(&cert_path, &self.cert_pem)
			.map_err(|e| Error::Transient(format!("writing webhook cert: {e}")))?;
		std::fs::write(&key_path, &self.key_pem)
			.map_err(|e| Error::Transient(format!("writing webhook key: {e}")))?;
		Ok((cert_path, key_path))
	}
}
