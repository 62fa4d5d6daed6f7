// Concrete source fetchers: ConfigMap, git-over-HTTP, PVC file, and remote
// registry API with format autodetection.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use tracing::{debug, info};

use super::source::{Fetched, Fetcher};
use crate::api::{ApiSource, GitSource, SubRegistry};
use crate::error::{Error, Result};

/// Root under which PVC sources are mounted into the operator pod.
pub const PVC_MOUNT_ROOT: &str = "/config/registry";

/// Default fetcher backed by the cluster client, an HTTP client, and the
/// local filesystem for PVC mounts.
pub struct SourceFetcher {
	client: Client,
	http: reqwest::Client,
	pvc_root: PathBuf,
}

impl SourceFetcher {
	pub fn new(client: Client) -> Self {
		Self {
			client,
			http: reqwest::Client::new(),
			pvc_root: PathBuf::from(PVC_MOUNT_ROOT),
		}
	}

	#[cfg(test)]
	pub fn with_pvc_root(mut self, root: PathBuf) -> Self {
		self.pvc_root = root;
		self
	}

	async fn fetch_config_map(
		&self,
		namespace: &str,
		name: &str,
		key: &str,
	) -> Result<Fetched> {
		let content =
			crate::controller::get_config_map_key(&self.client, namespace, name, key).await?;
		Ok(Fetched::new(content.into_bytes()))
	}

	async fn fetch_git(
		&self,
		namespace: &str,
		git: &GitSource,
		deadline: Duration,
	) -> Result<Fetched> {
		if !git.url.starts_with("http://") && !git.url.starts_with("https://") {
			return Err(Error::Sync(format!(
				"unsupported git transport for {:?}; only http(s) is supported",
				git.url
			)));
		}
		let base = git.url.trim_end_matches('/').trim_end_matches(".git");
		let url = format!("{}/{}/{}", base, git.ref_, git.path);

		let mut request = self.http.get(&url).timeout(deadline);
		if let Some(auth) = &git.basic_auth {
			let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
			let secret = secrets
				.get_opt(&auth.secret_name)
				.await?
				.ok_or_else(|| Error::referent_missing("Secret", &auth.secret_name))?;
			let read_key = |key: &str| -> Result<String> {
				secret
					.data
					.as_ref()
					.and_then(|data| data.get(key))
					.map(|bytes| String::from_utf8_lossy(&bytes.0).to_string())
					.ok_or_else(|| {
						Error::referent_invalid(
							"Secret",
							&auth.secret_name,
							format!("missing key {key:?}"),
						)
					})
			};
			let credentials = format!(
				"{}:{}",
				read_key(&auth.username_key)?,
				read_key(&auth.password_key)?
			);
			let encoded = base64::engine::general_purpose::STANDARD.encode(credentials);
			request = request.header("Authorization", format!("Basic {encoded}"));
		}

		debug!(target: "registry", %url, "fetching git source");
		let response = request
			.send()
			.await
			.map_err(|e| Error::Sync(format!("git fetch failed: {e}")))?;
		if !response.status().is_success() {
			return Err(Error::Sync(format!(
				"git fetch of {url} returned status {}",
				response.status()
			)));
		}
		let bytes = response
			.bytes()
			.await
			.map_err(|e| Error::Sync(format!("reading git response: {e}")))?;
		Ok(Fetched::new(bytes.to_vec()))
	}

	async fn fetch_pvc(&self, sub_name: &str, path: &str) -> Result<Fetched> {
		let file = self.pvc_root.join(sub_name).join(path);
		let bytes = tokio::fs::read(&file).await.map_err(|e| {
			Error::Sync(format!("reading PVC file {}: {e}", file.display()))
		})?;
		Ok(Fetched::new(bytes))
	}

	/// Autodetect the remote API flavor: a ToolHive registry answers
	/// `/v0/info`; an upstream MCP registry serves `/openapi.yaml`.
	async fn fetch_api(&self, api: &ApiSource, deadline: Duration) -> Result<(Fetched, bool)> {
		let base = api.url.trim_end_matches('/');

		let info = self
			.http
			.get(format!("{base}/v0/info"))
			.timeout(deadline)
			.send()
			.await;
		if matches!(&info, Ok(response) if response.status().is_success()) {
			info!(target: "registry", url = %base, "detected toolhive-format registry API");
			let response = self
				.http
				.get(format!("{base}/v0/servers"))
				.timeout(deadline)
				.send()
				.await
				.map_err(|e| Error::Sync(format!("API fetch failed: {e}")))?;
			if !response.status().is_success() {
				return Err(Error::Sync(format!(
					"API fetch returned status {}",
					response.status()
				)));
			}
			let bytes = response
				.bytes()
				.await
				.map_err(|e| Error::Sync(format!("reading API response: {e}")))?;
			return Ok((Fetched::new(bytes.to_vec()), false));
		}

		let openapi = self
			.http
			.get(format!("{base}/openapi.yaml"))
			.timeout(deadline)
			.send()
			.await;
		if matches!(&openapi, Ok(response) if response.status().is_success()) {
			info!(target: "registry", url = %base, "detected upstream-format registry API");
			let response = self
				.http
				.get(format!("{base}/servers"))
				.timeout(deadline)
				.send()
				.await
				.map_err(|e| Error::Sync(format!("API fetch failed: {e}")))?;
			if !response.status().is_success() {
				return Err(Error::Sync(format!(
					"API fetch returned status {}",
					response.status()
				)));
			}
			let bytes = response
				.bytes()
				.await
				.map_err(|e| Error::Sync(format!("reading API response: {e}")))?;
			return Ok((Fetched::new(bytes.to_vec()), true));
		}

		Err(Error::Sync(format!(
			"could not detect registry API format at {base}"
		)))
	}
}

#[async_trait]
impl Fetcher for SourceFetcher {
	async fn fetch(
		&self,
		namespace: &str,
		sub: &SubRegistry,
		deadline: Duration,
	) -> Result<Fetched> {
		super::source::validate_source(sub)?;
		if let Some(config_map) = &sub.config_map {
			return self
				.fetch_config_map(namespace, &config_map.name, &config_map.key)
				.await;
		}
		if let Some(git) = &sub.git {
			return self.fetch_git(namespace, git, deadline).await;
		}
		if let Some(pvc) = &sub.pvc {
			return self.fetch_pvc(&sub.name, &pvc.path).await;
		}
		if let Some(api) = &sub.api {
			let (fetched, _upstream) = self.fetch_api(api, deadline).await?;
			return Ok(fetched);
		}
		unreachable!("validate_source guarantees exactly one source kind");
	}
}

impl SourceFetcher {
	/// Like [`Fetcher::fetch`], but also reports whether an API source
	/// turned out to be upstream-format and needs conversion.
	pub async fn fetch_detecting(
		&self,
		namespace: &str,
		sub: &SubRegistry,
		deadline: Duration,
	) -> Result<(Fetched, bool)> {
		super::source::validate_source(sub)?;
		if let Some(api) = &sub.api {
			return self.fetch_api(api, deadline).await;
		}
		let fetched = self.fetch(namespace, sub, deadline).await?;
		Ok((fetched, false))
	}
}
