// Platform detection, performed once per process.
//
// The detected platform drives scheduling details such as pod-security
// labels. Both the success and the failure outcome are cached: every caller
// after the first sees the same result without re-probing the API server.

use kube::Client;
use tokio::sync::OnceCell;
use tracing::info;

use crate::error::{Error, Result};

/// Cluster flavor the operator runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
	Kubernetes,
	OpenShift,
}

impl std::fmt::Display for Platform {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Platform::Kubernetes => f.write_str("kubernetes"),
			Platform::OpenShift => f.write_str("openshift"),
		}
	}
}

static DETECTED: OnceCell<std::result::Result<Platform, String>> = OnceCell::const_new();

/// Detect the platform, probing the API server at most once per process.
pub async fn detect(client: &Client) -> Result<Platform> {
	let outcome = DETECTED
		.get_or_init(|| async {
			let result = probe(client).await;
			match &result {
				Ok(platform) => info!(target: "platform", %platform, "platform detected"),
				Err(err) => info!(target: "platform", error = %err, "platform detection failed"),
			}
			result.map_err(|e| e.to_string())
		})
		.await;

	outcome.clone().map_err(Error::Transient)
}

async fn probe(client: &Client) -> std::result::Result<Platform, kube::Error> {
	let groups = client.list_api_groups().await?;
	let names: Vec<String> = groups
		.groups
		.into_iter()
		.map(|group| group.name)
		.collect();
	Ok(classify(&names))
}

/// OpenShift is identified by the presence of its route API group.
fn classify(group_names: &[String]) -> Platform {
	if group_names.iter().any(|name| name == "route.openshift.io") {
		Platform::OpenShift
	} else {
		Platform::Kubernetes
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_classify_kubernetes() {
		let groups = vec!["apps".to_string(), "batch".to_string()];
		assert_eq!(classify(&groups), Platform::Kubernetes);
	}

	#[test]
	fn test_classify_openshift() {
		let groups = vec![
			"apps".to_string(),
			"route.openshift.io".to_string(),
		];
		assert_eq!(classify(&groups), Platform::OpenShift);
	}

	#[test]
	fn test_classify_empty() {
		assert_eq!(classify(&[]), Platform::Kubernetes);
	}
}
