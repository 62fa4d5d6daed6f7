// Process-level operator configuration, read once from the environment.
//
// Feature gates form an explicit dependency graph: VMCP depends on Server.
// A group whose dependency is disabled is disabled itself, with a warning,
// and its watches are never wired.

use std::collections::HashMap;

use tracing::warn;

use crate::error::{Error, Result};

/// Default image of the proxy runner deployed for each server.
const DEFAULT_PROXY_IMAGE: &str = "ghcr.io/stacklok/toolhive/proxyrunner:latest";

/// Default image of the registry-api child workload.
const DEFAULT_REGISTRY_API_IMAGE: &str = "ghcr.io/stacklok/toolhive/registry-api:latest";

/// Operator configuration resolved at startup.
#[derive(Debug, Clone)]
pub struct OperatorConfig {
	pub enable_server: bool,
	pub enable_registry: bool,
	pub enable_vmcp: bool,
	pub enable_webhooks: bool,
	/// Namespaces to watch; empty means cluster-wide.
	pub watch_namespaces: Vec<String>,
	/// The operator's own namespace.
	pub pod_namespace: String,
	pub webhook_service_name: String,
	pub webhook_config_name: String,
	pub probe_addr: String,
	pub leader_election_id: String,
	pub proxy_image: String,
	pub registry_api_image: String,
}

impl OperatorConfig {
	/// Read configuration from process environment variables.
	pub fn from_env() -> Result<Self> {
		let vars: HashMap<String, String> = std::env::vars().collect();
		Self::from_vars(&vars)
	}

	/// Parse from an explicit variable map.
	pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self> {
		let enable_server = parse_bool(vars, "ENABLE_SERVER", true)?;
		let enable_registry = parse_bool(vars, "ENABLE_REGISTRY", true)?;
		let mut enable_vmcp = parse_bool(vars, "ENABLE_VMCP", true)?;

		// VMCP aggregates per-server reconciliation output; without the
		// server group there is nothing to aggregate.
		if enable_vmcp && !enable_server {
			warn!(
				target: "operator",
				"ENABLE_VMCP is set but ENABLE_SERVER is disabled; disabling VMCP"
			);
			enable_vmcp = false;
		}

		let watch_namespaces = vars
			.get("WATCH_NAMESPACE")
			.map(|raw| {
				raw.split(',')
					.map(str::trim)
					.filter(|ns| !ns.is_empty())
					.map(str::to_string)
					.collect()
			})
			.unwrap_or_default();

		Ok(Self {
			enable_server,
			enable_registry,
			enable_vmcp,
			enable_webhooks: parse_bool(vars, "ENABLE_WEBHOOKS", false)?,
			watch_namespaces,
			pod_namespace: vars
				.get("POD_NAMESPACE")
				.cloned()
				.unwrap_or_else(|| "toolhive-system".to_string()),
			webhook_service_name: vars
				.get("WEBHOOK_SERVICE_NAME")
				.cloned()
				.unwrap_or_else(|| "toolhive-operator-webhook".to_string()),
			webhook_config_name: vars
				.get("WEBHOOK_CONFIG_NAME")
				.cloned()
				.unwrap_or_else(|| "toolhive-operator-validating-webhook".to_string()),
			probe_addr: vars
				.get("PROBE_ADDR")
				.cloned()
				.unwrap_or_else(|| "0.0.0.0:8081".to_string()),
			leader_election_id: vars
				.get("LEADER_ELECTION_ID")
				.cloned()
				.unwrap_or_else(|| "toolhive-operator-leader".to_string()),
			proxy_image: vars
				.get("TOOLHIVE_PROXY_IMAGE")
				.cloned()
				.unwrap_or_else(|| DEFAULT_PROXY_IMAGE.to_string()),
			registry_api_image: vars
				.get("TOOLHIVE_REGISTRY_API_IMAGE")
				.cloned()
				.unwrap_or_else(|| DEFAULT_REGISTRY_API_IMAGE.to_string()),
		})
	}

	/// Whether the operator watches the whole cluster.
	pub fn cluster_scoped(&self) -> bool {
		self.watch_namespaces.is_empty()
	}
}

fn parse_bool(vars: &HashMap<String, String>, key: &str, default: bool) -> Result<bool> {
	match vars.get(key).map(String::as_str) {
		None | Some("") => Ok(default),
		Some("true") | Some("1") => Ok(true),
		Some("false") | Some("0") => Ok(false),
		Some(other) => Err(Error::spec_invalid(
			key,
			format!("invalid boolean value {other:?}"),
		)),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
		pairs
			.iter()
			.map(|(k, v)| (k.to_string(), v.to_string()))
			.collect()
	}

	#[test]
	fn test_defaults() {
		let config = OperatorConfig::from_vars(&vars(&[])).unwrap();
		assert!(config.enable_server);
		assert!(config.enable_registry);
		assert!(config.enable_vmcp);
		assert!(!config.enable_webhooks);
		assert!(config.cluster_scoped());
	}

	#[test]
	fn test_vmcp_implies_server() {
		let config =
			OperatorConfig::from_vars(&vars(&[("ENABLE_SERVER", "false")])).unwrap();
		assert!(!config.enable_server);
		assert!(!config.enable_vmcp, "vmcp must be disabled with server");
	}

	#[test]
	fn test_watch_namespaces_split() {
		let config = OperatorConfig::from_vars(&vars(&[(
			"WATCH_NAMESPACE",
			"team-a, team-b,,team-c",
		)]))
		.unwrap();
		assert_eq!(config.watch_namespaces, vec!["team-a", "team-b", "team-c"]);
		assert!(!config.cluster_scoped());
	}

	#[test]
	fn test_invalid_bool_is_error() {
		let err = OperatorConfig::from_vars(&vars(&[("ENABLE_REGISTRY", "yes")])).unwrap_err();
		assert!(matches!(err, Error::SpecInvalid { .. }));
	}
}
