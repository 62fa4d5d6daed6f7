// RBAC builders for the proxy runner

use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

use super::labels;

/// Service account name for a server's proxy runner.
pub fn runner_service_account_name(server: &str) -> String {
	format!("{server}-proxy-runner")
}

fn meta(
	name: &str,
	namespace: &str,
	server: &str,
	component: &str,
	owner: &OwnerReference,
) -> ObjectMeta {
	ObjectMeta {
		name: Some(name.to_string()),
		namespace: Some(namespace.to_string()),
		labels: Some(labels::standard_labels(server, server, component)),
		owner_references: Some(vec![owner.clone()]),
		..Default::default()
	}
}

/// ServiceAccount the proxy runner pod runs under.
pub fn runner_service_account(
	server: &str,
	namespace: &str,
	component: &str,
	owner: &OwnerReference,
) -> ServiceAccount {
	ServiceAccount {
		metadata: meta(
			&runner_service_account_name(server),
			namespace,
			server,
			component,
			owner,
		),
		..Default::default()
	}
}

/// Role allowing the runner to manage the pods it wraps. Stdio transports
/// need attach to reach the process's stdin/stdout.
pub fn runner_role(
	server: &str,
	namespace: &str,
	component: &str,
	owner: &OwnerReference,
) -> Role {
	Role {
		metadata: meta(
			&runner_service_account_name(server),
			namespace,
			server,
			component,
			owner,
		),
		rules: Some(vec![
			PolicyRule {
				api_groups: Some(vec!["".to_string()]),
				resources: Some(vec!["pods".to_string()]),
				verbs: vec![
					"get".to_string(),
					"list".to_string(),
					"watch".to_string(),
					"create".to_string(),
					"delete".to_string(),
				],
				..Default::default()
			},
			PolicyRule {
				api_groups: Some(vec!["".to_string()]),
				resources: Some(vec![
					"pods/log".to_string(),
					"pods/attach".to_string(),
				]),
				verbs: vec!["get".to_string(), "create".to_string()],
				..Default::default()
			},
			PolicyRule {
				api_groups: Some(vec!["apps".to_string()]),
				resources: Some(vec!["statefulsets".to_string()]),
				verbs: vec![
					"get".to_string(),
					"list".to_string(),
					"watch".to_string(),
					"create".to_string(),
					"apply".to_string(),
					"update".to_string(),
					"delete".to_string(),
				],
				..Default::default()
			},
		]),
	}
}

/// Bind the runner role to the runner service account.
pub fn runner_role_binding(
	server: &str,
	namespace: &str,
	component: &str,
	owner: &OwnerReference,
) -> RoleBinding {
	let name = runner_service_account_name(server);
	RoleBinding {
		metadata: meta(&name, namespace, server, component, owner),
		role_ref: RoleRef {
			api_group: "rbac.authorization.k8s.io".to_string(),
			kind: "Role".to_string(),
			name: name.clone(),
		},
		subjects: Some(vec![Subject {
			kind: "ServiceAccount".to_string(),
			name,
			namespace: Some(namespace.to_string()),
			..Default::default()
		}]),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn owner() -> OwnerReference {
		OwnerReference {
			api_version: "toolhive.stacklok.dev/v1alpha1".to_string(),
			kind: "MCPServer".to_string(),
			name: "fetch".to_string(),
			uid: "uid-1".to_string(),
			controller: Some(true),
			block_owner_deletion: Some(true),
		}
	}

	#[test]
	fn test_service_account_name() {
		assert_eq!(runner_service_account_name("fetch"), "fetch-proxy-runner");
	}

	#[test]
	fn test_role_binding_targets_role() {
		let binding = runner_role_binding("fetch", "default", "mcp-server", &owner());
		assert_eq!(binding.role_ref.name, "fetch-proxy-runner");
		assert_eq!(
			binding.subjects.unwrap()[0].namespace.as_deref(),
			Some("default")
		);
	}

	#[test]
	fn test_role_grants_pod_attach() {
		let role = runner_role("fetch", "default", "mcp-server", &owner());
		let rules = role.rules.unwrap();
		assert!(rules.iter().any(|r| {
			r.resources
				.as_ref()
				.is_some_and(|res| res.iter().any(|s| s == "pods/attach"))
		}));
	}
}
