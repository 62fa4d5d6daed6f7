// Custom resource API types for the toolhive.stacklok.dev/v1alpha1 group

mod external_auth;
mod group;
mod registry;
mod server;
mod status;
mod tool_config;
mod vmcp;

pub use external_auth::{
	AwsStsConfig, BearerTokenConfig, EmbeddedAuthServerConfig, ExternalAuthType,
	HeaderInjectionConfig, MCPExternalAuthConfig, MCPExternalAuthConfigSpec,
	MCPExternalAuthConfigStatus, OidcCaBundleRef, OidcConfigMapRef, OidcConfigRef, OidcInlineConfig,
	SecretKeyRef, TokenExchangeConfig,
};
pub use group::{MCPGroup, MCPGroupSpec, MCPGroupStatus};
pub use registry::{
	ApiSource, ConfigMapSource, GitBasicAuth, GitSource, MCPRegistry, MCPRegistrySpec,
	MCPRegistryStatus, NameFilter, PvcSource, RegistryApiStatus, RegistryDataFormat,
	RegistryFilter, RegistrySyncStatus, SubRegistry, SyncPhase, SyncPolicy,
};
pub use server::{
	AuditSpec, AuthzSpec, EmbeddingServer, EmbeddingServerSpec, EmbeddingServerStatus, EnvVar,
	MCPRemoteProxy, MCPRemoteProxySpec, MCPRemoteProxyStatus, MCPServer, MCPServerSpec,
	MCPServerStatus, ModelCacheSpec, PermissionProfileRef, ProxyMode, ResourceHints, ResourceList,
	TelemetrySpec, Transport, VolumeSpec,
};
pub use status::{Condition, ConditionStatus, Phase, conditions};
pub use tool_config::{MCPToolConfig, MCPToolConfigSpec, MCPToolConfigStatus, ToolOverride};
pub use vmcp::{
	AggregationConfig, CompositeToolRef, ConflictResolution, IncomingAuthConfig, OptimizerConfig,
	OutgoingAuthConfig, ToolStep, VirtualMCPCompositeToolDefinition,
	VirtualMCPCompositeToolDefinitionSpec, VirtualMCPCompositeToolDefinitionStatus,
	VirtualMCPServer, VirtualMCPServerSpec, VirtualMCPServerStatus,
};

/// API group served by this operator.
pub const API_GROUP: &str = "toolhive.stacklok.dev";

/// API version served by this operator.
pub const API_VERSION: &str = "v1alpha1";

/// Annotation that triggers a registry sync when its value changes.
pub const MANUAL_SYNC_ANNOTATION: &str = "toolhive.stacklok.dev/manual-sync";

/// Historical alias for [`MANUAL_SYNC_ANNOTATION`], still honored.
pub const SYNC_TRIGGER_ANNOTATION: &str = "toolhive.stacklok.dev/sync-trigger";

/// Label a server must carry to be matched against enforcing registries.
pub const SERVER_REGISTRY_NAME_LABEL: &str = "server-registry-name";

/// Finalizer token for a kind, e.g. `mcpserver.toolhive.stacklok.dev/finalizer`.
pub fn finalizer_name(kind: &str) -> String {
	format!("{}.{}/finalizer", kind.to_lowercase(), API_GROUP)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_finalizer_name() {
		assert_eq!(
			finalizer_name("MCPServer"),
			"mcpserver.toolhive.stacklok.dev/finalizer"
		);
		assert_eq!(
			finalizer_name("MCPRegistry"),
			"mcpregistry.toolhive.stacklok.dev/finalizer"
		);
	}
}
