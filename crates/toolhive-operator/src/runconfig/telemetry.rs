// Telemetry translation: OTLP endpoint normalization and service naming

use super::TelemetryConfig;
use crate::api::TelemetrySpec;

/// Strip any `http://` or `https://` prefix and trailing slashes; the OTLP
/// client expects a bare host:port.
pub fn normalize_endpoint(endpoint: &str) -> String {
	let stripped = endpoint
		.strip_prefix("https://")
		.or_else(|| endpoint.strip_prefix("http://"))
		.unwrap_or(endpoint);
	stripped.trim_end_matches('/').to_string()
}

/// Translate the telemetry spec. Disabled or endpoint-less telemetry yields
/// no config block. The service name defaults to the owning resource's name;
/// the service version is left to the runner to resolve at serialization.
pub fn translate_telemetry(spec: Option<&TelemetrySpec>, resource_name: &str) -> Option<TelemetryConfig> {
	let spec = spec?;
	if !spec.enabled {
		return None;
	}
	let endpoint = spec.endpoint.as_deref()?;

	Some(TelemetryConfig {
		endpoint: normalize_endpoint(endpoint),
		service_name: spec
			.service_name
			.clone()
			.unwrap_or_else(|| resource_name.to_string()),
		insecure: spec.insecure,
		sampling_ratio: spec.sampling_ratio,
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_normalize_endpoint() {
		assert_eq!(normalize_endpoint("https://h:4317"), "h:4317");
		assert_eq!(normalize_endpoint("http://h:4317"), "h:4317");
		assert_eq!(normalize_endpoint("h:4317"), "h:4317");
	}

	#[test]
	fn test_normalize_strips_trailing_slash() {
		assert_eq!(
			normalize_endpoint("https://otel.example.com:4317/"),
			"otel.example.com:4317"
		);
	}

	#[test]
	fn test_service_name_defaults_to_resource() {
		let spec = TelemetrySpec {
			enabled: true,
			endpoint: Some("otel:4317".to_string()),
			..Default::default()
		};
		let config = translate_telemetry(Some(&spec), "fetch").unwrap();
		assert_eq!(config.service_name, "fetch");
	}

	#[test]
	fn test_explicit_service_name_kept() {
		let spec = TelemetrySpec {
			enabled: true,
			endpoint: Some("otel:4317".to_string()),
			service_name: Some("custom".to_string()),
			..Default::default()
		};
		let config = translate_telemetry(Some(&spec), "fetch").unwrap();
		assert_eq!(config.service_name, "custom");
	}

	#[test]
	fn test_disabled_yields_none() {
		let spec = TelemetrySpec {
			enabled: false,
			endpoint: Some("otel:4317".to_string()),
			..Default::default()
		};
		assert!(translate_telemetry(Some(&spec), "fetch").is_none());
		assert!(translate_telemetry(None, "fetch").is_none());
	}
}
