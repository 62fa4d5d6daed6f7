// Liveness and readiness probe builders for managed workloads

use k8s_openapi::api::core::v1::{HTTPGetAction, Probe};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

/// HTTP readiness probe hitting `path` on `port`.
pub fn readiness(port: i32, path: &str) -> Probe {
	http_probe(port, path, 5, 10)
}

/// HTTP liveness probe hitting `path` on `port`.
pub fn liveness(port: i32, path: &str) -> Probe {
	http_probe(port, path, 15, 30)
}

fn http_probe(port: i32, path: &str, initial_delay: i32, period: i32) -> Probe {
	Probe {
		http_get: Some(HTTPGetAction {
			path: Some(path.to_string()),
			port: IntOrString::Int(port),
			..Default::default()
		}),
		initial_delay_seconds: Some(initial_delay),
		period_seconds: Some(period),
		timeout_seconds: Some(3),
		failure_threshold: Some(3),
		..Default::default()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_readiness_probe_shape() {
		let probe = readiness(8080, "/health");
		let get = probe.http_get.unwrap();
		assert_eq!(get.path.as_deref(), Some("/health"));
		assert_eq!(get.port, IntOrString::Int(8080));
		assert_eq!(probe.period_seconds, Some(10));
	}

	#[test]
	fn test_liveness_slower_than_readiness() {
		let live = liveness(8080, "/health");
		let ready = readiness(8080, "/health");
		assert!(live.period_seconds.unwrap() > ready.period_seconds.unwrap());
	}
}
