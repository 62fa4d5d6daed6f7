// Integration tests for registry sync gating, filtering, and tool routing

use toolhive_operator::api::{
	MANUAL_SYNC_ANNOTATION, MCPRegistry, MCPRegistrySpec, MCPRegistryStatus, RegistryFilter,
	RegistrySyncStatus, SyncPhase,
};
use toolhive_operator::optimizer::{Hit, combine};
use toolhive_operator::registry::schema::{RegistryData, RegistryServer};
use toolhive_operator::registry::{SyncTrigger, filter, needs_sync};

fn sample_data() -> RegistryData {
	RegistryData::parse(
		br#"{
			"version": "1.0",
			"servers": {
				"github": {
					"image": "ghcr.io/github/github-mcp-server:latest",
					"tier": "official",
					"transport": "stdio",
					"tools": ["list_issues", "create_issue"],
					"tags": ["vcs", "official"]
				},
				"fetch": {
					"image": "docker.io/mcp/fetch",
					"transport": "stdio",
					"tags": ["web"]
				}
			}
		}"#,
	)
	.unwrap()
}

/// Unchanged content hashes to the same value, so the sync gate suppresses
/// a second persist; any content change moves the hash.
#[test]
fn test_hash_gating() {
	let first = sample_data();
	let second = sample_data();
	assert_eq!(
		first.content_hash().unwrap(),
		second.content_hash().unwrap()
	);

	let mut changed = sample_data();
	changed.servers.insert(
		"weather".to_string(),
		RegistryServer {
			image: "docker.io/mcp/weather".to_string(),
			..Default::default()
		},
	);
	assert_ne!(
		first.content_hash().unwrap(),
		changed.content_hash().unwrap()
	);
}

/// Include/exclude globs apply over names and tags; exclude wins.
#[test]
fn test_filter_application() {
	let declared: RegistryFilter = serde_json::from_str(
		r#"{"names": {"include": ["*"], "exclude": ["fetch"]}, "tags": {"include": ["official", "web"]}}"#,
	)
	.unwrap();
	let compiled = filter::compile(Some(&declared)).unwrap();

	let mut data = sample_data();
	filter::apply(&mut data, &compiled);
	assert_eq!(data.server_count(), 1);
	assert!(data.servers.contains_key("github"));
}

/// The manual-sync annotation triggers on inequality with the recorded
/// value; re-annotating with the same value triggers nothing.
#[test]
fn test_manual_sync_annotation_sequence() {
	let status = MCPRegistryStatus {
		observed_generation: Some(1),
		sync_status: Some(RegistrySyncStatus {
			phase: SyncPhase::Complete,
			last_sync_time: Some("2024-01-01T00:00:00Z".to_string()),
			last_sync_hash: Some("sha256:abc".to_string()),
			server_count: 2,
			message: None,
		}),
		last_manual_sync_trigger: None,
		..Default::default()
	};
	let mut registry = MCPRegistry::new("community", MCPRegistrySpec::default());
	registry.metadata.namespace = Some("default".to_string());
	registry.metadata.generation = Some(1);
	registry.status = Some(status);

	let annotate = |registry: &mut MCPRegistry, value: &str| {
		registry
			.metadata
			.annotations
			.get_or_insert_with(Default::default)
			.insert(MANUAL_SYNC_ANNOTATION.to_string(), value.to_string());
	};
	let record = |registry: &mut MCPRegistry, value: &str| {
		registry
			.status
			.as_mut()
			.unwrap()
			.last_manual_sync_trigger = Some(value.to_string());
	};

	let now = chrono::Utc::now();

	annotate(&mut registry, "1704110400");
	assert_eq!(
		needs_sync(&registry, now).unwrap(),
		Some(SyncTrigger::Manual("1704110400".to_string()))
	);

	record(&mut registry, "1704110400");
	assert_eq!(needs_sync(&registry, now).unwrap(), None);

	annotate(&mut registry, "1704110401");
	assert_eq!(
		needs_sync(&registry, now).unwrap(),
		Some(SyncTrigger::Manual("1704110401".to_string()))
	);

	record(&mut registry, "1704110401");
	assert_eq!(needs_sync(&registry, now).unwrap(), None);
}

/// Hybrid merge returns at most `limit` distinct ids, descending by
/// similarity, keeping the higher-scored duplicate.
#[test]
fn test_hybrid_merge_invariants() {
	let hit = |id: &str, similarity: f32| Hit {
		tool_id: id.to_string(),
		similarity,
	};
	let semantic = vec![hit("a", 0.9), hit("b", 0.6), hit("c", 0.3)];
	let keyword = vec![hit("b", 0.8), hit("d", 0.7)];

	let merged = combine(semantic, keyword, 3, 70);
	assert!(merged.len() <= 3);

	let mut seen = std::collections::HashSet::new();
	for hit in &merged {
		assert!(seen.insert(hit.tool_id.clone()), "duplicate id in results");
	}
	assert!(merged.windows(2).all(|w| w[0].similarity >= w[1].similarity));

	// The duplicate "b" keeps its higher keyword score.
	let b = merged.iter().find(|hit| hit.tool_id == "b").unwrap();
	assert_eq!(b.similarity, 0.8);
}
