// Include/exclude glob filters over registry entry names and tags.
//
// A server passes when it matches any include pattern (or the include list
// is empty) and no exclude pattern. Exclude wins.

use globset::{Glob, GlobSet, GlobSetBuilder};

use super::schema::RegistryData;
use crate::api::{NameFilter, RegistryFilter};
use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct CompiledNameFilter {
	include: Option<GlobSet>,
	exclude: Option<GlobSet>,
}

impl CompiledNameFilter {
	fn passes(&self, value: &str) -> bool {
		if let Some(include) = &self.include {
			if !include.is_match(value) {
				return false;
			}
		}
		if let Some(exclude) = &self.exclude {
			if exclude.is_match(value) {
				return false;
			}
		}
		true
	}

	fn passes_any(&self, values: &[String]) -> bool {
		if let Some(include) = &self.include {
			if !values.iter().any(|value| include.is_match(value)) {
				return false;
			}
		}
		if let Some(exclude) = &self.exclude {
			if values.iter().any(|value| exclude.is_match(value)) {
				return false;
			}
		}
		true
	}
}

/// Compiled filter ready to apply to a registry document.
#[derive(Debug, Default)]
pub struct CompiledFilter {
	names: CompiledNameFilter,
	tags: CompiledNameFilter,
}

fn build_set(patterns: &[String], field: &str) -> Result<Option<GlobSet>> {
	if patterns.is_empty() {
		return Ok(None);
	}
	let mut builder = GlobSetBuilder::new();
	for pattern in patterns {
		let glob = Glob::new(pattern).map_err(|e| {
			Error::spec_invalid(field, format!("invalid glob {pattern:?}: {e}"))
		})?;
		builder.add(glob);
	}
	let set = builder
		.build()
		.map_err(|e| Error::spec_invalid(field, format!("building glob set: {e}")))?;
	Ok(Some(set))
}

fn compile_name_filter(filter: Option<&NameFilter>, field: &str) -> Result<CompiledNameFilter> {
	let Some(filter) = filter else {
		return Ok(CompiledNameFilter::default());
	};
	Ok(CompiledNameFilter {
		include: build_set(&filter.include, &format!("{field}.include"))?,
		exclude: build_set(&filter.exclude, &format!("{field}.exclude"))?,
	})
}

/// Compile the declared filter. Invalid globs are spec errors.
pub fn compile(filter: Option<&RegistryFilter>) -> Result<CompiledFilter> {
	let Some(filter) = filter else {
		return Ok(CompiledFilter::default());
	};
	Ok(CompiledFilter {
		names: compile_name_filter(filter.names.as_ref(), "filter.names")?,
		tags: compile_name_filter(filter.tags.as_ref(), "filter.tags")?,
	})
}

/// Drop entries that do not pass the filter.
pub fn apply(data: &mut RegistryData, filter: &CompiledFilter) {
	data.servers
		.retain(|name, server| filter.names.passes(name) && filter.tags.passes_any(&server.tags));
	data.remote_servers
		.retain(|name, remote| filter.names.passes(name) && filter.tags.passes_any(&remote.tags));
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::registry::schema::RegistryServer;

	fn data() -> RegistryData {
		let mut data = RegistryData::default();
		for (name, tags) in [
			("github", vec!["vcs", "official"]),
			("gitlab", vec!["vcs"]),
			("weather", vec!["data"]),
		] {
			data.servers.insert(
				name.to_string(),
				RegistryServer {
					image: format!("example.com/{name}:latest"),
					tags: tags.into_iter().map(str::to_string).collect(),
					..Default::default()
				},
			);
		}
		data
	}

	fn filter_json(json: &str) -> RegistryFilter {
		serde_json::from_str(json).unwrap()
	}

	#[test]
	fn test_empty_filter_passes_all() {
		let mut d = data();
		apply(&mut d, &compile(None).unwrap());
		assert_eq!(d.server_count(), 3);
	}

	#[test]
	fn test_name_include() {
		let filter = filter_json(r#"{"names": {"include": ["git*"]}}"#);
		let mut d = data();
		apply(&mut d, &compile(Some(&filter)).unwrap());
		assert_eq!(d.server_count(), 2);
		assert!(d.servers.contains_key("github"));
		assert!(!d.servers.contains_key("weather"));
	}

	#[test]
	fn test_exclude_wins_over_include() {
		let filter =
			filter_json(r#"{"names": {"include": ["git*"], "exclude": ["gitlab"]}}"#);
		let mut d = data();
		apply(&mut d, &compile(Some(&filter)).unwrap());
		assert_eq!(d.server_count(), 1);
		assert!(d.servers.contains_key("github"));
	}

	#[test]
	fn test_tag_filter() {
		let filter = filter_json(r#"{"tags": {"include": ["official"]}}"#);
		let mut d = data();
		apply(&mut d, &compile(Some(&filter)).unwrap());
		assert_eq!(d.server_count(), 1);
		assert!(d.servers.contains_key("github"));
	}

	#[test]
	fn test_invalid_glob_is_spec_error() {
		let filter = filter_json(r#"{"names": {"include": ["[unclosed"]}}"#);
		let err = compile(Some(&filter)).unwrap_err();
		assert!(matches!(err, Error::SpecInvalid { .. }));
	}
}
