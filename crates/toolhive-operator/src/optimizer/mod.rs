// Hybrid search over backend-tool descriptions: semantic nearest-neighbor
// blended with BM25 keyword search, used for routing virtual tool calls.

mod bm25;
mod vector;

pub use bm25::Bm25Index;
pub use vector::{Hit, VectorError, VectorStore};

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::warn;

/// Deadline for mirroring writes into the keyword store. Runs on a detached
/// task so a caller cancellation cannot leave the stores divergent.
const MIRROR_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum SearchError {
	#[error("both semantic and keyword search failed: {semantic}; no keyword matches")]
	BothFailed { semantic: VectorError },
}

/// Combined semantic + keyword index.
#[derive(Debug, Default, Clone)]
pub struct HybridSearch {
	vectors: Arc<RwLock<VectorStore>>,
	keywords: Arc<RwLock<Bm25Index>>,
}

impl HybridSearch {
	pub fn new() -> Self {
		Self::default()
	}

	/// Insert or replace a tool document. The vector write happens in the
	/// caller's context; the keyword mirror is detached with its own
	/// deadline.
	pub async fn upsert(
		&self,
		tool_id: &str,
		text: &str,
		embedding: Option<Vec<f32>>,
	) -> Result<(), VectorError> {
		if let Some(embedding) = embedding {
			self.vectors.write().await.upsert(tool_id, embedding)?;
		}

		let keywords = Arc::clone(&self.keywords);
		let tool_id = tool_id.to_string();
		let text = text.to_string();
		tokio::spawn(async move {
			let mirror = async {
				keywords.write().await.upsert(&tool_id, &text);
			};
			if tokio::time::timeout(MIRROR_TIMEOUT, mirror).await.is_err() {
				warn!(target: "optimizer", %tool_id, "keyword mirror write timed out");
			}
		});
		Ok(())
	}

	/// Remove a tool from both stores.
	pub async fn remove(&self, tool_id: &str) {
		self.vectors.write().await.remove(tool_id);
		self.keywords.write().await.remove(tool_id);
	}

	/// Hybrid search. Both sides run concurrently; `semantic_ratio` is the
	/// percentage of the limit drawn from the semantic side. If exactly one
	/// side fails the other's results are used; if both fail, error.
	pub async fn search(
		&self,
		query_text: &str,
		query_embedding: Option<&[f32]>,
		limit: usize,
		semantic_ratio: u8,
	) -> Result<Vec<Hit>, SearchError> {
		let semantic_fut = async {
			self.vectors.read().await.search(query_embedding, limit)
		};
		let keyword_fut = async { self.keywords.read().await.search(query_text, limit) };
		let (semantic, keyword) = tokio::join!(semantic_fut, keyword_fut);

		match (semantic, keyword) {
			(Ok(semantic), keyword) => Ok(combine(semantic, keyword, limit, semantic_ratio)),
			(Err(err), keyword) if !keyword.is_empty() => {
				warn!(target: "optimizer", error = %err, "semantic search failed, using keyword results");
				Ok(combine(Vec::new(), keyword, limit, 0))
			},
			(Err(semantic), _) => Err(SearchError::BothFailed { semantic }),
		}
	}
}

/// Merge two ranked hit lists: take `ceil(limit * ratio%)` semantic hits and
/// fill the remainder from keyword hits, de-duplicate by tool id keeping the
/// higher similarity, sort descending, truncate to `limit`.
pub fn combine(semantic: Vec<Hit>, keyword: Vec<Hit>, limit: usize, semantic_ratio: u8) -> Vec<Hit> {
	let ratio = f32::from(semantic_ratio.min(100)) / 100.0;
	let semantic_quota = ((limit as f32) * ratio).ceil() as usize;

	let mut merged: Vec<Hit> = Vec::with_capacity(limit * 2);
	merged.extend(semantic.into_iter().take(semantic_quota));
	merged.extend(keyword);

	// Higher-similarity duplicate wins.
	merged.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
	let mut seen: Vec<String> = Vec::with_capacity(merged.len());
	merged.retain(|hit| {
		if seen.contains(&hit.tool_id) {
			false
		} else {
			seen.push(hit.tool_id.clone());
			true
		}
	});

	merged.truncate(limit);
	merged
}

#[cfg(test)]
mod tests {
	use super::*;

	fn hit(id: &str, similarity: f32) -> Hit {
		Hit {
			tool_id: id.to_string(),
			similarity,
		}
	}

	#[test]
	fn test_combine_dedup_keeps_higher_similarity() {
		let semantic = vec![hit("a", 0.9), hit("b", 0.5)];
		let keyword = vec![hit("a", 0.7), hit("c", 0.6)];
		let merged = combine(semantic, keyword, 10, 100);
		assert_eq!(merged.len(), 3);
		assert_eq!(merged[0].tool_id, "a");
		assert_eq!(merged[0].similarity, 0.9);
		assert_eq!(merged[1].tool_id, "c");
		assert_eq!(merged[2].tool_id, "b");
	}

	#[test]
	fn test_combine_limit_and_order() {
		let semantic = vec![hit("a", 0.9), hit("b", 0.8), hit("c", 0.7)];
		let keyword = vec![hit("d", 0.95), hit("e", 0.1)];
		let merged = combine(semantic, keyword, 3, 50);
		assert_eq!(merged.len(), 3);
		// 50% of 3 rounds up to 2 semantic hits; "c" is cut, "d" outranks all
		assert_eq!(merged[0].tool_id, "d");
		assert_eq!(merged[1].tool_id, "a");
		assert_eq!(merged[2].tool_id, "b");
		// Descending similarity
		assert!(merged.windows(2).all(|w| w[0].similarity >= w[1].similarity));
	}

	#[test]
	fn test_combine_distinct_ids() {
		let semantic = vec![hit("a", 0.9), hit("a", 0.8)];
		let keyword = vec![hit("a", 0.7)];
		let merged = combine(semantic, keyword, 10, 100);
		assert_eq!(merged.len(), 1);
	}

	#[test]
	fn test_combine_zero_ratio_is_keyword_only() {
		let semantic = vec![hit("a", 0.9)];
		let keyword = vec![hit("b", 0.5)];
		let merged = combine(semantic, keyword, 10, 0);
		assert_eq!(merged.len(), 1);
		assert_eq!(merged[0].tool_id, "b");
	}

	#[tokio::test]
	async fn test_hybrid_search_both_sides() {
		let search = HybridSearch::new();
		search
			.upsert("web.search", "search the web", Some(vec![1.0, 0.0]))
			.await
			.unwrap();
		search
			.upsert("weather.now", "current weather", Some(vec![0.0, 1.0]))
			.await
			.unwrap();
		// Let the detached mirror writes land.
		tokio::task::yield_now().await;

		let hits = search
			.search("weather", Some(&[0.0, 1.0]), 5, 50)
			.await
			.unwrap();
		assert!(!hits.is_empty());
		assert_eq!(hits[0].tool_id, "weather.now");
	}

	#[tokio::test]
	async fn test_hybrid_search_keyword_fallback() {
		let search = HybridSearch::new();
		search
			.upsert("github.issues", "list github issues", None)
			.await
			.unwrap();
		tokio::task::yield_now().await;

		// No embedding: the semantic side fails, keyword carries the result.
		let hits = search.search("github", None, 5, 70).await.unwrap();
		assert_eq!(hits.len(), 1);
		assert_eq!(hits[0].tool_id, "github.issues");
	}

	#[tokio::test]
	async fn test_hybrid_search_both_fail() {
		let search = HybridSearch::new();
		let result = search.search("anything", None, 5, 70).await;
		assert!(result.is_err());
	}

	#[tokio::test]
	async fn test_remove_clears_both_stores() {
		let search = HybridSearch::new();
		search
			.upsert("a", "alpha tool", Some(vec![1.0]))
			.await
			.unwrap();
		tokio::task::yield_now().await;
		search.remove("a").await;

		let result = search.search("alpha", Some(&[1.0]), 5, 50).await.unwrap();
		assert!(result.is_empty());
	}
}
