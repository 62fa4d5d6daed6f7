// In-memory vector store with cosine-similarity search

use std::collections::HashMap;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VectorError {
	#[error("no query embedding provided")]
	NoQueryEmbedding,

	#[error("embedding dimension mismatch: store has {expected}, query has {actual}")]
	DimensionMismatch { expected: usize, actual: usize },
}

/// A scored search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
	pub tool_id: String,
	pub similarity: f32,
}

/// Embeddings keyed by tool id.
#[derive(Debug, Default)]
pub struct VectorStore {
	vectors: HashMap<String, Vec<f32>>,
	dimension: Option<usize>,
}

impl VectorStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Insert or replace the embedding for a tool. The first write pins the
	/// store's dimension.
	pub fn upsert(&mut self, tool_id: &str, embedding: Vec<f32>) -> Result<(), VectorError> {
		match self.dimension {
			None => self.dimension = Some(embedding.len()),
			Some(expected) if expected != embedding.len() => {
				return Err(VectorError::DimensionMismatch {
					expected,
					actual: embedding.len(),
				});
			},
			Some(_) => {},
		}
		self.vectors.insert(tool_id.to_string(), embedding);
		Ok(())
	}

	pub fn remove(&mut self, tool_id: &str) {
		self.vectors.remove(tool_id);
	}

	pub fn len(&self) -> usize {
		self.vectors.len()
	}

	pub fn is_empty(&self) -> bool {
		self.vectors.is_empty()
	}

	/// Nearest neighbors of the query by cosine similarity, descending.
	pub fn search(&self, query: Option<&[f32]>, limit: usize) -> Result<Vec<Hit>, VectorError> {
		let query = query.ok_or(VectorError::NoQueryEmbedding)?;
		if let Some(expected) = self.dimension {
			if expected != query.len() {
				return Err(VectorError::DimensionMismatch {
					expected,
					actual: query.len(),
				});
			}
		}

		let mut hits: Vec<Hit> = self
			.vectors
			.iter()
			.map(|(id, vec)| Hit {
				tool_id: id.clone(),
				similarity: cosine(query, vec),
			})
			.collect();
		hits.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
		hits.truncate(limit);
		Ok(hits)
	}
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
	let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
	let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
	let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
	if norm_a == 0.0 || norm_b == 0.0 {
		return 0.0;
	}
	dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_search_ranks_by_similarity() {
		let mut store = VectorStore::new();
		store.upsert("exact", vec![1.0, 0.0]).unwrap();
		store.upsert("close", vec![0.9, 0.1]).unwrap();
		store.upsert("far", vec![0.0, 1.0]).unwrap();

		let hits = store.search(Some(&[1.0, 0.0]), 2).unwrap();
		assert_eq!(hits.len(), 2);
		assert_eq!(hits[0].tool_id, "exact");
		assert_eq!(hits[1].tool_id, "close");
	}

	#[test]
	fn test_dimension_mismatch() {
		let mut store = VectorStore::new();
		store.upsert("a", vec![1.0, 0.0]).unwrap();
		assert_eq!(
			store.upsert("b", vec![1.0, 0.0, 0.0]),
			Err(VectorError::DimensionMismatch {
				expected: 2,
				actual: 3
			})
		);
		assert!(store.search(Some(&[1.0]), 5).is_err());
	}

	#[test]
	fn test_no_query_embedding() {
		let store = VectorStore::new();
		assert_eq!(store.search(None, 5), Err(VectorError::NoQueryEmbedding));
	}

	#[test]
	fn test_zero_vector_similarity() {
		assert_eq!(cosine(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
	}
}
