// In-memory BM25 keyword index over tool names and descriptions

use std::collections::HashMap;

use super::vector::Hit;

const K1: f32 = 1.2;
const B: f32 = 0.75;

#[derive(Debug, Default)]
struct Doc {
	term_counts: HashMap<String, u32>,
	length: u32,
}

/// Term-frequency index keyed by tool id.
#[derive(Debug, Default)]
pub struct Bm25Index {
	docs: HashMap<String, Doc>,
	document_frequency: HashMap<String, u32>,
	total_length: u64,
}

fn tokenize(text: &str) -> Vec<String> {
	text.split(|c: char| !c.is_ascii_alphanumeric())
		.filter(|token| !token.is_empty())
		.map(str::to_ascii_lowercase)
		.collect()
}

impl Bm25Index {
	pub fn new() -> Self {
		Self::default()
	}

	/// Insert or replace the document for a tool.
	pub fn upsert(&mut self, tool_id: &str, text: &str) {
		self.remove(tool_id);

		let tokens = tokenize(text);
		let mut term_counts: HashMap<String, u32> = HashMap::new();
		for token in &tokens {
			*term_counts.entry(token.clone()).or_insert(0) += 1;
		}
		for term in term_counts.keys() {
			*self.document_frequency.entry(term.clone()).or_insert(0) += 1;
		}
		self.total_length += tokens.len() as u64;
		self.docs.insert(
			tool_id.to_string(),
			Doc {
				term_counts,
				length: tokens.len() as u32,
			},
		);
	}

	pub fn remove(&mut self, tool_id: &str) {
		if let Some(doc) = self.docs.remove(tool_id) {
			self.total_length -= u64::from(doc.length);
			for term in doc.term_counts.keys() {
				if let Some(df) = self.document_frequency.get_mut(term) {
					*df -= 1;
					if *df == 0 {
						self.document_frequency.remove(term);
					}
				}
			}
		}
	}

	pub fn len(&self) -> usize {
		self.docs.len()
	}

	pub fn is_empty(&self) -> bool {
		self.docs.is_empty()
	}

	/// BM25 search, scores normalized into 0..1 relative to the best hit so
	/// they are comparable with cosine similarities.
	pub fn search(&self, query: &str, limit: usize) -> Vec<Hit> {
		let terms = tokenize(query);
		if terms.is_empty() || self.docs.is_empty() {
			return Vec::new();
		}
		let doc_count = self.docs.len() as f32;
		let avg_length = self.total_length as f32 / doc_count;

		let mut hits: Vec<Hit> = self
			.docs
			.iter()
			.filter_map(|(id, doc)| {
				let mut score = 0.0f32;
				for term in &terms {
					let Some(&tf) = doc.term_counts.get(term) else {
						continue;
					};
					let df = self.document_frequency.get(term).copied().unwrap_or(0) as f32;
					let idf = ((doc_count - df + 0.5) / (df + 0.5) + 1.0).ln();
					let tf = tf as f32;
					let denom = tf + K1 * (1.0 - B + B * doc.length as f32 / avg_length);
					score += idf * tf * (K1 + 1.0) / denom;
				}
				(score > 0.0).then(|| Hit {
					tool_id: id.clone(),
					similarity: score,
				})
			})
			.collect();

		hits.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
		hits.truncate(limit);

		if let Some(max) = hits.first().map(|hit| hit.similarity) {
			if max > 0.0 {
				for hit in &mut hits {
					hit.similarity /= max;
				}
			}
		}
		hits
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn index() -> Bm25Index {
		let mut idx = Bm25Index::new();
		idx.upsert("web.search", "search the web for pages matching a query");
		idx.upsert("github.issues", "list and search issues in a github repository");
		idx.upsert("weather.now", "current weather for a city");
		idx
	}

	#[test]
	fn test_keyword_match_ranks_relevant_first() {
		let hits = index().search("github issues", 10);
		assert!(!hits.is_empty());
		assert_eq!(hits[0].tool_id, "github.issues");
		assert_eq!(hits[0].similarity, 1.0);
	}

	#[test]
	fn test_no_match_is_empty() {
		assert!(index().search("blockchain", 10).is_empty());
		assert!(index().search("", 10).is_empty());
	}

	#[test]
	fn test_limit_respected() {
		let hits = index().search("search", 1);
		assert_eq!(hits.len(), 1);
	}

	#[test]
	fn test_remove_updates_frequencies() {
		let mut idx = index();
		idx.remove("github.issues");
		assert_eq!(idx.len(), 2);
		let hits = idx.search("github", 10);
		assert!(hits.is_empty());
	}

	#[test]
	fn test_upsert_replaces() {
		let mut idx = index();
		idx.upsert("weather.now", "forecast rain snow temperature");
		assert_eq!(idx.len(), 3);
		let hits = idx.search("city", 10);
		assert!(hits.iter().all(|h| h.tool_id != "weather.now"));
	}
}
