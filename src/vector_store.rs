//! # VectorStore
//!
//! Nearest-neighbor search over the precomputed passage index.
//!
//! This module provides the [`VectorIndex`] seam the pipeline queries, plus a
//! local implementation wrapping a [HNSW](https://arxiv.org/abs/1603.09320)
//! approximate nearest-neighbor index (`hora` crate). The index itself is
//! populated by a separate ingestion job; this side only loads its output
//! (YAML metadata plus a binary index dump) and serves ranked lookups.
//!
//! ## Responsibilities
//! - **Search**: maps a query embedding to the `top_k` closest passages,
//!   closest first, each with its text, similarity score and source id.
//! - **Persistence**: loads/saves the ID↔passage mapping (YAML) and the HNSW
//!   index (binary dump named from a sha256-derived stable id).
//! - **Construction**: exposes `add_passage`/`build` so ingestion tooling and
//!   tests can assemble indexes with the same code path that reads them.
//!
//! ## Quick Example
//! ```no_run
//! use docent::vector_store::VectorStore;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut vs = VectorStore::new(3, "handbook".to_string());
//! vs.add_passage(vec![0.1, 0.2, 0.3], "Policy: 30 days.".into(), "faq-1".into())?;
//! vs.build()?;
//! # Ok(()) }
//! ```

use async_trait::async_trait;
use hora::core::ann_index::{ANNIndex, SerializableIndex};
use hora::core::metrics::Metric;
use hora::index::hnsw_idx::HNSWIndex;
use hora::index::hnsw_params::HNSWParams;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ServiceError;

/// One ranked vector-search hit: the passage text, a similarity score
/// (higher is closer) and the identifier of the source document chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedPassage {
    /// The passage text stored alongside the vector at ingestion time.
    pub text: String,
    /// Similarity score derived from the index distance; descending order.
    pub score: f32,
    /// Identifier of the source chunk (e.g. `chunk-17`).
    pub source_id: String,
}

/// Nearest-neighbor search over precomputed embeddings.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Return up to `top_k` passages nearest to `vector`, closest first.
    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievedPassage>, ServiceError>;
}

/// A passage as stored in the index metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredPassage {
    text: String,
    source_id: String,
}

/// Serialized metadata; the HNSW index itself lives in a sibling binary file.
#[derive(Serialize, Deserialize)]
struct StoreMeta {
    name: String,
    dimension: usize,
    current_id: usize,
    passages: HashMap<usize, StoredPassage>,
}

/// Local passage index backed by a HNSW graph plus an ID→passage map.
pub struct VectorStore {
    index: HNSWIndex<f32, usize>,
    dimension: usize,
    name: String,
    current_id: usize,
    id_to_passage: HashMap<usize, StoredPassage>,
}

/// Stable numeric id derived from the index name, used to name the binary
/// index dump so metadata and dump can be matched up after a reload.
fn stable_uuid(name: &str) -> u64 {
    let digest = sha256::digest(name);
    digest.as_bytes().iter().map(|b| *b as u64).sum()
}

impl VectorStore {
    /// Create an empty store with a fresh HNSW index.
    ///
    /// # Parameters
    /// - `dimension`: Dimensionality of all vectors (1536 for ada-002).
    /// - `name`: Logical index name; determines the dump file name.
    pub fn new(dimension: usize, name: String) -> Self {
        Self {
            index: HNSWIndex::new(dimension, &HNSWParams::<f32>::default()),
            dimension,
            name,
            current_id: 0,
            id_to_passage: HashMap::new(),
        }
    }

    /// Number of passages stored.
    pub fn len(&self) -> usize {
        self.id_to_passage.len()
    }

    /// `true` when no passages have been added.
    pub fn is_empty(&self) -> bool {
        self.id_to_passage.is_empty()
    }

    fn index_file_for(meta_path: &Path, name: &str) -> PathBuf {
        let parent = meta_path.parent().unwrap_or_else(|| Path::new("."));
        parent.join(format!("{}_hnsw_index.bin", stable_uuid(name)))
    }

    /// Add a vector and its passage to the index and map.
    ///
    /// # Returns
    /// The assigned integer ID for this vector.
    ///
    /// # Errors
    /// - `"dimension mismatch"` if `vector.len() != self.dimension`.
    /// - `"add failed"` if the HNSW index rejects the insert (rare).
    ///
    /// # Notes
    /// You must call [`build`](Self::build) before queries reflect new inserts.
    pub fn add_passage(
        &mut self,
        vector: Vec<f32>,
        text: String,
        source_id: String,
    ) -> Result<usize, &'static str> {
        if vector.len() != self.dimension {
            return Err("dimension mismatch");
        }
        let id = self.current_id;
        self.index.add(&vector, id).map_err(|_| "add failed")?;
        self.id_to_passage.insert(id, StoredPassage { text, source_id });
        self.current_id += 1;
        Ok(id)
    }

    /// Finalize (build) the HNSW index.
    ///
    /// Must be called **after** a batch of [`add_passage`](Self::add_passage)
    /// operations and **before** searching, otherwise queries won't see the
    /// new data.
    pub fn build(&mut self) -> Result<(), &'static str> {
        self.index
            .build(Metric::Euclidean)
            .map_err(|_| "build failed")
    }

    /// Synchronous search used by the [`VectorIndex`] implementation.
    fn search_sync(&self, vector: &[f32], top_k: usize) -> Result<Vec<RetrievedPassage>, ServiceError> {
        if vector.len() != self.dimension {
            return Err(format!(
                "query dimension mismatch: expected {}, got {}",
                self.dimension,
                vector.len()
            )
            .into());
        }

        let neighbors = self.index.search_nodes(vector, top_k);

        let mut passages = Vec::with_capacity(neighbors.len());
        for (node, distance) in neighbors {
            if let Some(id) = node.idx() {
                if let Some(stored) = self.id_to_passage.get(id) {
                    passages.push(RetrievedPassage {
                        text: stored.text.clone(),
                        // Euclidean distance mapped into (0, 1], 1.0 = exact.
                        score: 1.0 / (1.0 + distance),
                        source_id: stored.source_id.clone(),
                    });
                }
            }
        }

        Ok(passages)
    }

    /// Serialize metadata to YAML and dump the HNSW index to a binary file
    /// next to it.
    pub fn save(&mut self, meta_path: &Path) -> Result<(), Box<dyn Error>> {
        let index_file = Self::index_file_for(meta_path, &self.name);
        self.index
            .dump(index_file.to_str().ok_or("non-utf8 index path")?)?;

        let meta = StoreMeta {
            name: self.name.clone(),
            dimension: self.dimension,
            current_id: self.current_id,
            passages: self.id_to_passage.clone(),
        };
        let yaml = serde_yaml::to_string(&meta)?;
        fs::write(meta_path, yaml)?;
        Ok(())
    }

    /// Reconstruct a `VectorStore` from YAML metadata and the persisted HNSW
    /// index dump the ingestion job wrote.
    pub fn load(meta_path: &Path) -> Result<Self, Box<dyn Error>> {
        let content = fs::read_to_string(meta_path)?;
        let meta: StoreMeta = serde_yaml::from_str(&content)?;

        let index_file = Self::index_file_for(meta_path, &meta.name);
        let index = HNSWIndex::load(index_file.to_str().ok_or("non-utf8 index path")?)?;

        Ok(Self {
            index,
            dimension: meta.dimension,
            name: meta.name,
            current_id: meta.current_id,
            id_to_passage: meta.passages,
        })
    }
}

#[async_trait]
impl VectorIndex for VectorStore {
    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievedPassage>, ServiceError> {
        self.search_sync(vector, top_k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_store() -> VectorStore {
        let mut store = VectorStore::new(3, "test_index".to_string());
        store
            .add_passage(vec![1.0, 0.0, 0.0], "Policy: 30-day cancellation window.".into(), "chunk-0".into())
            .unwrap();
        store
            .add_passage(vec![0.0, 1.0, 0.0], "Refunds are processed within 14 days.".into(), "chunk-1".into())
            .unwrap();
        store
            .add_passage(vec![0.0, 0.0, 1.0], "Support is available on weekdays.".into(), "chunk-2".into())
            .unwrap();
        store.build().unwrap();
        store
    }

    #[tokio::test]
    async fn test_search_returns_closest_first() {
        let store = sample_store();
        let hits = store.search(&[0.9, 0.1, 0.0], 2).await.unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].source_id, "chunk-0");
        assert!(hits[0].text.contains("30-day"));
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn test_search_empty_index_returns_no_matches() {
        let mut store = VectorStore::new(3, "empty".to_string());
        store.build().unwrap();
        let hits = store.search(&[0.1, 0.2, 0.3], 5).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_search_rejects_wrong_dimension() {
        let store = sample_store();
        let result = store.search(&[0.1, 0.2], 5).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let meta_path = dir.path().join("vector_store.yaml");

        let mut store = sample_store();
        store.save(&meta_path).unwrap();

        let reloaded = VectorStore::load(&meta_path).unwrap();
        assert_eq!(reloaded.len(), 3);

        let hits = reloaded.search_sync(&[0.0, 0.95, 0.05], 1).unwrap();
        assert_eq!(hits[0].source_id, "chunk-1");
    }
}
