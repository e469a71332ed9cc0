//! Semantic vector store over catalog objects and command patterns.
//!
//! A flat L2 nearest-neighbour index: one contiguous embedding matrix plus a
//! metadata array aligned by position. The dimension is fixed at
//! construction; mismatched inserts fail before touching the index.
//! Multi-reader/single-writer: searches take the read lock, rebuilds and
//! inserts the write lock.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::db::CatalogEntry;
use crate::error::VectorError;

/// Something the store can index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IndexedObject {
    /// A database catalog entity.
    Catalog(CatalogEntry),
    /// A shell command pattern used for semantic command suggestions.
    Command { name: String, description: String },
}

impl IndexedObject {
    /// Upsert key. Catalog objects key by `(database_type, owner, name)`;
    /// parent qualifies columns so same-named columns across tables coexist.
    pub fn key(&self) -> String {
        match self {
            Self::Catalog(entry) => format!(
                "catalog/{}/{}/{}/{}",
                entry.database_type,
                entry.owner.as_deref().unwrap_or(""),
                entry.parent.as_deref().unwrap_or(""),
                entry.name
            ),
            Self::Command { name, .. } => format!("command/{name}"),
        }
    }

    /// Text this object is embedded from.
    pub fn embedding_text(&self) -> String {
        match self {
            Self::Catalog(entry) => entry.embedding_text(),
            Self::Command { name, description } => format!("{name} {description}"),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Catalog(entry) => &entry.name,
            Self::Command { name, .. } => name,
        }
    }

    pub fn is_command(&self) -> bool {
        matches!(self, Self::Command { .. })
    }
}

/// One search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub object: IndexedObject,
    /// `1 / (1 + L2 distance)`; 1.0 is an exact match.
    pub similarity: f64,
}

struct Index {
    /// Row-major embedding matrix, `meta.len() * dimension` floats.
    vectors: Vec<f32>,
    meta: Vec<IndexedObject>,
    keys: HashMap<String, usize>,
}

impl std::fmt::Debug for VectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorStore").finish_non_exhaustive()
    }
}

/// The store. Cheap to share behind an `Arc`.
pub struct VectorStore {
    dimension: usize,
    index: RwLock<Index>,
}

/// Snapshot file layout.
#[derive(Serialize, Deserialize)]
struct Snapshot {
    dimension: usize,
    entries: Vec<SnapshotEntry>,
}

#[derive(Serialize, Deserialize)]
struct SnapshotEntry {
    object: IndexedObject,
    embedding: Vec<f32>,
}

impl VectorStore {
    /// Create an empty store with a fixed dimension.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            index: RwLock::new(Index {
                vectors: Vec::new(),
                meta: Vec::new(),
                keys: HashMap::new(),
            }),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub async fn len(&self) -> usize {
        self.index.read().await.meta.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Insert or update one object. Dimension mismatches fail before any
    /// mutation.
    pub async fn insert(
        &self,
        embedding: &[f32],
        object: IndexedObject,
    ) -> Result<(), VectorError> {
        self.check_dimension(embedding)?;
        let mut index = self.index.write().await;
        let key = object.key();
        if let Some(&pos) = index.keys.get(&key) {
            let start = pos * self.dimension;
            index.vectors[start..start + self.dimension].copy_from_slice(embedding);
            index.meta[pos] = object;
        } else {
            let pos = index.meta.len();
            index.vectors.extend_from_slice(embedding);
            index.meta.push(object);
            index.keys.insert(key, pos);
        }
        Ok(())
    }

    /// Replace the whole index atomically (exclusive lock for the rebuild).
    pub async fn rebuild(
        &self,
        entries: Vec<(Vec<f32>, IndexedObject)>,
    ) -> Result<(), VectorError> {
        for (embedding, _) in &entries {
            self.check_dimension(embedding)?;
        }
        let mut fresh = Index {
            vectors: Vec::with_capacity(entries.len() * self.dimension),
            meta: Vec::with_capacity(entries.len()),
            keys: HashMap::with_capacity(entries.len()),
        };
        for (embedding, object) in entries {
            let key = object.key();
            if let Some(&pos) = fresh.keys.get(&key) {
                let start = pos * self.dimension;
                fresh.vectors[start..start + self.dimension].copy_from_slice(&embedding);
                fresh.meta[pos] = object;
            } else {
                let pos = fresh.meta.len();
                fresh.vectors.extend_from_slice(&embedding);
                fresh.meta.push(object);
                fresh.keys.insert(key, pos);
            }
        }
        *self.index.write().await = fresh;
        Ok(())
    }

    /// k-nearest neighbours by L2 distance. Ties break by earlier insertion.
    pub async fn search(&self, embedding: &[f32], k: usize) -> Result<Vec<SearchHit>, VectorError> {
        self.check_dimension(embedding)?;
        let index = self.index.read().await;
        let mut scored: Vec<(f64, usize)> = index
            .meta
            .iter()
            .enumerate()
            .map(|(pos, _)| {
                let start = pos * self.dimension;
                let distance = l2(&index.vectors[start..start + self.dimension], embedding);
                (distance, pos)
            })
            .collect();
        scored.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });
        Ok(scored
            .into_iter()
            .take(k)
            .map(|(distance, pos)| SearchHit {
                object: index.meta[pos].clone(),
                similarity: 1.0 / (1.0 + distance),
            })
            .collect())
    }

    /// Search restricted to command patterns.
    pub async fn search_commands(
        &self,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<SearchHit>, VectorError> {
        let hits = self.search(embedding, usize::MAX).await?;
        Ok(hits.into_iter().filter(|h| h.object.is_command()).take(k).collect())
    }

    /// Search restricted to catalog objects.
    pub async fn search_catalog(
        &self,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<SearchHit>, VectorError> {
        let hits = self.search(embedding, usize::MAX).await?;
        Ok(hits
            .into_iter()
            .filter(|h| !h.object.is_command())
            .take(k)
            .collect())
    }

    /// Write the index and metadata to disk.
    pub async fn save_snapshot(&self, path: &Path) -> Result<(), VectorError> {
        let snapshot = {
            let index = self.index.read().await;
            Snapshot {
                dimension: self.dimension,
                entries: index
                    .meta
                    .iter()
                    .enumerate()
                    .map(|(pos, object)| {
                        let start = pos * self.dimension;
                        SnapshotEntry {
                            object: object.clone(),
                            embedding: index.vectors[start..start + self.dimension].to_vec(),
                        }
                    })
                    .collect(),
            }
        };
        let raw = serde_json::to_string(&snapshot)
            .map_err(|e| VectorError::SnapshotWrite(e.to_string()))?;
        crate::bootstrap::write_private(path, raw.as_bytes())
            .map_err(|e| VectorError::SnapshotWrite(e.to_string()))
    }

    /// Load a snapshot into a new store. A snapshot whose dimension differs
    /// from `expected_dimension` fails closed.
    pub fn load_snapshot(path: &Path, expected_dimension: usize) -> Result<Self, VectorError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| VectorError::SnapshotLoad(e.to_string()))?;
        let snapshot: Snapshot =
            serde_json::from_str(&raw).map_err(|e| VectorError::SnapshotLoad(e.to_string()))?;
        if snapshot.dimension != expected_dimension {
            return Err(VectorError::DimensionMismatch {
                expected: expected_dimension,
                got: snapshot.dimension,
            });
        }

        let mut vectors = Vec::with_capacity(snapshot.entries.len() * expected_dimension);
        let mut meta = Vec::with_capacity(snapshot.entries.len());
        let mut keys = HashMap::with_capacity(snapshot.entries.len());
        for entry in snapshot.entries {
            if entry.embedding.len() != expected_dimension {
                return Err(VectorError::DimensionMismatch {
                    expected: expected_dimension,
                    got: entry.embedding.len(),
                });
            }
            keys.insert(entry.object.key(), meta.len());
            vectors.extend_from_slice(&entry.embedding);
            meta.push(entry.object);
        }

        Ok(Self {
            dimension: expected_dimension,
            index: RwLock::new(Index {
                vectors,
                meta,
                keys,
            }),
        })
    }

    fn check_dimension(&self, embedding: &[f32]) -> Result<(), VectorError> {
        if embedding.len() != self.dimension {
            return Err(VectorError::DimensionMismatch {
                expected: self.dimension,
                got: embedding.len(),
            });
        }
        Ok(())
    }
}

fn l2(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = f64::from(x - y);
            d * d
        })
        .sum::<f64>()
        .sqrt()
}
