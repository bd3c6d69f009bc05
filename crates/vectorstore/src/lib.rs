//! ID-addressable similarity index over chunk embeddings.
//!
//! Wraps a `usearch` HNSW index with an explicit id-presence map so
//! `add_with_ids`/`remove_ids` can enforce the no-duplicate-id and
//! idempotent-removal contracts that the underlying index alone doesn't
//! guarantee.

use std::collections::HashMap;
use std::io::Write as _;
use std::path::Path;

use mdqa_core::Chunk;
use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

#[derive(Debug, thiserror::Error)]
pub enum VectorStoreError {
  #[error("add_with_ids: ids, vectors, and chunks must have equal length ({ids} ids, {vectors} vectors, {chunks} chunks)")]
  LengthMismatch { ids: usize, vectors: usize, chunks: usize },
  #[error("add_with_ids: id {0} is already present")]
  DuplicateId(u64),
  #[error("underlying index error: {0}")]
  Index(String),
  #[error("failed to persist vector store at {path}: {source}")]
  Persist {
    path: std::path::PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("failed to parse metadata at {path}: {source}")]
  Metadata {
    path: std::path::PathBuf,
    #[source]
    source: serde_json::Error,
  },
}

pub struct VectorStore {
  dimensions: usize,
  index: Index,
  chunks: HashMap<u64, Chunk>,
}

impl VectorStore {
  pub fn new(dimensions: usize) -> Result<Self, VectorStoreError> {
    let options = IndexOptions {
      dimensions,
      metric: MetricKind::Cos,
      quantization: ScalarKind::F32,
      ..Default::default()
    };
    let index = Index::new(&options).map_err(|err| VectorStoreError::Index(err.to_string()))?;
    Ok(Self {
      dimensions,
      index,
      chunks: HashMap::new(),
    })
  }

  pub fn len(&self) -> usize {
    self.chunks.len()
  }

  pub fn is_empty(&self) -> bool {
    self.chunks.is_empty()
  }

  pub fn chunk(&self, id: u64) -> Option<&Chunk> {
    self.chunks.get(&id)
  }

  pub fn add_with_ids(&mut self, ids: &[u64], vectors: &[Vec<f32>], chunks: &[Chunk]) -> Result<(), VectorStoreError> {
    if ids.len() != vectors.len() || ids.len() != chunks.len() {
      return Err(VectorStoreError::LengthMismatch {
        ids: ids.len(),
        vectors: vectors.len(),
        chunks: chunks.len(),
      });
    }
    for id in ids {
      if self.chunks.contains_key(id) {
        return Err(VectorStoreError::DuplicateId(*id));
      }
    }

    let capacity = self.index.size() + ids.len();
    self.index.reserve(capacity).map_err(|err| VectorStoreError::Index(err.to_string()))?;

    for ((id, vector), chunk) in ids.iter().zip(vectors.iter()).zip(chunks.iter()) {
      self
        .index
        .add(*id, vector)
        .map_err(|err| VectorStoreError::Index(err.to_string()))?;
      self.chunks.insert(*id, chunk.clone());
    }
    Ok(())
  }

  /// Missing ids are silently skipped; removal is idempotent.
  pub fn remove_ids(&mut self, ids: &[u64]) {
    for id in ids {
      if self.chunks.remove(id).is_some() {
        let _ = self.index.remove(*id);
      }
    }
  }

  /// Ascending by distance; ties broken by ascending chunk id.
  pub fn search(&self, query_vector: &[f32], k: usize) -> Result<Vec<(u64, f32)>, VectorStoreError> {
    if self.chunks.is_empty() || k == 0 {
      return Ok(Vec::new());
    }
    let matches = self
      .index
      .search(query_vector, k)
      .map_err(|err| VectorStoreError::Index(err.to_string()))?;

    let mut results: Vec<(u64, f32)> = matches.keys.into_iter().zip(matches.distances).collect();
    results.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0)));
    Ok(results)
  }

  /// Data-copy clone: rebuilds a fresh index from the current vectors, so
  /// mutating the returned store never affects `self`.
  pub fn try_clone(&self) -> Result<Self, VectorStoreError> {
    let mut cloned = VectorStore::new(self.dimensions)?;
    let ids: Vec<u64> = self.chunks.keys().copied().collect();
    if ids.is_empty() {
      return Ok(cloned);
    }

    let mut vectors = Vec::with_capacity(ids.len());
    let mut chunks = Vec::with_capacity(ids.len());
    for id in &ids {
      let mut buffer = vec![0f32; self.dimensions];
      let found = self
        .index
        .get(*id, &mut buffer)
        .map_err(|err| VectorStoreError::Index(err.to_string()))?;
      if found == 0 {
        continue;
      }
      vectors.push(buffer);
      chunks.push(self.chunks[id].clone());
    }
    let live_ids: Vec<u64> = chunks.iter().map(|c| c.chunk_id).collect();
    cloned.add_with_ids(&live_ids, &vectors, &chunks)?;
    Ok(cloned)
  }

  /// Atomically persist the similarity structure and the metadata table:
  /// write to a temp file, fsync, then rename into place.
  pub fn save(&self, index_path: &Path, meta_path: &Path) -> Result<(), VectorStoreError> {
    let index_tmp = sibling_tmp(index_path);
    self
      .index
      .save(index_tmp.to_string_lossy().as_ref())
      .map_err(|err| VectorStoreError::Index(err.to_string()))?;
    fsync_file(&index_tmp, index_path)?;

    let meta_tmp = sibling_tmp(meta_path);
    let serialized = serde_json::to_vec(&self.chunks).expect("chunk metadata is always serializable");
    {
      let mut file = std::fs::File::create(&meta_tmp).map_err(|source| VectorStoreError::Persist {
        path: meta_tmp.clone(),
        source,
      })?;
      file.write_all(&serialized).map_err(|source| VectorStoreError::Persist {
        path: meta_tmp.clone(),
        source,
      })?;
      file.sync_all().map_err(|source| VectorStoreError::Persist {
        path: meta_tmp.clone(),
        source,
      })?;
    }
    std::fs::rename(&meta_tmp, meta_path).map_err(|source| VectorStoreError::Persist {
      path: meta_path.to_path_buf(),
      source,
    })?;
    Ok(())
  }

  pub fn load(index_path: &Path, meta_path: &Path, dimensions: usize) -> Result<Self, VectorStoreError> {
    let options = IndexOptions {
      dimensions,
      metric: MetricKind::Cos,
      quantization: ScalarKind::F32,
      ..Default::default()
    };
    let index = Index::new(&options).map_err(|err| VectorStoreError::Index(err.to_string()))?;
    index
      .load(index_path.to_string_lossy().as_ref())
      .map_err(|err| VectorStoreError::Index(err.to_string()))?;

    let raw = std::fs::read(meta_path).map_err(|source| VectorStoreError::Persist {
      path: meta_path.to_path_buf(),
      source,
    })?;
    let chunks: HashMap<u64, Chunk> = serde_json::from_slice(&raw).map_err(|source| VectorStoreError::Metadata {
      path: meta_path.to_path_buf(),
      source,
    })?;

    Ok(Self { dimensions, index, chunks })
  }
}

fn sibling_tmp(path: &Path) -> std::path::PathBuf {
  let dir = path.parent().unwrap_or_else(|| Path::new("."));
  dir.join(format!(".{}.tmp", path.file_name().unwrap_or_default().to_string_lossy()))
}

fn fsync_file(tmp: &Path, dest: &Path) -> Result<(), VectorStoreError> {
  let file = std::fs::File::open(tmp).map_err(|source| VectorStoreError::Persist {
    path: tmp.to_path_buf(),
    source,
  })?;
  file.sync_all().map_err(|source| VectorStoreError::Persist {
    path: tmp.to_path_buf(),
    source,
  })?;
  drop(file);
  std::fs::rename(tmp, dest).map_err(|source| VectorStoreError::Persist {
    path: dest.to_path_buf(),
    source,
  })
}
