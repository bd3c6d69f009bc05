//! Content-addressed embedding cache: `sha256(text) -> vector`.
//!
//! Append-only within a process. Persisted alongside the index so a
//! restart doesn't re-embed unchanged chunks.

use std::collections::HashMap;
use std::io::Write as _;
use std::path::Path;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
  #[error("failed to read embedding cache {path}: {source}")]
  Read {
    path: std::path::PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("failed to parse embedding cache {path}: {source}")]
  Parse {
    path: std::path::PathBuf,
    #[source]
    source: serde_json::Error,
  },
  #[error("failed to write embedding cache {path}: {source}")]
  Write {
    path: std::path::PathBuf,
    #[source]
    source: std::io::Error,
  },
}

pub fn content_hash(text: &str) -> String {
  hex::encode(Sha256::digest(text.as_bytes()))
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct OnDisk {
  entries: HashMap<String, Vec<f32>>,
}

/// Concurrent-reader, briefly-exclusive-writer cache keyed by content hash.
#[derive(Debug, Default)]
pub struct EmbeddingCache {
  entries: RwLock<HashMap<String, Vec<f32>>>,
}

impl EmbeddingCache {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get(&self, text: &str) -> Option<Vec<f32>> {
    let hash = content_hash(text);
    self.entries.read().unwrap().get(&hash).cloned()
  }

  /// Idempotent: inserting the same content hash twice is a no-op after the first write.
  pub fn insert(&self, text: &str, vector: Vec<f32>) {
    let hash = content_hash(text);
    self.entries.write().unwrap().entry(hash).or_insert(vector);
  }

  pub fn len(&self) -> usize {
    self.entries.read().unwrap().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn load(path: &Path) -> Result<Self, CacheError> {
    if !path.exists() {
      return Ok(Self::default());
    }
    let raw = std::fs::read(path).map_err(|source| CacheError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let on_disk: OnDisk = serde_json::from_slice(&raw).map_err(|source| CacheError::Parse {
      path: path.to_path_buf(),
      source,
    })?;
    Ok(Self {
      entries: RwLock::new(on_disk.entries),
    })
  }

  pub fn save(&self, path: &Path) -> Result<(), CacheError> {
    let on_disk = OnDisk {
      entries: self.entries.read().unwrap().clone(),
    };
    let serialized = serde_json::to_vec(&on_disk).expect("embedding cache is always serializable");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(|source| CacheError::Write {
      path: path.to_path_buf(),
      source,
    })?;
    let tmp_path = dir.join(format!(".{}.tmp", path.file_name().unwrap_or_default().to_string_lossy()));

    let mut tmp = std::fs::File::create(&tmp_path).map_err(|source| CacheError::Write {
      path: tmp_path.clone(),
      source,
    })?;
    tmp.write_all(&serialized).map_err(|source| CacheError::Write {
      path: tmp_path.clone(),
      source,
    })?;
    tmp.sync_all().map_err(|source| CacheError::Write {
      path: tmp_path.clone(),
      source,
    })?;
    std::fs::rename(&tmp_path, path).map_err(|source| CacheError::Write {
      path: path.to_path_buf(),
      source,
    })?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn insert_and_get_roundtrip() {
    let cache = EmbeddingCache::new();
    cache.insert("hello", vec![1.0, 2.0, 3.0]);
    assert_eq!(cache.get("hello"), Some(vec![1.0, 2.0, 3.0]));
    assert_eq!(cache.get("missing"), None);
  }

  #[test]
  fn second_insert_of_same_content_is_ignored() {
    let cache = EmbeddingCache::new();
    cache.insert("hello", vec![1.0]);
    cache.insert("hello", vec![9.0, 9.0]);
    assert_eq!(cache.get("hello"), Some(vec![1.0]));
  }

  #[test]
  fn save_and_load_roundtrip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("default.embcache");

    let cache = EmbeddingCache::new();
    cache.insert("alpha", vec![0.1, 0.2]);
    cache.insert("beta", vec![0.3, 0.4]);
    cache.save(&path).unwrap();

    let loaded = EmbeddingCache::load(&path).unwrap();
    assert_eq!(loaded.get("alpha"), Some(vec![0.1, 0.2]));
    assert_eq!(loaded.get("beta"), Some(vec![0.3, 0.4]));
    assert_eq!(loaded.len(), 2);
  }

  #[test]
  fn load_of_missing_file_is_empty_cache() {
    let dir = TempDir::new().unwrap();
    let cache = EmbeddingCache::load(&dir.path().join("nope.embcache")).unwrap();
    assert!(cache.is_empty());
  }
}
