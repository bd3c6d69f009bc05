//! The on-disk index manifest: per-file mtime/chunk-id bookkeeping used to
//! decide between an incremental update and a full rebuild.

use std::collections::HashMap;
use std::io::Write as _;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
  #[error("failed to read manifest {path}: {source}")]
  Read {
    path: std::path::PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("failed to parse manifest {path}: {source}")]
  Parse {
    path: std::path::PathBuf,
    #[source]
    source: serde_json::Error,
  },
  #[error("failed to write manifest {path}: {source}")]
  Write {
    path: std::path::PathBuf,
    #[source]
    source: std::io::Error,
  },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
  pub mtime: f64,
  pub chunk_ids: Vec<u64>,
}

/// One named index's bookkeeping. Schema is forward-compatible: unknown
/// fields on load are ignored rather than rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
  pub name: String,
  pub directories: Vec<String>,
  pub overall_checksum: String,
  pub files: HashMap<String, FileEntry>,
}

impl IndexRecord {
  pub fn new(name: impl Into<String>, directories: Vec<String>) -> Self {
    Self {
      name: name.into(),
      directories,
      overall_checksum: String::new(),
      files: HashMap::new(),
    }
  }

  pub fn recompute_checksum(&mut self) {
    self.overall_checksum = compute_checksum(&self.files);
  }

  /// Missing per-file metadata (`files` empty) signals a fallback to full rebuild.
  pub fn has_file_data(&self) -> bool {
    !self.files.is_empty()
  }

  /// `modified` includes mtime regressions, not just advances.
  pub fn detect_changes(&self, current_files: &[(String, f64)]) -> ChangeSet {
    let current: HashMap<&str, f64> = current_files.iter().map(|(path, mtime)| (path.as_str(), *mtime)).collect();

    let mut added = Vec::new();
    let mut modified = Vec::new();
    for (path, mtime) in &current {
      match self.files.get(*path) {
        None => added.push((*path).to_string()),
        Some(entry) if entry.mtime != *mtime => modified.push((*path).to_string()),
        Some(_) => {}
      }
    }

    let mut deleted = Vec::new();
    for path in self.files.keys() {
      if !current.contains_key(path.as_str()) {
        deleted.push(path.clone());
      }
    }

    added.sort();
    modified.sort();
    deleted.sort();
    ChangeSet { added, modified, deleted }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChangeSet {
  pub added: Vec<String>,
  pub modified: Vec<String>,
  pub deleted: Vec<String>,
}

impl ChangeSet {
  pub fn is_empty(&self) -> bool {
    self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
  }
}

fn compute_checksum(files: &HashMap<String, FileEntry>) -> String {
  let mut paths: Vec<&String> = files.keys().collect();
  paths.sort();
  let mut hasher = Sha256::new();
  for path in paths {
    let entry = &files[path];
    hasher.update(path.as_bytes());
    hasher.update(entry.mtime.to_le_bytes());
  }
  hex::encode(hasher.finalize())
}

/// The full manifest file: all named indexes sharing one `{cache_dir}/indexes.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
  #[serde(default)]
  indexes: HashMap<String, IndexRecord>,
}

impl Manifest {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn record(&self, name: &str) -> Option<&IndexRecord> {
    self.indexes.get(name)
  }

  pub fn set_record(&mut self, record: IndexRecord) {
    self.indexes.insert(record.name.clone(), record);
  }

  pub fn load(path: &Path) -> Result<Self, ManifestError> {
    if !path.exists() {
      return Ok(Self::default());
    }
    let raw = std::fs::read(path).map_err(|source| ManifestError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    serde_json::from_slice(&raw).map_err(|source| ManifestError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }

  pub fn save(&self, path: &Path) -> Result<(), ManifestError> {
    let serialized = serde_json::to_vec_pretty(self).expect("manifest is always serializable");
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(|source| ManifestError::Write {
      path: path.to_path_buf(),
      source,
    })?;
    let tmp_path = dir.join(format!(".{}.tmp", path.file_name().unwrap_or_default().to_string_lossy()));

    let mut tmp = std::fs::File::create(&tmp_path).map_err(|source| ManifestError::Write {
      path: tmp_path.clone(),
      source,
    })?;
    tmp.write_all(&serialized).map_err(|source| ManifestError::Write {
      path: tmp_path.clone(),
      source,
    })?;
    tmp.sync_all().map_err(|source| ManifestError::Write {
      path: tmp_path.clone(),
      source,
    })?;
    std::fs::rename(&tmp_path, path).map_err(|source| ManifestError::Write {
      path: path.to_path_buf(),
      source,
    })?;
    Ok(())
  }
}
