//! Orchestrates load/rebuild/incremental-update cycles and publishes the
//! result through an atomically-swappable Index Handle.

mod handle;

pub use handle::{IndexHandle, IndexSnapshot};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use mdqa_core::Chunk;
use mdqa_embedding::{EmbeddingCache, EmbeddingClient, EmbeddingError};
use mdqa_loader::{self as loader};
use mdqa_manifest::{ChangeSet, FileEntry, IndexRecord, Manifest, ManifestError};
use mdqa_splitter::{SplitterConfig, SplitterError, split};
use mdqa_vectorstore::{VectorStore, VectorStoreError};
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
  #[error(transparent)]
  Manifest(#[from] ManifestError),
  #[error(transparent)]
  VectorStore(#[from] VectorStoreError),
  #[error(transparent)]
  Embedding(#[from] EmbeddingError),
  #[error(transparent)]
  Splitter(#[from] SplitterError),
  #[error("unrecoverable I/O on the cache directory {path}: {source}")]
  CacheIo {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

#[derive(Debug, Clone)]
pub struct IndexManagerConfig {
  pub cache_dir: PathBuf,
  pub index_name: String,
  pub directories: Vec<String>,
  pub dimensions: usize,
  pub splitter: SplitterConfig,
}

impl IndexManagerConfig {
  pub fn index_path(&self) -> PathBuf {
    self.cache_dir.join(format!("{}.faiss", self.index_name))
  }
  pub fn meta_path(&self) -> PathBuf {
    self.cache_dir.join(format!("{}.meta", self.index_name))
  }
  pub fn manifest_path(&self) -> PathBuf {
    self.cache_dir.join("indexes.json")
  }
  pub fn embedding_cache_path(&self) -> PathBuf {
    self.cache_dir.join(format!("{}.embcache", self.index_name))
  }
}

pub struct IndexManager {
  config: IndexManagerConfig,
  embedding_client: EmbeddingClient,
  embedding_cache: Arc<EmbeddingCache>,
  handle: IndexHandle,
}

impl IndexManager {
  pub fn new(config: IndexManagerConfig, embedding_client: EmbeddingClient) -> Result<Self, IndexError> {
    let embedding_cache = Arc::new(EmbeddingCache::load(&config.embedding_cache_path()).unwrap_or_else(|err| {
      warn!(error = %err, "failed to load embedding cache, starting empty");
      EmbeddingCache::new()
    }));
    Ok(Self {
      config,
      embedding_client,
      embedding_cache,
      handle: IndexHandle::empty(),
    })
  }

  pub fn handle(&self) -> IndexHandle {
    self.handle.clone()
  }

  pub fn embedding_client(&self) -> &EmbeddingClient {
    &self.embedding_client
  }

  pub fn embedding_cache(&self) -> &EmbeddingCache {
    &self.embedding_cache
  }

  /// Load a persisted index if present and complete, otherwise build fresh.
  pub async fn load_or_build(&self) -> Result<(), IndexError> {
    let manifest = Manifest::load(&self.config.manifest_path())?;
    let current_files = current_files_with_mtime(&self.config.directories);

    let adoptable = self.config.index_path().exists()
      && self.config.meta_path().exists()
      && manifest
        .record(&self.config.index_name)
        .is_some_and(|record| current_files.iter().all(|(path, _)| record.files.contains_key(path)));

    if !adoptable {
      info!(index = %self.config.index_name, "no adoptable index on disk, performing full rebuild");
      return self.full_rebuild().await;
    }

    match VectorStore::load(&self.config.index_path(), &self.config.meta_path(), self.config.dimensions) {
      Ok(store) => {
        info!(index = %self.config.index_name, chunks = store.len(), "adopted persisted index");
        self.handle.publish(store, manifest);
        Ok(())
      }
      Err(err) => {
        warn!(error = %err, "persisted index inconsistent, falling back to full rebuild");
        self.full_rebuild().await
      }
    }
  }

  /// Enumerate, split, embed, and populate a fresh store from scratch.
  pub async fn full_rebuild(&self) -> Result<(), IndexError> {
    let files = loader::scan(&self.config.directories);
    let mut store = VectorStore::new(self.config.dimensions)?;
    let mut record = IndexRecord::new(self.config.index_name.clone(), self.config.directories.clone());

    for file in &files {
      let path = file.path.to_string_lossy().to_string();
      let contents = match loader::read_contents(&file.path) {
        Ok(contents) => contents,
        Err(err) => {
          warn!(path = %path, error = %err, "failed to read file during rebuild, skipping");
          continue;
        }
      };
      let chunks = split(&path, &contents, &self.config.splitter)?;
      let chunk_ids = self.embed_and_add(&mut store, &chunks).await?;
      record.files.insert(path, FileEntry { mtime: file.mtime, chunk_ids });
    }

    record.recompute_checksum();
    let mut manifest = Manifest::new();
    manifest.set_record(record);

    self.persist(&store, &manifest)?;
    info!(index = %self.config.index_name, chunks = store.len(), files = files.len(), "full rebuild complete");
    self.handle.publish(store, manifest);
    Ok(())
  }

  /// The incremental path: clone, remove-then-add, persist, publish.
  /// On any failure before publication the live index is left untouched.
  pub async fn incremental_update(&self) -> Result<(), IndexError> {
    let Some(snapshot) = self.handle.snapshot() else {
      return self.full_rebuild().await;
    };

    let current_files = current_files_with_mtime(&self.config.directories);
    let Some(old_record) = snapshot.manifest.record(&self.config.index_name).cloned() else {
      return self.full_rebuild().await;
    };
    if !old_record.has_file_data() {
      return self.full_rebuild().await;
    }

    let changes = old_record.detect_changes(&current_files);
    if changes.is_empty() {
      return Ok(());
    }

    let mut working = snapshot.store.try_clone()?;
    apply_removals(&mut working, &old_record, &changes);

    let mut new_record = old_record.clone();
    for path in changes.deleted.iter().chain(changes.modified.iter()) {
      new_record.files.remove(path);
    }

    let current_by_path: std::collections::HashMap<&str, f64> =
      current_files.iter().map(|(p, m)| (p.as_str(), *m)).collect();

    for path in changes.added.iter().chain(changes.modified.iter()) {
      let contents = match loader::read_contents(Path::new(path)) {
        Ok(contents) => contents,
        Err(err) => {
          warn!(path, error = %err, "failed to read changed file, skipping");
          continue;
        }
      };
      let chunks = split(path, &contents, &self.config.splitter)?;
      let chunk_ids = self.embed_and_add(&mut working, &chunks).await?;
      let mtime = current_by_path.get(path.as_str()).copied().unwrap_or(0.0);
      new_record.files.insert(path.clone(), FileEntry { mtime, chunk_ids });
    }

    new_record.recompute_checksum();
    let mut new_manifest = snapshot.manifest.as_ref().clone();
    new_manifest.set_record(new_record);

    self.persist(&working, &new_manifest)?;
    info!(
      index = %self.config.index_name,
      added = changes.added.len(),
      modified = changes.modified.len(),
      deleted = changes.deleted.len(),
      "incremental update complete"
    );
    self.handle.publish(working, new_manifest);
    Ok(())
  }

  async fn embed_and_add(&self, store: &mut VectorStore, chunks: &[Chunk]) -> Result<Vec<u64>, IndexError> {
    if chunks.is_empty() {
      return Ok(Vec::new());
    }
    let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
    let vectors = mdqa_embedding::embed_many(&self.embedding_client, &self.embedding_cache, &texts).await?;
    let ids: Vec<u64> = chunks.iter().map(|c| c.chunk_id).collect();
    store.add_with_ids(&ids, &vectors, chunks)?;
    Ok(ids)
  }

  fn persist(&self, store: &VectorStore, manifest: &Manifest) -> Result<(), IndexError> {
    store.save(&self.config.index_path(), &self.config.meta_path())?;
    manifest.save(&self.config.manifest_path())?;
    if let Err(err) = self.embedding_cache.save(&self.config.embedding_cache_path()) {
      warn!(error = %err, "failed to persist embedding cache, continuing");
    }
    Ok(())
  }

  pub fn search(&self, query_vector: &[f32], k: usize) -> Result<Vec<(Chunk, f32)>, IndexError> {
    let Some(snapshot) = self.handle.snapshot() else {
      return Ok(Vec::new());
    };
    let results = snapshot.store.search(query_vector, k)?;
    Ok(
      results
        .into_iter()
        .filter_map(|(id, distance)| snapshot.store.chunk(id).map(|chunk| (chunk.clone(), distance)))
        .collect(),
    )
  }
}

fn apply_removals(working: &mut VectorStore, old_record: &IndexRecord, changes: &ChangeSet) {
  for path in changes.deleted.iter().chain(changes.modified.iter()) {
    if let Some(entry) = old_record.files.get(path) {
      working.remove_ids(&entry.chunk_ids);
    }
  }
}

fn current_files_with_mtime(directories: &[String]) -> Vec<(String, f64)> {
  loader::scan(directories)
    .into_iter()
    .map(|file| (file.path.to_string_lossy().to_string(), file.mtime))
    .collect()
}
