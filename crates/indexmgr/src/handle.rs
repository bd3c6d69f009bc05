use std::sync::Arc;

use arc_swap::ArcSwapOption;
use mdqa_manifest::Manifest;
use mdqa_vectorstore::VectorStore;

/// One consistent `(VectorStore, Manifest)` pair as of the moment it was published.
pub struct IndexSnapshot {
  pub store: Arc<VectorStore>,
  pub manifest: Arc<Manifest>,
}

/// Shared, atomically-replaceable reference to the active index. Readers
/// grab a clone of the `Arc` for the duration of one query; writers publish
/// a new snapshot and the old one is dropped once its last reader releases it.
#[derive(Clone)]
pub struct IndexHandle {
  inner: Arc<ArcSwapOption<IndexSnapshot>>,
}

impl IndexHandle {
  pub fn empty() -> Self {
    Self {
      inner: Arc::new(ArcSwapOption::empty()),
    }
  }

  pub fn snapshot(&self) -> Option<Arc<IndexSnapshot>> {
    self.inner.load_full()
  }

  pub fn publish(&self, store: VectorStore, manifest: Manifest) {
    self.inner.store(Some(Arc::new(IndexSnapshot {
      store: Arc::new(store),
      manifest: Arc::new(manifest),
    })));
  }

  pub fn is_ready(&self) -> bool {
    self.inner.load().is_some()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn starts_unready_and_becomes_ready_after_publish() {
    let handle = IndexHandle::empty();
    assert!(!handle.is_ready());
    assert!(handle.snapshot().is_none());

    let store = VectorStore::new(2).unwrap();
    let manifest = Manifest::new();
    handle.publish(store, manifest);

    assert!(handle.is_ready());
    assert!(handle.snapshot().is_some());
  }

  #[test]
  fn reader_keeps_old_snapshot_alive_across_a_publish() {
    let handle = IndexHandle::empty();
    handle.publish(VectorStore::new(2).unwrap(), Manifest::new());
    let first = handle.snapshot().unwrap();

    handle.publish(VectorStore::new(2).unwrap(), Manifest::new());
    let second = handle.snapshot().unwrap();

    assert!(!Arc::ptr_eq(&first, &second));
  }
}
