//! Shared, process-wide resources injected into every connection and the
//! reload task (§9: "model them as explicit, injected resources").

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use mdqa_indexmgr::IndexManager;
use mdqa_llm::ChatProvider;

use crate::protocol::IndexStatus;
use crate::query::QueryPipelineConfig;

#[derive(Clone)]
pub struct AppState {
  pub index_manager: Arc<IndexManager>,
  pub chat_provider: Arc<dyn ChatProvider>,
  pub query_config: QueryPipelineConfig,
  building: Arc<AtomicBool>,
}

impl AppState {
  pub fn new(index_manager: Arc<IndexManager>, chat_provider: Arc<dyn ChatProvider>, query_config: QueryPipelineConfig) -> Self {
    Self {
      index_manager,
      chat_provider,
      query_config,
      building: Arc::new(AtomicBool::new(false)),
    }
  }

  pub fn mark_building(&self, building: bool) {
    self.building.store(building, Ordering::SeqCst);
  }

  pub fn status(&self) -> IndexStatus {
    if self.building.load(Ordering::SeqCst) {
      return IndexStatus::Indexing;
    }
    match self.index_manager.handle().snapshot() {
      Some(snapshot) if !snapshot.store.is_empty() => IndexStatus::Ready,
      _ => IndexStatus::NotReady,
    }
  }
}
