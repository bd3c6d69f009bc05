//! Reload Scheduler (§4.9): periodically runs an incremental update.
//! Never runs two reloads concurrently; a tick that arrives mid-update is
//! dropped rather than queued.

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{info, warn};

use crate::state::AppState;

pub struct Scheduler {
  reload_interval: Duration,
  state: AppState,
  shutdown_rx: broadcast::Receiver<()>,
}

impl Scheduler {
  pub fn new(reload_interval: Duration, state: AppState, shutdown_rx: broadcast::Receiver<()>) -> Self {
    Self {
      reload_interval,
      state,
      shutdown_rx,
    }
  }

  pub async fn run(mut self) {
    let mut timer = interval(self.reload_interval);
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    timer.tick().await; // skip the immediate tick; the initial build already ran

    loop {
      tokio::select! {
        _ = timer.tick() => {
          self.run_reload_once().await;
        }
        _ = self.shutdown_rx.recv() => {
          info!("reload scheduler received shutdown signal");
          break;
        }
      }
    }
  }

  async fn run_reload_once(&self) {
    self.state.mark_building(true);
    let result = self.state.index_manager.incremental_update().await;
    self.state.mark_building(false);
    match result {
      Ok(()) => info!("scheduled incremental update complete"),
      Err(err) => warn!(error = %err, "scheduled incremental update failed, previous index continues to serve"),
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;
  use std::time::Duration;

  use mdqa_embedding::EmbeddingClient;
  use mdqa_indexmgr::{IndexManager, IndexManagerConfig};
  use mdqa_llm::{ChatEvent, ChatEventStream, ChatMessage, ChatProvider, LlmError};
  use mdqa_splitter::SplitterConfig;
  use tempfile::TempDir;
  use tokio::sync::broadcast;

  use super::*;
  use crate::query::QueryPipelineConfig;

  #[derive(Debug, Clone)]
  struct NoopChatProvider;

  #[async_trait::async_trait]
  impl ChatProvider for NoopChatProvider {
    fn name(&self) -> &str {
      "noop"
    }
    async fn stream_chat(&self, _messages: Vec<ChatMessage>) -> Result<ChatEventStream, LlmError> {
      Ok(Box::pin(futures::stream::iter(vec![Ok(ChatEvent::Done)])))
    }
  }

  fn empty_state(cache_dir: &std::path::Path) -> AppState {
    let config = IndexManagerConfig {
      cache_dir: cache_dir.to_path_buf(),
      index_name: "default".to_string(),
      directories: Vec::new(),
      dimensions: 2,
      splitter: SplitterConfig::default(),
    };
    let client = EmbeddingClient::new("http://127.0.0.1:0", "key", "text-embedding-3-small");
    let index_manager = Arc::new(IndexManager::new(config, client).unwrap());
    AppState::new(index_manager, Arc::new(NoopChatProvider), QueryPipelineConfig::default())
  }

  #[tokio::test]
  async fn a_reload_tick_runs_and_publishes_an_empty_index() {
    let cache_dir = TempDir::new().unwrap();
    let state = empty_state(cache_dir.path());
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let scheduler = Scheduler::new(Duration::from_millis(20), state.clone(), shutdown_rx);
    let handle = tokio::spawn(scheduler.run());

    tokio::time::sleep(Duration::from_millis(60)).await;
    let _ = shutdown_tx.send(());
    handle.await.unwrap();

    assert!(state.index_manager.handle().is_ready());
  }

  #[tokio::test]
  async fn shutdown_signal_stops_the_loop_promptly() {
    let cache_dir = TempDir::new().unwrap();
    let state = empty_state(cache_dir.path());
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let scheduler = Scheduler::new(Duration::from_secs(3600), state, shutdown_rx);
    let handle = tokio::spawn(scheduler.run());

    let _ = shutdown_tx.send(());
    tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
  }
}
