//! Top-level server bootstrap: builds the shared resources, runs the
//! initial `load_or_build`, then drives the WebSocket listener and the
//! reload scheduler until shutdown.

use std::sync::Arc;
use std::time::Duration;

use mdqa_core::Config;
use mdqa_embedding::EmbeddingClient;
use mdqa_indexmgr::{IndexManager, IndexManagerConfig};
use mdqa_llm::{ChatProvider, OpenAiCompatibleChatProvider};
use mdqa_splitter::SplitterConfig;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::query::QueryPipelineConfig;
use crate::scheduler::Scheduler;
use crate::state::AppState;
use crate::ws;

/// Dimensionality of the configured embedding model. The spec treats this
/// as implementation-defined; `text-embedding-3-small` (the default model)
/// is 1536-wide, so that's the fixed value used here.
const EMBEDDING_DIMENSIONS: usize = 1536;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
  #[error(transparent)]
  Config(#[from] mdqa_core::ConfigError),
  #[error(transparent)]
  Index(#[from] mdqa_indexmgr::IndexError),
  #[error("failed to bind {addr}: {source}")]
  Bind {
    addr: std::net::SocketAddr,
    #[source]
    source: std::io::Error,
  },
}

pub async fn run(config: Config) -> Result<(), ServerError> {
  let embedding_client = EmbeddingClient::new(&config.api.base_url, &config.api.api_key, &config.api.embedding_model);
  let chat_provider: Arc<dyn ChatProvider> = Arc::new(OpenAiCompatibleChatProvider::new(
    &config.api.base_url,
    &config.api.api_key,
    &config.api.llm_model,
  ));

  let index_manager_config = IndexManagerConfig {
    cache_dir: Config::cache_dir(),
    index_name: config.server.index_name.clone(),
    directories: config.server.directories.clone(),
    dimensions: EMBEDDING_DIMENSIONS,
    splitter: SplitterConfig::default(),
  };
  let index_manager = Arc::new(IndexManager::new(index_manager_config, embedding_client)?);

  let state = AppState::new(index_manager.clone(), chat_provider, QueryPipelineConfig::default());

  state.mark_building(true);
  index_manager.load_or_build().await?;
  state.mark_building(false);

  let (shutdown_tx, _) = broadcast::channel::<()>(1);

  let scheduler = Scheduler::new(
    Duration::from_secs(config.server.reload_interval),
    state.clone(),
    shutdown_tx.subscribe(),
  );
  let scheduler_handle = tokio::spawn(scheduler.run());

  let addr: std::net::SocketAddr = ([0, 0, 0, 0], config.server.port).into();
  let listener = TcpListener::bind(addr).await.map_err(|source| ServerError::Bind { addr, source })?;
  info!(port = config.server.port, index = %config.server.index_name, "listening for websocket connections");

  let mut shutdown_rx = shutdown_tx.subscribe();
  loop {
    tokio::select! {
      accepted = listener.accept() => {
        match accepted {
          Ok((stream, peer)) => {
            let state = state.clone();
            tokio::spawn(async move {
              ws::handle_connection(stream, peer, state).await;
            });
          }
          Err(err) => error!(error = %err, "failed to accept connection"),
        }
      }
      _ = tokio::signal::ctrl_c() => {
        info!("received shutdown signal, draining connections");
        let _ = shutdown_tx.send(());
        break;
      }
      _ = shutdown_rx.recv() => {
        break;
      }
    }
  }

  let _ = scheduler_handle.await;
  Ok(())
}
