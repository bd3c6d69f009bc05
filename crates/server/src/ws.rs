//! Per-connection WebSocket handling (§4.8). Reads are processed one at a
//! time in receive order, so a second `query` can never interleave with an
//! in-flight stream on the same connection.

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::protocol::{ClientMessage, ServerMessage};
use crate::query::QueryPipeline;
use crate::state::AppState;

pub async fn handle_connection(stream: TcpStream, peer: std::net::SocketAddr, state: AppState) {
  let ws_stream = match tokio_tungstenite::accept_async(stream).await {
    Ok(ws) => ws,
    Err(err) => {
      warn!(peer = %peer, error = %err, "websocket handshake failed");
      return;
    }
  };
  info!(peer = %peer, "accepted websocket connection");

  let (mut sink, mut source) = ws_stream.split();

  while let Some(message) = source.next().await {
    let message = match message {
      Ok(message) => message,
      Err(err) => {
        debug!(peer = %peer, error = %err, "websocket read error, closing connection");
        break;
      }
    };

    match message {
      Message::Text(text) => {
        if !dispatch(&text, &state, &mut sink).await {
          break;
        }
      }
      Message::Binary(_) => {
        let _ = send(&mut sink, &ServerMessage::Error {
          message: "binary frames are not supported".to_string(),
        })
        .await;
      }
      Message::Close(_) => break,
      Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
    }
  }

  info!(peer = %peer, "websocket connection closed");
}

/// Returns `false` if the connection should close (send failure).
async fn dispatch<S>(text: &str, state: &AppState, sink: &mut S) -> bool
where
  S: futures::Sink<Message> + Unpin,
{
  let parsed: Result<ClientMessage, _> = serde_json::from_str(text);
  match parsed {
    Ok(ClientMessage::Status) => send(sink, &ServerMessage::Status {
      status: state.status(),
      message: None,
    })
    .await
    .is_ok(),
    Ok(ClientMessage::Query { question, index }) => {
      if let Some(index) = &index {
        debug!(index = %index, "query named an index; server serves a single loaded index, ignoring field");
      }
      let question = question.trim();
      if question.is_empty() {
        return send(sink, &ServerMessage::Error {
          message: "question must be non-empty".to_string(),
        })
        .await
        .is_ok();
      }
      run_query(question, state, sink).await
    }
    Err(err) => send(sink, &ServerMessage::Error {
      message: format!("malformed message: {err}"),
    })
    .await
    .is_ok(),
  }
}

async fn run_query<S>(question: &str, state: &AppState, sink: &mut S) -> bool
where
  S: futures::Sink<Message> + Unpin,
{
  let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
  let pipeline = QueryPipeline {
    index_manager: &state.index_manager,
    chat_provider: state.chat_provider.as_ref(),
    config: state.query_config,
  };

  let run = async {
    pipeline.run(question, &tx).await;
    drop(tx);
  };
  let forward = async {
    let mut ok = true;
    while let Some(message) = rx.recv().await {
      if send(sink, &message).await.is_err() {
        ok = false;
        break;
      }
    }
    ok
  };

  let (_, forwarded_ok) = tokio::join!(run, forward);
  forwarded_ok
}

async fn send<S>(sink: &mut S, message: &ServerMessage) -> Result<(), ()>
where
  S: futures::Sink<Message> + Unpin,
{
  let text = serde_json::to_string(message).expect("server messages always serialize");
  sink.send(Message::Text(text)).await.map_err(|_| ())
}
