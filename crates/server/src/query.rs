//! The Query Pipeline (§4.7): retrieve, compose a chat prompt, and stream
//! the answer back as a well-formed stream phase.

use mdqa_embedding::embed_many;
use mdqa_indexmgr::IndexManager;
use mdqa_llm::{ChatEvent, ChatMessage, ChatProvider};
use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;

use crate::protocol::{STREAM_ERROR_PREFIX, ServerMessage};

const SYSTEM_INSTRUCTION: &str =
  "You are a helpful assistant answering questions using only the provided Markdown excerpts. \
   If the excerpts don't contain the answer, say so plainly.";

const NO_RELEVANT_CONTENT: &str = "I couldn't find any relevant content in the indexed documents to answer this question.";

#[derive(Debug, Clone, Copy)]
pub struct QueryPipelineConfig {
  pub k: usize,
  pub distance_threshold: Option<f32>,
}

impl Default for QueryPipelineConfig {
  fn default() -> Self {
    Self {
      k: 5,
      distance_threshold: None,
    }
  }
}

pub struct QueryPipeline<'a> {
  pub index_manager: &'a IndexManager,
  pub chat_provider: &'a dyn ChatProvider,
  pub config: QueryPipelineConfig,
}

impl<'a> QueryPipeline<'a> {
  /// Runs the full pipeline for one question, sending protocol messages to
  /// `sender` as each phase completes. Never panics on a connection close;
  /// the caller drops `sender` to cancel the in-flight chat stream.
  pub async fn run(&self, question: &str, sender: &UnboundedSender<ServerMessage>) {
    if !self.index_manager.handle().is_ready() {
      let _ = sender.send(ServerMessage::Error {
        message: "index is not ready yet".to_string(),
      });
      return;
    }

    let query_vector = match embed_many(self.index_manager.embedding_client(), self.index_manager.embedding_cache(), &[question]).await {
      Ok(mut vectors) => vectors.remove(0),
      Err(err) => {
        let _ = sender.send(ServerMessage::Error {
          message: format!("failed to embed question: {err}"),
        });
        return;
      }
    };

    let results = match self.index_manager.search(&query_vector, self.config.k) {
      Ok(results) => results,
      Err(err) => {
        let _ = sender.send(ServerMessage::Error {
          message: format!("search failed: {err}"),
        });
        return;
      }
    };

    let results: Vec<_> = match self.config.distance_threshold {
      Some(threshold) => results.into_iter().filter(|(_, distance)| *distance <= threshold).collect(),
      None => results,
    };

    let _ = sender.send(ServerMessage::StreamStart);

    if results.is_empty() {
      let _ = sender.send(ServerMessage::StreamChunk {
        chunk: NO_RELEVANT_CONTENT.to_string(),
      });
      let _ = sender.send(ServerMessage::StreamEnd { sources: Vec::new() });
      return;
    }

    let sources = dedup_preserving_order(results.iter().map(|(chunk, _)| chunk.file_path.clone()));
    let messages = compose_prompt(question, results.iter().map(|(chunk, _)| chunk));

    match self.chat_provider.stream_chat(messages).await {
      Ok(mut stream) => {
        use futures::StreamExt;
        loop {
          match stream.next().await {
            Some(Ok(ChatEvent::Delta(text))) => {
              if sender.send(ServerMessage::StreamChunk { chunk: text }).is_err() {
                return; // client disconnected, cancel
              }
            }
            Some(Ok(ChatEvent::Done)) => break,
            Some(Err(err)) => {
              warn!(error = %err, "chat stream failed mid-response");
              let _ = sender.send(ServerMessage::StreamChunk {
                chunk: format!("{STREAM_ERROR_PREFIX}{err}"),
              });
              break;
            }
            None => break,
          }
        }
        let _ = sender.send(ServerMessage::StreamEnd { sources });
      }
      Err(err) => {
        let _ = sender.send(ServerMessage::StreamChunk {
          chunk: format!("{STREAM_ERROR_PREFIX}{err}"),
        });
        let _ = sender.send(ServerMessage::StreamEnd { sources });
      }
    }
  }
}

fn dedup_preserving_order(paths: impl Iterator<Item = String>) -> Vec<String> {
  let mut seen = std::collections::HashSet::new();
  let mut ordered = Vec::new();
  for path in paths {
    if seen.insert(path.clone()) {
      ordered.push(path);
    }
  }
  ordered
}

fn compose_prompt<'c>(question: &str, chunks: impl Iterator<Item = &'c mdqa_core::Chunk>) -> Vec<ChatMessage> {
  let mut context = String::new();
  for chunk in chunks {
    context.push_str(&format!("### {}\n{}\n\n", chunk.file_path, chunk.text));
  }
  vec![
    ChatMessage::system(SYSTEM_INSTRUCTION),
    ChatMessage::user(format!("Context:\n\n{context}\nQuestion: {question}")),
  ]
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn dedup_preserves_first_occurrence_order() {
    let paths = vec!["/b.md".to_string(), "/a.md".to_string(), "/b.md".to_string(), "/c.md".to_string()];
    let result = dedup_preserving_order(paths.into_iter());
    assert_eq!(result, vec!["/b.md".to_string(), "/a.md".to_string(), "/c.md".to_string()]);
  }

  #[test]
  fn compose_prompt_includes_question_and_attributions() {
    let chunk = mdqa_core::Chunk::new("/notes.md", 0, "Alpha Bravo Charlie", vec![]);
    let messages = compose_prompt("What is Charlie?", std::iter::once(&chunk));
    assert_eq!(messages.len(), 2);
    assert!(messages[1].content.contains("/notes.md"));
    assert!(messages[1].content.contains("What is Charlie?"));
  }
}
