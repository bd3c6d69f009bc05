//! Shared data model: chunks, headers, and the deterministic chunk id scheme.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One Markdown header enclosing a chunk at the point it starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
  pub level: u8,
  pub title: String,
}

/// An immutable, structurally-aware fragment of a Markdown file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
  pub chunk_id: u64,
  pub file_path: String,
  pub chunk_index: u16,
  pub text: String,
  pub headers: Vec<Header>,
}

impl Chunk {
  pub fn new(file_path: impl Into<String>, chunk_index: u16, text: impl Into<String>, headers: Vec<Header>) -> Self {
    let file_path = file_path.into();
    let chunk_id = compute_chunk_id(&file_path, chunk_index);
    Self {
      chunk_id,
      file_path,
      chunk_index,
      text: text.into(),
      headers,
    }
  }
}

/// `chunk_id = (sha256(file_path)[:8] as u64) << 16 | (chunk_index & 0xFFFF)`.
///
/// Deterministic: the same `(file_path, chunk_index)` always yields the same id,
/// so chunks never need to carry a separately-persisted identifier.
pub fn compute_chunk_id(file_path: &str, chunk_index: u16) -> u64 {
  let digest = Sha256::digest(file_path.as_bytes());
  let prefix = u64::from_be_bytes(digest[0..8].try_into().expect("sha256 digest is 32 bytes"));
  (prefix << 16) | (chunk_index as u64 & 0xFFFF)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn chunk_id_is_deterministic() {
    let a = compute_chunk_id("/docs/notes.md", 3);
    let b = compute_chunk_id("/docs/notes.md", 3);
    assert_eq!(a, b);
  }

  #[test]
  fn chunk_id_varies_with_index() {
    let a = compute_chunk_id("/docs/notes.md", 0);
    let b = compute_chunk_id("/docs/notes.md", 1);
    assert_ne!(a, b);
    assert_eq!(a >> 16, b >> 16, "path-derived prefix must match");
  }

  #[test]
  fn chunk_id_varies_with_path() {
    let a = compute_chunk_id("/docs/a.md", 0);
    let b = compute_chunk_id("/docs/b.md", 0);
    assert_ne!(a, b);
  }

  #[test]
  fn chunk_new_assigns_id_from_scheme() {
    let chunk = Chunk::new("/docs/notes.md", 2, "hello", vec![]);
    assert_eq!(chunk.chunk_id, compute_chunk_id("/docs/notes.md", 2));
  }
}
