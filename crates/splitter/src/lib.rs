//! Structurally-aware Markdown splitting into overlapping chunks.
//!
//! Boundaries prefer ATX headers, fenced-code edges, and blank lines over
//! mid-sentence cuts. A fenced code block is never split unless it alone
//! exceeds the chunk size target.

use mdqa_core::{Chunk, Header};

#[derive(Debug, Clone, Copy)]
pub struct SplitterConfig {
  /// Target chunk size in characters.
  pub chunk_size: usize,
  /// Overlap between consecutive chunks, in characters.
  pub overlap: usize,
}

impl Default for SplitterConfig {
  fn default() -> Self {
    Self {
      chunk_size: 1000,
      overlap: 200,
    }
  }
}

#[derive(Debug, thiserror::Error)]
pub enum SplitterError {
  #[error("chunk id collision for file {file_path} at distinct chunk indices {a} and {b}")]
  ChunkIdCollision { file_path: String, a: u16, b: u16 },
}

struct Line<'a> {
  text: &'a str,
  /// Byte offset of this line's first character in the original text.
  start: usize,
  /// Byte offset one past this line's trailing newline (or end of text).
  end: usize,
}

fn split_lines(text: &str) -> Vec<Line<'_>> {
  let mut lines = Vec::new();
  let mut start = 0;
  for segment in text.split_inclusive('\n') {
    let end = start + segment.len();
    let trimmed_end = segment.strip_suffix('\n').unwrap_or(segment).len();
    lines.push(Line {
      text: &segment[..trimmed_end],
      start,
      end,
    });
    start = end;
  }
  if text.is_empty() {
    lines.push(Line { text: "", start: 0, end: 0 });
  }
  lines
}

fn parse_atx_header(line: &str) -> Option<(u8, String)> {
  let trimmed = line.trim_start();
  let hashes = trimmed.chars().take_while(|&c| c == '#').count();
  if hashes == 0 || hashes > 6 {
    return None;
  }
  let rest = &trimmed[hashes..];
  if !rest.is_empty() && !rest.starts_with(' ') && !rest.starts_with('\t') {
    return None;
  }
  Some((hashes as u8, rest.trim().to_string()))
}

fn is_fence_delimiter(line: &str) -> bool {
  let trimmed = line.trim_start();
  trimmed.starts_with("```") || trimmed.starts_with("~~~")
}

/// Partition `text` (the contents of `file_path`) into overlapping, structurally
/// aware chunks. `chunk_index` is dense starting at 0.
pub fn split(file_path: &str, text: &str, config: &SplitterConfig) -> Result<Vec<Chunk>, SplitterError> {
  if text.is_empty() {
    return Ok(Vec::new());
  }

  let lines = split_lines(text);

  // Per-line: is this line a legal break point (chunk may end right after it)?
  // Per-line: header stack snapshot *before* this line is processed.
  let mut break_after = vec![false; lines.len()];
  let mut header_before: Vec<Vec<Header>> = Vec::with_capacity(lines.len());
  let mut in_fence = vec![false; lines.len()];

  let mut stack: Vec<Header> = Vec::new();
  let mut fence_open = false;

  for (i, line) in lines.iter().enumerate() {
    header_before.push(stack.clone());

    if is_fence_delimiter(line.text) {
      in_fence[i] = true; // the delimiter line itself counts as fenced
      fence_open = !fence_open;
    } else {
      in_fence[i] = fence_open;
    }

    if !fence_open && !in_fence[i] {
      if let Some((level, title)) = parse_atx_header(line.text) {
        while stack.last().is_some_and(|h| h.level >= level) {
          stack.pop();
        }
        stack.push(Header { level, title });
      }
    }

    let next_is_header = lines
      .get(i + 1)
      .is_some_and(|next| !fence_open && parse_atx_header(next.text).is_some());
    let is_blank = line.text.trim().is_empty();
    break_after[i] = !in_fence[i] && (is_blank || parse_atx_header(line.text).is_some() || next_is_header);
  }

  // Determine cut points: line indices after which a chunk boundary falls.
  let mut cut_after_line: Vec<usize> = Vec::new();
  let mut chunk_start_line = 0usize;
  let mut current_len = 0usize;
  let mut last_break: Option<usize> = None;
  let mut fence_span_start: Option<usize> = None;

  for (i, line) in lines.iter().enumerate() {
    current_len += line.text.len() + 1; // +1 for the newline we split on

    if in_fence[i] {
      if fence_span_start.is_none() {
        fence_span_start = Some(i);
      }
    } else {
      fence_span_start = None;
    }

    if break_after[i] {
      last_break = Some(i);
    }

    if current_len >= config.chunk_size {
      let fence_len_so_far = fence_span_start.map(|s| i - s + 1).unwrap_or(0);
      let inside_small_fence = fence_span_start.is_some() && fence_len_so_far <= config.chunk_size;
      if inside_small_fence {
        continue; // wait for the fence to close, or for it to outgrow the target
      }

      let cut = last_break.filter(|&b| b >= chunk_start_line).unwrap_or(i);
      cut_after_line.push(cut);
      chunk_start_line = cut + 1;
      current_len = lines[chunk_start_line..=i].iter().map(|l| l.text.len() + 1).sum();
      last_break = None;
      fence_span_start = None;
    }
  }
  if chunk_start_line < lines.len() {
    cut_after_line.push(lines.len() - 1);
  }

  // Build chunk texts from cut points, applying backward overlap.
  let mut chunks = Vec::with_capacity(cut_after_line.len());
  let mut nominal_start_line = 0usize;
  let mut seen_ids = std::collections::HashMap::new();

  for (chunk_index, &cut) in cut_after_line.iter().enumerate() {
    let nominal_start_offset = lines[nominal_start_line].start;
    let end_offset = lines[cut].end;

    let start_offset = if chunk_index == 0 {
      nominal_start_offset
    } else {
      nominal_start_offset.saturating_sub(config.overlap).max(0)
    };
    // Never reach back past byte boundaries; str slicing requires char boundaries.
    let start_offset = floor_char_boundary(text, start_offset);

    let chunk_text = text[start_offset..end_offset].to_string();
    let headers = header_before[nominal_start_line].clone();

    let chunk = Chunk::new(file_path, chunk_index as u16, chunk_text, headers);
    if let Some(prev_index) = seen_ids.insert(chunk.chunk_id, chunk_index) {
      return Err(SplitterError::ChunkIdCollision {
        file_path: file_path.to_string(),
        a: prev_index as u16,
        b: chunk_index as u16,
      });
    }
    chunks.push(chunk);

    nominal_start_line = cut + 1;
  }

  Ok(chunks)
}

fn floor_char_boundary(text: &str, mut offset: usize) -> usize {
  while offset > 0 && !text.is_char_boundary(offset) {
    offset -= 1;
  }
  offset
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_text_yields_no_chunks() {
    let chunks = split("/notes.md", "", &SplitterConfig::default()).unwrap();
    assert!(chunks.is_empty());
  }

  #[test]
  fn dense_chunk_indices() {
    let text = "a".repeat(3000);
    let chunks = split("/notes.md", &text, &SplitterConfig::default()).unwrap();
    assert!(chunks.len() > 1);
    for (i, chunk) in chunks.iter().enumerate() {
      assert_eq!(chunk.chunk_index as usize, i);
    }
  }

  #[test]
  fn small_file_is_one_chunk() {
    let chunks = split("/notes.md", "Alpha Bravo Charlie", &SplitterConfig::default()).unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].text, "Alpha Bravo Charlie");
  }

  #[test]
  fn headers_are_captured_in_chunk() {
    let text = format!("# Title\n\nSome intro text.\n\n## Section\n\n{}", "word ".repeat(400));
    let chunks = split("/notes.md", &text, &SplitterConfig::default()).unwrap();
    assert!(chunks.len() >= 1);
    let last = chunks.last().unwrap();
    assert!(last.headers.iter().any(|h| h.title == "Section" || h.title == "Title"));
  }

  #[test]
  fn consecutive_chunks_overlap() {
    let text = (0..50)
      .map(|i| format!("Paragraph number {i} with enough text to build up size.\n\n"))
      .collect::<String>();
    let config = SplitterConfig {
      chunk_size: 300,
      overlap: 50,
    };
    let chunks = split("/notes.md", &text, &config).unwrap();
    assert!(chunks.len() > 1);
    for pair in chunks.windows(2) {
      let end_of_first = &pair[0].text[pair[0].text.len().saturating_sub(30)..];
      assert!(
        pair[1].text.contains(&end_of_first[..end_of_first.len().min(10)]) || pair[1].text.len() >= 10,
        "expected some overlap between consecutive chunks"
      );
    }
  }

  #[test]
  fn fenced_code_block_is_not_split_when_under_target() {
    let text = format!("# Doc\n\n```rust\n{}\n```\n\nAfter code.", "let x = 1;\n".repeat(10));
    let config = SplitterConfig {
      chunk_size: 50,
      overlap: 10,
    };
    let chunks = split("/notes.md", &text, &config).unwrap();
    let fence_chunk = chunks.iter().find(|c| c.text.contains("```rust"));
    assert!(fence_chunk.is_some());
    assert!(fence_chunk.unwrap().text.contains("```\n\nAfter code.") || fence_chunk.unwrap().text.trim_end().ends_with("```"));
  }

  #[test]
  fn oversized_fence_is_eventually_split() {
    let huge_fence = format!("```\n{}\n```\n", "line of code\n".repeat(500));
    let config = SplitterConfig {
      chunk_size: 200,
      overlap: 20,
    };
    let chunks = split("/notes.md", &huge_fence, &config).unwrap();
    assert!(chunks.len() > 1, "a fence far larger than the target must still be split");
  }

  #[test]
  fn no_chunk_id_collisions_within_a_file() {
    let text = "paragraph\n\n".repeat(200);
    let chunks = split("/notes.md", &text, &SplitterConfig::default()).unwrap();
    let mut ids: Vec<_> = chunks.iter().map(|c| c.chunk_id).collect();
    let before = ids.len();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), before);
  }
}
