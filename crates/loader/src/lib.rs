//! Recursive `.md` file enumeration with deterministic ordering.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use ignore::WalkBuilder;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// A `.md` file discovered under a configured root, with its modification time.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRef {
  pub path: PathBuf,
  /// Seconds since the Unix epoch.
  pub mtime: f64,
}

/// Recursively enumerate `.md` files under `directories`.
///
/// Nonexistent or non-directory roots are skipped with a warning, not an
/// error. Output is sorted lexicographically by absolute path so repeated
/// runs over an unchanged filesystem produce an identical order. Symlink
/// loops terminate because the underlying walker tracks visited
/// device/inode pairs when following links.
pub fn scan(directories: &[String]) -> Vec<FileRef> {
  let mut files = Vec::new();

  for dir in directories {
    let root = Path::new(dir);
    if !root.is_dir() {
      warn!(directory = %dir, "configured directory does not exist or is not a directory, skipping");
      continue;
    }

    let walker = WalkBuilder::new(root)
      .standard_filters(false)
      .follow_links(true)
      .build();

    for entry in walker {
      let entry = match entry {
        Ok(entry) => entry,
        Err(err) => {
          warn!(directory = %dir, error = %err, "error while walking directory");
          continue;
        }
      };

      let path = entry.path();
      if !entry.file_type().is_some_and(|ft| ft.is_file()) {
        continue;
      }
      if path.extension().and_then(|ext| ext.to_str()) != Some("md") {
        continue;
      }

      let absolute = match path.canonicalize() {
        Ok(absolute) => absolute,
        Err(err) => {
          warn!(path = %path.display(), error = %err, "failed to canonicalize path, skipping");
          continue;
        }
      };

      let mtime = match std::fs::metadata(&absolute).and_then(|meta| meta.modified()) {
        Ok(modified) => systemtime_to_secs(modified),
        Err(err) => {
          warn!(path = %absolute.display(), error = %err, "failed to read metadata, skipping");
          continue;
        }
      };

      files.push(FileRef { path: absolute, mtime });
    }
  }

  files.sort_by(|a, b| a.path.cmp(&b.path));
  files.dedup_by(|a, b| a.path == b.path);
  files
}

/// Read file contents on demand.
pub fn read_contents(path: &Path) -> Result<String, LoaderError> {
  std::fs::read_to_string(path).map_err(|source| LoaderError::Read {
    path: path.to_path_buf(),
    source,
  })
}

fn systemtime_to_secs(time: SystemTime) -> f64 {
  time
    .duration_since(SystemTime::UNIX_EPOCH)
    .map(|d| d.as_secs_f64())
    .unwrap_or(0.0)
}
