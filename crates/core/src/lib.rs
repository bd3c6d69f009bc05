pub mod chunk;
pub mod config;

pub use chunk::{Chunk, Header, compute_chunk_id};
pub use config::{CliOverrides, Config, ConfigError};
