use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use mdqa_core::{CliOverrides, Config};
use tracing_subscriber::EnvFilter;

/// Local Markdown question-answering server.
#[derive(Debug, Parser)]
#[command(name = "mdqa-server", version, about)]
struct Cli {
  /// Port to listen on, overriding the config file and defaults.
  #[arg(long)]
  port: Option<u16>,

  /// Comma-separated list of directories to index, overriding the config file.
  #[arg(long, value_delimiter = ',')]
  directories: Option<Vec<String>>,

  /// Seconds between incremental reload passes.
  #[arg(long)]
  reload_interval: Option<u64>,

  /// Name of the index to serve, for sites that keep more than one.
  #[arg(long)]
  index_name: Option<String>,

  /// Path to a YAML config file, overriding the default `~/.md-qa/config.yaml`.
  #[arg(long)]
  config: Option<PathBuf>,
}

impl From<Cli> for CliOverrides {
  fn from(cli: Cli) -> Self {
    CliOverrides {
      port: cli.port,
      directories: cli.directories,
      reload_interval: cli.reload_interval,
      index_name: cli.index_name,
      config_path: cli.config,
    }
  }
}

#[tokio::main]
async fn main() -> ExitCode {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let cli = Cli::parse();
  let config = match Config::load(&cli.into()) {
    Ok(config) => config,
    Err(err) => {
      tracing::error!(error = %err, "configuration error");
      return ExitCode::FAILURE;
    }
  };

  tracing::info!(%config, "starting with configuration");

  match mdqa_server::run(config).await {
    Ok(()) => ExitCode::SUCCESS,
    Err(err) => {
      tracing::error!(error = %err, "server exited with an error");
      ExitCode::FAILURE
    }
  }
}
