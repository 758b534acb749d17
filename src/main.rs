use clap::Parser;
use color_eyre::Result;
use rally_sync::cache::Filter;
use rally_sync::config::Config;
use rally_sync::logging::{self, LogTarget};
use rally_sync::rally::{CachedRallyClient, EntityType};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "rally-sync")]
#[command(about = "Query Rally through a local cache")]
#[command(version)]
struct Args {
  /// Entity type: projects, users, iterations, user-stories or defects
  entity: EntityType,

  /// Field filter as KEY=VALUE (repeatable, all must match)
  #[arg(short, long = "filter", value_parser = parse_filter)]
  filters: Vec<(String, String)>,

  /// Maximum number of records
  #[arg(short, long)]
  limit: Option<usize>,

  /// Run the same query this many times to exercise the cache
  #[arg(long, default_value_t = 1)]
  repeat: usize,

  /// Print cache statistics afterwards
  #[arg(long)]
  stats: bool,

  /// Prefetch projects, users and iterations first
  #[arg(long)]
  warm: bool,

  /// Path to config file (default: $XDG_CONFIG_HOME/rally-sync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Project ref to scope queries to (e.g. /project/123)
  #[arg(short, long)]
  project: Option<String>,

  /// Log to stderr instead of the log file
  #[arg(short, long)]
  verbose: bool,
}

fn parse_filter(s: &str) -> Result<(String, String), String> {
  match s.split_once('=') {
    Some((key, value)) if !key.trim().is_empty() => {
      Ok((key.trim().to_string(), value.to_string()))
    }
    _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let _log_guard = logging::init(if args.verbose {
    LogTarget::Stderr
  } else {
    LogTarget::default_file()
  })?;

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  // Override project if specified on command line
  let config = if let Some(project) = args.project {
    Config {
      default_project: Some(project),
      ..config
    }
  } else {
    config
  };

  let client = CachedRallyClient::from_config(&config)?;

  if args.warm {
    client.warm_up().await?;
  }

  let filter: Filter = args.filters.into_iter().collect();
  for run in 1..=args.repeat.max(1) {
    let result = client.fetch(args.entity, &filter, args.limit).await?;
    info!(run, entity = %args.entity, provenance = %result.provenance, count = result.count, "Query served");
    println!("{}", serde_json::to_string_pretty(&result)?);
  }

  if args.stats {
    println!("{}", serde_json::to_string_pretty(&client.stats(None))?);
  }

  client.destroy_all();
  Ok(())
}
