use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use offline_first::cache::{CacheSource, CacheStorage, SqliteStorage};
use offline_first::db::Database;
use offline_first::network::{Destination, HttpTransport, Request, Transport};
use offline_first::queue::{ReplayError, ReplayReport, SqliteQueue};
use offline_first::{Config, Intercepted, Interceptor, SyncTrigger};

#[derive(Parser, Debug)]
#[command(name = "offline-first")]
#[command(about = "Offline-first request interception with cached strategies and deferred writes")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offline-first/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Also log to stderr
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Send a request through the interceptor and print the answer
  Fetch {
    url: String,
    #[arg(short, long, default_value = "GET")]
    method: String,
    /// document, style, script, image, font or other
    #[arg(short, long, default_value = "other")]
    destination: String,
    /// Request body, sent as-is
    #[arg(short, long)]
    body: Option<String>,
  },
  /// Replay queued writes
  Sync {
    /// Tag to replay, e.g. attendance-sync
    tag: Option<String>,
    /// Replay every tag, as on reconnect
    #[arg(long, conflicts_with = "tag")]
    all: bool,
  },
  /// List caches with their entry counts
  Caches,
  /// List queued writes
  Queue,
}

fn init_tracing(log_dir: &Path, verbose: bool) -> WorkerGuard {
  // RUST_LOG overrides the default level (e.g., RUST_LOG=offline_first=debug)
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

  let file_appender = tracing_appender::rolling::daily(log_dir, "offline-first.log");
  let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

  let stderr = verbose.then(|| fmt::layer().with_writer(std::io::stderr).boxed());

  tracing_subscriber::registry()
    .with(fmt::layer().with_ansi(false).with_writer(file_writer))
    .with(stderr)
    .with(filter)
    .init();

  guard
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;

  let data_dir = config.data_dir()?;
  std::fs::create_dir_all(&data_dir)?;
  let _guard = init_tracing(&data_dir, args.verbose);
  info!(generation = %config.generation, "Starting");

  let db = Database::open(&data_dir.join("cache.db"))?;
  let storage = Arc::new(SqliteStorage::new(db.clone()));
  let transport = Arc::new(HttpTransport::new(Duration::from_secs(
    config.request_timeout_seconds,
  ))?);

  let mut interceptor = Interceptor::new(
    &config,
    Arc::clone(&storage),
    Arc::new(SqliteQueue::new(db)),
    Arc::clone(&transport),
  )?;
  interceptor.start().await?;

  match args.command {
    Command::Fetch {
      url,
      method,
      destination,
      body,
    } => {
      let mut request = Request::parse(&url)?
        .with_method(&method)
        .with_destination(destination.parse::<Destination>()?);
      if let Some(body) = body {
        request = request.with_body(body);
      }

      match interceptor.handle_fetch(&request).await {
        Intercepted::Respond(result) => {
          let age = match (result.source, result.cached_at) {
            (CacheSource::CacheFresh | CacheSource::CacheStale | CacheSource::Offline, Some(at)) => {
              format!(" (cached {})", at.to_rfc3339())
            }
            _ => String::new(),
          };
          println!("{} [{}]{}", result.data.status, result.source, age);
          println!("{}", String::from_utf8_lossy(&result.data.body));
        }
        Intercepted::Passthrough => {
          let response = transport.send(&request).await?;
          println!("{} [passthrough]", response.status);
          println!("{}", String::from_utf8_lossy(&response.body));
        }
      }
    }
    Command::Sync { tag, all } => {
      let trigger = match tag {
        Some(tag) if !all => SyncTrigger::Tag(tag),
        _ => SyncTrigger::Reconnect,
      };
      for result in interceptor.on_sync(&trigger).await {
        print_replay(result);
      }
    }
    Command::Caches => {
      for name in storage.list_names()? {
        println!("{:<50} {:>6}", name, storage.keys(&name)?.len());
      }
    }
    Command::Queue => {
      for write in interceptor.queued_writes()? {
        println!(
          "{:>5}  {:<20} {:<6} {}  enqueued {}  retries {}",
          write.id,
          write.tag,
          write.method,
          write.url,
          write.enqueued_at.to_rfc3339(),
          write.retry_count
        );
      }
    }
  }

  Ok(())
}

fn print_replay(result: Result<ReplayReport, ReplayError>) {
  let report = match result {
    Ok(report) => report,
    Err(ReplayError::Incomplete(report)) => {
      eprintln!("{}: {} write(s) still queued", report.tag, report.retried.len());
      report
    }
    Err(e) => {
      eprintln!("{}", e);
      return;
    }
  };
  println!(
    "{}: delivered {}, retried {}, discarded {}",
    report.tag,
    report.delivered.len(),
    report.retried.len(),
    report.discarded.len()
  );
  for write in &report.discarded {
    println!("  discarded {} {} (retries {})", write.method, write.url, write.retry_count);
  }
}
