mod cache;
mod config;
mod db;
mod event;
mod host;
mod net;
mod notify;
mod queue;
mod registry;
mod task;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cache::{CacheSource, CacheStorage, MemoryStorage, SqliteStorage};
use crate::config::Config;
use crate::db::Database;
use crate::event::{ClickOutcome, EventOutcome, WorkerEvent};
use crate::host::WorkerHost;
use crate::net::{HttpFetcher, Request};
use crate::notify::LogNotifier;
use crate::queue::{MemoryQueue, MutationQueue, NewMutation, SqliteQueue};
use crate::registry::{MemoryRegistry, RegistrationStore, SqliteRegistry, StoredVersion};
use crate::task::EventTask;
use crate::worker::{OfflineWorker, WorkerContext, WorkerSettings};

#[derive(Parser, Debug)]
#[command(name = "docworker")]
#[command(about = "Offline cache worker for the document manager")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/docworker/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Keep caches and the mutation queue in memory for this run only
  #[arg(long)]
  in_memory: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Register the configured version: precache, then activate or wait
  Install,
  /// Let a waiting version take over now
  SkipWaiting,
  /// All pages controlled by the active version have closed
  ClientsClosed,
  /// Purge namespaces outside the active version's allow-list
  Activate,
  /// Serve one request through the worker
  Fetch {
    /// Absolute URL or path relative to the origin
    url: String,
    #[arg(short, long, default_value = "GET")]
    method: String,
    #[arg(short, long)]
    body: Option<String>,
  },
  /// Queue a write for the next sync
  Enqueue {
    /// Write payload
    payload: String,
    /// Target resource (default: sync endpoint from config)
    #[arg(short, long)]
    target: Option<String>,
    #[arg(short, long, default_value = "POST")]
    method: String,
    #[arg(long, default_value = "application/json")]
    content_type: String,
  },
  /// Connectivity restored: replay queued writes
  Sync {
    /// Sync tag (default: tag from config)
    #[arg(short, long)]
    tag: Option<String>,
  },
  /// Deliver a push message
  Push {
    message: Option<String>,
  },
  /// Pick a notification action ("explore" opens the app)
  Click {
    action: String,
  },
  /// Show cache namespaces and queued writes
  Status,
}

fn init_tracing() -> Result<WorkerGuard> {
  // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

  let log_dir = config::data_dir()?.join("logs");
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;
  let (file_writer, guard) =
    tracing_appender::non_blocking(tracing_appender::rolling::daily(&log_dir, "docworker.log"));

  tracing_subscriber::registry()
    .with(fmt::layer().with_writer(io::stderr))
    .with(fmt::layer().with_writer(file_writer).with_ansi(false))
    .with(filter)
    .init();

  Ok(guard)
}

struct Services {
  ctx: WorkerContext,
  registry: Arc<dyn RegistrationStore>,
}

fn build_services(config: &Config, in_memory: bool) -> Result<Services> {
  let (caches, queue, registry): (
    Arc<dyn CacheStorage>,
    Arc<dyn MutationQueue>,
    Arc<dyn RegistrationStore>,
  ) = if in_memory {
    (
      Arc::new(MemoryStorage::new()),
      Arc::new(MemoryQueue::new()),
      Arc::new(MemoryRegistry::new()),
    )
  } else {
    let db = Arc::new(Database::open(&config.database_path()?)?);
    (
      Arc::new(SqliteStorage::new(db.clone())),
      Arc::new(SqliteQueue::new(db.clone())),
      Arc::new(SqliteRegistry::new(db)),
    )
  };

  let fetcher = HttpFetcher::new(config.origin.clone(), config.fetch_timeout())?;

  Ok(Services {
    ctx: WorkerContext {
      caches,
      fetcher: Arc::new(fetcher),
      queue,
      notifier: Arc::new(LogNotifier),
    },
    registry,
  })
}

/// Rebuild a registered version with the current configuration.
fn worker_for(config: &Config, ctx: &WorkerContext, stored: &StoredVersion) -> OfflineWorker {
  let mut settings = WorkerSettings::from_config(config);
  settings.version = stored.version.clone();
  settings.static_name = stored.static_name.clone();
  settings.dynamic_name = stored.dynamic_name.clone();
  OfflineWorker::new(ctx.clone(), settings)
}

/// Poll a handler until it settles, abandoning it on Ctrl-C.
async fn settle<T: Send + 'static>(mut task: EventTask<T>) -> Result<T> {
  let mut tick = tokio::time::interval(Duration::from_millis(50));
  let interrupted = tokio::signal::ctrl_c();
  tokio::pin!(interrupted);

  loop {
    tokio::select! {
      _ = tick.tick() => {
        if task.poll() {
          if let Some(error) = task.state().error() {
            debug!(event = task.event(), error, "Handler failed");
          }
          return task.wait().await;
        }
      }
      _ = &mut interrupted => {
        let event = task.event();
        warn!(event, "Interrupted, abandoning handler");
        task.abandon();
        return Err(eyre!("{} interrupted", event));
      }
    }
  }
}

/// Dispatch to the active worker and wait for the outcome.
async fn deliver(host: &WorkerHost, event: WorkerEvent) -> Result<EventOutcome> {
  if host.active().is_none() {
    return Err(eyre!("No worker installed, run `docworker install` first"));
  }
  settle(host.dispatch(event)?).await
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_tracing()?;

  let config = Config::load(args.config.as_deref())?;
  let Services { ctx, registry } = build_services(&config, args.in_memory)?;
  let mut host = WorkerHost::restore(config.skip_waiting, registry, |stored| {
    worker_for(&config, &ctx, stored)
  })?;

  match args.command {
    Command::Install => {
      let worker = OfflineWorker::new(ctx.clone(), WorkerSettings::from_config(&config));
      let state = host.register(worker).await?;
      println!("{} {}", config.cache.version, state);
      for version in host.redundant_versions() {
        println!("{} redundant", version);
      }
      if host.controls_clients() {
        println!("clients claimed");
      }
    }
    Command::SkipWaiting => {
      if host.skip_waiting().await? {
        println!("{} active", host.active_version().unwrap_or_default());
      } else {
        println!("nothing waiting");
      }
    }
    Command::ClientsClosed => {
      if host.clients_closed().await? {
        println!("{} active", host.active_version().unwrap_or_default());
      } else {
        println!("nothing waiting");
      }
    }
    Command::Activate => {
      let worker = host
        .active()
        .cloned()
        .ok_or_else(|| eyre!("No worker installed, run `docworker install` first"))?;
      let task = EventTask::spawn("activate", async move { worker.activate().await });
      for name in settle(task).await? {
        println!("purged {}", name);
      }
    }
    Command::Fetch { url, method, body } => {
      let url = config
        .origin
        .join(&url)
        .map_err(|e| eyre!("Invalid URL '{}': {}", url, e))?;
      let method =
        Method::from_bytes(method.as_bytes()).map_err(|_| eyre!("Invalid method '{}'", method))?;
      let mut request = Request::new(method, url);
      if let Some(body) = body {
        request = request.with_body(body);
      }

      match deliver(&host, WorkerEvent::Fetch(request)).await? {
        EventOutcome::Fetched(result) => {
          println!(
            "{} {} {} bytes",
            result.data.status,
            result.source,
            result.data.body.len()
          );
          if result.source == CacheSource::Offline {
            if let Some(cached_at) = result.cached_at {
              println!("network unreachable, copy cached at {}", cached_at.to_rfc3339());
            }
          }
        }
        other => return Err(eyre!("Unexpected outcome for fetch: {:?}", other)),
      }
    }
    Command::Enqueue {
      payload,
      target,
      method,
      content_type,
    } => {
      let mutation = ctx.queue.enqueue(NewMutation {
        method: method.to_uppercase(),
        target: target.unwrap_or_else(|| config.sync.endpoint.clone()),
        content_type: Some(content_type),
        payload: payload.into_bytes(),
      })?;
      println!("queued #{} {} {}", mutation.id, mutation.method, mutation.target);
    }
    Command::Sync { tag } => {
      if host.active().is_none() {
        return Err(eyre!("No worker installed, run `docworker install` first"));
      }
      host.register_sync(tag.as_deref().unwrap_or(&config.sync.tag));

      for (tag, report) in host.connectivity_restored().await? {
        match report {
          Some(report) => println!(
            "{}: {} attempted, {} synced, {} failed",
            tag,
            report.attempted,
            report.synced.len(),
            report.failed.len()
          ),
          None => println!("{}: ignored", tag),
        }
      }
      for tag in host.pending_sync_tags() {
        println!("{}: still pending", tag);
      }
    }
    Command::Push { message } => {
      match deliver(&host, WorkerEvent::Push { payload: message }).await? {
        EventOutcome::Notified(notification) => {
          println!("{}", serde_json::to_string_pretty(&notification)?)
        }
        other => return Err(eyre!("Unexpected outcome for push: {:?}", other)),
      }
    }
    Command::Click { action } => {
      match deliver(&host, WorkerEvent::NotificationClick { action }).await? {
        EventOutcome::Clicked(ClickOutcome::OpenWindow(url)) => println!("open {}", url),
        EventOutcome::Clicked(ClickOutcome::Closed) => println!("closed"),
        other => return Err(eyre!("Unexpected outcome for click: {:?}", other)),
      }
    }
    Command::Status => {
      match host.active_version() {
        Some(version) => println!("active: {}", version),
        None => println!("active: none"),
      }
      if let Some(version) = host.waiting_version() {
        println!("waiting: {}", version);
      }
      for name in ctx.caches.namespaces()? {
        println!("{:<32} {} entries", name, ctx.caches.keys(&name)?.len());
      }
      let pending = ctx.queue.pending()?;
      println!("{} pending mutations", pending.len());
      for mutation in pending {
        println!(
          "  #{} {} {} (attempts: {}{})",
          mutation.id,
          mutation.method,
          mutation.target,
          mutation.attempts,
          mutation
            .last_error
            .map(|e| format!(", last error: {}", e))
            .unwrap_or_default()
        );
      }
    }
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::worker::testing::{test_config, ScriptedFetcher};

  #[tokio::test]
  async fn test_settle_outlasts_many_ticks() {
    let task = EventTask::spawn("fetch", async {
      tokio::time::sleep(Duration::from_millis(220)).await;
      Ok(7)
    });

    assert_eq!(settle(task).await.unwrap(), 7);
  }

  #[tokio::test]
  async fn test_settle_reports_handler_failure() {
    let task: EventTask<()> = EventTask::spawn("push", async { Err(eyre!("no payload")) });

    let err = settle(task).await.unwrap_err();
    assert!(err.to_string().contains("no payload"));
  }

  #[test]
  fn test_worker_for_uses_stored_namespaces() {
    let config = test_config();
    let ctx = WorkerContext {
      caches: Arc::new(MemoryStorage::new()),
      fetcher: Arc::new(ScriptedFetcher::new()),
      queue: Arc::new(MemoryQueue::new()),
      notifier: Arc::new(LogNotifier),
    };
    let stored = StoredVersion {
      version: "v0".to_string(),
      static_name: "docworker-static-v0".to_string(),
      dynamic_name: "docworker-dynamic-v0".to_string(),
    };

    let worker = worker_for(&config, &ctx, &stored);

    assert_eq!(worker.version(), "v0");
    assert_eq!(StoredVersion::of(&worker), stored);
  }
}
