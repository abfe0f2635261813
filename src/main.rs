use acctwatch::api::{ApiClient, Completion, CompletionTracker};
use acctwatch::config::Config;
use acctwatch::event::{Event, EventHandler};
use acctwatch::logging;
use acctwatch::poll::IntervalGate;
use chrono::Local;
use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "acctwatch")]
#[command(about = "Watch Guild Wars 2 account completions as they change")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/acctwatch/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Override the refresh interval in milliseconds
  #[arg(short, long)]
  interval_ms: Option<u64>,

  /// Load once, print what is completed, and exit
  #[arg(long)]
  once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = Config::load(args.config.as_deref())?;
  if let Some(interval_ms) = args.interval_ms {
    config.poll.interval_ms = interval_ms;
  }

  let _log_guard = logging::init(config.log_dir.as_deref())?;

  let client = Arc::new(ApiClient::new(&config)?);
  info!(key = %client.key_fingerprint(), url = %config.api.url, "Starting acctwatch");

  if let Err(e) = client.refresh_permissions().await {
    warn!("Could not read API key permissions: {}", e);
  }

  let (completion_tx, mut completions) = mpsc::unbounded_channel();
  let trackers: Vec<CompletionTracker> = config
    .trackers
    .iter()
    .map(|kind| {
      CompletionTracker::for_kind(
        *kind,
        Arc::clone(&client),
        config.poll.refresh_interval(),
        completion_tx.clone(),
      )
    })
    .collect();
  drop(completion_tx);

  let await_load = config.poll.await_load || args.once;
  for tracker in &trackers {
    tracker.start(await_load).await;
  }

  if args.once {
    for tracker in &trackers {
      let completed = tracker.completed();
      println!("{} ({} completed)", tracker.name(), completed.len());
      for id in completed {
        println!("  {}", id);
      }
    }
    shutdown(&trackers).await;
    return Ok(());
  }

  let mut token_gate = IntervalGate::new(config.poll.token_refresh_interval());
  let mut events = EventHandler::new(config.poll.tick_rate());

  // Main loop
  loop {
    tokio::select! {
      Some(completion) = completions.recv() => print_completion(&completion),
      event = events.next() => match event {
        Some(Event::Tick(elapsed)) => {
          for tracker in &trackers {
            tracker.on_tick(elapsed);
          }

          if token_gate.should_run(elapsed) {
            let client = Arc::clone(&client);
            tokio::spawn(async move {
              if let Err(e) = client.refresh_permissions().await {
                warn!("Could not refresh API key permissions: {}", e);
              }
            });
          }
        }
        Some(Event::Shutdown) | None => break,
      },
    }
  }

  shutdown(&trackers).await;
  Ok(())
}

async fn shutdown(trackers: &[CompletionTracker]) {
  info!("Shutting down");
  for tracker in trackers {
    tracker.unload().await;
  }
}

fn print_completion(completion: &Completion) {
  let now = Local::now().format("%H:%M:%S");
  match completion {
    Completion::Completed { tracker, id } => println!("{} {:<12} completed {}", now, tracker, id),
    Completion::Reset { tracker, id } => println!("{} {:<12} reset     {}", now, tracker, id),
  }
}
