use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

/// Host events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
  /// Periodic tick carrying the time since the previous tick
  Tick(Duration),
  /// Ctrl-C was pressed
  Shutdown,
}

/// Event handler that produces ticks from a timer plus a shutdown signal
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  /// Create a new event handler with the given tick rate
  pub fn new(tick_rate: Duration) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    // Spawn tick timer
    let tick_tx = tx.clone();
    tokio::spawn(async move {
      let mut interval = tokio::time::interval(tick_rate);
      interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

      // The first tick completes immediately
      interval.tick().await;
      let mut last = Instant::now();

      loop {
        interval.tick().await;
        let now = Instant::now();
        if tick_tx.send(Event::Tick(now - last)).is_err() {
          break;
        }
        last = now;
      }
    });

    // Spawn shutdown listener
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        let _ = tx.send(Event::Shutdown);
      }
    });

    Self { rx }
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}
