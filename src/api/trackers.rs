//! Per-account completion trackers built on the polling cache.

use color_eyre::{eyre::eyre, Result};
use futures::future::FutureExt;
use serde::Deserialize;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::poll::{
  ChangeEvent, ChangeNotifier, CycleOutcome, DataSource, FetchFn, PollingCache, RefreshInterval,
  StateHooks, SubscriptionId,
};

use super::client::ApiClient;
use super::types::Permission;

/// Account endpoints with daily completion state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackerKind {
  Worldbosses,
  Mapchests,
}

impl TrackerKind {
  pub fn name(&self) -> &'static str {
    match self {
      TrackerKind::Worldbosses => "worldbosses",
      TrackerKind::Mapchests => "mapchests",
    }
  }

  pub fn endpoint(&self) -> &'static str {
    match self {
      TrackerKind::Worldbosses => "/v2/account/worldbosses",
      TrackerKind::Mapchests => "/v2/account/mapchests",
    }
  }
}

impl fmt::Display for TrackerKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

/// A completion appearing or disappearing on the account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
  /// Newly completed since the last refresh
  Completed { tracker: &'static str, id: String },
  /// No longer reported as completed (e.g. after the daily reset)
  Reset { tracker: &'static str, id: String },
}

/// Unregisters the tracker's subscribers when the cache unloads.
struct TrackerHooks {
  notifier: Arc<ChangeNotifier<String>>,
  subscriptions: Mutex<Vec<SubscriptionId>>,
}

impl StateHooks for TrackerHooks {
  fn do_unload(&self) {
    let subscriptions = std::mem::take(
      &mut *self
        .subscriptions
        .lock()
        .unwrap_or_else(|e| e.into_inner()),
    );
    for id in subscriptions {
      self.notifier.unsubscribe(id);
    }
  }
}

/// Tracks which ids an account endpoint currently reports as completed.
pub struct CompletionTracker<S: DataSource = ApiClient> {
  name: &'static str,
  cache: Arc<PollingCache<String, S>>,
}

impl<S: DataSource> CompletionTracker<S> {
  /// Build a tracker over `fetch`, forwarding completions to `completions`.
  pub fn new(
    name: &'static str,
    source: Arc<S>,
    fetch: FetchFn<S, String>,
    required: impl IntoIterator<Item = S::Permission>,
    interval: RefreshInterval,
    completions: mpsc::UnboundedSender<Completion>,
  ) -> Self {
    let notifier = Arc::new(ChangeNotifier::new());

    let id = notifier.subscribe(move |event: &ChangeEvent<String>| {
      let completion = match event {
        ChangeEvent::ItemAdded(id) => Completion::Completed {
          tracker: name,
          id: id.clone(),
        },
        ChangeEvent::ItemRemoved(id) => Completion::Reset {
          tracker: name,
          id: id.clone(),
        },
        ChangeEvent::CollectionUpdated => return Ok(()),
      };
      completions
        .send(completion)
        .map_err(|_| eyre!("completion receiver for {} dropped", name))
    });

    let hooks = Arc::new(TrackerHooks {
      notifier: Arc::clone(&notifier),
      subscriptions: Mutex::new(vec![id]),
    });

    let cache = PollingCache::new(name, source, fetch)
      .with_permissions(required)
      .with_interval(interval)
      .with_notifier(notifier)
      .with_hooks(hooks);

    Self {
      name,
      cache: Arc::new(cache),
    }
  }

  pub fn name(&self) -> &'static str {
    self.name
  }

  pub fn cache(&self) -> &Arc<PollingCache<String, S>> {
    &self.cache
  }

  pub fn is_completed(&self, id: &str) -> bool {
    self.cache.contains_identity(&id.to_string())
  }

  /// Ids currently reported as completed.
  pub fn completed(&self) -> Vec<String> {
    self.cache.snapshot().to_vec()
  }

  pub async fn start(&self, await_load: bool) -> Option<CycleOutcome> {
    self.cache.start(await_load).await
  }

  pub fn on_tick(&self, elapsed: Duration) -> Option<JoinHandle<CycleOutcome>> {
    self.cache.on_tick(elapsed)
  }

  pub async fn reload(&self) -> CycleOutcome {
    self.cache.reload().await
  }

  pub async fn unload(&self) {
    self.cache.unload().await
  }

  pub async fn save(&self) -> Result<()> {
    self.cache.save().await
  }
}

impl CompletionTracker<ApiClient> {
  /// Tracker for one of the account completion endpoints.
  pub fn for_kind(
    kind: TrackerKind,
    client: Arc<ApiClient>,
    interval: RefreshInterval,
    completions: mpsc::UnboundedSender<Completion>,
  ) -> Self {
    let endpoint = kind.endpoint();
    let fetch: FetchFn<ApiClient, String> = Box::new(move |client: Arc<ApiClient>| {
      async move { client.get_json::<Vec<String>>(endpoint).await }.boxed()
    });

    Self::new(
      kind.name(),
      client,
      fetch,
      [Permission::Account, Permission::Progression],
      interval,
      completions,
    )
  }

  pub fn worldbosses(
    client: Arc<ApiClient>,
    interval: RefreshInterval,
    completions: mpsc::UnboundedSender<Completion>,
  ) -> Self {
    Self::for_kind(TrackerKind::Worldbosses, client, interval, completions)
  }

  pub fn mapchests(
    client: Arc<ApiClient>,
    interval: RefreshInterval,
    completions: mpsc::UnboundedSender<Completion>,
  ) -> Self {
    Self::for_kind(TrackerKind::Mapchests, client, interval, completions)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::poll::testing::ScriptedSource;

  fn tracker(
    source: &Arc<ScriptedSource>,
  ) -> (
    CompletionTracker<ScriptedSource>,
    mpsc::UnboundedReceiver<Completion>,
  ) {
    let (tx, rx) = mpsc::unbounded_channel();
    let tracker = CompletionTracker::new(
      "worldbosses",
      Arc::clone(source),
      ScriptedSource::fetcher(),
      ["account", "progression"],
      RefreshInterval::Never,
      tx,
    );
    (tracker, rx)
  }

  fn drain(rx: &mut mpsc::UnboundedReceiver<Completion>) -> Vec<Completion> {
    let mut out = Vec::new();
    while let Ok(completion) = rx.try_recv() {
      out.push(completion);
    }
    out
  }

  #[tokio::test]
  async fn test_completions_follow_cache_changes() {
    let source = ScriptedSource::new(&["account", "progression"]);
    source.push_items(&["tequatl_the_sunless", "shadow_behemoth"]);
    source.push_items(&["shadow_behemoth"]);
    let (tracker, mut rx) = tracker(&source);

    tracker.start(true).await;
    assert!(tracker.is_completed("tequatl_the_sunless"));
    assert_eq!(
      drain(&mut rx),
      vec![
        Completion::Completed {
          tracker: "worldbosses",
          id: "tequatl_the_sunless".to_string()
        },
        Completion::Completed {
          tracker: "worldbosses",
          id: "shadow_behemoth".to_string()
        },
      ]
    );

    tracker.cache().refresh().await;
    assert!(!tracker.is_completed("tequatl_the_sunless"));
    assert_eq!(
      drain(&mut rx),
      vec![Completion::Reset {
        tracker: "worldbosses",
        id: "tequatl_the_sunless".to_string()
      }]
    );
    assert_eq!(tracker.completed(), vec!["shadow_behemoth".to_string()]);
  }

  #[tokio::test]
  async fn test_unload_unsubscribes_and_clears() {
    let source = ScriptedSource::new(&["account", "progression"]);
    source.push_items(&["a"]);
    let (tracker, mut rx) = tracker(&source);

    tracker.start(true).await;
    assert_eq!(tracker.cache().notifier().subscriber_count(), 1);
    drain(&mut rx);

    tracker.unload().await;
    assert_eq!(tracker.cache().notifier().subscriber_count(), 0);
    assert!(!tracker.is_completed("a"));
    assert!(tracker.save().await.is_ok());
  }

  #[tokio::test]
  async fn test_dropped_receiver_does_not_break_cycle() {
    let source = ScriptedSource::new(&["account", "progression"]);
    source.push_items(&["a"]);
    let (tracker, rx) = tracker(&source);
    drop(rx);

    assert!(tracker.start(true).await.unwrap().is_updated());
    assert!(tracker.is_completed("a"));
  }

  #[test]
  fn test_kind_endpoints() {
    assert_eq!(TrackerKind::Worldbosses.endpoint(), "/v2/account/worldbosses");
    assert_eq!(TrackerKind::Mapchests.to_string(), "mapchests");
  }
}
