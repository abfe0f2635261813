//! Periodically refreshed cache of an account-scoped remote collection.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::interval::{IntervalGate, RefreshInterval};
use super::lock::ExclusiveAsyncLock;
use super::notifier::{ChangeEvent, ChangeNotifier, SubscriptionId};
use super::permissions::{self, PermissionSet};
use super::traits::{DataSource, FetchError, FetchFn, NoHooks, StateHooks, Tracked};

/// How a single refresh cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
  /// The fetch succeeded and the collection was replaced
  Updated { added: usize, removed: usize },
  /// The data source did not grant the needed permissions; nothing was fetched
  Skipped,
  /// The fetch failed; the collection is unchanged
  Failed { authorization: bool },
}

impl CycleOutcome {
  pub fn is_updated(&self) -> bool {
    matches!(self, CycleOutcome::Updated { .. })
  }
}

type SharedCycle = Shared<BoxFuture<'static, CycleOutcome>>;

/// The load that is currently in flight, if any.
#[derive(Default)]
struct LoadState {
  generation: u64,
  in_flight: Option<(u64, SharedCycle)>,
}

impl LoadState {
  /// The in-flight load, ignoring one that already finished but was never cleared.
  fn pending(&self) -> Option<(u64, SharedCycle)> {
    self
      .in_flight
      .as_ref()
      .filter(|(_, pending)| pending.peek().is_none())
      .cloned()
  }
}

/// Aborts the permission watcher when dropped.
#[derive(Debug)]
pub struct PermissionSubscription {
  task: JoinHandle<()>,
}

impl Drop for PermissionSubscription {
  fn drop(&mut self) {
    self.task.abort();
  }
}

/// Cache of a remote collection that refreshes itself on an interval.
///
/// Each refresh cycle runs under an exclusive lock: it checks permissions,
/// fetches, swaps the new collection in, then emits one `ItemAdded` or
/// `ItemRemoved` per difference followed by a single `CollectionUpdated`.
/// A cycle that is skipped or fails leaves the collection exactly as it was.
///
/// Readers see the last published snapshot and never block on a cycle.
pub struct PollingCache<T: Tracked, S: DataSource> {
  name: String,
  source: Arc<S>,
  fetch: FetchFn<S, T>,
  required: PermissionSet<S::Permission>,
  hooks: Arc<dyn StateHooks>,
  notifier: Arc<ChangeNotifier<T>>,
  items: ExclusiveAsyncLock<Vec<T>>,
  snapshot: RwLock<Arc<[T]>>,
  last_updated: RwLock<Option<DateTime<Utc>>>,
  gate: Mutex<IntervalGate>,
  load_state: Mutex<LoadState>,
  subscription: Mutex<Option<PermissionSubscription>>,
  unloaded: AtomicBool,
}

fn locked<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
  mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl<T: Tracked, S: DataSource> PollingCache<T, S> {
  /// Create a cache that fetches from `source` with `fetch`.
  ///
  /// Defaults: no permission requirement, [`RefreshInterval::default`], no hooks.
  pub fn new(name: impl Into<String>, source: Arc<S>, fetch: FetchFn<S, T>) -> Self {
    Self {
      name: name.into(),
      source,
      fetch,
      required: PermissionSet::new(),
      hooks: Arc::new(NoHooks),
      notifier: Arc::new(ChangeNotifier::new()),
      items: ExclusiveAsyncLock::new(Vec::new()),
      snapshot: RwLock::new(Arc::from(Vec::new())),
      last_updated: RwLock::new(None),
      gate: Mutex::new(IntervalGate::new(RefreshInterval::default())),
      load_state: Mutex::new(LoadState::default()),
      subscription: Mutex::new(None),
      unloaded: AtomicBool::new(false),
    }
  }

  /// Permissions that must all be granted before a fetch is attempted.
  pub fn with_permissions(mut self, required: impl IntoIterator<Item = S::Permission>) -> Self {
    self.required = required.into_iter().collect();
    self
  }

  pub fn with_interval(mut self, interval: RefreshInterval) -> Self {
    self.gate = Mutex::new(IntervalGate::new(interval));
    self
  }

  pub fn with_hooks(mut self, hooks: Arc<dyn StateHooks>) -> Self {
    self.hooks = hooks;
    self
  }

  /// Share a notifier created elsewhere, e.g. by the owner of the hooks.
  pub fn with_notifier(mut self, notifier: Arc<ChangeNotifier<T>>) -> Self {
    self.notifier = notifier;
    self
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn required_permissions(&self) -> &PermissionSet<S::Permission> {
    &self.required
  }

  pub fn notifier(&self) -> &Arc<ChangeNotifier<T>> {
    &self.notifier
  }

  pub fn subscribe<F>(&self, subscriber: F) -> SubscriptionId
  where
    F: Fn(&ChangeEvent<T>) -> Result<()> + Send + Sync + 'static,
  {
    self.notifier.subscribe(subscriber)
  }

  pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
    self.notifier.unsubscribe(id)
  }

  // --------------------------------------------------------------------------
  // Queries
  // --------------------------------------------------------------------------

  /// The last complete collection published by a cycle or a clear.
  pub fn snapshot(&self) -> Arc<[T]> {
    Arc::clone(&self.snapshot.read().unwrap_or_else(|e| e.into_inner()))
  }

  pub fn len(&self) -> usize {
    self.snapshot().len()
  }

  pub fn is_empty(&self) -> bool {
    self.snapshot().is_empty()
  }

  /// When the collection was last replaced by a successful fetch.
  pub fn last_updated(&self) -> Option<DateTime<Utc>> {
    *self.last_updated.read().unwrap_or_else(|e| e.into_inner())
  }

  /// Point-in-time membership check against the published snapshot.
  pub fn contains(&self, item: &T) -> bool {
    self.contains_identity(&item.identity())
  }

  pub fn contains_identity(&self, identity: &T::Identity) -> bool {
    self
      .snapshot()
      .iter()
      .any(|existing| existing.identity() == *identity)
  }

  /// Membership check that waits for any running cycle to finish first.
  ///
  /// Must not be called from a change subscriber; the cycle holds the lock.
  pub async fn contains_strict(&self, item: &T) -> bool {
    let identity = item.identity();
    let items = self.items.lock().await;
    items.iter().any(|existing| existing.identity() == identity)
  }

  /// Blocking variant of [`PollingCache::contains_strict`] for synchronous
  /// callers outside the async runtime.
  pub fn contains_blocking(&self, item: &T) -> bool {
    let identity = item.identity();
    let items = self.items.lock_blocking();
    items.iter().any(|existing| existing.identity() == identity)
  }

  // --------------------------------------------------------------------------
  // Lifecycle
  // --------------------------------------------------------------------------

  /// Subscribe to permission changes, then perform the first load.
  ///
  /// With `await_load` the first load completes before this returns;
  /// otherwise it runs in the background.
  pub async fn start(self: &Arc<Self>, await_load: bool) -> Option<CycleOutcome> {
    self.initialize();

    if await_load {
      Some(self.load().await)
    } else {
      let this = Arc::clone(self);
      tokio::spawn(async move {
        this.load().await;
      });
      None
    }
  }

  /// Start reacting to permission changes reported by the data source.
  pub fn initialize(self: &Arc<Self>) {
    let mut changes = self.source.watch_permissions();
    changes.borrow_and_update();

    let weak = Arc::downgrade(self);
    let task = tokio::spawn(async move {
      while changes.changed().await.is_ok() {
        let Some(cache) = weak.upgrade() else {
          break;
        };
        cache.on_permissions_changed();
      }
    });

    *locked(&self.subscription) = Some(PermissionSubscription { task });
  }

  /// Load the collection, joining a load that is already in flight.
  pub async fn load(self: &Arc<Self>) -> CycleOutcome {
    let (generation, pending) = {
      let mut state = locked(&self.load_state);
      match state.pending() {
        Some(pending) => pending,
        None => {
          let this = Arc::clone(self);
          Self::begin(&mut state, async move { this.refresh().await }.boxed())
        }
      }
    };

    let outcome = pending.await;
    self.finish_load(generation);
    outcome
  }

  /// Empty the collection and run the clear hook.
  ///
  /// Waits for an in-flight load first so the cleared state is not
  /// immediately overwritten by it.
  pub async fn clear(&self) -> Result<()> {
    self.wait_for_load().await;

    {
      let mut items = self.items.lock().await;
      items.clear();
      self.publish(&items, false);
    }

    self.hooks.do_clear().await
  }

  /// Clear and load again without letting another cycle run in between.
  pub async fn reload(self: &Arc<Self>) -> CycleOutcome {
    let (generation, pending) = loop {
      self.wait_for_load().await;

      let started = {
        let mut state = locked(&self.load_state);
        if state.pending().is_none() {
          let this = Arc::clone(self);
          Some(Self::begin(&mut state, async move { this.clear_and_refresh().await }.boxed()))
        } else {
          None
        }
      };
      if let Some(started) = started {
        break started;
      }
    };

    let outcome = pending.await;
    self.finish_load(generation);
    outcome
  }

  /// Detach from permission changes, clear, and run the unload hook.
  ///
  /// Only the first call has any effect. A cycle already holding the lock
  /// finishes before the clear; cycles queued behind it are skipped.
  pub async fn unload(&self) {
    if self.unloaded.swap(true, Ordering::SeqCst) {
      return;
    }

    drop(locked(&self.subscription).take());

    if let Err(e) = self.clear().await {
      warn!(cache = %self.name, "Error clearing on unload: {:#}", e);
    }

    self.hooks.do_unload();
  }

  /// Blocking join on [`PollingCache::unload`] for teardown from synchronous code.
  ///
  /// Inside a runtime this requires the multi-threaded scheduler.
  pub fn unload_blocking(&self) {
    match Handle::try_current() {
      Ok(handle) => tokio::task::block_in_place(|| handle.block_on(self.unload())),
      Err(_) => futures::executor::block_on(self.unload()),
    }
  }

  pub fn is_unloaded(&self) -> bool {
    self.unloaded.load(Ordering::SeqCst)
  }

  /// Persist the cache through the save hook.
  pub async fn save(&self) -> Result<()> {
    self.hooks.save().await
  }

  // --------------------------------------------------------------------------
  // Scheduling
  // --------------------------------------------------------------------------

  /// Advance the refresh interval by `elapsed` and spawn a cycle when due.
  ///
  /// Never blocks; the returned handle may be ignored.
  pub fn on_tick(self: &Arc<Self>, elapsed: Duration) -> Option<JoinHandle<CycleOutcome>> {
    if self.is_unloaded() {
      return None;
    }

    if !locked(&self.gate).should_run(elapsed) {
      return None;
    }

    let this = Arc::clone(self);
    Some(tokio::spawn(async move { this.refresh().await }))
  }

  /// Reload in the background after the data source's permissions changed.
  ///
  /// Nothing happens for caches without a permission requirement.
  pub fn on_permissions_changed(self: &Arc<Self>) -> Option<JoinHandle<CycleOutcome>> {
    if self.required.is_empty() || self.is_unloaded() {
      return None;
    }

    info!(cache = %self.name, "Permissions changed, reloading");
    let this = Arc::clone(self);
    Some(tokio::spawn(async move { this.reload().await }))
  }

  /// Run one fetch-diff-notify cycle.
  ///
  /// A cycle that only gets the lock after [`PollingCache::unload`] does nothing.
  pub async fn refresh(&self) -> CycleOutcome {
    let mut items = self.items.lock().await;
    if self.is_unloaded() {
      debug!(cache = %self.name, "Unloaded, skipping refresh");
      return CycleOutcome::Skipped;
    }
    self.run_cycle(&mut items).await
  }

  // --------------------------------------------------------------------------
  // Internals
  // --------------------------------------------------------------------------

  fn begin(state: &mut LoadState, cycle: BoxFuture<'static, CycleOutcome>) -> (u64, SharedCycle) {
    state.generation += 1;
    let pending = cycle.shared();
    state.in_flight = Some((state.generation, pending.clone()));
    (state.generation, pending)
  }

  fn finish_load(&self, generation: u64) {
    let mut state = locked(&self.load_state);
    if matches!(state.in_flight, Some((current, _)) if current == generation) {
      state.in_flight = None;
    }
  }

  async fn wait_for_load(&self) {
    let pending = locked(&self.load_state).pending();
    if let Some((_, pending)) = pending {
      pending.await;
    }
  }

  async fn clear_and_refresh(&self) -> CycleOutcome {
    let mut items = self.items.lock().await;
    if self.is_unloaded() {
      debug!(cache = %self.name, "Unloaded, skipping reload");
      return CycleOutcome::Skipped;
    }

    items.clear();
    self.publish(&items, false);

    if let Err(e) = self.hooks.do_clear().await {
      warn!(cache = %self.name, "Error running clear hook: {:#}", e);
    }

    self.run_cycle(&mut items).await
  }

  /// Body of a cycle. The caller holds the exclusive lock for its whole duration.
  async fn run_cycle(&self, items: &mut Vec<T>) -> CycleOutcome {
    info!(cache = %self.name, "Check for api objects");

    let granted = self.source.granted_permissions();
    if !permissions::is_satisfied(&self.required, &granted) {
      let missing: Vec<_> = permissions::missing(&self.required, &granted).collect();
      warn!(cache = %self.name, ?missing, "Data source does not grant needed permissions");
      return CycleOutcome::Skipped;
    }

    debug!(
      cache = %self.name,
      count = items.len(),
      "Got {} api objects from previous fetch: {:?}",
      items.len(),
      items
    );

    let fetched = AssertUnwindSafe((self.fetch)(Arc::clone(&self.source)))
      .catch_unwind()
      .await
      .unwrap_or_else(|_| Err(FetchError::Other("fetch function panicked".to_string())));

    let after = match fetched {
      Ok(after) => after,
      Err(e) => {
        let authorization = e.is_authorization();
        match &e {
          FetchError::MissingScopes(_) => {
            warn!(cache = %self.name, "Could not update api objects due to missing scopes: {}", e)
          }
          FetchError::InvalidAccessToken(_) => {
            warn!(cache = %self.name, "Could not update api objects due to invalid access token: {}", e)
          }
          _ => warn!(cache = %self.name, "Error updating api objects: {}", e),
        }
        return CycleOutcome::Failed { authorization };
      }
    };

    debug!(cache = %self.name, count = after.len(), "API returned objects: {:?}", after);

    let before = std::mem::replace(items, after);
    self.publish(items, true);

    let before_ids: HashSet<T::Identity> = before.iter().map(Tracked::identity).collect();
    let after_ids: HashSet<T::Identity> = items.iter().map(Tracked::identity).collect();

    let mut added = 0;
    let mut seen = HashSet::new();
    for item in items.iter() {
      let identity = item.identity();
      if !before_ids.contains(&identity) && seen.insert(identity) {
        debug!(cache = %self.name, "API object added: {:?}", item);
        self.notifier.dispatch(&ChangeEvent::ItemAdded(item.clone()));
        added += 1;
      }
    }

    // Right after login the remote side may still report objects that the
    // account record has not caught up on; they disappear on a later cycle.
    let mut removed = 0;
    let mut seen = HashSet::new();
    for item in before.iter().rev() {
      let identity = item.identity();
      if !after_ids.contains(&identity) && seen.insert(identity) {
        debug!(cache = %self.name, "API object disappeared: {:?}", item);
        self.notifier.dispatch(&ChangeEvent::ItemRemoved(item.clone()));
        removed += 1;
      }
    }

    self.notifier.dispatch(&ChangeEvent::CollectionUpdated);

    CycleOutcome::Updated { added, removed }
  }

  fn publish(&self, items: &[T], fetched: bool) {
    *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) = Arc::from(items);
    if fetched {
      *self.last_updated.write().unwrap_or_else(|e| e.into_inner()) = Some(Utc::now());
    }
  }
}

impl<T: Tracked, S: DataSource> std::fmt::Debug for PollingCache<T, S> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("PollingCache")
      .field("name", &self.name)
      .field("required", &self.required)
      .field("len", &self.len())
      .field("last_updated", &self.last_updated())
      .finish_non_exhaustive()
  }
}
