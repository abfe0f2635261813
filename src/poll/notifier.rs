//! Change events and their delivery to subscribers.

use color_eyre::{eyre::eyre, Result};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::error;

/// A change observed by one refresh cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent<T> {
  /// Present after the cycle but not before it
  ItemAdded(T),
  /// Present before the cycle but not after it
  ItemRemoved(T),
  /// The cycle finished; always the last event of a cycle
  CollectionUpdated,
}

impl<T> ChangeEvent<T> {
  pub fn kind(&self) -> &'static str {
    match self {
      ChangeEvent::ItemAdded(_) => "item_added",
      ChangeEvent::ItemRemoved(_) => "item_removed",
      ChangeEvent::CollectionUpdated => "collection_updated",
    }
  }
}

/// Handle returned by [`ChangeNotifier::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Subscriber<T> = Arc<dyn Fn(&ChangeEvent<T>) -> Result<()> + Send + Sync>;

/// Fan-out of change events to registered subscribers.
///
/// A subscriber that returns an error or panics is logged and skipped; the
/// remaining subscribers still receive the event.
pub struct ChangeNotifier<T> {
  subscribers: RwLock<Vec<(SubscriptionId, Subscriber<T>)>>,
  next_id: AtomicU64,
}

impl<T> Default for ChangeNotifier<T> {
  fn default() -> Self {
    Self {
      subscribers: RwLock::new(Vec::new()),
      next_id: AtomicU64::new(0),
    }
  }
}

impl<T> ChangeNotifier<T> {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn subscribe<F>(&self, subscriber: F) -> SubscriptionId
  where
    F: Fn(&ChangeEvent<T>) -> Result<()> + Send + Sync + 'static,
  {
    let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
    self
      .subscribers
      .write()
      .unwrap_or_else(|e| e.into_inner())
      .push((id, Arc::new(subscriber)));
    id
  }

  /// Remove a subscriber. Returns false if it was already gone.
  pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
    let mut subscribers = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
    let before = subscribers.len();
    subscribers.retain(|(existing, _)| *existing != id);
    subscribers.len() != before
  }

  pub fn subscriber_count(&self) -> usize {
    self
      .subscribers
      .read()
      .unwrap_or_else(|e| e.into_inner())
      .len()
  }

  /// Deliver `event` to every subscriber and return how many of them failed.
  pub fn dispatch(&self, event: &ChangeEvent<T>) -> usize {
    // Snapshot so subscribers may (un)subscribe while being called
    let subscribers: Vec<(SubscriptionId, Subscriber<T>)> = self
      .subscribers
      .read()
      .unwrap_or_else(|e| e.into_inner())
      .clone();

    let mut failures = 0;
    for (id, subscriber) in subscribers {
      let outcome = catch_unwind(AssertUnwindSafe(|| (*subscriber)(event)))
        .unwrap_or_else(|_| Err(eyre!("subscriber panicked")));

      if let Err(e) = outcome {
        failures += 1;
        error!(
          subscriber = id.0,
          event = event.kind(),
          "Error handling change event: {:#}",
          e
        );
      }
    }
    failures
  }
}

impl<T> std::fmt::Debug for ChangeNotifier<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ChangeNotifier")
      .field("subscribers", &self.subscriber_count())
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Mutex;

  fn recorder() -> (
    Arc<Mutex<Vec<ChangeEvent<u32>>>>,
    impl Fn(&ChangeEvent<u32>) -> Result<()> + Send + Sync + 'static,
  ) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (seen, move |event: &ChangeEvent<u32>| {
      sink.lock().unwrap().push(event.clone());
      Ok(())
    })
  }

  #[test]
  fn test_dispatch_reaches_all_subscribers() {
    let notifier = ChangeNotifier::new();
    let (first, sub1) = recorder();
    let (second, sub2) = recorder();
    notifier.subscribe(sub1);
    notifier.subscribe(sub2);

    assert_eq!(notifier.dispatch(&ChangeEvent::ItemAdded(7)), 0);

    assert_eq!(*first.lock().unwrap(), vec![ChangeEvent::ItemAdded(7)]);
    assert_eq!(*second.lock().unwrap(), vec![ChangeEvent::ItemAdded(7)]);
  }

  #[test]
  fn test_failing_subscriber_does_not_block_others() {
    let notifier = ChangeNotifier::new();
    notifier.subscribe(|_: &ChangeEvent<u32>| Err(eyre!("nope")));
    notifier.subscribe(|_: &ChangeEvent<u32>| panic!("subscriber bug"));
    let (seen, sub) = recorder();
    notifier.subscribe(sub);

    assert_eq!(notifier.dispatch(&ChangeEvent::CollectionUpdated), 2);
    assert_eq!(*seen.lock().unwrap(), vec![ChangeEvent::CollectionUpdated]);
  }

  #[test]
  fn test_unsubscribe_stops_delivery() {
    let notifier = ChangeNotifier::new();
    let (seen, sub) = recorder();
    let id = notifier.subscribe(sub);

    assert!(notifier.unsubscribe(id));
    assert!(!notifier.unsubscribe(id));
    assert_eq!(notifier.subscriber_count(), 0);

    notifier.dispatch(&ChangeEvent::ItemRemoved(1));
    assert!(seen.lock().unwrap().is_empty());
  }
}
