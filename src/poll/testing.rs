//! Scripted in-memory data source for exercising polling caches.

use futures::future::FutureExt;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

use super::permissions::PermissionSet;
use super::traits::{DataSource, FetchError, FetchFn};

pub type Scope = &'static str;

/// Data source whose fetch results are queued up front by the test.
pub struct ScriptedSource {
  permissions: watch::Sender<PermissionSet<Scope>>,
  responses: Mutex<VecDeque<Result<Vec<String>, FetchError>>>,
  calls: AtomicUsize,
  delay: Mutex<Duration>,
}

impl ScriptedSource {
  pub fn new(granted: &[Scope]) -> Arc<Self> {
    let (permissions, _) = watch::channel(granted.iter().copied().collect());
    Arc::new(Self {
      permissions,
      responses: Mutex::new(VecDeque::new()),
      calls: AtomicUsize::new(0),
      delay: Mutex::new(Duration::ZERO),
    })
  }

  pub fn push_items(&self, items: &[&str]) {
    self
      .responses
      .lock()
      .unwrap()
      .push_back(Ok(items.iter().map(|s| s.to_string()).collect()));
  }

  pub fn push_error(&self, error: FetchError) {
    self.responses.lock().unwrap().push_back(Err(error));
  }

  pub fn set_delay(&self, delay: Duration) {
    *self.delay.lock().unwrap() = delay;
  }

  pub fn grant(&self, granted: &[Scope]) {
    self
      .permissions
      .send_replace(granted.iter().copied().collect());
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  async fn fetch(&self) -> Result<Vec<String>, FetchError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    let delay = *self.delay.lock().unwrap();
    if !delay.is_zero() {
      tokio::time::sleep(delay).await;
    }
    self
      .responses
      .lock()
      .unwrap()
      .pop_front()
      .unwrap_or_else(|| Ok(Vec::new()))
  }

  pub fn fetcher() -> FetchFn<ScriptedSource, String> {
    Box::new(|source: Arc<ScriptedSource>| async move { source.fetch().await }.boxed())
  }
}

impl DataSource for ScriptedSource {
  type Permission = Scope;

  fn granted_permissions(&self) -> PermissionSet<Scope> {
    self.permissions.borrow().clone()
  }

  fn watch_permissions(&self) -> watch::Receiver<PermissionSet<Scope>> {
    self.permissions.subscribe()
  }
}
