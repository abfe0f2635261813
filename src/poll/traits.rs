//! Core traits and types shared by polling caches and their data sources.

use color_eyre::Result;
use futures::future::{self, BoxFuture, FutureExt};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

use super::permissions::PermissionSet;

/// Trait for items held by a polling cache.
///
/// Two items with the same identity are the same domain object across
/// refresh cycles, even if other fields changed.
pub trait Tracked: Clone + Debug + Send + Sync + 'static {
  type Identity: Eq + Hash + Clone + Debug + Send + Sync;

  fn identity(&self) -> Self::Identity;
}

impl Tracked for String {
  type Identity = String;

  fn identity(&self) -> String {
    self.clone()
  }
}

/// Account-scoped source that caches fetch from.
pub trait DataSource: Send + Sync + 'static {
  /// Capability token the source grants (e.g. an API key scope)
  type Permission: Ord + Clone + Debug + Send + Sync + 'static;

  /// Permissions granted right now.
  fn granted_permissions(&self) -> PermissionSet<Self::Permission>;

  /// Receiver that observes a new value whenever the granted permissions change.
  fn watch_permissions(&self) -> watch::Receiver<PermissionSet<Self::Permission>>;
}

/// Failure of a single fetch.
#[derive(Debug, Error)]
pub enum FetchError {
  #[error("missing scopes: {0}")]
  MissingScopes(String),

  #[error("invalid access token: {0}")]
  InvalidAccessToken(String),

  #[error("request failed: {0}")]
  Request(#[from] reqwest::Error),

  #[error("failed to decode response: {0}")]
  Decode(#[from] serde_json::Error),

  #[error("{0}")]
  Other(String),
}

impl FetchError {
  /// Authorization failures are expected while a key is missing scopes or revoked.
  pub fn is_authorization(&self) -> bool {
    matches!(
      self,
      FetchError::MissingScopes(_) | FetchError::InvalidAccessToken(_)
    )
  }
}

/// Fetch function a cache invokes once per cycle.
pub type FetchFn<S, T> =
  Box<dyn Fn(Arc<S>) -> BoxFuture<'static, std::result::Result<Vec<T>, FetchError>> + Send + Sync>;

/// Lifecycle hooks for the domain type that owns a cache.
///
/// All hooks default to doing nothing.
pub trait StateHooks: Send + Sync + 'static {
  /// Called after the cached collection has been emptied.
  fn do_clear(&self) -> BoxFuture<'static, Result<()>> {
    future::ready(Ok(())).boxed()
  }

  /// Called once at the end of [`unload`](super::PollingCache::unload).
  fn do_unload(&self) {}

  /// Persist state. Caches are not persisted across restarts.
  fn save(&self) -> BoxFuture<'static, Result<()>> {
    future::ready(Ok(())).boxed()
  }
}

/// Hooks for caches without domain-specific cleanup.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl StateHooks for NoHooks {}
