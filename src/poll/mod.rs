//! Generic polling cache for remote, account-scoped collections.
//!
//! This module is independent of any particular API:
//! - A [`DataSource`] reports which permissions it currently grants
//! - A fetch function pulls the full collection once per refresh cycle
//! - [`PollingCache`] diffs consecutive collections and emits [`ChangeEvent`]s
//! - Refreshes are paced by host ticks through an [`IntervalGate`]

mod cache;
mod interval;
mod lock;
mod notifier;
pub mod permissions;
mod traits;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{CycleOutcome, PermissionSubscription, PollingCache};
pub use interval::{IntervalGate, RefreshInterval, DEFAULT_REFRESH_INTERVAL};
pub use lock::ExclusiveAsyncLock;
pub use notifier::{ChangeEvent, ChangeNotifier, SubscriptionId};
pub use permissions::PermissionSet;
pub use traits::{DataSource, FetchError, FetchFn, NoHooks, StateHooks, Tracked};
