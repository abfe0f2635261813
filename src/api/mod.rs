//! Guild Wars 2 API client and the account trackers that poll it.

mod client;
mod trackers;
mod types;

pub use client::ApiClient;
pub use trackers::{Completion, CompletionTracker, TrackerKind};
pub use types::{Permission, TokenInfo};
