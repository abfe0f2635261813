use color_eyre::{eyre::eyre, Result};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::Config;
use crate::poll::{DataSource, FetchError, PermissionSet};

use super::types::{ApiErrorBody, Permission, TokenInfo};

/// Guild Wars 2 API client bound to a single API key.
///
/// Cloning is cheap; clones share the HTTP connection pool and the
/// permission channel.
#[derive(Clone)]
pub struct ApiClient {
  http: reqwest::Client,
  base: Url,
  api_key: String,
  permissions: Arc<watch::Sender<PermissionSet<Permission>>>,
}

impl ApiClient {
  pub fn new(config: &Config) -> Result<Self> {
    let api_key = Config::get_api_key()?;
    Self::with_api_key(&config.api.url, api_key)
  }

  pub fn with_api_key(base_url: &str, api_key: String) -> Result<Self> {
    let base =
      Url::parse(base_url).map_err(|e| eyre!("Invalid API url {}: {}", base_url, e))?;

    let http = reqwest::Client::builder()
      .user_agent(concat!("acctwatch/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    let (permissions, _) = watch::channel(PermissionSet::new());

    Ok(Self {
      http,
      base,
      api_key,
      permissions: Arc::new(permissions),
    })
  }

  /// Short, stable identifier for the API key that is safe to log.
  pub fn key_fingerprint(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.api_key.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..12].to_string()
  }

  /// GET an API path and decode its JSON body.
  pub async fn get_json<D: DeserializeOwned>(&self, path: &str) -> Result<D, FetchError> {
    let url = self
      .base
      .join(path)
      .map_err(|e| FetchError::Other(format!("invalid path {}: {}", path, e)))?;

    debug!(%url, key = %self.key_fingerprint(), "GET");

    let response = self
      .http
      .get(url)
      .bearer_auth(&self.api_key)
      .send()
      .await?;

    let status = response.status();
    let body = response.bytes().await?;

    if !status.is_success() {
      return Err(error_for_status(status, &body));
    }

    Ok(serde_json::from_slice(&body)?)
  }

  pub async fn token_info(&self) -> Result<TokenInfo, FetchError> {
    self.get_json("/v2/tokeninfo").await
  }

  /// Re-read the key's permissions and notify watchers if they changed.
  ///
  /// An authorization failure revokes every permission. Returns whether the
  /// granted set changed.
  pub async fn refresh_permissions(&self) -> Result<bool, FetchError> {
    match self.token_info().await {
      Ok(info) => {
        let granted: PermissionSet<Permission> = info.permissions.into_iter().collect();
        let changed = self.publish_permissions(granted);
        if changed {
          info!(
            key = %self.key_fingerprint(),
            token = %info.name,
            permissions = ?self.granted_permissions(),
            "API key permissions updated"
          );
        }
        Ok(changed)
      }
      Err(e) if e.is_authorization() => {
        warn!(key = %self.key_fingerprint(), "API key rejected: {}", e);
        self.publish_permissions(PermissionSet::new());
        Err(e)
      }
      Err(e) => Err(e),
    }
  }

  /// Replace the granted permissions; watchers only wake when the set differs.
  pub fn publish_permissions(&self, granted: PermissionSet<Permission>) -> bool {
    self.permissions.send_if_modified(|current| {
      if *current == granted {
        false
      } else {
        *current = granted;
        true
      }
    })
  }
}

impl DataSource for ApiClient {
  type Permission = Permission;

  fn granted_permissions(&self) -> PermissionSet<Permission> {
    self.permissions.borrow().clone()
  }

  fn watch_permissions(&self) -> watch::Receiver<PermissionSet<Permission>> {
    self.permissions.subscribe()
  }
}

impl std::fmt::Debug for ApiClient {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ApiClient")
      .field("base", &self.base.as_str())
      .field("key", &self.key_fingerprint())
      .finish_non_exhaustive()
  }
}

/// Map a non-success response to the fetch error taxonomy.
fn error_for_status(status: StatusCode, body: &[u8]) -> FetchError {
  let text = serde_json::from_slice::<ApiErrorBody>(body)
    .map(|b| b.text)
    .unwrap_or_else(|_| String::from_utf8_lossy(body).into_owned());

  match status {
    StatusCode::UNAUTHORIZED => FetchError::InvalidAccessToken(text),
    StatusCode::FORBIDDEN => FetchError::MissingScopes(text),
    _ => FetchError::Other(format!("{}: {}", status, text)),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn client() -> ApiClient {
    ApiClient::with_api_key("https://api.guildwars2.com", "SECRET-KEY".to_string()).unwrap()
  }

  #[test]
  fn test_status_mapping() {
    let err = error_for_status(StatusCode::UNAUTHORIZED, br#"{"text":"Invalid access token"}"#);
    assert!(matches!(err, FetchError::InvalidAccessToken(ref t) if t == "Invalid access token"));

    let err = error_for_status(
      StatusCode::FORBIDDEN,
      br#"{"text":"requires scope progression"}"#,
    );
    assert!(matches!(err, FetchError::MissingScopes(_)));
    assert!(err.is_authorization());

    let err = error_for_status(StatusCode::BAD_GATEWAY, b"upstream down");
    assert!(matches!(err, FetchError::Other(ref t) if t.contains("upstream down")));
    assert!(!err.is_authorization());
  }

  #[test]
  fn test_fingerprint_hides_key() {
    let client = client();
    let fingerprint = client.key_fingerprint();
    assert_eq!(fingerprint.len(), 12);
    assert!(!fingerprint.contains("SECRET"));
    assert_eq!(fingerprint, client.clone().key_fingerprint());
    assert!(!format!("{:?}", client).contains("SECRET"));
  }

  #[test]
  fn test_invalid_base_url_is_rejected() {
    assert!(ApiClient::with_api_key("not a url", "k".to_string()).is_err());
  }

  #[tokio::test]
  async fn test_publish_permissions_notifies_only_on_change() {
    let client = client();
    let mut changes = client.watch_permissions();

    let granted: PermissionSet<Permission> = [Permission::Account, Permission::Progression]
      .into_iter()
      .collect();
    assert!(client.publish_permissions(granted.clone()));
    assert!(changes.has_changed().unwrap());
    changes.borrow_and_update();

    assert!(!client.publish_permissions(granted.clone()));
    assert!(!changes.has_changed().unwrap());
    assert_eq!(client.granted_permissions(), granted);
  }
}
