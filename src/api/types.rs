//! Serde types matching the Guild Wars 2 API responses used here.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Scope granted to an API key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
  Account,
  Builds,
  Characters,
  Guilds,
  Inventories,
  Progression,
  Pvp,
  Tradingpost,
  Unlocks,
  Wallet,
  Wvw,
  /// Scope this client does not know about
  #[serde(other)]
  Unknown,
}

impl fmt::Display for Permission {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Permission::Account => "account",
      Permission::Builds => "builds",
      Permission::Characters => "characters",
      Permission::Guilds => "guilds",
      Permission::Inventories => "inventories",
      Permission::Progression => "progression",
      Permission::Pvp => "pvp",
      Permission::Tradingpost => "tradingpost",
      Permission::Unlocks => "unlocks",
      Permission::Wallet => "wallet",
      Permission::Wvw => "wvw",
      Permission::Unknown => "unknown",
    };
    f.write_str(name)
  }
}

/// `/v2/tokeninfo` response.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenInfo {
  pub id: String,
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub permissions: Vec<Permission>,
}

/// Error body the API returns alongside non-success statuses.
#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
  #[serde(default)]
  pub text: String,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_token_info_parses_permissions() {
    let json = r#"{
      "id": "ABCDE-1234",
      "name": "acctwatch",
      "permissions": ["account", "progression", "guilds", "mystery"]
    }"#;

    let info: TokenInfo = serde_json::from_str(json).unwrap();
    assert_eq!(info.name, "acctwatch");
    assert_eq!(
      info.permissions,
      vec![
        Permission::Account,
        Permission::Progression,
        Permission::Guilds,
        Permission::Unknown
      ]
    );
  }

  #[test]
  fn test_permission_display_matches_wire_name() {
    assert_eq!(Permission::Tradingpost.to_string(), "tradingpost");
    let parsed: Permission = serde_json::from_str("\"wvw\"").unwrap();
    assert_eq!(parsed, Permission::Wvw);
  }
}
