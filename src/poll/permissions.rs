//! Deciding whether a data source grants enough to attempt a fetch.

use std::collections::BTreeSet;

/// Set of capability tokens, ordered so it logs and compares deterministically.
pub type PermissionSet<P> = BTreeSet<P>;

/// True when every required token is granted. An empty requirement is always satisfied.
pub fn is_satisfied<P: Ord>(required: &PermissionSet<P>, granted: &PermissionSet<P>) -> bool {
  required.is_subset(granted)
}

/// Required tokens that are absent from `granted`.
pub fn missing<'a, P: Ord>(
  required: &'a PermissionSet<P>,
  granted: &'a PermissionSet<P>,
) -> impl Iterator<Item = &'a P> + 'a {
  required.difference(granted)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn set(tokens: &[&'static str]) -> PermissionSet<&'static str> {
    tokens.iter().copied().collect()
  }

  #[test]
  fn test_empty_requirement_is_satisfied() {
    assert!(is_satisfied(&set(&[]), &set(&[])));
    assert!(is_satisfied(&set(&[]), &set(&["account"])));
  }

  #[test]
  fn test_subset_is_satisfied() {
    let required = set(&["account", "progression"]);
    let granted = set(&["account", "progression", "wallet"]);
    assert!(is_satisfied(&required, &granted));
  }

  #[test]
  fn test_partial_grant_is_not_satisfied() {
    let required = set(&["account", "progression"]);
    let granted = set(&["account"]);
    assert!(!is_satisfied(&required, &granted));
    assert_eq!(
      missing(&required, &granted).copied().collect::<Vec<_>>(),
      vec!["progression"]
    );
  }
}
