//! Fixed-delay refresh scheduling driven by host ticks.

use std::time::Duration;

/// Default delay between automatic refreshes.
///
/// Slightly over five minutes so a refresh lands after the remote side has
/// rolled its own five minute cache.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_millis(300_100);

/// How often a cache refreshes itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshInterval {
  /// Refresh once the accumulated tick time exceeds the duration
  Every(Duration),
  /// Never refresh automatically; only explicit loads and reloads fetch
  Never,
}

impl Default for RefreshInterval {
  fn default() -> Self {
    RefreshInterval::Every(DEFAULT_REFRESH_INTERVAL)
  }
}

impl From<Option<Duration>> for RefreshInterval {
  fn from(value: Option<Duration>) -> Self {
    value.map(RefreshInterval::Every).unwrap_or(RefreshInterval::Never)
  }
}

/// Accumulates elapsed tick time and decides when a refresh is due.
#[derive(Debug, Clone)]
pub struct IntervalGate {
  interval: RefreshInterval,
  accumulated: Duration,
}

impl IntervalGate {
  pub fn new(interval: RefreshInterval) -> Self {
    Self {
      interval,
      accumulated: Duration::ZERO,
    }
  }

  /// Time accumulated since the last run.
  pub fn accumulated(&self) -> Duration {
    self.accumulated
  }

  /// Add `elapsed` and report whether a refresh should run now.
  ///
  /// When due, the accumulator drops back to zero rather than keeping the
  /// overshoot, so the next run is a full interval away.
  pub fn should_run(&mut self, elapsed: Duration) -> bool {
    let interval = match self.interval {
      RefreshInterval::Every(interval) => interval,
      RefreshInterval::Never => return false,
    };

    self.accumulated = self.accumulated.saturating_add(elapsed);
    if self.accumulated > interval {
      self.accumulated = Duration::ZERO;
      true
    } else {
      false
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const FIVE_MINUTES: Duration = Duration::from_secs(300);

  #[test]
  fn test_does_not_fire_before_interval() {
    let mut gate = IntervalGate::new(RefreshInterval::Every(FIVE_MINUTES));

    for _ in 0..299 {
      assert!(!gate.should_run(Duration::from_secs(1)));
    }
    assert_eq!(gate.accumulated(), Duration::from_secs(299));
  }

  #[test]
  fn test_fires_once_when_crossing_and_resets_to_zero() {
    let mut gate = IntervalGate::new(RefreshInterval::Every(FIVE_MINUTES));

    assert!(!gate.should_run(Duration::from_secs(299)));
    assert!(gate.should_run(Duration::from_secs(3)));
    assert_eq!(gate.accumulated(), Duration::ZERO);

    // Overshoot is not carried into the next interval
    assert!(!gate.should_run(Duration::from_secs(298)));
  }

  #[test]
  fn test_exactly_at_interval_is_not_due() {
    let mut gate = IntervalGate::new(RefreshInterval::Every(FIVE_MINUTES));
    assert!(!gate.should_run(FIVE_MINUTES));
    assert!(gate.should_run(Duration::from_millis(1)));
  }

  #[test]
  fn test_never_interval_never_fires() {
    let mut gate = IntervalGate::new(RefreshInterval::Never);
    assert!(!gate.should_run(Duration::from_secs(u32::MAX as u64)));
    assert_eq!(gate.accumulated(), Duration::ZERO);
  }

  #[test]
  fn test_interval_from_option() {
    assert_eq!(RefreshInterval::from(None), RefreshInterval::Never);
    assert_eq!(
      RefreshInterval::from(Some(FIVE_MINUTES)),
      RefreshInterval::Every(FIVE_MINUTES)
    );
    assert_eq!(
      RefreshInterval::default(),
      RefreshInterval::Every(DEFAULT_REFRESH_INTERVAL)
    );
  }
}
