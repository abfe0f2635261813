//! Tracing subscriber setup.

use color_eyre::Result;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "acctwatch=info";

/// Install the global subscriber.
///
/// Logs go to stderr, and additionally to a daily-rolling file in `log_dir`
/// when one is given. The returned guard flushes the file writer on drop and
/// must be kept alive for the life of the program.
pub fn init(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
  let stderr = fmt::layer().with_writer(std::io::stderr).with_target(false);

  match log_dir {
    Some(dir) => {
      let appender = tracing_appender::rolling::daily(dir, "acctwatch.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);

      tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(fmt::layer().with_ansi(false).with_writer(writer))
        .try_init()?;

      Ok(Some(guard))
    }
    None => {
      tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .try_init()?;

      Ok(None)
    }
  }
}
