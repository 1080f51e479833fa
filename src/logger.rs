use tracing_subscriber::fmt::{self, time::FormatTime};
use tracing_subscriber::prelude::__tracing_subscriber_SubscriberExt;
use tracing_subscriber::registry::Registry;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Setup logging for the library
///
/// Messages are written to stdout through `tracing-subscriber`, filtered at
/// `log_level` (e.g. `"info"`, `"debug"` or a full `EnvFilter` directive).
/// An unparsable level falls back to `info`.
///
/// Only the first call installs a subscriber; later calls leave it in place.
pub fn setup_log(log_level: &str) {
    let log_level = log_level.to_lowercase();
    let env_filter = EnvFilter::try_new(&log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let stdout_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_ansi(true)
        .with_target(false)
        .with_timer(ElapsedTimestamp::default());

    let installed = Registry::default()
        .with(env_filter)
        .with(stdout_layer)
        .try_init()
        .is_ok();
    if installed {
        tracing::debug!("Logging is configured with level: {}", log_level);
    }
}

/// Seconds since logging was configured
#[derive(Clone)]
struct ElapsedTimestamp {
    start: std::time::Instant,
}

impl Default for ElapsedTimestamp {
    fn default() -> Self {
        ElapsedTimestamp {
            start: std::time::Instant::now(),
        }
    }
}

impl FormatTime for ElapsedTimestamp {
    fn format_time(
        &self,
        w: &mut tracing_subscriber::fmt::format::Writer<'_>,
    ) -> Result<(), std::fmt::Error> {
        write!(w, "{:>9.3}s", self.start.elapsed().as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_log_twice() {
        setup_log("debug");
        setup_log("not a level ===");
        tracing::info!("still logging");
    }
}
