//! Process-wide tracing subscriber
//!
//! Installed at INFO before the config file is read, so config loading is
//! logged too. The configured `log_level` is applied afterwards through a
//! reload handle.

use tracing::{Level, Subscriber};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, reload, Registry};

pub const STARTUP_LEVEL: Level = Level::INFO;

/// Changes the level of an installed subscriber
#[derive(Clone)]
pub struct LogLevelHandle {
    inner: reload::Handle<LevelFilter, Registry>,
}

impl LogLevelHandle {
    pub fn set_level(&self, level: Level) -> Result<(), reload::Error> {
        self.inner
            .modify(|filter| *filter = LevelFilter::from_level(level))
    }

    pub fn level(&self) -> Option<LevelFilter> {
        self.inner.clone_current()
    }
}

/// Builds the subscriber without installing it.
pub fn subscriber() -> (impl Subscriber + Send + Sync + 'static, LogLevelHandle) {
    let (filter, inner) = reload::Layer::new(LevelFilter::from_level(STARTUP_LEVEL));
    let subscriber = tracing_subscriber::registry().with(filter).with(
        fmt::layer()
            .with_target(false)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .pretty(),
    );
    (subscriber, LogLevelHandle { inner })
}

/// Installs the subscriber as the global default.
pub fn init() -> LogLevelHandle {
    let (subscriber, handle) = subscriber();
    subscriber.init();
    handle
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_info_and_follows_the_configured_level() {
        let (subscriber, handle) = subscriber();
        assert_eq!(handle.level(), Some(LevelFilter::INFO));

        tracing::subscriber::with_default(subscriber, || {
            assert!(tracing::enabled!(Level::INFO));
            assert!(!tracing::enabled!(Level::DEBUG));

            handle.set_level(Level::DEBUG).unwrap();
            assert_eq!(handle.level(), Some(LevelFilter::DEBUG));
            assert!(tracing::enabled!(Level::DEBUG));

            handle.set_level(Level::WARN).unwrap();
            assert!(!tracing::enabled!(Level::INFO));
        });
    }
}
