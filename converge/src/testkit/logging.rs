use tracing_subscriber::EnvFilter;

/// Compile-time verbosity of a module. Each module defines a `LOG_LEVEL`
/// constant and passes it to the log macros; events below it are skipped
/// before `tracing` ever sees them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
  Trace,
  Debug,
  Info,
  Warn,
  Error,
  Off,
}

/// Installs a subscriber writing to stderr, stdout being reserved for the
/// protocol. The filter comes from `CONVERGE_LOG` and defaults to `info`.
/// Calling it twice is harmless.
pub fn init_logging() {
  let filter = EnvFilter::try_from_env("CONVERGE_LOG")
    .unwrap_or_else(|_| EnvFilter::new("info"));
  let _ = tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .with_target(false)
    .try_init();
}

#[macro_export]
macro_rules! trace {
  ($level:expr, $node:expr, $msg:expr) => {
    if $level <= $crate::testkit::LogLevel::Trace {
      ::tracing::trace!(node = %$node, "{}", $msg);
    }
  };
}

#[macro_export]
macro_rules! debug {
  ($level:expr, $node:expr, $msg:expr) => {
    if $level <= $crate::testkit::LogLevel::Debug {
      ::tracing::debug!(node = %$node, "{}", $msg);
    }
  };
}

#[macro_export]
macro_rules! info {
  ($level:expr, $node:expr, $msg:expr) => {
    if $level <= $crate::testkit::LogLevel::Info {
      ::tracing::info!(node = %$node, "{}", $msg);
    }
  };
}

#[macro_export]
macro_rules! warn {
  ($level:expr, $node:expr, $msg:expr) => {
    if $level <= $crate::testkit::LogLevel::Warn {
      ::tracing::warn!(node = %$node, "{}", $msg);
    }
  };
}

#[macro_export]
macro_rules! error {
  ($level:expr, $node:expr, $msg:expr) => {
    if $level <= $crate::testkit::LogLevel::Error {
      ::tracing::error!(node = %$node, "{}", $msg);
    }
  };
}
