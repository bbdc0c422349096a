/*!

A small wrapper around `tracing` that gives the rest of the workspace a stable, backend-independent
logging interface: a global threshold plus the macros `critical!`, `error!`, `warning!`, `info!`,
`debug!`, and `trace!`. If the logging backend ever changes, only this module needs to change.

The threshold is a simple numeric level (0 = silent, higher = more verbose) so call sites can gate
expensive formatting (`if log_enabled!(n) { ... }`) without depending on `tracing`'s own filtering
API directly.

This crate itself never installs a subscriber — a library shouldn't decide how its host process
logs. [`init_tracing`] is provided for a host binary to call once at startup.

*/

use std::sync::atomic::{AtomicU8, Ordering};

static GLOBAL_THRESHOLD: AtomicU8 = AtomicU8::new(1);

/// Installs a `tracing_subscriber::fmt` subscriber honoring `RUST_LOG`, falling back to `info`
/// when unset. A host binary calls this once at startup; library code never calls it itself.
pub fn init_tracing() {
  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
    )
    .init();
}

#[inline(always)]
pub fn set_global_logging_threshold(threshold: u8) {
  GLOBAL_THRESHOLD.store(threshold, Ordering::Relaxed);
}

#[inline(always)]
pub fn get_global_logging_threshold() -> u8 {
  GLOBAL_THRESHOLD.load(Ordering::Relaxed)
}

#[inline(always)]
pub fn log_enabled(threshold: u8) -> bool {
  threshold <= get_global_logging_threshold()
}

#[macro_export]
macro_rules! critical {
  ($threshold:literal, $($arg:tt)*) => {
    if $crate::log::log_enabled($threshold) {
      $crate::tracing::error!($($arg)*)
    }
  };
}
pub use critical;

#[macro_export]
macro_rules! error {
  ($threshold:literal, $($arg:tt)*) => {
    if $crate::log::log_enabled($threshold) {
      $crate::tracing::error!($($arg)*)
    }
  };
}
pub use error;

#[macro_export]
macro_rules! warning {
  ($threshold:literal, $($arg:tt)*) => {
    if $crate::log::log_enabled($threshold) {
      $crate::tracing::warn!($($arg)*)
    }
  };
}
pub use warning;

#[macro_export]
macro_rules! info {
  ($threshold:literal, $($arg:tt)*) => {
    if $crate::log::log_enabled($threshold) {
      $crate::tracing::info!($($arg)*)
    }
  };
}
pub use info;

#[macro_export]
macro_rules! debug {
  ($threshold:literal, $($arg:tt)*) => {
    if $crate::log::log_enabled($threshold) {
      $crate::tracing::debug!($($arg)*)
    }
  };
}
pub use debug;

#[macro_export]
macro_rules! trace {
  ($threshold:literal, $($arg:tt)*) => {
    if $crate::log::log_enabled($threshold) {
      $crate::tracing::trace!($($arg)*)
    }
  };
}
pub use trace;
