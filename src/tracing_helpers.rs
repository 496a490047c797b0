//! Zero-cost logging macros.
//!
//! With the `tracing` feature enabled these forward to the `tracing` crate.
//! Without it (the default) they expand to nothing, so the slab, ring and
//! store hot paths carry no logging cost at all.
//!
//! # Usage
//!
//! ```bash
//! # Normal build - no logging
//! cargo build --release
//!
//! # Tests with events
//! cargo test --features tracing
//!
//! # Only the pool module at trace level
//! RUST_LOG=taskweave::pool=trace cargo test --features tracing pool
//! ```
//!
//! Functions can additionally be wrapped in a span with
//! `#[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all))]`.

#![allow(unused_macros, unused_imports)]

/// Trace-level event (most verbose). No-op without the `tracing` feature.
#[cfg(feature = "tracing")]
macro_rules! trace_log {
    ($($arg:tt)*) => {
        tracing::trace!($($arg)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! trace_log {
    ($($arg:tt)*) => {};
}

/// Debug-level event. No-op without the `tracing` feature.
#[cfg(feature = "tracing")]
macro_rules! debug_log {
    ($($arg:tt)*) => {
        tracing::debug!($($arg)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! debug_log {
    ($($arg:tt)*) => {};
}

/// Warn-level event. No-op without the `tracing` feature.
#[cfg(feature = "tracing")]
macro_rules! warn_log {
    ($($arg:tt)*) => {
        tracing::warn!($($arg)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! warn_log {
    ($($arg:tt)*) => {};
}

/// Error-level event. No-op without the `tracing` feature.
#[cfg(feature = "tracing")]
macro_rules! error_log {
    ($($arg:tt)*) => {
        tracing::error!($($arg)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! error_log {
    ($($arg:tt)*) => {};
}

pub(crate) use debug_log;
pub(crate) use error_log;
pub(crate) use trace_log;
pub(crate) use warn_log;
