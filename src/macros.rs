//! Tick logging
//!
//! The drain emitter runs every millisecond and the poller merges every
//! document on each tick. Logging there is only wanted while developing, so
//! these macros check `debug_assertions` at the call site. The arguments are
//! still type-checked in release builds, where the branch folds away.

/// Per-tick debug logging, silent in release builds
#[macro_export]
macro_rules! tick_debug {
    ($($arg:tt)*) => {
        if cfg!(debug_assertions) {
            log::debug!($($arg)*);
        }
    };
}

/// Per-character trace logging, silent in release builds
#[macro_export]
macro_rules! tick_trace {
    ($($arg:tt)*) => {
        if cfg!(debug_assertions) {
            log::trace!($($arg)*);
        }
    };
}
