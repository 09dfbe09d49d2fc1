//! Conditional logging macros gated on a module-level `ENABLE_LOGS` flag.
//!
//! Modules that want to use these define the flag once:
//! ```rust
//! const ENABLE_LOGS: bool = true;
//! ```
//! and then pull the macros in from the crate root:
//! ```rust,ignore
//! use crate::{log_error, log_info, log_warn};
//! ```
//! Flipping the flag to `false` silences a module without touching
//! individual call sites.

/// Conditional info logging. Requires `ENABLE_LOGS` in the calling module.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!($($arg)*);
        }
    };
}

/// Conditional warn logging. Requires `ENABLE_LOGS` in the calling module.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!($($arg)*);
        }
    };
}

/// Conditional error logging. Requires `ENABLE_LOGS` in the calling module.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!($($arg)*);
        }
    };
}
