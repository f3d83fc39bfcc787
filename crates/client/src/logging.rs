//! Cross-platform logging module.
//!
//! Provides unified logging macros that dispatch to the appropriate backend:
//! - Web: `web_sys::console`
//! - Desktop: `tracing` crate, with the calling module attached as a field

/// Severity of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

#[cfg(target_arch = "wasm32")]
pub fn emit(level: Level, module: &str, msg: &str) {
    let line = format!("[{}] {}", module, msg);
    match level {
        Level::Debug => web_sys::console::debug_1(&line.into()),
        Level::Info => web_sys::console::log_1(&line.into()),
        Level::Warn => web_sys::console::warn_1(&line.into()),
        Level::Error => web_sys::console::error_1(&line.into()),
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub fn emit(level: Level, module: &str, msg: &str) {
    match level {
        Level::Debug => tracing::debug!(module, "{}", msg),
        Level::Info => tracing::info!(module, "{}", msg),
        Level::Warn => tracing::warn!(module, "{}", msg),
        Level::Error => tracing::error!(module, "{}", msg),
    }
}

/// Log an info message
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logging::emit($crate::logging::Level::Info, module_path!(), &format!($($arg)*))
    };
}

/// Log an error message
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::logging::emit($crate::logging::Level::Error, module_path!(), &format!($($arg)*))
    };
}

/// Log a warning message
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logging::emit($crate::logging::Level::Warn, module_path!(), &format!($($arg)*))
    };
}

/// Log a debug message
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::logging::emit($crate::logging::Level::Debug, module_path!(), &format!($($arg)*))
    };
}
