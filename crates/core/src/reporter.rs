//! Error and warning sinks shared across a client's presentations.
//!
//! The [`Reporter`] is constructed by the [`Client`](crate::Client) from its
//! configuration and threaded as an `Arc` into every presentation and socket.
//! Nothing in the crate reaches for process-wide state: if a component wants
//! to surface an error it must have been handed a reporter.
//!
//! Either sink can be disabled. A disabled sink records nothing and invokes
//! nothing — failing operations still return their error to the caller, they
//! just produce no side effects here. The most recent error and warning
//! strings are retrievable at any time.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

/// Callback invoked with a formatted error or warning message.
pub type ReportHook = Box<dyn Fn(&str)>;

/// Configurable error/warning sink pair.
pub struct Reporter {
    error_hook: Mutex<Option<ReportHook>>,
    warning_hook: Mutex<Option<ReportHook>>,
    errors_enabled: AtomicBool,
    warnings_enabled: AtomicBool,
    last_error: Mutex<Option<String>>,
    last_warning: Mutex<Option<String>>,
}

impl Reporter {
    pub fn new(errors_enabled: bool, warnings_enabled: bool) -> Self {
        Reporter {
            error_hook: Mutex::new(None),
            warning_hook: Mutex::new(None),
            errors_enabled: AtomicBool::new(errors_enabled),
            warnings_enabled: AtomicBool::new(warnings_enabled),
            last_error: Mutex::new(None),
            last_warning: Mutex::new(None),
        }
    }

    /// Install the error callback, replacing any previous one.
    pub fn set_error_hook(&self, hook: impl Fn(&str) + 'static) {
        *self.error_hook.lock() = Some(Box::new(hook));
    }

    /// Install the warning callback, replacing any previous one.
    pub fn set_warning_hook(&self, hook: impl Fn(&str) + 'static) {
        *self.warning_hook.lock() = Some(Box::new(hook));
    }

    pub fn set_errors_enabled(&self, enabled: bool) {
        self.errors_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn set_warnings_enabled(&self, enabled: bool) {
        self.warnings_enabled.store(enabled, Ordering::SeqCst);
    }

    /// Record an error and invoke the error callback, if enabled.
    pub fn error(&self, message: &str) {
        if !self.errors_enabled.load(Ordering::SeqCst) {
            return;
        }
        tracing::error!(message, "rtsp error");
        *self.last_error.lock() = Some(message.to_string());
        if let Some(hook) = self.error_hook.lock().as_ref() {
            hook(message);
        }
    }

    /// Record a warning and invoke the warning callback, if enabled.
    pub fn warning(&self, message: &str) {
        if !self.warnings_enabled.load(Ordering::SeqCst) {
            return;
        }
        tracing::warn!(message, "rtsp warning");
        *self.last_warning.lock() = Some(message.to_string());
        if let Some(hook) = self.warning_hook.lock().as_ref() {
            hook(message);
        }
    }

    /// The most recently recorded error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    /// The most recently recorded warning message.
    pub fn last_warning(&self) -> Option<String> {
        self.last_warning.lock().clone()
    }
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new(true, true)
    }
}
