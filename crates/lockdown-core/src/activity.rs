//! Activity logging collaborator.
//!
//! Every component reports its allow/block/config decisions through an
//! [`ActivityLogger`]. Loggers are injected at construction; components that
//! have nothing to report to get [`NoopActivityLogger`] rather than an
//! `Option`, so call sites never branch on presence.
//!
//! Implementations must swallow their own failures. The keyboard and pointer
//! callbacks call into the logger from inside an OS hook, so `log` must also
//! return quickly.

use std::sync::Arc;
use tracing::{info, warn};

pub trait ActivityLogger: Send + Sync {
    fn log(&self, kind: &str, details: &str, blocked: bool);
}

/// Event kinds emitted by the engine.
pub mod kinds {
    pub const LOCKDOWN_START: &str = "LOCKDOWN_START";
    pub const LOCKDOWN_STOP: &str = "LOCKDOWN_STOP";
    pub const COMPONENT_START: &str = "COMPONENT_START";
    pub const COMPONENT_ERROR: &str = "COMPONENT_ERROR";
    pub const KEY_BLOCKED: &str = "BLOCKED_KEY_ATTEMPT";
    pub const ADMIN_ACCESS: &str = "ADMIN_ACCESS_REQUEST";
    pub const KEYBOARD_HOOK: &str = "KEYBOARD_HOOK";
    pub const KEYBOARD_CONFIG: &str = "KEYBOARD_CONFIG";
    pub const MOUSE_BLOCKED: &str = "MOUSE_BLOCKED";
    pub const MOUSE_HOOK: &str = "MOUSE_HOOK";
    pub const MOUSE_CONFIG: &str = "MOUSE_CONFIG";
    pub const HOOK_PROC_ERROR: &str = "HOOK_PROC_ERROR";
    pub const WINDOW_PROTECTION: &str = "WINDOW_PROTECTION";
    pub const WINDOW_PROTECTED: &str = "WINDOW_PROTECTED";
    pub const WINDOW_RESTORED: &str = "WINDOW_RESTORED";
    pub const WINDOW_FORCED_RESTORE: &str = "WINDOW_FORCED_RESTORE";
    pub const WINDOW_ERROR: &str = "WINDOW_ERROR";
    pub const RESTORE_ERROR: &str = "RESTORE_ERROR";
    pub const INTERNET_BLOCKING: &str = "INTERNET_BLOCKING";
    pub const HOSTS_REAPPLIED: &str = "HOSTS_REAPPLIED";
    pub const NETWORK_ERROR: &str = "NETWORK_ERROR";
    pub const PROCESS_MONITOR: &str = "PROCESS_MONITOR";
    pub const SUSPICIOUS_PROCESS: &str = "SUSPICIOUS_PROCESS";
}

/// Discards every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopActivityLogger;

impl ActivityLogger for NoopActivityLogger {
    fn log(&self, _kind: &str, _details: &str, _blocked: bool) {}
}

/// Forwards records to `tracing`; blocked records at warn level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingActivityLogger;

impl ActivityLogger for TracingActivityLogger {
    fn log(&self, kind: &str, details: &str, blocked: bool) {
        if blocked {
            warn!(kind, details, "BLOCKED");
        } else {
            info!(kind, details, "ALLOWED");
        }
    }
}

/// Sends each record to several loggers in order.
pub struct FanoutLogger {
    sinks: Vec<Arc<dyn ActivityLogger>>,
}

impl FanoutLogger {
    pub fn new(sinks: Vec<Arc<dyn ActivityLogger>>) -> Self {
        Self { sinks }
    }
}

impl ActivityLogger for FanoutLogger {
    fn log(&self, kind: &str, details: &str, blocked: bool) {
        for sink in &self.sinks {
            sink.log(kind, details, blocked);
        }
    }
}

pub fn noop() -> Arc<dyn ActivityLogger> {
    Arc::new(NoopActivityLogger)
}
