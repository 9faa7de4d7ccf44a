//! Lockdown orchestrator: the composition root.
//!
//! Owns one instance of every component and moves them together between
//! INACTIVE and ACTIVE. Components are started independently; a component
//! that fails to start is reported and the rest carry on.

use crate::activity::{kinds, ActivityLogger};
use crate::error::{LockdownError, Result};
use crate::input::{
    AdminNotifier, HookDriver, KeyEvent, KeyboardLayer, KeyboardStatus, PointerEvent, PointerLayer,
    PointerStatus,
};
use crate::metrics::{HostMetrics, HostProbe};
use crate::network::{DnsControl, NetworkConfig, NetworkStatus, NetworkSuppressor};
use crate::policy::{KeyboardPolicy, PointerButton, PointerPolicy};
use crate::process::{ProcessMonitor, ProcessMonitorStatus, ProcessTable};
use crate::settings::LockdownSettings;
use crate::storage::{load_policy_lists, save_policy_lists, PolicyLists, SettingsStore};
use crate::window::{
    ProtectionPredicate, WindowBackend, WindowGuard, WindowGuardConfig, WindowGuardStatus,
    WindowTarget,
};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Keyboard,
    #[serde(alias = "mouse")]
    Pointer,
    #[serde(alias = "internet")]
    Network,
    Windows,
    Processes,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Keyboard,
        Category::Pointer,
        Category::Network,
        Category::Windows,
        Category::Processes,
    ];

    /// Stop runs this in reverse.
    pub const START_ORDER: [Category; 5] = [
        Category::Keyboard,
        Category::Pointer,
        Category::Processes,
        Category::Network,
        Category::Windows,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Category::Keyboard => "keyboard",
            Category::Pointer => "pointer",
            Category::Network => "network",
            Category::Windows => "windows",
            Category::Processes => "processes",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Category {
    type Err = LockdownError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keyboard" | "keys" => Ok(Category::Keyboard),
            "pointer" | "mouse" => Ok(Category::Pointer),
            "network" | "internet" => Ok(Category::Network),
            "windows" | "window" => Ok(Category::Windows),
            "processes" | "process" => Ok(Category::Processes),
            other => Err(LockdownError::Configuration(format!(
                "unknown category '{other}'"
            ))),
        }
    }
}

/// Per-category enable map. Missing categories keep their current default.
pub type Selection = BTreeMap<Category, bool>;

/// Platform implementations the engine drives.
pub struct Backends {
    pub keyboard: Box<dyn HookDriver<KeyEvent>>,
    pub pointer: Box<dyn HookDriver<PointerEvent>>,
    pub windows: Arc<dyn WindowBackend>,
    pub processes: Box<dyn ProcessTable>,
    pub dns: Box<dyn DnsControl>,
    pub host: Box<dyn HostProbe>,
}

impl Backends {
    pub fn native(settings: &LockdownSettings) -> Self {
        crate::platform::native_backends(settings)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StartReport {
    pub session_id: Option<String>,
    pub already_active: bool,
    pub started: Vec<Category>,
    pub failed: Vec<Category>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StopReport {
    pub was_active: bool,
    pub stopped: Vec<Category>,
    pub failed: Vec<Category>,
    pub duration_secs: i64,
    /// The failed components stay attached to the session; calling stop
    /// again retries just those.
    pub cleanup_pending: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct LockdownStatus {
    pub active: bool,
    pub session_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub selection: Selection,
    pub components: BTreeMap<Category, bool>,
    pub cleanup_pending: Vec<Category>,
    pub keyboard: KeyboardStatus,
    pub pointer: PointerStatus,
    pub windows: WindowGuardStatus,
    pub network: NetworkStatus,
    pub processes: ProcessMonitorStatus,
    pub host: HostMetrics,
    pub generated_at: DateTime<Utc>,
}

struct Session {
    id: Uuid,
    started_at: DateTime<Utc>,
    cleanup_pending: Vec<Category>,
}

fn join_names(categories: &[Category]) -> String {
    if categories.is_empty() {
        "none".to_string()
    } else {
        categories
            .iter()
            .map(|c| c.name())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

pub struct Lockdown {
    settings: LockdownSettings,
    store: Arc<dyn SettingsStore>,
    logger: Arc<dyn ActivityLogger>,
    keyboard_policy: Arc<RwLock<KeyboardPolicy>>,
    pointer_policy: Arc<RwLock<PointerPolicy>>,
    keyboard: KeyboardLayer,
    pointer: PointerLayer,
    windows: WindowGuard,
    network: NetworkSuppressor,
    processes: ProcessMonitor,
    host: Mutex<Box<dyn HostProbe>>,
    defaults: Selection,
    session: Option<Session>,
}

impl Lockdown {
    pub fn new(
        settings: LockdownSettings,
        store: Arc<dyn SettingsStore>,
        logger: Arc<dyn ActivityLogger>,
        backends: Backends,
    ) -> Result<Self> {
        settings
            .validate()
            .map_err(|e| LockdownError::Configuration(e.to_string()))?;

        let lists = load_policy_lists(store.as_ref(), &settings)?;
        let keyboard_policy =
            match KeyboardPolicy::new(&settings.admin_combo, &lists.blocked_keys) {
                Ok(policy) => policy,
                Err(e) => {
                    warn!(error = %e, "stored key list rejected; using configured defaults");
                    KeyboardPolicy::new(&settings.admin_combo, &settings.blocked_keys)?
                }
            };
        let pointer_policy =
            match PointerPolicy::new(&lists.blocked_buttons, lists.block_all_buttons) {
                Ok(policy) => policy,
                Err(e) => {
                    warn!(error = %e, "stored button list rejected; using configured defaults");
                    PointerPolicy::new(&settings.blocked_buttons, settings.block_all_buttons)?
                }
            };
        let keyboard_policy = Arc::new(RwLock::new(keyboard_policy));
        let pointer_policy = Arc::new(RwLock::new(pointer_policy));

        let timeout = settings.stop_timeout();
        let keyboard =
            KeyboardLayer::new(keyboard_policy.clone(), backends.keyboard, logger.clone());
        let pointer = PointerLayer::new(pointer_policy.clone(), backends.pointer, logger.clone());
        let windows = WindowGuard::new(
            backends.windows,
            WindowGuardConfig::from(&settings.windows),
            ProtectionPredicate::from_settings(&settings.windows),
            logger.clone(),
            timeout,
        );
        let network = NetworkSuppressor::new(
            NetworkConfig::from_settings(&settings.network),
            backends.dns,
            logger.clone(),
            timeout,
        );
        let processes = ProcessMonitor::new(
            backends.processes,
            &settings.processes,
            logger.clone(),
            timeout,
        );

        let mut defaults: Selection = Category::ALL.iter().map(|c| (*c, false)).collect();
        defaults.extend(settings.selection.iter().map(|(c, on)| (*c, *on)));

        Ok(Self {
            settings,
            store,
            logger,
            keyboard_policy,
            pointer_policy,
            keyboard,
            pointer,
            windows,
            network,
            processes,
            host: Mutex::new(backends.host),
            defaults,
            session: None,
        })
    }

    /// Starts every category enabled after merging `selection` into the
    /// current defaults. A no-op while already active.
    pub fn start(&mut self, selection: &Selection) -> StartReport {
        if let Some(session) = &self.session {
            info!(session = %session.id, "lockdown already active");
            return StartReport {
                session_id: Some(session.id.to_string()),
                already_active: true,
                started: Vec::new(),
                failed: Vec::new(),
            };
        }

        self.defaults
            .extend(selection.iter().map(|(c, on)| (*c, *on)));
        let mut started = Vec::new();
        let mut failed = Vec::new();
        for category in Category::START_ORDER {
            if !self.defaults.get(&category).copied().unwrap_or(false) {
                continue;
            }
            let ok = catch_unwind(AssertUnwindSafe(|| self.start_component(category)))
                .unwrap_or_else(|_| {
                    error!(%category, "component panicked during start");
                    false
                });
            let outcome = if ok { "active" } else { "failed" };
            self.logger.log(
                kinds::COMPONENT_START,
                &format!("{category}: {outcome}"),
                false,
            );
            if ok {
                started.push(category);
            } else {
                failed.push(category);
            }
        }

        let session = Session {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            cleanup_pending: Vec::new(),
        };
        let mut summary = format!("Selective restrictions enabled: {}", join_names(&started));
        if !failed.is_empty() {
            summary.push_str(&format!("; failed: {}", join_names(&failed)));
        }
        info!(
            session = %session.id,
            started = %join_names(&started),
            failed = %join_names(&failed),
            "lockdown started"
        );
        self.logger.log(kinds::LOCKDOWN_START, &summary, false);

        let report = StartReport {
            session_id: Some(session.id.to_string()),
            already_active: false,
            started,
            failed,
        };
        self.session = Some(session);
        report
    }

    fn start_component(&mut self, category: Category) -> bool {
        match category {
            Category::Keyboard => self.keyboard.start(),
            Category::Pointer => self.pointer.start(),
            Category::Network => self.network.start(),
            Category::Windows => self
                .windows
                .start(Some(WindowGuardConfig::from(&self.settings.windows))),
            Category::Processes => self.processes.start(),
        }
    }

    fn stop_component(&mut self, category: Category) -> bool {
        match category {
            Category::Keyboard => self.keyboard.stop(),
            Category::Pointer => self.pointer.stop(),
            Category::Network => self.network.stop(),
            Category::Windows => self.windows.stop(),
            Category::Processes => self.processes.stop(),
        }
    }

    /// Stops every component in reverse start order, whether or not it was
    /// started. A no-op while inactive.
    ///
    /// Components whose cleanup fails keep the session open. The next call
    /// only retries those, and the engine stays active until all succeed.
    pub fn stop(&mut self) -> StopReport {
        let Some(mut session) = self.session.take() else {
            return StopReport {
                was_active: false,
                stopped: Vec::new(),
                failed: Vec::new(),
                duration_secs: 0,
                cleanup_pending: false,
            };
        };

        let targets: Vec<Category> = if session.cleanup_pending.is_empty() {
            Category::START_ORDER.into_iter().rev().collect()
        } else {
            std::mem::take(&mut session.cleanup_pending)
        };
        let mut stopped = Vec::new();
        let mut failed = Vec::new();
        for category in targets {
            let ok = catch_unwind(AssertUnwindSafe(|| self.stop_component(category)))
                .unwrap_or_else(|_| {
                    error!(%category, "component panicked during stop");
                    false
                });
            if ok {
                stopped.push(category);
            } else {
                failed.push(category);
            }
        }

        let duration_secs = (Utc::now() - session.started_at).num_seconds();
        let cleanup_pending = !failed.is_empty();
        if cleanup_pending {
            let summary = format!(
                "Cleanup failed: {}; stop again to retry",
                join_names(&failed)
            );
            error!(
                session = %session.id,
                failed = %join_names(&failed),
                "lockdown cleanup incomplete"
            );
            self.logger.log(kinds::RESTORE_ERROR, &summary, false);
            session.cleanup_pending = failed.clone();
            self.session = Some(session);
        } else {
            info!(session = %session.id, duration_secs, "lockdown stopped");
            self.logger.log(
                kinds::LOCKDOWN_STOP,
                &format!("All restrictions disabled after {duration_secs}s"),
                false,
            );
        }

        StopReport {
            was_active: true,
            stopped,
            failed,
            duration_secs,
            cleanup_pending,
        }
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn get_status(&self) -> LockdownStatus {
        let components: BTreeMap<Category, bool> = Category::ALL
            .iter()
            .map(|c| {
                let active = match c {
                    Category::Keyboard => self.keyboard.is_active(),
                    Category::Pointer => self.pointer.is_active(),
                    Category::Network => self.network.is_blocked(),
                    Category::Windows => self.windows.is_active(),
                    Category::Processes => self.processes.is_active(),
                };
                (*c, active)
            })
            .collect();
        LockdownStatus {
            active: self.is_active(),
            session_id: self.session.as_ref().map(|s| s.id.to_string()),
            started_at: self.session.as_ref().map(|s| s.started_at),
            selection: self.defaults.clone(),
            components,
            cleanup_pending: self
                .session
                .as_ref()
                .map(|s| s.cleanup_pending.clone())
                .unwrap_or_default(),
            keyboard: self.keyboard.status(),
            pointer: self.pointer.status(),
            windows: self.windows.status(),
            network: self.network.status(),
            processes: self.processes.status(),
            host: self.host.lock().sample(),
            generated_at: Utc::now(),
        }
    }

    // ── Policy ──────────────────────────────────────────────────────────

    pub fn set_admin_notifier(&self, notifier: &Arc<dyn AdminNotifier>) {
        self.keyboard.set_admin_notifier(Arc::downgrade(notifier));
    }

    pub fn add_blocked_key(&self, combo: &str) -> Result<bool> {
        self.keyboard.add(combo)
    }

    pub fn remove_blocked_key(&self, combo: &str) -> Result<bool> {
        self.keyboard.remove(combo)
    }

    pub fn reset_keyboard(&self) -> Result<()> {
        self.keyboard.reset(&self.settings.blocked_keys)
    }

    pub fn add_blocked_button(&self, name: &str) -> Result<Vec<PointerButton>> {
        self.pointer.add(name)
    }

    pub fn remove_blocked_button(&self, name: &str) -> Result<Vec<PointerButton>> {
        self.pointer.remove(name)
    }

    pub fn set_block_all_buttons(&self, block_all: bool) {
        self.pointer.set_block_all(block_all);
    }

    pub fn allow_basic_clicks(&self) {
        self.pointer.allow_basic_clicks();
    }

    pub fn policy_lists(&self) -> PolicyLists {
        let pointer = self.pointer_policy.read();
        PolicyLists {
            blocked_keys: self.keyboard_policy.read().blocked_names(),
            blocked_buttons: pointer.blocked_names(),
            block_all_buttons: pointer.block_all(),
        }
    }

    /// Writes the current block-lists to the settings store.
    pub fn save_policy(&self) -> Result<()> {
        let lists = self.policy_lists();
        save_policy_lists(self.store.as_ref(), &lists)?;
        info!(
            keys = lists.blocked_keys.len(),
            buttons = lists.blocked_buttons.len(),
            "policy saved"
        );
        Ok(())
    }

    // ── Components ──────────────────────────────────────────────────────

    pub fn protect_window(&self, target: WindowTarget) -> bool {
        self.windows.protect(target)
    }

    pub fn settings(&self) -> &LockdownSettings {
        &self.settings
    }

    pub fn keyboard(&self) -> &KeyboardLayer {
        &self.keyboard
    }

    pub fn pointer(&self) -> &PointerLayer {
        &self.pointer
    }

    pub fn windows(&self) -> &WindowGuard {
        &self.windows
    }

    pub fn network(&self) -> &NetworkSuppressor {
        &self.network
    }

    pub fn processes(&self) -> &ProcessMonitor {
        &self.processes
    }
}

impl Drop for Lockdown {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_aliases_parse() {
        assert_eq!("Mouse".parse::<Category>().unwrap(), Category::Pointer);
        assert_eq!("internet".parse::<Category>().unwrap(), Category::Network);
        assert!("printer".parse::<Category>().is_err());
        let sel: Selection = serde_json::from_str(r#"{"keyboard": true, "mouse": false}"#).unwrap();
        assert_eq!(sel.get(&Category::Pointer), Some(&false));
    }

    #[test]
    fn selection_serializes_with_lowercase_keys() {
        let sel: Selection = [(Category::Processes, true)].into_iter().collect();
        assert_eq!(serde_json::to_string(&sel).unwrap(), r#"{"processes":true}"#);
    }
}
