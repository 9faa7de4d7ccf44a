use super::{
    ProtectionPredicate, SystemCommand, WindowBackend, WindowHandle, WindowStyle, WindowTarget,
};
use crate::activity::{kinds, ActivityLogger};
use crate::error::Result;
use crate::settings::WindowSettings;
use crate::worker::PollingWorker;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindowGuardConfig {
    pub prevent_minimize: bool,
    pub prevent_close: bool,
    pub prevent_maximize: bool,
    pub force_topmost: bool,
    pub monitor_new_windows: bool,
    pub scan_interval_ms: u64,
}

impl From<&WindowSettings> for WindowGuardConfig {
    fn from(s: &WindowSettings) -> Self {
        Self {
            prevent_minimize: s.prevent_minimize,
            prevent_close: s.prevent_close,
            prevent_maximize: s.prevent_maximize,
            force_topmost: s.force_topmost,
            monitor_new_windows: s.monitor_new_windows,
            scan_interval_ms: s.scan_interval_ms,
        }
    }
}

impl WindowGuardConfig {
    fn stripped_bits(&self) -> u32 {
        let mut bits = 0;
        if self.prevent_minimize {
            bits |= WindowStyle::MINIMIZE_BOX;
        }
        if self.prevent_maximize {
            bits |= WindowStyle::MAXIMIZE_BOX;
        }
        if self.prevent_close {
            bits |= WindowStyle::SYSTEM_MENU;
        }
        bits
    }

    fn disabled_commands(&self) -> Vec<SystemCommand> {
        let mut commands = Vec::new();
        if self.prevent_minimize {
            commands.push(SystemCommand::Minimize);
        }
        if self.prevent_maximize {
            commands.push(SystemCommand::Maximize);
        }
        if self.prevent_close {
            commands.push(SystemCommand::Close);
        }
        commands
    }
}

#[derive(Debug, Clone)]
struct ProtectedWindow {
    title: String,
    original: WindowStyle,
    applied: bool,
    topmost_applied: bool,
    protected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub examined: usize,
    pub newly_protected: usize,
    pub forced_restores: usize,
    pub dropped: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct WindowGuardStatus {
    pub active: bool,
    pub protected_count: usize,
    pub protected_titles: Vec<String>,
    pub config: WindowGuardConfig,
    pub scans: u64,
}

struct GuardState {
    config: WindowGuardConfig,
    predicate: ProtectionPredicate,
    tracked: HashMap<WindowHandle, ProtectedWindow>,
    active: bool,
    initial_scan_done: bool,
    scans: u64,
}

/// Everything the scan loop needs, shared with the worker thread.
struct GuardCore {
    backend: Arc<dyn WindowBackend>,
    logger: Arc<dyn ActivityLogger>,
    state: Mutex<GuardState>,
}

impl GuardCore {
    fn scan(&self) -> ScanSummary {
        let mut state = self.state.lock();
        if !state.active {
            return ScanSummary::default();
        }
        let mut summary = ScanSummary::default();
        self.enforce_tracked(&mut state, &mut summary);

        if state.config.monitor_new_windows || !state.initial_scan_done {
            for handle in self.backend.top_level_windows() {
                if state.tracked.contains_key(&handle) {
                    continue;
                }
                summary.examined += 1;
                if !self.backend.is_window(handle) || !self.backend.is_visible(handle) {
                    continue;
                }
                let Some(title) = self.backend.title(handle).filter(|t| !t.trim().is_empty()) else {
                    continue;
                };
                let process = self.backend.process_name(handle);
                if !state.predicate.should_protect(process.as_deref(), &title) {
                    continue;
                }
                match self.apply(&mut state, handle, &title) {
                    Ok(true) => summary.newly_protected += 1,
                    Ok(false) => {}
                    Err(e) => {
                        summary.errors += 1;
                        warn!(window = %title, error = %e, "window protection failed");
                        self.logger.log(
                            kinds::WINDOW_ERROR,
                            &format!("Failed to protect '{title}': {e}"),
                            false,
                        );
                    }
                }
            }
            state.initial_scan_done = true;
        }
        state.scans += 1;
        summary
    }

    fn enforce_tracked(&self, state: &mut GuardState, summary: &mut ScanSummary) {
        let handles: Vec<WindowHandle> = state.tracked.keys().copied().collect();
        for handle in handles {
            if !self.backend.is_window(handle) {
                if let Some(gone) = state.tracked.remove(&handle) {
                    debug!(window = %gone.title, %handle, "protected window closed");
                }
                summary.dropped += 1;
                continue;
            }
            if !state.config.prevent_minimize || !self.backend.is_minimized(handle) {
                continue;
            }
            let title = state
                .tracked
                .get(&handle)
                .map(|w| w.title.clone())
                .unwrap_or_default();
            match self.backend.restore(handle) {
                Ok(()) => {
                    summary.forced_restores += 1;
                    info!(window = %title, "minimized protected window restored");
                    self.logger.log(
                        kinds::WINDOW_FORCED_RESTORE,
                        &format!("Prevented minimize of '{title}'"),
                        true,
                    );
                }
                Err(e) => {
                    summary.errors += 1;
                    warn!(window = %title, error = %e, "forced restore failed");
                }
            }
        }
    }

    /// Strips affordances from one window. Returns false if it was already
    /// protected. Once the original style is captured the window stays
    /// tracked, so a partial failure is still undone on stop.
    fn apply(&self, state: &mut GuardState, handle: WindowHandle, title: &str) -> Result<bool> {
        if state.tracked.get(&handle).is_some_and(|w| w.applied) {
            return Ok(false);
        }
        let original = self.backend.style(handle)?;
        let config = state.config.clone();
        let topmost_applied = config.force_topmost && !original.is_topmost();
        state.tracked.insert(
            handle,
            ProtectedWindow {
                title: title.to_string(),
                original,
                applied: true,
                topmost_applied,
                protected_at: Utc::now(),
            },
        );

        self.backend
            .set_style(handle, original.without(config.stripped_bits()))?;
        self.backend
            .disable_menu_commands(handle, &config.disabled_commands())?;
        if topmost_applied {
            self.backend.set_topmost(handle, true)?;
        }
        self.backend.refresh_frame(handle)?;

        info!(window = %title, %handle, "window protected");
        self.logger.log(
            kinds::WINDOW_PROTECTED,
            &format!("Protected window: {title}"),
            false,
        );
        Ok(true)
    }

    /// Puts every tracked window back. Returns how many could not be restored.
    fn restore_all(&self, state: &mut GuardState) -> (usize, usize) {
        let mut restored = 0;
        let mut failed = 0;
        for (handle, window) in state.tracked.drain() {
            if !self.backend.is_window(handle) {
                debug!(window = %window.title, "window gone before restore");
                continue;
            }
            let mut steps: Vec<(&str, Result<()>)> = vec![
                ("style", self.backend.set_style(handle, window.original)),
                ("system menu", self.backend.reset_system_menu(handle)),
            ];
            if window.topmost_applied {
                steps.push(("topmost", self.backend.set_topmost(handle, false)));
            }
            steps.push(("frame", self.backend.refresh_frame(handle)));

            let failures: Vec<String> = steps
                .into_iter()
                .filter_map(|(step, r)| r.err().map(|e| format!("{step}: {e}")))
                .collect();
            if failures.is_empty() {
                restored += 1;
                self.logger.log(
                    kinds::WINDOW_RESTORED,
                    &format!("Restored window: {}", window.title),
                    false,
                );
            } else {
                failed += 1;
                let detail = format!(
                    "Failed to restore '{}' ({handle}), original style {:#010x} \
                     ex_style {:#010x}, protected since {}: {}",
                    window.title,
                    window.original.style,
                    window.original.ex_style,
                    window.protected_at.to_rfc3339(),
                    failures.join("; ")
                );
                error!(window = %window.title, %handle, "{detail}");
                self.logger.log(kinds::RESTORE_ERROR, &detail, false);
            }
        }
        (restored, failed)
    }
}

/// Polling window guard.
///
/// A scan first re-checks tracked windows (dropping dead handles and undoing
/// minimization), then looks for new windows that match the predicate.
pub struct WindowGuard {
    core: Arc<GuardCore>,
    worker: Option<PollingWorker>,
    join_timeout: Duration,
}

impl WindowGuard {
    pub fn new(
        backend: Arc<dyn WindowBackend>,
        config: WindowGuardConfig,
        predicate: ProtectionPredicate,
        logger: Arc<dyn ActivityLogger>,
        join_timeout: Duration,
    ) -> Self {
        Self {
            core: Arc::new(GuardCore {
                backend,
                logger,
                state: Mutex::new(GuardState {
                    config,
                    predicate,
                    tracked: HashMap::new(),
                    active: false,
                    initial_scan_done: false,
                    scans: 0,
                }),
            }),
            worker: None,
            join_timeout,
        }
    }

    /// Activates the guard, optionally replacing its configuration, and
    /// starts the scan loop.
    pub fn start(&mut self, config: Option<WindowGuardConfig>) -> bool {
        let interval = {
            let mut state = self.core.state.lock();
            if state.active {
                return true;
            }
            if let Some(config) = config {
                state.config = config;
            }
            state.active = true;
            state.initial_scan_done = false;
            Duration::from_millis(state.config.scan_interval_ms)
        };

        let core = self.core.clone();
        match PollingWorker::spawn("window-guard", interval, move || {
            core.scan();
        }) {
            Ok(worker) => {
                self.worker = Some(worker);
                info!(interval_ms = interval.as_millis() as u64, "window guard started");
                self.core.logger.log(
                    kinds::WINDOW_PROTECTION,
                    "Window protection activated",
                    false,
                );
                true
            }
            Err(e) => {
                self.core.state.lock().active = false;
                error!(error = %e, "failed to spawn window guard thread");
                self.core.logger.log(
                    kinds::COMPONENT_ERROR,
                    &format!("Window guard failed to start: {e}"),
                    false,
                );
                false
            }
        }
    }

    /// Stops scanning and restores every tracked window. Returns false if any
    /// window could not be restored.
    pub fn stop(&mut self) -> bool {
        if let Some(mut worker) = self.worker.take() {
            worker.stop(self.join_timeout);
        }
        let mut state = self.core.state.lock();
        if !state.active {
            return true;
        }
        state.active = false;
        let (restored, failed) = self.core.restore_all(&mut state);
        info!(restored, failed, "window guard stopped");
        self.core.logger.log(
            kinds::WINDOW_PROTECTION,
            &format!("Window protection deactivated: {restored} restored, {failed} failed"),
            false,
        );
        failed == 0
    }

    /// Protects one window immediately, bypassing the predicate. Only
    /// honoured while the guard is active, so the window is restored on stop.
    pub fn protect(&self, target: WindowTarget) -> bool {
        let backend = &self.core.backend;
        let handle = match &target {
            WindowTarget::Handle(h) => Some(*h),
            WindowTarget::Title(title) => backend.find_by_title(title),
        };
        let Some(handle) = handle.filter(|h| backend.is_window(*h)) else {
            warn!(?target, "protect target not found");
            return false;
        };
        let mut state = self.core.state.lock();
        if !state.active {
            warn!(?target, "window guard inactive; protect ignored");
            return false;
        }
        let title = backend
            .title(handle)
            .or_else(|| match &target {
                WindowTarget::Title(t) => Some(t.clone()),
                WindowTarget::Handle(_) => None,
            })
            .unwrap_or_else(|| handle.to_string());
        match self.core.apply(&mut state, handle, &title) {
            Ok(_) => true,
            Err(e) => {
                warn!(window = %title, error = %e, "manual protection failed");
                self.core.logger.log(
                    kinds::WINDOW_ERROR,
                    &format!("Failed to protect '{title}': {e}"),
                    false,
                );
                false
            }
        }
    }

    /// Runs one scan pass on the calling thread.
    pub fn scan_now(&self) -> ScanSummary {
        self.core.scan()
    }

    pub fn is_active(&self) -> bool {
        self.core.state.lock().active
    }

    pub fn status(&self) -> WindowGuardStatus {
        let state = self.core.state.lock();
        let mut protected_titles: Vec<String> =
            state.tracked.values().map(|w| w.title.clone()).collect();
        protected_titles.sort();
        WindowGuardStatus {
            active: state.active,
            protected_count: state.tracked.len(),
            protected_titles,
            config: state.config.clone(),
            scans: state.scans,
        }
    }
}

impl Drop for WindowGuard {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::noop;
    use crate::error::LockdownError;
    use crate::settings::WindowSettings;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeWindow {
        title: String,
        process: String,
        style: WindowStyle,
        minimized: bool,
        alive: bool,
        fail_restore: bool,
    }

    impl Default for WindowStyle {
        fn default() -> Self {
            WindowStyle {
                style: 0x14CF_0000,
                ex_style: 0x0000_0100,
            }
        }
    }

    #[derive(Default)]
    struct FakeDesktop {
        windows: Mutex<Vec<(WindowHandle, FakeWindow)>>,
        set_style_calls: AtomicUsize,
    }

    impl FakeDesktop {
        fn add(&self, id: isize, title: &str, process: &str) {
            self.windows.lock().push((
                WindowHandle(id),
                FakeWindow {
                    title: title.into(),
                    process: process.into(),
                    alive: true,
                    ..Default::default()
                },
            ));
        }

        fn with<R>(&self, h: WindowHandle, f: impl FnOnce(&mut FakeWindow) -> R) -> Option<R> {
            let mut windows = self.windows.lock();
            windows
                .iter_mut()
                .find(|(id, w)| *id == h && w.alive)
                .map(|(_, w)| f(w))
        }

        fn style_of(&self, id: isize) -> u32 {
            self.with(WindowHandle(id), |w| w.style.style).unwrap()
        }
    }

    fn gone() -> LockdownError {
        LockdownError::Restoration("invalid window handle".into())
    }

    impl WindowBackend for FakeDesktop {
        fn top_level_windows(&self) -> Vec<WindowHandle> {
            self.windows.lock().iter().filter(|(_, w)| w.alive).map(|(h, _)| *h).collect()
        }
        fn is_window(&self, h: WindowHandle) -> bool {
            self.with(h, |_| ()).is_some()
        }
        fn is_visible(&self, h: WindowHandle) -> bool {
            self.is_window(h)
        }
        fn title(&self, h: WindowHandle) -> Option<String> {
            self.with(h, |w| w.title.clone())
        }
        fn process_name(&self, h: WindowHandle) -> Option<String> {
            self.with(h, |w| w.process.clone())
        }
        fn find_by_title(&self, title: &str) -> Option<WindowHandle> {
            self.windows
                .lock()
                .iter()
                .find(|(_, w)| w.alive && w.title == title)
                .map(|(h, _)| *h)
        }
        fn style(&self, h: WindowHandle) -> Result<WindowStyle> {
            self.with(h, |w| w.style).ok_or_else(gone)
        }
        fn set_style(&self, h: WindowHandle, style: WindowStyle) -> Result<()> {
            self.set_style_calls.fetch_add(1, Ordering::SeqCst);
            self.with(h, |w| {
                if w.fail_restore && style.has(WindowStyle::SYSTEM_MENU) {
                    return Err(LockdownError::Restoration("access denied".into()));
                }
                w.style = style;
                Ok(())
            })
            .ok_or_else(gone)?
        }
        fn disable_menu_commands(&self, h: WindowHandle, _c: &[SystemCommand]) -> Result<()> {
            self.with(h, |_| ()).ok_or_else(gone)
        }
        fn reset_system_menu(&self, h: WindowHandle) -> Result<()> {
            self.with(h, |_| ()).ok_or_else(gone)
        }
        fn set_topmost(&self, h: WindowHandle, topmost: bool) -> Result<()> {
            self.with(h, |w| {
                if topmost {
                    w.style.ex_style |= WindowStyle::EX_TOPMOST;
                } else {
                    w.style.ex_style &= !WindowStyle::EX_TOPMOST;
                }
            })
            .ok_or_else(gone)
        }
        fn refresh_frame(&self, h: WindowHandle) -> Result<()> {
            self.with(h, |_| ()).ok_or_else(gone)
        }
        fn is_minimized(&self, h: WindowHandle) -> bool {
            self.with(h, |w| w.minimized).unwrap_or(false)
        }
        fn restore(&self, h: WindowHandle) -> Result<()> {
            self.with(h, |w| w.minimized = false).ok_or_else(gone)
        }
    }

    fn guard(desktop: Arc<FakeDesktop>, settings: &WindowSettings) -> WindowGuard {
        let mut config = WindowGuardConfig::from(settings);
        config.scan_interval_ms = 60_000;
        WindowGuard::new(
            desktop,
            config,
            ProtectionPredicate::new(
                &settings.protected_processes,
                &settings.protected_keywords,
                &settings.excluded_titles,
            ),
            noop(),
            Duration::from_secs(3),
        )
    }

    /// Starts the guard and waits for the worker's first pass, after which
    /// the worker sleeps for the rest of the test.
    fn start_settled(guard: &mut WindowGuard) {
        assert!(guard.start(None));
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while guard.status().scans == 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(guard.status().scans >= 1);
    }

    #[test]
    fn protects_matching_windows_and_restores_exact_bits() {
        let desktop = Arc::new(FakeDesktop::default());
        desktop.add(1, "Secure Exam Browser", "examapp.exe");
        desktop.add(2, "Windows Security", "securityhealthhost.exe");
        desktop.add(3, "notes.txt - Notepad", "notepad.exe");
        let original = desktop.style_of(1);

        let mut guard = guard(desktop.clone(), &WindowSettings::default());
        start_settled(&mut guard);

        let stripped = desktop.style_of(1);
        assert_eq!(stripped & WindowStyle::MINIMIZE_BOX, 0);
        assert_eq!(stripped & WindowStyle::MAXIMIZE_BOX, 0);
        assert_eq!(stripped & WindowStyle::SYSTEM_MENU, 0);
        assert_eq!(desktop.style_of(2), original);
        assert_eq!(desktop.style_of(3), original);
        assert_eq!(guard.status().protected_titles, vec!["Secure Exam Browser"]);

        assert!(guard.stop());
        assert_eq!(desktop.style_of(1), original);
        assert_eq!(guard.status().protected_count, 0);
    }

    #[test]
    fn never_reapplies_to_tracked_window() {
        let desktop = Arc::new(FakeDesktop::default());
        desktop.add(1, "Online Quiz", "chrome.exe");
        let original = desktop.style_of(1);
        let mut guard = guard(desktop.clone(), &WindowSettings::default());
        start_settled(&mut guard);
        assert_eq!(guard.status().protected_count, 1);
        assert_eq!(guard.scan_now().newly_protected, 0);
        assert_eq!(guard.scan_now().newly_protected, 0);
        assert_eq!(desktop.set_style_calls.load(Ordering::SeqCst), 1);
        drop(guard);
        assert_eq!(desktop.style_of(1), original);
    }

    #[test]
    fn minimized_window_is_restored_and_dead_window_dropped() {
        let desktop = Arc::new(FakeDesktop::default());
        desktop.add(1, "Exam Portal", "firefox.exe");
        desktop.add(2, "Assessment", "firefox.exe");
        let mut guard = guard(desktop.clone(), &WindowSettings::default());
        start_settled(&mut guard);

        desktop.with(WindowHandle(1), |w| w.minimized = true);
        desktop.with(WindowHandle(2), |w| w.alive = false);
        let summary = guard.scan_now();
        assert_eq!(summary.forced_restores, 1);
        assert_eq!(summary.dropped, 1);
        assert!(!desktop.is_minimized(WindowHandle(1)));
        assert_eq!(guard.status().protected_count, 1);
        assert!(guard.stop());
    }

    #[test]
    fn restore_failure_is_logged_and_others_continue() {
        let desktop = Arc::new(FakeDesktop::default());
        desktop.add(1, "Exam A", "chrome.exe");
        desktop.add(2, "Exam B", "chrome.exe");
        let original = desktop.style_of(2);
        let mut guard = guard(desktop.clone(), &WindowSettings::default());
        start_settled(&mut guard);
        desktop.with(WindowHandle(1), |w| w.fail_restore = true);

        assert!(!guard.stop());
        assert_eq!(desktop.style_of(2), original);
        assert!(!guard.is_active());
        assert!(guard.stop());
    }

    #[test]
    fn topmost_is_opt_in_and_undone() {
        let desktop = Arc::new(FakeDesktop::default());
        desktop.add(1, "Lockdown Browser", "lockdown.exe");
        let settings = WindowSettings {
            force_topmost: true,
            ..Default::default()
        };
        let mut guard = guard(desktop.clone(), &settings);
        start_settled(&mut guard);
        assert!(desktop.with(WindowHandle(1), |w| w.style.is_topmost()).unwrap());
        assert!(guard.stop());
        assert!(!desktop.with(WindowHandle(1), |w| w.style.is_topmost()).unwrap());
    }

    #[test]
    fn protect_requires_active_guard() {
        let desktop = Arc::new(FakeDesktop::default());
        desktop.add(7, "Calculator", "calc.exe");
        let original = desktop.style_of(7);
        let mut guard = guard(desktop.clone(), &WindowSettings::default());
        assert!(!guard.protect(WindowTarget::Title("Calculator".into())));
        start_settled(&mut guard);
        assert!(guard.protect(WindowTarget::Title("Calculator".into())));
        assert!(!guard.protect(WindowTarget::Handle(WindowHandle(99))));
        assert_ne!(desktop.style_of(7), original);
        assert!(guard.stop());
        assert_eq!(desktop.style_of(7), original);
    }
}
