use super::{
    AdminNotifier, EventHandler, HookCounters, HookDriver, HookVerdict, Key, KeyEvent, Transition,
};
use crate::activity::{kinds, ActivityLogger};
use crate::error::Result;
use crate::policy::{KeyCombo, KeyDecision, KeyboardPolicy, Modifiers};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct KeyboardStatus {
    pub active: bool,
    pub blocked: Vec<String>,
    pub admin_combo: String,
    pub events_seen: u64,
    pub events_blocked: u64,
    pub admin_requests: u64,
    pub handler_faults: u64,
}

struct KeyboardFilter {
    policy: Arc<RwLock<KeyboardPolicy>>,
    held: Mutex<Modifiers>,
    /// Keys whose key-down was consumed; their key-up is consumed too.
    swallowed: Mutex<Vec<Key>>,
    admin_latched: AtomicBool,
    notifier: RwLock<Option<Weak<dyn AdminNotifier>>>,
    logger: Arc<dyn ActivityLogger>,
    counters: HookCounters,
}

impl KeyboardFilter {
    fn reset(&self) {
        *self.held.lock() = Modifiers::NONE;
        self.swallowed.lock().clear();
        self.admin_latched.store(false, Ordering::SeqCst);
    }

    fn guarded(&self, event: &KeyEvent) -> HookVerdict {
        match catch_unwind(AssertUnwindSafe(|| self.classify(event))) {
            Ok(verdict) => verdict,
            Err(_) => {
                HookCounters::bump(&self.counters.handler_panics);
                error!(?event, "keyboard handler panicked; forwarding event");
                let detail = format!(
                    "Keyboard handler fault on {}; event forwarded",
                    key_label(event.key)
                );
                self.logger.log(kinds::HOOK_PROC_ERROR, &detail, false);
                HookVerdict::PassThrough
            }
        }
    }

    fn classify(&self, event: &KeyEvent) -> HookVerdict {
        HookCounters::bump(&self.counters.seen);
        match event.transition {
            Transition::Down => self.on_down(event.key),
            Transition::Up => self.on_up(event.key),
        }
    }

    fn on_down(&self, key: Key) -> HookVerdict {
        let combo = {
            let mut held = self.held.lock();
            match key {
                Key::Modifier(m) => {
                    let combo = KeyCombo::new(held.with(m), None);
                    held.insert(m);
                    combo
                }
                Key::Named(name) => KeyCombo::new(*held, Some(name.to_string())),
                Key::Unknown(_) => return HookVerdict::PassThrough,
            }
        };

        let decision = self.policy.read().decide(&combo);
        match decision {
            KeyDecision::Block => {
                {
                    let mut swallowed = self.swallowed.lock();
                    if !swallowed.contains(&key) {
                        swallowed.push(key);
                    }
                }
                HookCounters::bump(&self.counters.consumed);
                self.logger.log(
                    kinds::KEY_BLOCKED,
                    &format!("Blocked key combination: {combo}"),
                    true,
                );
                HookVerdict::Consume
            }
            KeyDecision::AdminOverride => {
                if !self.admin_latched.swap(true, Ordering::SeqCst) {
                    HookCounters::bump(&self.counters.admin_requests);
                    self.logger.log(
                        kinds::ADMIN_ACCESS,
                        &format!("Admin override combination pressed: {combo}"),
                        false,
                    );
                    self.notify_admin();
                }
                HookVerdict::PassThrough
            }
            KeyDecision::Allow => HookVerdict::PassThrough,
        }
    }

    fn on_up(&self, key: Key) -> HookVerdict {
        if let Key::Modifier(m) = key {
            self.held.lock().remove(m);
        }
        self.admin_latched.store(false, Ordering::SeqCst);

        let was_swallowed = {
            let mut swallowed = self.swallowed.lock();
            match swallowed.iter().position(|k| *k == key) {
                Some(pos) => {
                    swallowed.swap_remove(pos);
                    true
                }
                None => false,
            }
        };
        if !was_swallowed {
            return HookVerdict::PassThrough;
        }
        HookCounters::bump(&self.counters.consumed);
        self.logger.log(
            kinds::KEY_BLOCKED,
            &format!("Blocked key release: {}", key_label(key)),
            true,
        );
        HookVerdict::Consume
    }

    /// The notifier runs on its own thread so the hook callback returns at once.
    fn notify_admin(&self) {
        let Some(notifier) = self.notifier.read().as_ref().and_then(Weak::upgrade) else {
            return;
        };
        let spawned = std::thread::Builder::new()
            .name("admin-notify".into())
            .spawn(move || notifier.admin_requested());
        if let Err(e) = spawned {
            warn!(error = %e, "failed to dispatch admin notification");
        }
    }
}

fn key_label(key: Key) -> String {
    match key {
        Key::Modifier(m) => m.name().to_string(),
        Key::Named(name) => name.to_string(),
        Key::Unknown(code) => format!("vk_{code:#04x}"),
    }
}

/// Keyboard interception bound to a shared [`KeyboardPolicy`].
///
/// The policy handle is shared with the orchestrator, so changes made through
/// [`KeyboardLayer::add`] and [`KeyboardLayer::remove`] apply to the running
/// hook without reinstalling it.
pub struct KeyboardLayer {
    filter: Arc<KeyboardFilter>,
    driver: Box<dyn HookDriver<KeyEvent>>,
    active: bool,
}

impl KeyboardLayer {
    pub fn new(
        policy: Arc<RwLock<KeyboardPolicy>>,
        driver: Box<dyn HookDriver<KeyEvent>>,
        logger: Arc<dyn ActivityLogger>,
    ) -> Self {
        Self {
            filter: Arc::new(KeyboardFilter {
                policy,
                held: Mutex::new(Modifiers::NONE),
                swallowed: Mutex::new(Vec::new()),
                admin_latched: AtomicBool::new(false),
                notifier: RwLock::new(None),
                logger,
                counters: HookCounters::default(),
            }),
            driver,
            active: false,
        }
    }

    pub fn set_admin_notifier(&self, notifier: Weak<dyn AdminNotifier>) {
        *self.filter.notifier.write() = Some(notifier);
    }

    /// Installs the hook. Returns true if the layer is active afterwards.
    pub fn start(&mut self) -> bool {
        if self.active {
            return true;
        }
        self.filter.reset();
        let filter = self.filter.clone();
        let handler: EventHandler<KeyEvent> =
            Arc::new(move |event: &KeyEvent| filter.guarded(event));
        match self.driver.install(handler) {
            Ok(()) => {
                self.active = true;
                let blocked = self.filter.policy.read().blocked_names().join(", ");
                info!(%blocked, "keyboard hook installed");
                self.filter.logger.log(
                    kinds::KEYBOARD_HOOK,
                    &format!("Keyboard blocking started: {blocked}"),
                    false,
                );
                true
            }
            Err(e) => {
                error!(error = %e, "keyboard hook install failed");
                self.filter.logger.log(
                    kinds::COMPONENT_ERROR,
                    &format!("Keyboard hook install failed: {e}"),
                    false,
                );
                false
            }
        }
    }

    /// Removes the hook. A no-op when inactive.
    pub fn stop(&mut self) -> bool {
        if !self.active {
            return true;
        }
        self.active = false;
        self.filter.reset();
        match self.driver.uninstall() {
            Ok(()) => {
                info!("keyboard hook removed");
                self.filter
                    .logger
                    .log(kinds::KEYBOARD_HOOK, "Keyboard blocking stopped", false);
                true
            }
            Err(e) => {
                error!(error = %e, "keyboard hook uninstall failed");
                self.filter.logger.log(
                    kinds::COMPONENT_ERROR,
                    &format!("Keyboard hook uninstall failed: {e}"),
                    false,
                );
                false
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn add(&self, identifier: &str) -> Result<bool> {
        let added = self.filter.policy.write().add(identifier)?;
        if added {
            self.filter.logger.log(
                kinds::KEYBOARD_CONFIG,
                &format!("Added blocked key: {}", KeyCombo::parse(identifier)?),
                false,
            );
        }
        Ok(added)
    }

    pub fn remove(&self, identifier: &str) -> Result<bool> {
        let removed = self.filter.policy.write().remove(identifier)?;
        if removed {
            self.filter.logger.log(
                kinds::KEYBOARD_CONFIG,
                &format!("Removed blocked key: {}", KeyCombo::parse(identifier)?),
                false,
            );
        }
        Ok(removed)
    }

    pub fn reset<S: AsRef<str>>(&self, defaults: &[S]) -> Result<()> {
        self.filter.policy.write().replace_blocked(defaults)?;
        self.filter
            .logger
            .log(kinds::KEYBOARD_CONFIG, "Blocked keys reset to defaults", false);
        Ok(())
    }

    /// Runs an event through the same path the OS hook uses.
    pub fn evaluate(&self, event: &KeyEvent) -> HookVerdict {
        self.filter.guarded(event)
    }

    pub fn status(&self) -> KeyboardStatus {
        let policy = self.filter.policy.read();
        let c = &self.filter.counters;
        KeyboardStatus {
            active: self.active,
            blocked: policy.blocked_names(),
            admin_combo: policy.admin().to_string(),
            events_seen: HookCounters::get(&c.seen),
            events_blocked: HookCounters::get(&c.consumed),
            admin_requests: HookCounters::get(&c.admin_requests),
            handler_faults: HookCounters::get(&c.handler_panics),
        }
    }
}

impl Drop for KeyboardLayer {
    fn drop(&mut self) {
        self.stop();
    }
}
