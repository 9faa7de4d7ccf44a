use super::{
    EventHandler, HookCounters, HookDriver, HookVerdict, PointerAction, PointerEvent, Transition,
};
use crate::activity::{kinds, ActivityLogger};
use crate::error::Result;
use crate::policy::{PointerButton, PointerPolicy};
use parking_lot::RwLock;
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Clone, Serialize)]
pub struct PointerStatus {
    pub active: bool,
    pub blocked_buttons: Vec<String>,
    pub block_all: bool,
    pub left_click_allowed: bool,
    pub right_click_allowed: bool,
    pub events_seen: u64,
    pub events_blocked: u64,
    pub handler_faults: u64,
}

struct PointerFilter {
    policy: Arc<RwLock<PointerPolicy>>,
    /// Bitmask of buttons whose button-down was consumed.
    swallowed: AtomicU8,
    logger: Arc<dyn ActivityLogger>,
    counters: HookCounters,
}

impl PointerFilter {
    fn guarded(&self, event: &PointerEvent) -> HookVerdict {
        match catch_unwind(AssertUnwindSafe(|| self.classify(event))) {
            Ok(verdict) => verdict,
            Err(_) => {
                HookCounters::bump(&self.counters.handler_panics);
                error!(?event, "pointer handler panicked; forwarding event");
                let detail = format!(
                    "Mouse handler fault at ({}, {}); event forwarded",
                    event.x, event.y
                );
                self.logger.log(kinds::HOOK_PROC_ERROR, &detail, false);
                HookVerdict::PassThrough
            }
        }
    }

    fn classify(&self, event: &PointerEvent) -> HookVerdict {
        HookCounters::bump(&self.counters.seen);
        let PointerAction::Button { button, transition } = event.action else {
            return HookVerdict::PassThrough;
        };
        let bit = button.bit();
        let consume = match transition {
            Transition::Down => {
                let blocked = self.policy.read().blocks(button);
                if blocked {
                    self.swallowed.fetch_or(bit, Ordering::SeqCst);
                }
                blocked
            }
            Transition::Up => {
                let was_swallowed = self.swallowed.fetch_and(!bit, Ordering::SeqCst) & bit != 0;
                was_swallowed || self.policy.read().blocks(button)
            }
        };
        if !consume {
            return HookVerdict::PassThrough;
        }
        HookCounters::bump(&self.counters.consumed);
        let verb = match transition {
            Transition::Down => "Blocked",
            Transition::Up => "Blocked release of",
        };
        self.logger.log(
            kinds::MOUSE_BLOCKED,
            &format!("{verb} {} at ({}, {})", button.label(), event.x, event.y),
            true,
        );
        HookVerdict::Consume
    }
}

/// Pointer-button interception. Motion and wheel events always pass.
pub struct PointerLayer {
    filter: Arc<PointerFilter>,
    driver: Box<dyn HookDriver<PointerEvent>>,
    active: bool,
}

impl PointerLayer {
    pub fn new(
        policy: Arc<RwLock<PointerPolicy>>,
        driver: Box<dyn HookDriver<PointerEvent>>,
        logger: Arc<dyn ActivityLogger>,
    ) -> Self {
        Self {
            filter: Arc::new(PointerFilter {
                policy,
                swallowed: AtomicU8::new(0),
                logger,
                counters: HookCounters::default(),
            }),
            driver,
            active: false,
        }
    }

    pub fn start(&mut self) -> bool {
        if self.active {
            return true;
        }
        self.filter.swallowed.store(0, Ordering::SeqCst);
        let filter = self.filter.clone();
        let handler: EventHandler<PointerEvent> =
            Arc::new(move |event: &PointerEvent| filter.guarded(event));
        match self.driver.install(handler) {
            Ok(()) => {
                self.active = true;
                let summary = self.describe();
                info!(blocked = %summary, "mouse hook installed");
                self.filter.logger.log(
                    kinds::MOUSE_HOOK,
                    &format!("Mouse blocking started: {summary}"),
                    false,
                );
                true
            }
            Err(e) => {
                error!(error = %e, "mouse hook install failed");
                self.filter.logger.log(
                    kinds::COMPONENT_ERROR,
                    &format!("Mouse hook install failed: {e}"),
                    false,
                );
                false
            }
        }
    }

    pub fn stop(&mut self) -> bool {
        if !self.active {
            return true;
        }
        self.active = false;
        self.filter.swallowed.store(0, Ordering::SeqCst);
        match self.driver.uninstall() {
            Ok(()) => {
                info!("mouse hook removed");
                self.filter
                    .logger
                    .log(kinds::MOUSE_HOOK, "Mouse blocking stopped", false);
                true
            }
            Err(e) => {
                error!(error = %e, "mouse hook uninstall failed");
                self.filter.logger.log(
                    kinds::COMPONENT_ERROR,
                    &format!("Mouse hook uninstall failed: {e}"),
                    false,
                );
                false
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn add(&self, name: &str) -> Result<Vec<PointerButton>> {
        let added = self.filter.policy.write().add(name)?;
        for button in &added {
            self.filter.logger.log(
                kinds::MOUSE_CONFIG,
                &format!("Added blocked button: {}", button.label()),
                false,
            );
        }
        Ok(added)
    }

    pub fn remove(&self, name: &str) -> Result<Vec<PointerButton>> {
        let removed = self.filter.policy.write().remove(name)?;
        for button in &removed {
            self.filter.logger.log(
                kinds::MOUSE_CONFIG,
                &format!("Removed blocked button: {}", button.label()),
                false,
            );
        }
        Ok(removed)
    }

    pub fn set_block_all(&self, block_all: bool) {
        self.filter.policy.write().set_block_all(block_all);
        let state = if block_all { "enabled" } else { "disabled" };
        self.filter.logger.log(
            kinds::MOUSE_CONFIG,
            &format!("Block all mouse buttons {state}"),
            false,
        );
    }

    pub fn allow_basic_clicks(&self) {
        self.filter.policy.write().allow_basic_clicks();
        self.filter.logger.log(
            kinds::MOUSE_CONFIG,
            "Basic clicks allowed; middle and side buttons blocked",
            false,
        );
    }

    pub fn evaluate(&self, event: &PointerEvent) -> HookVerdict {
        self.filter.guarded(event)
    }

    fn describe(&self) -> String {
        let policy = self.filter.policy.read();
        if policy.block_all() {
            return "all buttons".to_string();
        }
        let labels: Vec<&str> = policy.blocked().map(PointerButton::label).collect();
        if labels.is_empty() {
            "no buttons".to_string()
        } else {
            labels.join(", ")
        }
    }

    pub fn status(&self) -> PointerStatus {
        let policy = self.filter.policy.read();
        let c = &self.filter.counters;
        PointerStatus {
            active: self.active,
            blocked_buttons: policy.blocked_names(),
            block_all: policy.block_all(),
            left_click_allowed: !policy.blocks(PointerButton::Left),
            right_click_allowed: !policy.blocks(PointerButton::Right),
            events_seen: HookCounters::get(&c.seen),
            events_blocked: HookCounters::get(&c.consumed),
            handler_faults: HookCounters::get(&c.handler_panics),
        }
    }
}

impl Drop for PointerLayer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::noop;

    struct NullDriver;

    impl HookDriver<PointerEvent> for NullDriver {
        fn install(&mut self, _handler: EventHandler<PointerEvent>) -> Result<()> {
            Ok(())
        }

        fn uninstall(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn layer(blocked: &[&str], block_all: bool) -> PointerLayer {
        let policy = PointerPolicy::new(blocked, block_all).unwrap();
        PointerLayer::new(Arc::new(RwLock::new(policy)), Box::new(NullDriver), noop())
    }

    fn click(button: PointerButton, transition: Transition) -> PointerEvent {
        PointerEvent {
            action: PointerAction::Button { button, transition },
            x: 5,
            y: 7,
        }
    }

    fn motion() -> [PointerEvent; 3] {
        [
            PointerEvent { action: PointerAction::Move, x: 1, y: 1 },
            PointerEvent {
                action: PointerAction::Wheel { horizontal: false, delta: 120 },
                x: 1,
                y: 1,
            },
            PointerEvent {
                action: PointerAction::Wheel { horizontal: true, delta: -120 },
                x: 1,
                y: 1,
            },
        ]
    }

    #[test]
    fn blocks_only_listed_buttons() {
        let layer = layer(&["middle", "side"], false);
        assert_eq!(
            layer.evaluate(&click(PointerButton::X1, Transition::Down)),
            HookVerdict::Consume
        );
        assert_eq!(
            layer.evaluate(&click(PointerButton::X1, Transition::Up)),
            HookVerdict::Consume
        );
        assert_eq!(
            layer.evaluate(&click(PointerButton::Left, Transition::Down)),
            HookVerdict::PassThrough
        );
        assert_eq!(
            layer.evaluate(&click(PointerButton::Right, Transition::Up)),
            HookVerdict::PassThrough
        );
    }

    #[test]
    fn block_all_takes_precedence_but_motion_passes() {
        let layer = layer(&[], true);
        for button in PointerButton::ALL {
            assert_eq!(layer.evaluate(&click(button, Transition::Down)), HookVerdict::Consume);
            assert_eq!(layer.evaluate(&click(button, Transition::Up)), HookVerdict::Consume);
        }
        for event in motion() {
            assert_eq!(layer.evaluate(&event), HookVerdict::PassThrough);
        }
        let status = layer.status();
        assert!(!status.left_click_allowed);
        assert_eq!(status.events_blocked, 10);
    }

    #[test]
    fn release_of_swallowed_press_is_consumed_after_unblock() {
        let layer = layer(&["middle"], false);
        assert_eq!(
            layer.evaluate(&click(PointerButton::Middle, Transition::Down)),
            HookVerdict::Consume
        );
        layer.remove("middle").unwrap();
        assert_eq!(
            layer.evaluate(&click(PointerButton::Middle, Transition::Up)),
            HookVerdict::Consume
        );
        assert_eq!(
            layer.evaluate(&click(PointerButton::Middle, Transition::Down)),
            HookVerdict::PassThrough
        );
    }

    #[derive(Default)]
    struct Recorder(parking_lot::Mutex<Vec<(String, String, bool)>>);

    impl ActivityLogger for Recorder {
        fn log(&self, kind: &str, details: &str, blocked: bool) {
            self.0
                .lock()
                .push((kind.to_string(), details.to_string(), blocked));
        }
    }

    #[test]
    fn blocked_button_is_logged_with_label_and_position() {
        let recorder = Arc::new(Recorder::default());
        let policy = PointerPolicy::new(&["middle"], false).unwrap();
        let layer = PointerLayer::new(
            Arc::new(RwLock::new(policy)),
            Box::new(NullDriver),
            recorder.clone(),
        );
        layer.evaluate(&click(PointerButton::Middle, Transition::Down));
        layer.evaluate(&click(PointerButton::Middle, Transition::Up));
        layer.evaluate(&click(PointerButton::Left, Transition::Down));

        let records = recorder.0.lock();
        assert_eq!(records.len(), 2);
        assert_eq!(
            records[0],
            (
                kinds::MOUSE_BLOCKED.to_string(),
                "Blocked Middle Click at (5, 7)".to_string(),
                true
            )
        );
        assert_eq!(records[1].1, "Blocked release of Middle Click at (5, 7)");
    }

    #[test]
    fn presets_update_live_policy() {
        let layer = layer(&[], false);
        layer.set_block_all(true);
        assert!(layer.status().block_all);
        layer.allow_basic_clicks();
        let status = layer.status();
        assert!(!status.block_all);
        assert!(status.left_click_allowed && status.right_click_allowed);
        assert_eq!(status.blocked_buttons, vec!["middle", "x1", "x2"]);
    }
}
