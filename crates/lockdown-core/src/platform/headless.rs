//! Stand-ins used where no desktop hooks are available.

use crate::error::{LockdownError, Result};
use crate::input::{EventHandler, HookDriver};
use crate::window::{SystemCommand, WindowBackend, WindowHandle, WindowStyle};

/// A hook driver that always refuses to install.
#[derive(Debug, Clone, Copy)]
pub struct UnsupportedHook {
    pub device: &'static str,
}

impl<E: 'static> HookDriver<E> for UnsupportedHook {
    fn install(&mut self, _handler: EventHandler<E>) -> Result<()> {
        Err(LockdownError::HookInstall(format!(
            "{} hooks are not available on this platform",
            self.device
        )))
    }

    fn uninstall(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Desktop with no windows.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeadlessWindows;

fn unsupported<T>(what: &str) -> Result<T> {
    Err(LockdownError::Unsupported(format!("{what} requires a desktop session")))
}

impl WindowBackend for HeadlessWindows {
    fn top_level_windows(&self) -> Vec<WindowHandle> {
        Vec::new()
    }

    fn is_window(&self, _handle: WindowHandle) -> bool {
        false
    }

    fn is_visible(&self, _handle: WindowHandle) -> bool {
        false
    }

    fn title(&self, _handle: WindowHandle) -> Option<String> {
        None
    }

    fn process_name(&self, _handle: WindowHandle) -> Option<String> {
        None
    }

    fn find_by_title(&self, _title: &str) -> Option<WindowHandle> {
        None
    }

    fn style(&self, _handle: WindowHandle) -> Result<WindowStyle> {
        unsupported("reading window styles")
    }

    fn set_style(&self, _handle: WindowHandle, _style: WindowStyle) -> Result<()> {
        unsupported("changing window styles")
    }

    fn disable_menu_commands(
        &self,
        _handle: WindowHandle,
        _commands: &[SystemCommand],
    ) -> Result<()> {
        unsupported("editing the system menu")
    }

    fn reset_system_menu(&self, _handle: WindowHandle) -> Result<()> {
        unsupported("resetting the system menu")
    }

    fn set_topmost(&self, _handle: WindowHandle, _topmost: bool) -> Result<()> {
        unsupported("changing z-order")
    }

    fn refresh_frame(&self, _handle: WindowHandle) -> Result<()> {
        unsupported("refreshing window frames")
    }

    fn is_minimized(&self, _handle: WindowHandle) -> bool {
        false
    }

    fn restore(&self, _handle: WindowHandle) -> Result<()> {
        unsupported("restoring windows")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{HookVerdict, KeyEvent};
    use std::sync::Arc;

    #[test]
    fn unsupported_hook_reports_install_error() {
        let mut hook = UnsupportedHook { device: "keyboard" };
        let handler: EventHandler<KeyEvent> = Arc::new(|_: &KeyEvent| HookVerdict::PassThrough);
        let err = HookDriver::<KeyEvent>::install(&mut hook, handler).unwrap_err();
        assert!(matches!(err, LockdownError::HookInstall(_)));
        assert!(HookDriver::<KeyEvent>::uninstall(&mut hook).is_ok());
    }

    #[test]
    fn headless_desktop_is_empty() {
        let desktop = HeadlessWindows;
        assert!(desktop.top_level_windows().is_empty());
        assert!(desktop.find_by_title("Exam").is_none());
        assert!(desktop.style(WindowHandle(1)).is_err());
    }
}
