//! OS bindings behind the component traits.

pub mod headless;
#[cfg(windows)]
pub mod win32;

use crate::input::{HookDriver, KeyEvent, PointerEvent};
use crate::metrics::SysinfoHostProbe;
use crate::network::dns::SystemDns;
use crate::orchestrator::Backends;
use crate::process::SysinfoProcessTable;
use crate::settings::LockdownSettings;
use crate::window::WindowBackend;
use std::sync::Arc;

type KeyboardDriver = Box<dyn HookDriver<KeyEvent>>;
type PointerDriver = Box<dyn HookDriver<PointerEvent>>;

/// Backends for the machine the agent runs on.
pub fn native_backends(settings: &LockdownSettings) -> Backends {
    #[cfg(windows)]
    let (keyboard, pointer, windows): (KeyboardDriver, PointerDriver, Arc<dyn WindowBackend>) = (
        Box::new(win32::hooks::keyboard_hook()),
        Box::new(win32::hooks::pointer_hook()),
        Arc::new(win32::window::Win32Windows),
    );
    #[cfg(not(windows))]
    let (keyboard, pointer, windows): (KeyboardDriver, PointerDriver, Arc<dyn WindowBackend>) = (
        Box::new(headless::UnsupportedHook { device: "keyboard" }),
        Box::new(headless::UnsupportedHook { device: "mouse" }),
        Arc::new(headless::HeadlessWindows),
    );
    Backends {
        keyboard,
        pointer,
        windows,
        processes: Box::new(SysinfoProcessTable::new()),
        dns: Box::new(SystemDns::new(settings.network.dns_interfaces.clone())),
        host: Box::new(SysinfoHostProbe::new()),
    }
}
