//! Window guard: strips minimize/maximize/close affordances from protected
//! top-level windows and puts them back exactly on stop.

pub mod guard;
pub mod predicate;

pub use guard::{ScanSummary, WindowGuard, WindowGuardConfig, WindowGuardStatus};
pub use predicate::ProtectionPredicate;

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque, non-owning OS window handle. Check liveness before every use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WindowHandle(pub isize);

impl fmt::Display for WindowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Raw style words of a window (`GWL_STYLE` and `GWL_EXSTYLE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowStyle {
    pub style: u32,
    pub ex_style: u32,
}

impl WindowStyle {
    pub const MINIMIZE_BOX: u32 = 0x0002_0000;
    pub const MAXIMIZE_BOX: u32 = 0x0001_0000;
    pub const SYSTEM_MENU: u32 = 0x0008_0000;
    pub const EX_TOPMOST: u32 = 0x0000_0008;

    pub fn has(self, bits: u32) -> bool {
        self.style & bits == bits
    }

    pub fn without(self, bits: u32) -> Self {
        Self {
            style: self.style & !bits,
            ex_style: self.ex_style,
        }
    }

    pub fn is_topmost(self) -> bool {
        self.ex_style & Self::EX_TOPMOST != 0
    }
}

/// System-menu commands that can be greyed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemCommand {
    Minimize,
    Maximize,
    Close,
}

impl SystemCommand {
    pub fn code(self) -> u32 {
        match self {
            SystemCommand::Minimize => 0xF020,
            SystemCommand::Maximize => 0xF030,
            SystemCommand::Close => 0xF060,
        }
    }
}

/// What `WindowGuard::protect` should act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowTarget {
    Handle(WindowHandle),
    Title(String),
}

/// OS window operations used by the guard.
///
/// Every call takes a handle that may have died since it was enumerated;
/// implementations report that as an error or `false`, never undefined
/// behaviour.
pub trait WindowBackend: Send + Sync {
    fn top_level_windows(&self) -> Vec<WindowHandle>;
    fn is_window(&self, handle: WindowHandle) -> bool;
    fn is_visible(&self, handle: WindowHandle) -> bool;
    fn title(&self, handle: WindowHandle) -> Option<String>;
    fn process_name(&self, handle: WindowHandle) -> Option<String>;
    fn find_by_title(&self, title: &str) -> Option<WindowHandle>;
    fn style(&self, handle: WindowHandle) -> Result<WindowStyle>;
    fn set_style(&self, handle: WindowHandle, style: WindowStyle) -> Result<()>;
    fn disable_menu_commands(&self, handle: WindowHandle, commands: &[SystemCommand]) -> Result<()>;
    fn reset_system_menu(&self, handle: WindowHandle) -> Result<()>;
    fn set_topmost(&self, handle: WindowHandle, topmost: bool) -> Result<()>;
    fn refresh_frame(&self, handle: WindowHandle) -> Result<()>;
    fn is_minimized(&self, handle: WindowHandle) -> bool;
    fn restore(&self, handle: WindowHandle) -> Result<()>;
}
