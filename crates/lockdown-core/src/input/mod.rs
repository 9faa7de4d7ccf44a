//! Input hook layer.
//!
//! A [`HookDriver`] owns the OS interception callback for one device; the
//! layers in [`keyboard`] and [`pointer`] own the classification. The driver
//! calls the installed [`EventHandler`] once per raw event and consumes or
//! forwards the event according to the returned [`HookVerdict`]. Handlers run
//! on the OS hook thread and never block.

pub mod keyboard;
pub mod pointer;

pub use keyboard::{KeyboardLayer, KeyboardStatus};
pub use pointer::{PointerLayer, PointerStatus};

use crate::error::Result;
use crate::policy::{Modifier, PointerButton};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookVerdict {
    Consume,
    PassThrough,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    Down,
    Up,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    Modifier(Modifier),
    Named(&'static str),
    Unknown(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: Key,
    pub transition: Transition,
}

impl KeyEvent {
    pub fn down(key: Key) -> Self {
        Self {
            key,
            transition: Transition::Down,
        }
    }

    pub fn up(key: Key) -> Self {
        Self {
            key,
            transition: Transition::Up,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerAction {
    Move,
    Wheel { horizontal: bool, delta: i16 },
    Button {
        button: PointerButton,
        transition: Transition,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerEvent {
    pub action: PointerAction,
    pub x: i32,
    pub y: i32,
}

pub type EventHandler<E> = Arc<dyn Fn(&E) -> HookVerdict + Send + Sync>;

/// Installs and removes the OS-level interception for one device.
///
/// `install` must either fully install the hook or leave nothing behind.
pub trait HookDriver<E>: Send {
    fn install(&mut self, handler: EventHandler<E>) -> Result<()>;
    fn uninstall(&mut self) -> Result<()>;
}

/// Invoked when the admin-override combination is pressed.
pub trait AdminNotifier: Send + Sync {
    fn admin_requested(&self);
}

impl<F> AdminNotifier for F
where
    F: Fn() + Send + Sync,
{
    fn admin_requested(&self) {
        self()
    }
}

#[derive(Debug, Default)]
pub(crate) struct HookCounters {
    pub seen: AtomicU64,
    pub consumed: AtomicU64,
    pub admin_requests: AtomicU64,
    pub handler_panics: AtomicU64,
}

impl HookCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

const LETTERS: [&str; 26] = [
    "a", "b", "c", "d", "e", "f", "g", "h", "i", "j", "k", "l", "m", "n", "o", "p", "q", "r",
    "s", "t", "u", "v", "w", "x", "y", "z",
];
const DIGITS: [&str; 10] = ["0", "1", "2", "3", "4", "5", "6", "7", "8", "9"];
const FUNCTION_KEYS: [&str; 24] = [
    "f1", "f2", "f3", "f4", "f5", "f6", "f7", "f8", "f9", "f10", "f11", "f12", "f13", "f14",
    "f15", "f16", "f17", "f18", "f19", "f20", "f21", "f22", "f23", "f24",
];

/// Maps a Windows virtual-key code to a key name understood by the policy.
pub fn key_from_virtual_code(vk: u32) -> Key {
    match vk {
        0x10 | 0xA0 | 0xA1 => Key::Modifier(Modifier::Shift),
        0x11 | 0xA2 | 0xA3 => Key::Modifier(Modifier::Ctrl),
        0x12 | 0xA4 | 0xA5 => Key::Modifier(Modifier::Alt),
        0x5B | 0x5C => Key::Modifier(Modifier::Win),
        0x41..=0x5A => Key::Named(LETTERS[(vk - 0x41) as usize]),
        0x30..=0x39 => Key::Named(DIGITS[(vk - 0x30) as usize]),
        0x60..=0x69 => Key::Named(DIGITS[(vk - 0x60) as usize]),
        0x70..=0x87 => Key::Named(FUNCTION_KEYS[(vk - 0x70) as usize]),
        0x08 => Key::Named("backspace"),
        0x09 => Key::Named("tab"),
        0x0D => Key::Named("enter"),
        0x13 => Key::Named("pause"),
        0x14 => Key::Named("capslock"),
        0x1B => Key::Named("esc"),
        0x20 => Key::Named("space"),
        0x21 => Key::Named("pageup"),
        0x22 => Key::Named("pagedown"),
        0x23 => Key::Named("end"),
        0x24 => Key::Named("home"),
        0x25 => Key::Named("left"),
        0x26 => Key::Named("up"),
        0x27 => Key::Named("right"),
        0x28 => Key::Named("down"),
        0x2C => Key::Named("printscreen"),
        0x2D => Key::Named("insert"),
        0x2E => Key::Named("del"),
        0x5D => Key::Named("apps"),
        0x90 => Key::Named("numlock"),
        0x91 => Key::Named("scrolllock"),
        0xBA => Key::Named("semicolon"),
        0xBB => Key::Named("equals"),
        0xBC => Key::Named("comma"),
        0xBD => Key::Named("minus"),
        0xBE => Key::Named("period"),
        0xBF => Key::Named("slash"),
        0xC0 => Key::Named("backquote"),
        0xDB => Key::Named("lbracket"),
        0xDC => Key::Named("backslash"),
        0xDD => Key::Named("rbracket"),
        0xDE => Key::Named("quote"),
        other => Key::Unknown(other),
    }
}

const WM_MOUSEMOVE: u32 = 0x0200;
const WM_LBUTTONDOWN: u32 = 0x0201;
const WM_LBUTTONUP: u32 = 0x0202;
const WM_RBUTTONDOWN: u32 = 0x0204;
const WM_RBUTTONUP: u32 = 0x0205;
const WM_MBUTTONDOWN: u32 = 0x0207;
const WM_MBUTTONUP: u32 = 0x0208;
const WM_MOUSEWHEEL: u32 = 0x020A;
const WM_XBUTTONDOWN: u32 = 0x020B;
const WM_XBUTTONUP: u32 = 0x020C;
const WM_MOUSEHWHEEL: u32 = 0x020E;
const XBUTTON1: u32 = 0x0001;
const XBUTTON2: u32 = 0x0002;

/// Builds a pointer event from a low-level mouse message. X-buttons are told
/// apart by the high word of `mouse_data`.
pub fn pointer_event_from_message(
    message: u32,
    mouse_data: u32,
    x: i32,
    y: i32,
) -> Option<PointerEvent> {
    let button = |button, transition| PointerAction::Button { button, transition };
    let action = match message {
        WM_MOUSEMOVE => PointerAction::Move,
        WM_MOUSEWHEEL | WM_MOUSEHWHEEL => PointerAction::Wheel {
            horizontal: message == WM_MOUSEHWHEEL,
            delta: (mouse_data >> 16) as u16 as i16,
        },
        WM_LBUTTONDOWN => button(PointerButton::Left, Transition::Down),
        WM_LBUTTONUP => button(PointerButton::Left, Transition::Up),
        WM_RBUTTONDOWN => button(PointerButton::Right, Transition::Down),
        WM_RBUTTONUP => button(PointerButton::Right, Transition::Up),
        WM_MBUTTONDOWN => button(PointerButton::Middle, Transition::Down),
        WM_MBUTTONUP => button(PointerButton::Middle, Transition::Up),
        WM_XBUTTONDOWN | WM_XBUTTONUP => {
            let transition = if message == WM_XBUTTONDOWN {
                Transition::Down
            } else {
                Transition::Up
            };
            match mouse_data >> 16 {
                XBUTTON1 => button(PointerButton::X1, transition),
                XBUTTON2 => button(PointerButton::X2, transition),
                _ => return None,
            }
        }
        _ => return None,
    };
    Some(PointerEvent { action, x, y })
}
