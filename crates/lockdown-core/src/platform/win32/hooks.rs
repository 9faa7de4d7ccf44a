//! `WH_KEYBOARD_LL` / `WH_MOUSE_LL` drivers.
//!
//! Low-level hooks are delivered through the message queue of the thread that
//! installed them, so each hook gets a dedicated thread running a
//! `GetMessageW` loop. Uninstall posts `WM_QUIT` to that thread, which then
//! unhooks and exits.
//!
//! The hook procedures are plain `extern "system"` functions with no user
//! data pointer, so the handler lives in a static slot per device.

use crate::error::{LockdownError, Result};
use crate::input::{
    key_from_virtual_code, pointer_event_from_message, EventHandler, HookDriver, HookVerdict,
    KeyEvent, PointerEvent, Transition,
};
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};
use windows_sys::Win32::Foundation::{LPARAM, LRESULT, WPARAM};
use windows_sys::Win32::System::LibraryLoader::GetModuleHandleW;
use windows_sys::Win32::System::Threading::GetCurrentThreadId;
use windows_sys::Win32::UI::WindowsAndMessaging::{
    CallNextHookEx, DispatchMessageW, GetMessageW, PeekMessageW, PostThreadMessageW,
    SetWindowsHookExW, TranslateMessage, UnhookWindowsHookEx, HOOKPROC, KBDLLHOOKSTRUCT, MSG,
    MSLLHOOKSTRUCT, PM_NOREMOVE, WH_KEYBOARD_LL, WH_MOUSE_LL, WINDOWS_HOOK_ID, WM_KEYDOWN, WM_KEYUP,
    WM_QUIT, WM_SYSKEYDOWN, WM_SYSKEYUP, WM_USER,
};

const READY_TIMEOUT: Duration = Duration::from_secs(5);
const EXIT_TIMEOUT: Duration = Duration::from_secs(3);

struct HookSlot<E> {
    handler: RwLock<Option<EventHandler<E>>>,
    claimed: AtomicBool,
}

impl<E> HookSlot<E> {
    const fn new() -> Self {
        Self {
            handler: parking_lot::const_rwlock(None),
            claimed: AtomicBool::new(false),
        }
    }

    /// Never blocks: a slot being rewritten forwards the event.
    fn dispatch(&self, event: &E) -> HookVerdict {
        let Some(guard) = self.handler.try_read() else {
            return HookVerdict::PassThrough;
        };
        let Some(handler) = guard.as_ref() else {
            return HookVerdict::PassThrough;
        };
        catch_unwind(AssertUnwindSafe(|| handler(event))).unwrap_or(HookVerdict::PassThrough)
    }
}

static KEYBOARD: HookSlot<KeyEvent> = HookSlot::new();
static POINTER: HookSlot<PointerEvent> = HookSlot::new();

unsafe extern "system" fn keyboard_proc(code: i32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
    if code >= 0 && lparam != 0 {
        let info = &*(lparam as *const KBDLLHOOKSTRUCT);
        let transition = match wparam as u32 {
            WM_KEYDOWN | WM_SYSKEYDOWN => Some(Transition::Down),
            WM_KEYUP | WM_SYSKEYUP => Some(Transition::Up),
            _ => None,
        };
        if let Some(transition) = transition {
            let event = KeyEvent {
                key: key_from_virtual_code(info.vkCode),
                transition,
            };
            if KEYBOARD.dispatch(&event) == HookVerdict::Consume {
                return 1;
            }
        }
    }
    CallNextHookEx(0, code, wparam, lparam)
}

unsafe extern "system" fn mouse_proc(code: i32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
    if code >= 0 && lparam != 0 {
        let info = &*(lparam as *const MSLLHOOKSTRUCT);
        let event =
            pointer_event_from_message(wparam as u32, info.mouseData, info.pt.x, info.pt.y);
        if let Some(event) = event {
            if POINTER.dispatch(&event) == HookVerdict::Consume {
                return 1;
            }
        }
    }
    CallNextHookEx(0, code, wparam, lparam)
}

struct HookThread {
    thread_id: u32,
    done: mpsc::Receiver<()>,
    handle: Option<JoinHandle<()>>,
}

impl HookThread {
    fn spawn(name: &'static str, hook_id: WINDOWS_HOOK_ID, hook_proc: HOOKPROC) -> Result<Self> {
        let (ready_tx, ready_rx) = mpsc::channel::<std::result::Result<u32, String>>();
        let (done_tx, done) = mpsc::channel();
        let handle = thread::Builder::new().name(name.to_string()).spawn(move || {
            unsafe {
                let mut msg: MSG = std::mem::zeroed();
                // Forces creation of this thread's message queue so WM_QUIT
                // can be posted to it as soon as readiness is reported.
                PeekMessageW(&mut msg, 0, WM_USER, WM_USER, PM_NOREMOVE);
                let module = GetModuleHandleW(std::ptr::null());
                let hook = SetWindowsHookExW(hook_id, hook_proc, module, 0);
                if hook == 0 {
                    let _ = ready_tx.send(Err(std::io::Error::last_os_error().to_string()));
                    return;
                }
                let _ = ready_tx.send(Ok(GetCurrentThreadId()));
                while GetMessageW(&mut msg, 0, 0, 0) > 0 {
                    TranslateMessage(&msg);
                    DispatchMessageW(&msg);
                }
                UnhookWindowsHookEx(hook);
            }
            let _ = done_tx.send(());
        })?;

        match ready_rx.recv_timeout(READY_TIMEOUT) {
            Ok(Ok(thread_id)) => {
                debug!(hook = name, thread_id, "hook thread running");
                Ok(Self {
                    thread_id,
                    done,
                    handle: Some(handle),
                })
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(LockdownError::HookInstall(format!("{name}: {e}")))
            }
            Err(_) => Err(LockdownError::HookInstall(format!(
                "{name}: hook thread did not report readiness"
            ))),
        }
    }

    fn shutdown(&mut self) -> Result<()> {
        let posted = unsafe { PostThreadMessageW(self.thread_id, WM_QUIT, 0, 0) };
        if posted == 0 {
            return Err(LockdownError::Io(std::io::Error::last_os_error()));
        }
        match self.done.recv_timeout(EXIT_TIMEOUT) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(handle) = self.handle.take() {
                    let _ = handle.join();
                }
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(thread_id = self.thread_id, "hook thread did not exit in time; detaching");
                Ok(())
            }
        }
    }
}

/// One low-level hook. Only one instance per device may be installed at a
/// time since the handler slot is process-wide.
pub struct NativeHook<E: 'static> {
    name: &'static str,
    slot: &'static HookSlot<E>,
    hook_id: WINDOWS_HOOK_ID,
    hook_proc: HOOKPROC,
    thread: Option<HookThread>,
}

pub fn keyboard_hook() -> NativeHook<KeyEvent> {
    NativeHook {
        name: "keyboard-hook",
        slot: &KEYBOARD,
        hook_id: WH_KEYBOARD_LL,
        hook_proc: Some(keyboard_proc),
        thread: None,
    }
}

pub fn pointer_hook() -> NativeHook<PointerEvent> {
    NativeHook {
        name: "mouse-hook",
        slot: &POINTER,
        hook_id: WH_MOUSE_LL,
        hook_proc: Some(mouse_proc),
        thread: None,
    }
}

impl<E: 'static> HookDriver<E> for NativeHook<E> {
    fn install(&mut self, handler: EventHandler<E>) -> Result<()> {
        if self.thread.is_some() {
            return Ok(());
        }
        if self.slot.claimed.swap(true, Ordering::SeqCst) {
            return Err(LockdownError::HookInstall(format!(
                "{} is already installed by another owner",
                self.name
            )));
        }
        *self.slot.handler.write() = Some(handler);
        match HookThread::spawn(self.name, self.hook_id, self.hook_proc) {
            Ok(thread) => {
                info!(hook = self.name, "low-level hook installed");
                self.thread = Some(thread);
                Ok(())
            }
            Err(e) => {
                *self.slot.handler.write() = None;
                self.slot.claimed.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    fn uninstall(&mut self) -> Result<()> {
        let Some(mut thread) = self.thread.take() else {
            return Ok(());
        };
        let result = thread.shutdown();
        *self.slot.handler.write() = None;
        self.slot.claimed.store(false, Ordering::SeqCst);
        result
    }
}

impl<E: 'static> Drop for NativeHook<E> {
    fn drop(&mut self) {
        let _ = self.uninstall();
    }
}
