//! `WindowBackend` over user32.

use crate::error::{LockdownError, Result};
use crate::window::{SystemCommand, WindowBackend, WindowHandle, WindowStyle};
use std::path::Path;
use windows_sys::Win32::Foundation::{CloseHandle, GetLastError, SetLastError, BOOL, HWND, LPARAM};
use windows_sys::Win32::System::Threading::{
    OpenProcess, QueryFullProcessImageNameW, PROCESS_NAME_WIN32, PROCESS_QUERY_LIMITED_INFORMATION,
};
use windows_sys::Win32::UI::WindowsAndMessaging::{
    EnableMenuItem, EnumWindows, FindWindowW, GetSystemMenu, GetWindowLongW, GetWindowTextLengthW,
    GetWindowTextW, GetWindowThreadProcessId, IsIconic, IsWindow, IsWindowVisible, SetWindowLongW,
    SetWindowPos, ShowWindow, GWL_EXSTYLE, GWL_STYLE, HWND_NOTOPMOST, HWND_TOPMOST, MF_BYCOMMAND,
    MF_DISABLED, MF_GRAYED, SWP_FRAMECHANGED, SWP_NOACTIVATE, SWP_NOMOVE, SWP_NOSIZE, SWP_NOZORDER,
    SW_RESTORE,
};

#[derive(Debug, Default)]
pub struct Win32Windows;

fn last_error() -> LockdownError {
    LockdownError::Io(std::io::Error::last_os_error())
}

fn wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

unsafe extern "system" fn collect_window(hwnd: HWND, lparam: LPARAM) -> BOOL {
    let out = &mut *(lparam as *mut Vec<WindowHandle>);
    out.push(WindowHandle(hwnd));
    1
}

impl Win32Windows {
    fn ensure_window(&self, handle: WindowHandle) -> Result<()> {
        if self.is_window(handle) {
            Ok(())
        } else {
            Err(LockdownError::Restoration(format!("window {handle} no longer exists")))
        }
    }

    fn set_long(&self, handle: WindowHandle, index: i32, value: u32) -> Result<()> {
        unsafe {
            SetLastError(0);
            let previous = SetWindowLongW(handle.0, index, value as i32);
            if previous == 0 && GetLastError() != 0 {
                return Err(last_error());
            }
        }
        Ok(())
    }
}

impl WindowBackend for Win32Windows {
    fn top_level_windows(&self) -> Vec<WindowHandle> {
        let mut out: Vec<WindowHandle> = Vec::new();
        unsafe {
            EnumWindows(Some(collect_window), &mut out as *mut Vec<WindowHandle> as LPARAM);
        }
        out
    }

    fn is_window(&self, handle: WindowHandle) -> bool {
        unsafe { IsWindow(handle.0) != 0 }
    }

    fn is_visible(&self, handle: WindowHandle) -> bool {
        unsafe { IsWindowVisible(handle.0) != 0 }
    }

    fn title(&self, handle: WindowHandle) -> Option<String> {
        unsafe {
            let len = GetWindowTextLengthW(handle.0);
            if len <= 0 {
                return None;
            }
            let mut buf = vec![0u16; len as usize + 1];
            let copied = GetWindowTextW(handle.0, buf.as_mut_ptr(), buf.len() as i32);
            if copied <= 0 {
                return None;
            }
            Some(String::from_utf16_lossy(&buf[..copied as usize]))
        }
    }

    fn process_name(&self, handle: WindowHandle) -> Option<String> {
        unsafe {
            let mut pid = 0u32;
            GetWindowThreadProcessId(handle.0, &mut pid);
            if pid == 0 {
                return None;
            }
            let process = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
            if process == 0 {
                return None;
            }
            let mut buf = [0u16; 1024];
            let mut size = buf.len() as u32;
            let ok = QueryFullProcessImageNameW(
                process,
                PROCESS_NAME_WIN32,
                buf.as_mut_ptr(),
                &mut size,
            );
            CloseHandle(process);
            if ok == 0 {
                return None;
            }
            let path = String::from_utf16_lossy(&buf[..size as usize]);
            Path::new(&path)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
        }
    }

    fn find_by_title(&self, title: &str) -> Option<WindowHandle> {
        let name = wide(title);
        let hwnd = unsafe { FindWindowW(std::ptr::null(), name.as_ptr()) };
        (hwnd != 0).then_some(WindowHandle(hwnd))
    }

    fn style(&self, handle: WindowHandle) -> Result<WindowStyle> {
        self.ensure_window(handle)?;
        unsafe {
            Ok(WindowStyle {
                style: GetWindowLongW(handle.0, GWL_STYLE) as u32,
                ex_style: GetWindowLongW(handle.0, GWL_EXSTYLE) as u32,
            })
        }
    }

    fn set_style(&self, handle: WindowHandle, style: WindowStyle) -> Result<()> {
        let current = self.style(handle)?;
        if current.style != style.style {
            self.set_long(handle, GWL_STYLE, style.style)?;
        }
        if current.ex_style != style.ex_style {
            self.set_long(handle, GWL_EXSTYLE, style.ex_style)?;
        }
        Ok(())
    }

    fn disable_menu_commands(
        &self,
        handle: WindowHandle,
        commands: &[SystemCommand],
    ) -> Result<()> {
        self.ensure_window(handle)?;
        unsafe {
            let menu = GetSystemMenu(handle.0, 0);
            if menu == 0 {
                return Err(LockdownError::Unsupported(format!(
                    "window {handle} has no system menu"
                )));
            }
            for command in commands {
                EnableMenuItem(menu, command.code(), MF_BYCOMMAND | MF_GRAYED | MF_DISABLED);
            }
        }
        Ok(())
    }

    fn reset_system_menu(&self, handle: WindowHandle) -> Result<()> {
        self.ensure_window(handle)?;
        unsafe {
            GetSystemMenu(handle.0, 1);
        }
        Ok(())
    }

    fn set_topmost(&self, handle: WindowHandle, topmost: bool) -> Result<()> {
        let after = if topmost { HWND_TOPMOST } else { HWND_NOTOPMOST };
        let flags = SWP_NOMOVE | SWP_NOSIZE | SWP_NOACTIVATE;
        let ok = unsafe { SetWindowPos(handle.0, after, 0, 0, 0, 0, flags) };
        if ok == 0 {
            return Err(last_error());
        }
        Ok(())
    }

    fn refresh_frame(&self, handle: WindowHandle) -> Result<()> {
        let flags = SWP_NOMOVE | SWP_NOSIZE | SWP_NOZORDER | SWP_NOACTIVATE | SWP_FRAMECHANGED;
        let ok = unsafe { SetWindowPos(handle.0, 0, 0, 0, 0, 0, flags) };
        if ok == 0 {
            return Err(last_error());
        }
        Ok(())
    }

    fn is_minimized(&self, handle: WindowHandle) -> bool {
        unsafe { IsIconic(handle.0) != 0 }
    }

    fn restore(&self, handle: WindowHandle) -> Result<()> {
        self.ensure_window(handle)?;
        unsafe {
            ShowWindow(handle.0, SW_RESTORE);
        }
        Ok(())
    }
}
