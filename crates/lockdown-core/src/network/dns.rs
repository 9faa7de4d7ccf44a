use crate::error::{LockdownError, Result};
use std::process::Command;
use tracing::{debug, warn};

/// Resolver configuration hooks used by the network suppressor.
pub trait DnsControl: Send {
    /// Points resolution at a non-functional address.
    fn blackhole(&mut self) -> Result<()>;
    /// Returns the resolver to automatic configuration.
    fn restore_automatic(&mut self) -> Result<()>;
    fn flush_cache(&mut self) -> Result<()>;
}

/// Leaves resolver configuration alone.
#[derive(Debug, Default)]
pub struct NoopDns;

impl DnsControl for NoopDns {
    fn blackhole(&mut self) -> Result<()> {
        Ok(())
    }

    fn restore_automatic(&mut self) -> Result<()> {
        Ok(())
    }

    fn flush_cache(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Drives the platform's resolver tools (`netsh`/`ipconfig` on Windows).
#[cfg_attr(not(windows), allow(dead_code))]
pub struct SystemDns {
    interfaces: Vec<String>,
    changed: Vec<String>,
}

impl SystemDns {
    pub fn new(interfaces: Vec<String>) -> Self {
        Self {
            interfaces,
            changed: Vec::new(),
        }
    }
}

fn run(program: &str, args: &[&str]) -> Result<()> {
    debug!(program, ?args, "running resolver command");
    let output = Command::new(program).args(args).output()?;
    if output.status.success() {
        Ok(())
    } else {
        Err(LockdownError::Restoration(format!(
            "{program} exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}

#[cfg(windows)]
impl DnsControl for SystemDns {
    fn blackhole(&mut self) -> Result<()> {
        let mut last_error = None;
        for iface in &self.interfaces {
            let name = format!("name={iface}");
            match run(
                "netsh",
                &["interface", "ip", "set", "dns", &name, "source=static", "addr=127.0.0.1"],
            ) {
                Ok(()) => self.changed.push(iface.clone()),
                Err(e) => {
                    warn!(interface = %iface, error = %e, "failed to redirect DNS");
                    last_error = Some(e);
                }
            }
        }
        match (self.changed.is_empty(), last_error) {
            (true, Some(e)) => Err(e),
            _ => Ok(()),
        }
    }

    fn restore_automatic(&mut self) -> Result<()> {
        let mut failures = Vec::new();
        for iface in std::mem::take(&mut self.changed) {
            let name = format!("name={iface}");
            if let Err(e) = run("netsh", &["interface", "ip", "set", "dns", &name, "source=dhcp"]) {
                warn!(interface = %iface, error = %e, "failed to restore DNS");
                failures.push(format!("{iface}: {e}"));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(LockdownError::Restoration(failures.join("; ")))
        }
    }

    fn flush_cache(&mut self) -> Result<()> {
        run("ipconfig", &["/flushdns"])
    }
}

#[cfg(not(windows))]
impl DnsControl for SystemDns {
    fn blackhole(&mut self) -> Result<()> {
        Err(LockdownError::Unsupported(
            "DNS redirection is only implemented for Windows".into(),
        ))
    }

    fn restore_automatic(&mut self) -> Result<()> {
        Ok(())
    }

    fn flush_cache(&mut self) -> Result<()> {
        if cfg!(target_os = "macos") {
            run("dscacheutil", &["-flushcache"])
        } else {
            run("resolvectl", &["flush-caches"])
        }
    }
}
