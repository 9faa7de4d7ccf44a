//! Periodic `status.json` snapshots for whoever supervises the agent.

use anyhow::{Context, Result};
use lockdown_core::{Lockdown, LockdownStatus};
use parking_lot::Mutex;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

/// Replaces `path` through a sibling temp file so readers never see a partial snapshot.
pub fn write_snapshot(status: &LockdownStatus, path: &Path) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    let body = serde_json::to_vec_pretty(status)?;
    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("creating temp file in {}", dir.display()))?;
    tmp.write_all(&body)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}

pub fn spawn_status_writer(
    engine: Arc<Mutex<Lockdown>>,
    path: PathBuf,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let engine = engine.clone();
            let path = path.clone();
            let written = tokio::task::spawn_blocking(move || {
                let status = engine.lock().get_status();
                write_snapshot(&status, &path)
            })
            .await;
            match written {
                Ok(Ok(())) => debug!("status snapshot written"),
                Ok(Err(e)) => warn!(error = %e, "status snapshot failed"),
                Err(e) => warn!(error = %e, "status task panicked"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockdown_core::metrics::{HostMetrics, HostProbe};
    use lockdown_core::network::NoopDns;
    use lockdown_core::platform::headless::{HeadlessWindows, UnsupportedHook};
    use lockdown_core::process::ProcessTable;
    use lockdown_core::storage::MemoryStore;
    use lockdown_core::{Backends, LockdownSettings, ProcessError};

    struct EmptyTable;

    impl ProcessTable for EmptyTable {
        fn pids(&mut self) -> Vec<u32> {
            Vec::new()
        }

        fn name(&self, pid: u32) -> std::result::Result<String, ProcessError> {
            Err(ProcessError::Exited(pid))
        }

        fn terminate(&mut self, pid: u32) -> std::result::Result<(), ProcessError> {
            Err(ProcessError::Exited(pid))
        }
    }

    struct ZeroProbe;

    impl HostProbe for ZeroProbe {
        fn sample(&mut self) -> HostMetrics {
            HostMetrics::default()
        }
    }

    fn idle_engine() -> Lockdown {
        let backends = Backends {
            keyboard: Box::new(UnsupportedHook { device: "keyboard" }),
            pointer: Box::new(UnsupportedHook { device: "mouse" }),
            windows: Arc::new(HeadlessWindows),
            processes: Box::new(EmptyTable),
            dns: Box::new(NoopDns),
            host: Box::new(ZeroProbe),
        };
        Lockdown::new(
            LockdownSettings::default(),
            Arc::new(MemoryStore::new()),
            lockdown_core::activity::noop(),
            backends,
        )
        .unwrap()
    }

    #[test]
    fn snapshot_replaces_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");
        std::fs::write(&path, "stale").unwrap();

        let engine = idle_engine();
        write_snapshot(&engine.get_status(), &path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["active"], serde_json::Value::Bool(false));
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }
}
