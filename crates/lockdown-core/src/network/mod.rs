//! Network suppressor.
//!
//! Blackholes a domain list through the hosts file. The original bytes are
//! kept in memory and in a backup file next to the hosts file; stop writes
//! those bytes back rather than editing the block section out.

pub mod dns;
pub mod hosts;

pub use dns::{DnsControl, NoopDns, SystemDns};

use crate::activity::{kinds, ActivityLogger};
use crate::error::{LockdownError, Result};
use crate::settings::NetworkSettings;
use crate::worker::PollingWorker;
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const BACKUP_SUFFIX: &str = ".exam_lockdown_backup";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    pub hosts_path: PathBuf,
    pub blocked_domains: Vec<String>,
    pub dns_blackhole: bool,
    pub watchdog_interval: Duration,
}

impl NetworkConfig {
    pub fn from_settings(settings: &NetworkSettings) -> Self {
        Self {
            hosts_path: settings.resolved_hosts_path(),
            blocked_domains: settings.blocked_domains.clone(),
            dns_blackhole: settings.dns_blackhole,
            watchdog_interval: settings.watchdog_interval(),
        }
    }

    pub fn backup_path(&self) -> PathBuf {
        let mut name = self
            .hosts_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "hosts".into());
        name.push(BACKUP_SUFFIX);
        self.hosts_path.with_file_name(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum HostsSnapshot {
    Present(Vec<u8>),
    Absent,
}

#[derive(Default)]
struct HostsState {
    snapshot: Option<HostsSnapshot>,
    blocked: bool,
    reapplied: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkStatus {
    pub blocked: bool,
    pub hosts_path: String,
    pub blocked_domains: usize,
    pub dns_redirected: bool,
    pub watchdog_reapplied: u64,
}

fn digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Writes `bytes` and reads them back to confirm an exact match.
fn write_verified(path: &Path, bytes: &[u8]) -> Result<()> {
    fs::write(path, bytes)?;
    let written = fs::read(path)?;
    if written != bytes {
        return Err(LockdownError::Restoration(format!(
            "{} does not match after write (expected sha256 {}, found {})",
            path.display(),
            digest(bytes),
            digest(&written)
        )));
    }
    Ok(())
}

fn write_backup(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| LockdownError::Io(e.error))?;
    Ok(())
}

struct Shared {
    config: NetworkConfig,
    state: Mutex<HostsState>,
    logger: Arc<dyn ActivityLogger>,
}

impl Shared {
    /// Re-appends the block section if either marker went missing.
    fn enforce(&self) -> Result<bool> {
        let mut state = self.state.lock();
        if !state.blocked {
            return Ok(false);
        }
        let current = read_optional(&self.config.hosts_path)?.unwrap_or_default();
        if hosts::has_section(&current) {
            return Ok(false);
        }
        fs::write(
            &self.config.hosts_path,
            hosts::append_section(&current, &self.config.blocked_domains),
        )?;
        state.reapplied += 1;
        Ok(true)
    }

    fn watchdog_tick(&self) {
        match self.enforce() {
            Ok(true) => {
                warn!(
                    path = %self.config.hosts_path.display(),
                    "hosts block section was removed; re-applied"
                );
                self.logger.log(
                    kinds::HOSTS_REAPPLIED,
                    "Hosts file block section re-applied after external change",
                    true,
                );
            }
            Ok(false) => {}
            Err(e) => {
                warn!(error = %e, "hosts watchdog check failed");
            }
        }
    }

    fn restore_from_backup(&self) -> Result<()> {
        let backup = self.config.backup_path();
        let bytes = fs::read(&backup).map_err(|e| {
            LockdownError::Restoration(format!("backup {} unreadable: {e}", backup.display()))
        })?;
        write_verified(&self.config.hosts_path, &bytes)
    }

    fn restore_hosts(&self, snapshot: Option<&HostsSnapshot>) -> Result<()> {
        let path = &self.config.hosts_path;
        let primary = match snapshot {
            Some(HostsSnapshot::Present(bytes)) => write_verified(path, bytes),
            Some(HostsSnapshot::Absent) => remove_if_exists(path),
            None => Err(LockdownError::Restoration("no in-memory snapshot".into())),
        };
        match primary {
            Ok(()) => Ok(()),
            // A missing original has no backup to fall back on.
            Err(e) if matches!(snapshot, Some(HostsSnapshot::Absent)) => Err(e),
            Err(e) => {
                warn!(error = %e, "restoring hosts from memory failed; using backup file");
                self.restore_from_backup()
            }
        }
    }
}

pub struct NetworkSuppressor {
    shared: Arc<Shared>,
    dns: Box<dyn DnsControl>,
    dns_redirected: bool,
    watchdog: Option<PollingWorker>,
    join_timeout: Duration,
}

impl NetworkSuppressor {
    pub fn new(
        config: NetworkConfig,
        dns: Box<dyn DnsControl>,
        logger: Arc<dyn ActivityLogger>,
        join_timeout: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(HostsState::default()),
                logger,
            }),
            dns,
            dns_redirected: false,
            watchdog: None,
            join_timeout,
        }
    }

    /// Puts the hosts file back after a session that never reached stop.
    ///
    /// Returns true if a leftover block section was found and removed.
    pub fn recover(config: &NetworkConfig) -> Result<bool> {
        let backup = config.backup_path();
        let current = read_optional(&config.hosts_path)?;
        let has_markers = current.as_deref().is_some_and(hosts::has_any_marker);

        if backup.exists() {
            if has_markers || current.is_none() {
                let bytes = fs::read(&backup)?;
                write_verified(&config.hosts_path, &bytes)?;
                remove_if_exists(&backup)?;
                return Ok(true);
            }
            // Stale backup from a restore whose cleanup failed.
            remove_if_exists(&backup)?;
            return Ok(false);
        }

        // Without a backup the original file did not exist, so a file that
        // holds nothing but the block section is ours to remove.
        if let Some(content) = current {
            if hosts::has_section(&content) {
                let text = String::from_utf8_lossy(&content);
                if text.trim_start().starts_with(hosts::BEGIN_MARKER) {
                    remove_if_exists(&config.hosts_path)?;
                    return Ok(true);
                }
                warn!(
                    path = %config.hosts_path.display(),
                    "block section found without a backup; leaving file as is"
                );
            }
        }
        Ok(false)
    }

    pub fn start(&mut self) -> bool {
        if self.is_blocked() {
            return true;
        }
        if let Err(e) = self.apply() {
            error!(error = %e, "internet blocking failed to start");
            self.shared.logger.log(
                kinds::NETWORK_ERROR,
                &format!("Failed to enable internet blocking: {e}"),
                false,
            );
            return false;
        }

        if self.shared.config.dns_blackhole {
            match self.dns.blackhole() {
                Ok(()) => self.dns_redirected = true,
                Err(e) => {
                    warn!(error = %e, "DNS redirection unavailable; hosts blocking only");
                    self.shared.logger.log(
                        kinds::NETWORK_ERROR,
                        &format!("DNS redirection failed: {e}"),
                        false,
                    );
                }
            }
        }

        let shared = self.shared.clone();
        match PollingWorker::spawn(
            "hosts-watchdog",
            self.shared.config.watchdog_interval,
            move || shared.watchdog_tick(),
        ) {
            Ok(worker) => self.watchdog = Some(worker),
            Err(e) => warn!(error = %e, "hosts watchdog not started"),
        }

        let domains = self.shared.config.blocked_domains.len();
        info!(
            domains,
            path = %self.shared.config.hosts_path.display(),
            "internet blocking enabled"
        );
        self.shared.logger.log(
            kinds::INTERNET_BLOCKING,
            &format!("Internet blocking enabled for {domains} domains"),
            false,
        );
        true
    }

    fn apply(&mut self) -> Result<()> {
        let config = &self.shared.config;
        if Self::recover(config)? {
            info!(
                path = %config.hosts_path.display(),
                "recovered hosts file from previous session"
            );
        }

        let snapshot = match read_optional(&config.hosts_path)? {
            Some(bytes) => HostsSnapshot::Present(bytes),
            None => HostsSnapshot::Absent,
        };
        let backup = config.backup_path();
        let base: &[u8] = match &snapshot {
            HostsSnapshot::Present(bytes) => {
                write_backup(&backup, bytes)?;
                debug!(backup = %backup.display(), sha256 = %digest(bytes), "hosts backup written");
                bytes
            }
            HostsSnapshot::Absent => &[],
        };

        let blocked = hosts::append_section(base, &config.blocked_domains);
        if let Err(e) = fs::write(&config.hosts_path, blocked) {
            let _ = remove_if_exists(&backup);
            return Err(e.into());
        }

        let mut state = self.shared.state.lock();
        state.snapshot = Some(snapshot);
        state.blocked = true;
        state.reapplied = 0;
        Ok(())
    }

    /// Restores the original hosts bytes, then the resolver. Each part is
    /// attempted even if the other fails. Returns false if either is still
    /// pending; the hosts backup is kept in that case and a later call
    /// retries only what is left.
    pub fn stop(&mut self) -> bool {
        if let Some(mut worker) = self.watchdog.take() {
            worker.stop(self.join_timeout);
        }
        if !self.is_blocked() && !self.dns_redirected {
            return true;
        }
        let hosts_restored = self.restore_hosts_file();
        let resolver_restored = self.restore_resolver();
        if let Err(e) = self.dns.flush_cache() {
            debug!(error = %e, "resolver cache flush failed");
        }
        hosts_restored && resolver_restored
    }

    fn restore_hosts_file(&self) -> bool {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        if !state.blocked {
            return true;
        }
        if let Err(e) = shared.restore_hosts(state.snapshot.as_ref()) {
            let detail = format!(
                "Failed to restore {}: {e}; backup kept at {}",
                shared.config.hosts_path.display(),
                shared.config.backup_path().display()
            );
            error!("{detail}");
            shared.logger.log(kinds::RESTORE_ERROR, &detail, false);
            return false;
        }
        state.blocked = false;
        state.snapshot = None;
        drop(state);

        if let Err(e) = remove_if_exists(&shared.config.backup_path()) {
            warn!(error = %e, "hosts backup not removed");
        }
        info!(path = %shared.config.hosts_path.display(), "internet blocking disabled");
        shared
            .logger
            .log(kinds::INTERNET_BLOCKING, "Internet blocking disabled", false);
        true
    }

    /// Leaves `dns_redirected` set when the restore fails so stop retries it.
    fn restore_resolver(&mut self) -> bool {
        if !self.dns_redirected {
            return true;
        }
        match self.dns.restore_automatic() {
            Ok(()) => {
                self.dns_redirected = false;
                true
            }
            Err(e) => {
                error!(error = %e, "DNS restore failed");
                self.shared.logger.log(
                    kinds::RESTORE_ERROR,
                    &format!("DNS restore failed: {e}"),
                    false,
                );
                false
            }
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.shared.state.lock().blocked
    }

    /// Runs one watchdog check on the calling thread.
    pub fn check_now(&self) -> Result<bool> {
        self.shared.enforce()
    }

    pub fn status(&self) -> NetworkStatus {
        let state = self.shared.state.lock();
        NetworkStatus {
            blocked: state.blocked,
            hosts_path: self.shared.config.hosts_path.display().to_string(),
            blocked_domains: self.shared.config.blocked_domains.len(),
            dns_redirected: self.dns_redirected,
            watchdog_reapplied: state.reapplied,
        }
    }
}

impl Drop for NetworkSuppressor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::noop;

    const ORIGINAL: &[u8] = b"# sample hosts\r\n127.0.0.1 localhost\r\n::1 localhost";

    fn config(dir: &Path) -> NetworkConfig {
        NetworkConfig {
            hosts_path: dir.join("hosts"),
            blocked_domains: vec!["example.com".into(), "chat.example.org".into()],
            dns_blackhole: true,
            watchdog_interval: Duration::from_secs(60),
        }
    }

    fn suppressor(config: NetworkConfig) -> NetworkSuppressor {
        NetworkSuppressor::new(config, Box::new(NoopDns), noop(), Duration::from_secs(3))
    }

    #[test]
    fn start_stop_restores_exact_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        fs::write(&cfg.hosts_path, ORIGINAL).unwrap();

        let mut net = suppressor(cfg.clone());
        assert!(net.start());
        assert!(net.is_blocked());
        let blocked = fs::read(&cfg.hosts_path).unwrap();
        assert!(blocked.starts_with(ORIGINAL));
        assert!(hosts::has_section(&blocked));
        assert_eq!(fs::read(cfg.backup_path()).unwrap(), ORIGINAL);

        assert!(net.stop());
        assert_eq!(fs::read(&cfg.hosts_path).unwrap(), ORIGINAL);
        assert!(!cfg.backup_path().exists());
        assert!(net.stop());
    }

    #[derive(Clone, Default)]
    struct RecordingDns {
        calls: Arc<Mutex<Vec<&'static str>>>,
    }

    impl DnsControl for RecordingDns {
        fn blackhole(&mut self) -> Result<()> {
            self.calls.lock().push("blackhole");
            Ok(())
        }

        fn restore_automatic(&mut self) -> Result<()> {
            self.calls.lock().push("restore");
            Ok(())
        }

        fn flush_cache(&mut self) -> Result<()> {
            self.calls.lock().push("flush");
            Ok(())
        }
    }

    #[test]
    fn resolver_restored_when_hosts_restore_fails() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        fs::write(&cfg.hosts_path, ORIGINAL).unwrap();
        let dns = RecordingDns::default();
        let mut net = NetworkSuppressor::new(
            cfg.clone(),
            Box::new(dns.clone()),
            noop(),
            Duration::from_secs(3),
        );
        assert!(net.start());
        assert!(net.status().dns_redirected);
        // Keep the watchdog from re-creating the file while it is swapped out.
        if let Some(mut worker) = net.watchdog.take() {
            assert!(worker.stop(Duration::from_secs(3)));
        }

        // A non-empty directory in place of the hosts file cannot be written.
        fs::remove_file(&cfg.hosts_path).unwrap();
        fs::create_dir(&cfg.hosts_path).unwrap();
        fs::write(cfg.hosts_path.join("lock"), b"x").unwrap();

        assert!(!net.stop());
        assert_eq!(dns.calls.lock().as_slice(), &["blackhole", "restore", "flush"]);
        assert!(net.is_blocked());
        assert!(!net.status().dns_redirected);
        assert!(cfg.backup_path().exists());

        fs::remove_dir_all(&cfg.hosts_path).unwrap();
        assert!(net.stop());
        assert_eq!(fs::read(&cfg.hosts_path).unwrap(), ORIGINAL);
        assert!(!cfg.backup_path().exists());
        let restores = dns.calls.lock().iter().filter(|c| **c == "restore").count();
        assert_eq!(restores, 1);
    }

    #[test]
    fn watchdog_reappends_removed_section() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        fs::write(&cfg.hosts_path, ORIGINAL).unwrap();
        let mut net = suppressor(cfg.clone());
        assert!(net.start());

        fs::write(&cfg.hosts_path, b"127.0.0.1 localhost\n").unwrap();
        assert!(net.check_now().unwrap());
        assert!(hosts::has_section(&fs::read(&cfg.hosts_path).unwrap()));
        assert!(!net.check_now().unwrap());
        assert_eq!(net.status().watchdog_reapplied, 1);

        assert!(net.stop());
        assert_eq!(fs::read(&cfg.hosts_path).unwrap(), ORIGINAL);
    }

    #[test]
    fn missing_hosts_file_is_removed_again() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let mut net = suppressor(cfg.clone());
        assert!(net.start());
        assert!(cfg.hosts_path.exists());
        assert!(!cfg.backup_path().exists());
        assert!(net.stop());
        assert!(!cfg.hosts_path.exists());
    }

    #[test]
    fn recovers_from_crashed_session() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        // What a session that died mid-lockdown leaves behind.
        write_backup(&cfg.backup_path(), ORIGINAL).unwrap();
        fs::write(
            &cfg.hosts_path,
            hosts::append_section(ORIGINAL, &["stale.example".to_string()]),
        )
        .unwrap();

        let mut net = suppressor(cfg.clone());
        assert!(net.start());
        let blocked = fs::read(&cfg.hosts_path).unwrap();
        assert_eq!(blocked, hosts::append_section(ORIGINAL, &cfg.blocked_domains));
        assert!(net.stop());
        assert_eq!(fs::read(&cfg.hosts_path).unwrap(), ORIGINAL);
    }

    #[test]
    fn recover_removes_file_that_was_created_by_lockdown() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        fs::write(&cfg.hosts_path, hosts::append_section(b"", &cfg.blocked_domains)).unwrap();
        assert!(NetworkSuppressor::recover(&cfg).unwrap());
        assert!(!cfg.hosts_path.exists());
    }

    #[test]
    fn recover_without_session_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        fs::write(&cfg.hosts_path, ORIGINAL).unwrap();
        assert!(!NetworkSuppressor::recover(&cfg).unwrap());
        assert_eq!(fs::read(&cfg.hosts_path).unwrap(), ORIGINAL);
    }

    #[test]
    fn backup_is_used_without_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let net = suppressor(cfg.clone());
        assert!(net.shared.restore_hosts(None).is_err());

        write_backup(&cfg.backup_path(), ORIGINAL).unwrap();
        fs::write(&cfg.hosts_path, b"tampered").unwrap();
        net.shared.restore_hosts(None).unwrap();
        assert_eq!(fs::read(&cfg.hosts_path).unwrap(), ORIGINAL);
    }
}
