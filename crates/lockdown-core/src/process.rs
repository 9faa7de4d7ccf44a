//! Process monitor: terminates deny-listed executables.

use crate::activity::{kinds, ActivityLogger};
use crate::error::ProcessError;
use crate::settings::ProcessSettings;
use crate::window::predicate::normalize_process_name;
use crate::worker::PollingWorker;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{Pid, System};
use tracing::{debug, error, info, warn};

/// Enumerates and terminates processes by pid.
pub trait ProcessTable: Send {
    /// Refreshes the table and returns the live pids.
    fn pids(&mut self) -> Vec<u32>;
    fn name(&self, pid: u32) -> Result<String, ProcessError>;
    fn terminate(&mut self, pid: u32) -> Result<(), ProcessError>;
}

pub struct SysinfoProcessTable {
    system: System,
}

impl SysinfoProcessTable {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for SysinfoProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable for SysinfoProcessTable {
    fn pids(&mut self) -> Vec<u32> {
        self.system.refresh_processes();
        self.system.processes().keys().map(|pid| pid.as_u32()).collect()
    }

    fn name(&self, pid: u32) -> Result<String, ProcessError> {
        self.system
            .process(Pid::from_u32(pid))
            .map(|p| p.name().to_string())
            .ok_or(ProcessError::Exited(pid))
    }

    fn terminate(&mut self, pid: u32) -> Result<(), ProcessError> {
        let process = self
            .system
            .process(Pid::from_u32(pid))
            .ok_or(ProcessError::Exited(pid))?;
        if process.kill() {
            Ok(())
        } else {
            Err(ProcessError::AccessDenied(pid))
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub inspected: usize,
    pub skipped: usize,
    pub matched: usize,
    pub terminated: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessMonitorStatus {
    pub active: bool,
    pub deny_list: Vec<String>,
    pub scans: u64,
    pub terminated_total: u64,
}

#[derive(Default)]
struct MonitorCounters {
    scans: u64,
    terminated: u64,
}

struct MonitorCore {
    table: Mutex<Box<dyn ProcessTable>>,
    deny_list: Vec<String>,
    own_pid: u32,
    logger: Arc<dyn ActivityLogger>,
    counters: Mutex<MonitorCounters>,
}

impl MonitorCore {
    fn is_denied(&self, name: &str) -> bool {
        let name = normalize_process_name(name);
        self.deny_list.iter().any(|d| *d == name)
    }

    fn scan(&self) -> ScanReport {
        let mut report = ScanReport::default();
        let mut table = self.table.lock();
        for pid in table.pids() {
            if pid == self.own_pid {
                continue;
            }
            report.inspected += 1;
            let name = match table.name(pid) {
                Ok(name) => name,
                Err(e) => {
                    debug!(pid, error = %e, "process skipped");
                    report.skipped += 1;
                    continue;
                }
            };
            if !self.is_denied(&name) {
                continue;
            }
            report.matched += 1;
            let outcome = match table.terminate(pid) {
                Ok(()) => {
                    report.terminated += 1;
                    info!(pid, process = %name, "deny-listed process terminated");
                    "terminated".to_string()
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        pid,
                        process = %name,
                        error = %e,
                        "could not terminate deny-listed process"
                    );
                    format!("termination failed: {e}")
                }
            };
            self.logger.log(
                kinds::SUSPICIOUS_PROCESS,
                &format!("Detected {name} (pid {pid}): {outcome}"),
                true,
            );
        }
        let mut counters = self.counters.lock();
        counters.scans += 1;
        counters.terminated += report.terminated as u64;
        report
    }
}

pub struct ProcessMonitor {
    core: Arc<MonitorCore>,
    interval: Duration,
    worker: Option<PollingWorker>,
    join_timeout: Duration,
}

impl ProcessMonitor {
    pub fn new(
        table: Box<dyn ProcessTable>,
        settings: &ProcessSettings,
        logger: Arc<dyn ActivityLogger>,
        join_timeout: Duration,
    ) -> Self {
        let mut deny_list: Vec<String> = settings
            .deny_list
            .iter()
            .map(|n| normalize_process_name(n))
            .filter(|n| !n.is_empty())
            .collect();
        deny_list.sort();
        deny_list.dedup();
        Self {
            core: Arc::new(MonitorCore {
                table: Mutex::new(table),
                deny_list,
                own_pid: std::process::id(),
                logger,
                counters: Mutex::new(MonitorCounters::default()),
            }),
            interval: settings.interval(),
            worker: None,
            join_timeout,
        }
    }

    pub fn start(&mut self) -> bool {
        if self.worker.is_some() {
            return true;
        }
        let core = self.core.clone();
        match PollingWorker::spawn("process-monitor", self.interval, move || {
            core.scan();
        }) {
            Ok(worker) => {
                self.worker = Some(worker);
                let names = self.core.deny_list.join(", ");
                info!(deny_list = %names, "process monitor started");
                self.core.logger.log(
                    kinds::PROCESS_MONITOR,
                    &format!("Process monitoring started: {names}"),
                    false,
                );
                true
            }
            Err(e) => {
                error!(error = %e, "failed to spawn process monitor");
                self.core.logger.log(
                    kinds::COMPONENT_ERROR,
                    &format!("Process monitor failed to start: {e}"),
                    false,
                );
                false
            }
        }
    }

    pub fn stop(&mut self) -> bool {
        let Some(mut worker) = self.worker.take() else {
            return true;
        };
        let joined = worker.stop(self.join_timeout);
        info!(joined, "process monitor stopped");
        self.core
            .logger
            .log(kinds::PROCESS_MONITOR, "Process monitoring stopped", false);
        joined
    }

    pub fn is_active(&self) -> bool {
        self.worker.is_some()
    }

    /// Runs one scan on the calling thread.
    pub fn scan_once(&self) -> ScanReport {
        self.core.scan()
    }

    pub fn status(&self) -> ProcessMonitorStatus {
        let counters = self.core.counters.lock();
        ProcessMonitorStatus {
            active: self.is_active(),
            deny_list: self.core.deny_list.clone(),
            scans: counters.scans,
            terminated_total: counters.terminated,
        }
    }
}

impl Drop for ProcessMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::noop;

    struct FakeTable {
        processes: Vec<(u32, Result<String, ProcessError>)>,
        killed: Arc<Mutex<Vec<u32>>>,
        refuse: Vec<u32>,
    }

    impl ProcessTable for FakeTable {
        fn pids(&mut self) -> Vec<u32> {
            self.processes.iter().map(|(pid, _)| *pid).collect()
        }

        fn name(&self, pid: u32) -> Result<String, ProcessError> {
            self.processes
                .iter()
                .find(|(p, _)| *p == pid)
                .map(|(_, n)| n.clone())
                .unwrap_or(Err(ProcessError::Exited(pid)))
        }

        fn terminate(&mut self, pid: u32) -> Result<(), ProcessError> {
            if self.refuse.contains(&pid) {
                return Err(ProcessError::AccessDenied(pid));
            }
            self.killed.lock().push(pid);
            Ok(())
        }
    }

    fn monitor(table: FakeTable) -> ProcessMonitor {
        ProcessMonitor::new(
            Box::new(table),
            &ProcessSettings::default(),
            noop(),
            Duration::from_secs(3),
        )
    }

    #[test]
    fn matches_case_insensitively_and_survives_failures() {
        let killed = Arc::new(Mutex::new(Vec::new()));
        let monitor = monitor(FakeTable {
            processes: vec![
                (10, Err(ProcessError::AccessDenied(10))),
                (11, Ok("CMD.EXE".into())),
                (12, Ok("explorer.exe".into())),
                (13, Ok("taskmgr.exe".into())),
                (14, Err(ProcessError::Exited(14))),
            ],
            killed: killed.clone(),
            refuse: vec![13],
        });
        let report = monitor.scan_once();
        assert_eq!(*killed.lock(), vec![11]);
        assert_eq!(report.inspected, 5);
        assert_eq!(report.skipped, 2);
        assert_eq!(report.matched, 2);
        assert_eq!(report.terminated, 1);
        assert_eq!(report.failed, 1);
    }

    #[test]
    fn never_targets_own_process() {
        let killed = Arc::new(Mutex::new(Vec::new()));
        let monitor = monitor(FakeTable {
            processes: vec![(std::process::id(), Ok("cmd.exe".into()))],
            killed: killed.clone(),
            refuse: vec![],
        });
        assert_eq!(monitor.scan_once().inspected, 0);
        assert!(killed.lock().is_empty());
    }

    #[test]
    fn start_stop_idempotent() {
        let mut monitor = monitor(FakeTable {
            processes: vec![],
            killed: Arc::default(),
            refuse: vec![],
        });
        assert!(monitor.stop());
        assert!(monitor.start());
        assert!(monitor.start());
        assert!(monitor.is_active());
        assert!(monitor.stop());
        assert!(!monitor.is_active());
    }
}
