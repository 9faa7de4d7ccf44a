use serde::{Deserialize, Serialize};
use sysinfo::System;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HostMetrics {
    pub cpu_percent: f32,
    pub memory_percent: f32,
    pub process_count: usize,
}

pub trait HostProbe: Send {
    fn sample(&mut self) -> HostMetrics;
}

/// Host metrics from `sysinfo`. CPU usage is relative to the previous sample,
/// so the first reading after construction may be zero.
pub struct SysinfoHostProbe {
    system: System,
}

impl SysinfoHostProbe {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        Self { system }
    }
}

impl Default for SysinfoHostProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl HostProbe for SysinfoHostProbe {
    fn sample(&mut self) -> HostMetrics {
        self.system.refresh_cpu();
        self.system.refresh_memory();
        self.system.refresh_processes();
        let total = self.system.total_memory();
        let memory_percent = if total == 0 {
            0.0
        } else {
            (self.system.used_memory() as f64 / total as f64 * 100.0) as f32
        };
        HostMetrics {
            cpu_percent: self.system.global_cpu_info().cpu_usage(),
            memory_percent,
            process_count: self.system.processes().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_is_well_formed() {
        let mut probe = SysinfoHostProbe::new();
        let m = probe.sample();
        assert!(m.cpu_percent.is_finite() && m.cpu_percent >= 0.0);
        assert!((0.0..=100.0).contains(&m.memory_percent));

        let value = serde_json::to_value(m).unwrap();
        let fields = value.as_object().unwrap();
        assert_eq!(fields.len(), 3);
        assert!(fields["process_count"].is_u64());
        assert!(fields["cpu_percent"].is_number());
    }
}
