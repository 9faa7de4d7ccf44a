use crate::orchestrator::{Category, Selection};
use crate::policy::{KeyCombo, PointerButton};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_ADMIN_COMBO: &str = "ctrl+shift+y";

pub const DEFAULT_BLOCKED_KEYS: &[&str] = &[
    "alt+tab",
    "alt+f4",
    "win+d",
    "win+l",
    "win+r",
    "ctrl+alt+del",
    "ctrl+shift+esc",
    "f11",
    "alt+space",
    "win+tab",
    "ctrl+alt+t",
];

pub const DEFAULT_BLOCKED_BUTTONS: &[&str] = &["middle", "x1", "x2"];

const MIN_INTERVAL_MS: u64 = 100;
const MAX_INTERVAL_MS: u64 = 60_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowSettings {
    pub prevent_minimize: bool,
    pub prevent_close: bool,
    pub prevent_maximize: bool,
    pub force_topmost: bool,
    pub monitor_new_windows: bool,
    pub scan_interval_ms: u64,
    pub protected_processes: Vec<String>,
    pub protected_keywords: Vec<String>,
    pub excluded_titles: Vec<String>,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            prevent_minimize: true,
            prevent_close: true,
            prevent_maximize: true,
            force_topmost: false,
            monitor_new_windows: true,
            scan_interval_ms: 750,
            protected_processes: [
                "chrome.exe",
                "firefox.exe",
                "msedge.exe",
                "iexplore.exe",
                "examsoft.exe",
                "respondus.exe",
                "proctorio.exe",
                "exam_shield.exe",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            protected_keywords: [
                "exam",
                "test",
                "quiz",
                "assessment",
                "proctoring",
                "browser",
                "chrome",
                "firefox",
                "edge",
                "secure",
                "lockdown",
                "kiosk",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            excluded_titles: [
                "windows security",
                "task manager",
                "control panel",
                "registry editor",
                "system configuration",
                "program manager",
                "windows settings",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    /// Overrides the platform hosts file location.
    pub hosts_path: Option<PathBuf>,
    pub blocked_domains: Vec<String>,
    pub dns_blackhole: bool,
    pub dns_interfaces: Vec<String>,
    pub watchdog_interval_ms: u64,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            hosts_path: None,
            blocked_domains: [
                "google.com",
                "www.google.com",
                "google.co.in",
                "www.google.co.in",
                "youtube.com",
                "www.youtube.com",
                "youtu.be",
                "m.youtube.com",
                "facebook.com",
                "www.facebook.com",
                "fb.com",
                "m.facebook.com",
                "twitter.com",
                "www.twitter.com",
                "x.com",
                "www.x.com",
                "instagram.com",
                "www.instagram.com",
                "tiktok.com",
                "www.tiktok.com",
                "reddit.com",
                "www.reddit.com",
                "discord.com",
                "www.discord.com",
                "whatsapp.com",
                "web.whatsapp.com",
                "telegram.org",
                "web.telegram.org",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            dns_blackhole: true,
            dns_interfaces: vec!["Wi-Fi".to_string(), "Ethernet".to_string()],
            watchdog_interval_ms: 5_000,
        }
    }
}

impl NetworkSettings {
    pub fn resolved_hosts_path(&self) -> PathBuf {
        self.hosts_path.clone().unwrap_or_else(crate::paths::hosts_path)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessSettings {
    pub deny_list: Vec<String>,
    pub interval_ms: u64,
}

impl Default for ProcessSettings {
    fn default() -> Self {
        Self {
            deny_list: [
                "taskmgr.exe",
                "cmd.exe",
                "powershell.exe",
                "regedit.exe",
                "msconfig.exe",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            interval_ms: 2_000,
        }
    }
}

impl ProcessSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockdownSettings {
    pub selection: Selection,
    pub admin_combo: String,
    pub blocked_keys: Vec<String>,
    pub blocked_buttons: Vec<String>,
    pub block_all_buttons: bool,
    pub windows: WindowSettings,
    pub network: NetworkSettings,
    pub processes: ProcessSettings,
    pub stop_timeout_ms: u64,
}

impl Default for LockdownSettings {
    fn default() -> Self {
        Self {
            selection: Category::ALL.iter().map(|c| (*c, true)).collect(),
            admin_combo: DEFAULT_ADMIN_COMBO.to_string(),
            blocked_keys: DEFAULT_BLOCKED_KEYS.iter().map(|s| s.to_string()).collect(),
            blocked_buttons: DEFAULT_BLOCKED_BUTTONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            block_all_buttons: false,
            windows: WindowSettings::default(),
            network: NetworkSettings::default(),
            processes: ProcessSettings::default(),
            stop_timeout_ms: 3_000,
        }
    }
}

impl LockdownSettings {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, value) in [
            ("windows.scan_interval_ms", self.windows.scan_interval_ms),
            ("network.watchdog_interval_ms", self.network.watchdog_interval_ms),
            ("processes.interval_ms", self.processes.interval_ms),
            ("stop_timeout_ms", self.stop_timeout_ms),
        ] {
            if !(MIN_INTERVAL_MS..=MAX_INTERVAL_MS).contains(&value) {
                anyhow::bail!(
                    "{name} must be between {MIN_INTERVAL_MS} and {MAX_INTERVAL_MS} ms, got {value}"
                );
            }
        }

        let admin = KeyCombo::parse(&self.admin_combo)
            .map_err(|e| anyhow::anyhow!("admin_combo: {e}"))?;
        if admin.key().is_none() {
            anyhow::bail!("admin_combo must include a non-modifier key");
        }
        for key in &self.blocked_keys {
            KeyCombo::parse(key).map_err(|e| anyhow::anyhow!("blocked_keys: {e}"))?;
        }
        for button in &self.blocked_buttons {
            PointerButton::parse_many(button)
                .map_err(|e| anyhow::anyhow!("blocked_buttons: {e}"))?;
        }

        for domain in &self.network.blocked_domains {
            if domain.trim().is_empty() || domain.chars().any(char::is_whitespace) {
                anyhow::bail!("blocked domain {domain:?} is empty or contains whitespace");
            }
        }
        if self.processes.deny_list.iter().any(|p| p.trim().is_empty()) {
            anyhow::bail!("process deny-list contains an empty entry");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = LockdownSettings::default();
        settings.validate().unwrap();
        assert_eq!(settings.selection.len(), Category::ALL.len());
        assert!(!settings.windows.force_topmost);
        assert!(!settings.blocked_buttons.iter().any(|b| b == "left" || b == "right"));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let json = r#"{ "block_all_buttons": true, "processes": { "interval_ms": 500 } }"#;
        let settings: LockdownSettings = serde_json::from_str(json).unwrap();
        assert!(settings.block_all_buttons);
        assert_eq!(settings.processes.interval_ms, 500);
        assert_eq!(settings.processes.deny_list.len(), 5);
        assert_eq!(settings.admin_combo, DEFAULT_ADMIN_COMBO);
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut settings = LockdownSettings::default();
        settings.windows.scan_interval_ms = 0;
        assert!(settings.validate().is_err());

        let mut settings = LockdownSettings::default();
        settings.admin_combo = "ctrl+shift".into();
        assert!(settings.validate().is_err());

        let mut settings = LockdownSettings::default();
        settings.network.blocked_domains.push("bad domain.com".into());
        assert!(settings.validate().is_err());

        let mut settings = LockdownSettings::default();
        settings.blocked_keys.push("ctrl+nope".into());
        assert!(settings.validate().is_err());
    }
}
