use directories::ProjectDirs;
use std::path::PathBuf;

pub const APP_QUALIFIER: &str = "com";
pub const APP_ORG: &str = "darklock";
pub const APP_NAME: &str = "exam-lockdown";

pub const DATA_DIR_ENV: &str = "LOCKDOWN_DATA_DIR";
pub const HOSTS_PATH_ENV: &str = "LOCKDOWN_HOSTS_PATH";

pub fn data_dir() -> anyhow::Result<PathBuf> {
    if let Ok(override_path) = std::env::var(DATA_DIR_ENV) {
        if !override_path.trim().is_empty() {
            return Ok(PathBuf::from(override_path));
        }
    }
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| anyhow::anyhow!("cannot determine data directory"))?;
    Ok(dirs.data_dir().to_path_buf())
}

pub fn log_dir(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("logs")
}

pub fn settings_path(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("settings.json")
}

pub fn status_path(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("status.json")
}

pub fn journal_path(log_dir: &std::path::Path) -> PathBuf {
    log_dir.join("activity.log")
}

/// The system host-resolution file, unless overridden by `LOCKDOWN_HOSTS_PATH`.
pub fn hosts_path() -> PathBuf {
    if let Ok(override_path) = std::env::var(HOSTS_PATH_ENV) {
        if !override_path.trim().is_empty() {
            return PathBuf::from(override_path);
        }
    }
    #[cfg(windows)]
    {
        let root = std::env::var("SystemRoot").unwrap_or_else(|_| r"C:\Windows".to_string());
        PathBuf::from(root)
            .join("System32")
            .join("drivers")
            .join("etc")
            .join("hosts")
    }
    #[cfg(not(windows))]
    {
        PathBuf::from("/etc/hosts")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn data_relative_paths() {
        let data = Path::new("/var/lib/exam-lockdown");
        assert_eq!(journal_path(&log_dir(data)), data.join("logs").join("activity.log"));
        assert_eq!(settings_path(data), data.join("settings.json"));
        assert_eq!(status_path(data), data.join("status.json"));
    }
}
