use crate::settings::WindowSettings;

/// Lower-cases and strips a trailing `.exe`.
pub fn normalize_process_name(name: &str) -> String {
    let lower = name.trim().to_ascii_lowercase();
    match lower.strip_suffix(".exe") {
        Some(stem) => stem.to_string(),
        None => lower,
    }
}

/// Decides which windows get protected.
///
/// A window qualifies when its owning process is allow-listed or its title
/// contains a protected keyword, unless its title contains an exclusion.
/// Exclusions always win.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectionPredicate {
    processes: Vec<String>,
    keywords: Vec<String>,
    exclusions: Vec<String>,
}

impl ProtectionPredicate {
    pub fn new<P, K, E>(processes: P, keywords: K, exclusions: E) -> Self
    where
        P: IntoIterator,
        P::Item: AsRef<str>,
        K: IntoIterator,
        K::Item: AsRef<str>,
        E: IntoIterator,
        E::Item: AsRef<str>,
    {
        let lowered = |items: Vec<String>| -> Vec<String> {
            items
                .into_iter()
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect()
        };
        let mut processes: Vec<String> = processes
            .into_iter()
            .map(|p| normalize_process_name(p.as_ref()))
            .filter(|p| !p.is_empty())
            .collect();
        processes.dedup();
        Self {
            processes,
            keywords: lowered(keywords.into_iter().map(|k| k.as_ref().to_string()).collect()),
            exclusions: lowered(exclusions.into_iter().map(|e| e.as_ref().to_string()).collect()),
        }
    }

    /// Builds the predicate from settings and adds the running executable to
    /// the allow-list.
    pub fn from_settings(settings: &WindowSettings) -> Self {
        let mut processes = settings.protected_processes.clone();
        if let Some(own) = own_executable_name() {
            processes.push(own);
        }
        Self::new(processes, &settings.protected_keywords, &settings.excluded_titles)
    }

    pub fn is_excluded(&self, title: &str) -> bool {
        let title = title.to_lowercase();
        self.exclusions.iter().any(|e| title.contains(e.as_str()))
    }

    pub fn should_protect(&self, process: Option<&str>, title: &str) -> bool {
        if title.trim().is_empty() || self.is_excluded(title) {
            return false;
        }
        let by_process = process
            .map(normalize_process_name)
            .is_some_and(|p| self.processes.contains(&p));
        if by_process {
            return true;
        }
        let title = title.to_lowercase();
        self.keywords.iter().any(|k| title.contains(k.as_str()))
    }

    pub fn allows_process(&self, process: &str) -> bool {
        self.processes.contains(&normalize_process_name(process))
    }
}

fn own_executable_name() -> Option<String> {
    let exe = std::env::current_exe().ok()?;
    exe.file_name()
        .and_then(|n| n.to_str())
        .map(normalize_process_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn predicate() -> ProtectionPredicate {
        ProtectionPredicate::from_settings(&WindowSettings::default())
    }

    #[test]
    fn keyword_titles_are_protected() {
        let p = predicate();
        assert!(p.should_protect(None, "Secure Exam Browser"));
        assert!(p.should_protect(Some("notepad.exe"), "Final QUIZ - notes"));
    }

    #[test]
    fn exclusions_win() {
        let p = predicate();
        assert!(!p.should_protect(None, "Windows Security"));
        assert!(!p.should_protect(None, "Task Manager"));
        assert!(!p.should_protect(Some("chrome.exe"), "Task Manager"));
        assert!(!p.should_protect(Some("firefox.exe"), "Exam - Windows Security"));
    }

    #[test]
    fn allow_listed_process_is_protected_regardless_of_title() {
        let p = predicate();
        assert!(p.should_protect(Some("MSEDGE.EXE"), "New Tab"));
        assert!(p.should_protect(Some("chrome"), "Untitled"));
        assert!(!p.should_protect(Some("notepad.exe"), "Untitled"));
        assert!(!p.should_protect(Some("chrome.exe"), ""));
    }

    #[test]
    fn own_executable_is_allow_listed() {
        let p = predicate();
        let own = own_executable_name().unwrap();
        assert!(p.allows_process(&format!("{own}.exe")));
    }
}
