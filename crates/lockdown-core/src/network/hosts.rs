//! Managed block section of the hosts file.

pub const BEGIN_MARKER: &str =
    "# >>> exam-lockdown blackhole 4f1c9a2e (managed, do not edit) >>>";
pub const END_MARKER: &str = "# <<< exam-lockdown blackhole 4f1c9a2e <<<";

/// Line ending used by the existing file; `\n` when it has none.
pub fn line_ending(content: &[u8]) -> &'static str {
    if content.windows(2).any(|w| w == b"\r\n") {
        "\r\n"
    } else {
        "\n"
    }
}

/// The block section, each domain mapped to both loopback addresses.
pub fn render_section(domains: &[String], eol: &str) -> String {
    let mut section = String::new();
    section.push_str(BEGIN_MARKER);
    section.push_str(eol);
    for domain in domains {
        section.push_str(&format!("127.0.0.1 {domain}{eol}"));
        section.push_str(&format!("::1 {domain}{eol}"));
    }
    section.push_str(END_MARKER);
    section.push_str(eol);
    section
}

/// `content` with the section appended on a fresh line.
pub fn append_section(content: &[u8], domains: &[String]) -> Vec<u8> {
    let eol = line_ending(content);
    let mut out = content.to_vec();
    if !out.is_empty() && !out.ends_with(b"\n") {
        out.extend_from_slice(eol.as_bytes());
    }
    out.extend_from_slice(render_section(domains, eol).as_bytes());
    out
}

fn contains(haystack: &[u8], needle: &str) -> bool {
    let needle = needle.as_bytes();
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// True when both markers are present.
pub fn has_section(content: &[u8]) -> bool {
    contains(content, BEGIN_MARKER) && contains(content, END_MARKER)
}

/// True when either marker is present.
pub fn has_any_marker(content: &[u8]) -> bool {
    contains(content, BEGIN_MARKER) || contains(content, END_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domains() -> Vec<String> {
        vec!["example.com".into(), "www.example.com".into()]
    }

    #[test]
    fn section_maps_both_loopbacks() {
        let section = render_section(&domains(), "\n");
        assert!(section.starts_with(BEGIN_MARKER));
        assert!(section.contains("127.0.0.1 example.com\n"));
        assert!(section.contains("::1 www.example.com\n"));
        assert!(section.trim_end().ends_with(END_MARKER));
    }

    #[test]
    fn append_keeps_original_prefix_and_line_endings() {
        let original = b"127.0.0.1 localhost\r\n::1 localhost";
        let out = append_section(original, &domains());
        assert!(out.starts_with(original));
        assert!(has_section(&out));
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("localhost\r\n# >>>"));
        assert!(text.contains("127.0.0.1 example.com\r\n"));
    }

    #[test]
    fn partial_section_is_not_complete() {
        let mut content = b"127.0.0.1 localhost\n".to_vec();
        content.extend_from_slice(BEGIN_MARKER.as_bytes());
        assert!(!has_section(&content));
        assert!(has_any_marker(&content));
        assert!(!has_any_marker(b"# exam-lockdown notes\n"));
    }
}
