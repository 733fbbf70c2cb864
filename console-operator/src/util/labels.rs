//! Label-value sanitisation shared by every materialiser that stamps
//! `console-name`/`user` (or any other derived value) onto a child object.

const MAX_LEN: usize = 63;

/// Sanitises a raw string into a valid Kubernetes label value: strips
/// everything outside `[A-Za-z0-9._-]`, then trims leading/trailing
/// characters that aren't alphanumeric, and caps the result at 63 bytes.
///
/// Matches `^[A-Za-z0-9]([A-Za-z0-9._-]{0,61}[A-Za-z0-9])?$`.
pub fn sanitise_label_value(raw: &str) -> String {
    let filtered: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    let trimmed = filtered.trim_matches(|c: char| !c.is_ascii_alphanumeric());
    truncate(trimmed, MAX_LEN)
        .trim_end_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_string()
}

/// Truncates `s` to at most `max_len` bytes, respecting UTF-8 boundaries.
pub fn truncate(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        return s;
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// The local part of a user identifier (`alice@example.com` -> `alice`),
/// used when deriving the `user` label.
pub fn local_part(user: &str) -> &str {
    user.split('@').next().unwrap_or(user)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_disallowed_characters() {
        assert_eq!(sanitise_label_value("alice@example.com"), "alice_example.com");
    }

    #[test]
    fn trims_leading_and_trailing_punctuation() {
        assert_eq!(sanitise_label_value("-.leading"), "leading");
        assert_eq!(sanitise_label_value("trailing.-"), "trailing");
    }

    #[test]
    fn caps_at_63_characters() {
        let long = "a".repeat(100);
        let sanitised = sanitise_label_value(&long);
        assert_eq!(sanitised.len(), 63);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("hello", 3), "hel");
        assert_eq!(truncate("hi", 10), "hi");
    }

    #[test]
    fn local_part_strips_domain() {
        assert_eq!(local_part("bob@example.com"), "bob");
        assert_eq!(local_part("no-at-sign"), "no-at-sign");
    }

    #[test]
    fn long_console_name_job_name_ends_with_console_suffix() {
        let name = "a".repeat(90);
        let job_name = format!("{}-console", truncate(&name, 55));
        assert_eq!(job_name.len(), 63);
        assert!(job_name.ends_with("-console"));
    }
}
