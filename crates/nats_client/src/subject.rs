//! Subject matching with NATS-style wildcards:
//! - `*` matches any single segment
//! - `>` matches one or more segments (only at the end)

/// Check if a subscription pattern matches a subject.
///
/// Examples:
/// - `NTFY.PUSH.INTERNAL` matches `NTFY.PUSH.INTERNAL`
/// - `NTFY.*.INTERNAL` matches `NTFY.PUSH.INTERNAL`
/// - `NTFY.>` matches `NTFY.REGISTER.WEBSOCKET` (one or more segments)
pub fn matches(pattern: &str, subject: &str) -> bool {
    let subject_parts: Vec<&str> = subject.split('.').collect();
    matches_subject(pattern, &subject_parts)
}

/// Match a pattern against a pre-split subject.
pub fn matches_subject(pattern: &str, subject_parts: &[&str]) -> bool {
    let pattern_parts: Vec<&str> = pattern.split('.').collect();
    matches_parts(&pattern_parts, subject_parts)
}

fn matches_parts(pattern_parts: &[&str], subject_parts: &[&str]) -> bool {
    let mut pi = 0;
    let mut si = 0;

    while pi < pattern_parts.len() && si < subject_parts.len() {
        let p = pattern_parts[pi];

        if p == ">" {
            // Consumes the rest; at least one segment remains here.
            return true;
        } else if p == "*" || p == subject_parts[si] {
            pi += 1;
            si += 1;
        } else {
            return false;
        }
    }

    pi == pattern_parts.len() && si == subject_parts.len()
}

/// Validate a subscription subject pattern.
/// Returns an error message if invalid, None if valid.
pub fn validate_pattern(pattern: &str) -> Option<String> {
    if pattern.is_empty() {
        return Some("Empty pattern".to_string());
    }

    let parts: Vec<&str> = pattern.split('.').collect();
    for (i, part) in parts.iter().enumerate() {
        if *part == ">" && i != parts.len() - 1 {
            return Some("> wildcard can only be at the end".to_string());
        }
        if part.is_empty() {
            return Some("Empty segment in pattern".to_string());
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert!(matches("GATEWAY", "GATEWAY"));
        assert!(matches("NTFY.PUSH.INTERNAL", "NTFY.PUSH.INTERNAL"));
        assert!(!matches("NTFY.PUSH.INTERNAL", "NTFY.PUSH.EXTERNAL"));
    }

    #[test]
    fn test_single_wildcard() {
        assert!(matches("NTFY.*.INTERNAL", "NTFY.PUSH.INTERNAL"));
        assert!(matches("*.*.*", "NTFY.PUSH.INTERNAL"));
        assert!(!matches("NTFY.*", "NTFY.PUSH.INTERNAL"));
    }

    #[test]
    fn test_greedy_wildcard() {
        assert!(matches("NTFY.>", "NTFY.REGISTER.WEBSOCKET"));
        assert!(matches(">", "GATEWAY"));
        assert!(!matches("NTFY.>", "NTFY"));
        assert!(!matches("NTFY.>", "GATEWAY"));
    }

    #[test]
    fn test_validate_pattern() {
        assert!(validate_pattern("NTFY.PUSH.INTERNAL").is_none());
        assert!(validate_pattern("NTFY.>").is_none());
        assert!(validate_pattern(">.NTFY").is_some());
        assert!(validate_pattern("NTFY..PUSH").is_some());
        assert!(validate_pattern("").is_some());
    }
}
