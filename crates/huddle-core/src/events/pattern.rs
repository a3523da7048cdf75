//! Glob compilation for event subscription patterns.
//!
//! Patterns are matched against full event names (`namespace:kind`).
//! `*` matches one-or-more characters drawn from `[a-z:-]`, so `scrum:*`
//! matches `scrum:sprint-completed` (and `scrum:a:b`, since `:` is in the
//! class). `**` matches everything, including the empty string. Matching is
//! case-sensitive and anchored at both ends.

use regex::Regex;

use crate::error::EventError;

/// Compile a subscription pattern into an anchored regex.
///
/// Literal characters are restricted to the event-name charset plus the two
/// wildcard forms; anything else is rejected so that a typo'd pattern fails
/// at subscription time instead of silently never matching.
pub(crate) fn compile(pattern: &str) -> Result<Regex, EventError> {
    if pattern.is_empty() {
        return Err(EventError::InvalidPattern {
            pattern: pattern.to_string(),
            message: "pattern is empty".to_string(),
        });
    }

    let mut regex = String::with_capacity(pattern.len() + 16);
    regex.push('^');
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    regex.push_str(".*");
                } else {
                    regex.push_str("[a-z:-]+");
                }
            }
            'a'..='z' | '-' | ':' => regex.push(c),
            other => {
                return Err(EventError::InvalidPattern {
                    pattern: pattern.to_string(),
                    message: format!("unexpected character '{other}'"),
                });
            }
        }
    }
    regex.push('$');

    Regex::new(&regex).map_err(|e| EventError::InvalidPattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(pattern: &str, name: &str) -> bool {
        compile(pattern).expect("compile pattern").is_match(name)
    }

    #[test]
    fn namespace_star_matches_any_kind() {
        assert!(matches("scrum:*", "scrum:sprint-completed"));
        assert!(matches("scrum:*", "scrum:task-updated"));
        assert!(!matches("scrum:*", "time:entry-logged"));
    }

    #[test]
    fn double_star_matches_everything() {
        assert!(matches("**", "scrum:sprint-completed"));
        assert!(matches("**", "workflow:failed"));
        assert!(matches("**", ""));
    }

    #[test]
    fn single_star_requires_at_least_one_character() {
        assert!(!matches("scrum:*", "scrum:"));
    }

    #[test]
    fn exact_pattern_matches_only_itself() {
        assert!(matches("scrum:sprint-completed", "scrum:sprint-completed"));
        assert!(!matches("scrum:sprint-completed", "scrum:sprint-completed-late"));
        assert!(!matches("scrum:sprint-completed", "scrum:sprint"));
    }

    #[test]
    fn matching_is_case_sensitive() {
        assert!(!matches("scrum:*", "Scrum:sprint-completed"));
    }

    #[test]
    fn naive_substring_match_is_not_used() {
        // `*:completed` must anchor: "sprint-completed" alone is not a match.
        assert!(matches("*:sprint-completed", "scrum:sprint-completed"));
        assert!(!matches("*:sprint-completed", "sprint-completed"));
    }

    #[test]
    fn invalid_characters_are_rejected() {
        assert!(compile("scrum:*;DROP").is_err());
        assert!(compile("scrum:[a]").is_err());
        assert!(compile("").is_err());
    }
}
