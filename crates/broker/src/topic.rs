//! Topic pattern matching.
//!
//! Patterns use broker wildcard semantics: `+` matches exactly one topic
//! segment, a trailing `#` matches zero or more remaining segments. Both
//! must occupy a whole segment. Kept as pure functions so matching is
//! testable without a broker.

use crate::error::BrokerError;

/// True when `pattern` matches the concrete `topic`.
///
/// `a/+/c` matches `a/b/c` but not `a/b/b2/c`; `a/#` matches `a`, `a/b`,
/// and `a/b/c`.
pub fn matches(pattern: &str, topic: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('/').collect();
    let topic: Vec<&str> = topic.split('/').collect();

    for (i, seg) in pattern.iter().enumerate() {
        match *seg {
            "#" => return i == pattern.len() - 1,
            "+" => {
                if i >= topic.len() {
                    return false;
                }
            },
            literal => {
                if topic.get(i) != Some(&literal) {
                    return false;
                }
            },
        }
    }
    pattern.len() == topic.len()
}

/// Validate a subscription pattern before it reaches the broker.
pub fn validate_pattern(pattern: &str) -> Result<(), BrokerError> {
    if pattern.is_empty() {
        return Err(BrokerError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: "pattern is empty",
        });
    }
    let segments: Vec<&str> = pattern.split('/').collect();
    for (i, seg) in segments.iter().enumerate() {
        if *seg == "#" && i != segments.len() - 1 {
            return Err(BrokerError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: "`#` is only valid as the final segment",
            });
        }
        if seg.len() > 1 && (seg.contains('+') || seg.contains('#')) {
            return Err(BrokerError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: "wildcards must occupy a whole segment",
            });
        }
    }
    Ok(())
}

/// True when the pattern contains any wildcard segment.
pub fn is_wildcard(pattern: &str) -> bool {
    pattern.split('/').any(|s| s == "+" || s == "#")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_topics_match_themselves() {
        assert!(matches("a/b/c", "a/b/c"));
        assert!(!matches("a/b/c", "a/b"));
        assert!(!matches("a/b", "a/b/c"));
    }

    #[test]
    fn single_level_wildcard_matches_one_segment() {
        assert!(matches("a/+/c", "a/b/c"));
        assert!(!matches("a/+/c", "a/b/b2/c"));
        assert!(!matches("a/+", "a"));
        assert!(matches("site/+/device/+/telemetry", "site/12/device/7/telemetry"));
    }

    #[test]
    fn multi_level_wildcard_matches_zero_or_more() {
        assert!(matches("a/#", "a"));
        assert!(matches("a/#", "a/b"));
        assert!(matches("a/#", "a/b/c"));
        assert!(!matches("a/#", "b/c"));
    }

    #[test]
    fn hash_must_be_trailing() {
        assert!(validate_pattern("a/#").is_ok());
        assert!(validate_pattern("a/#/b").is_err());
        assert!(validate_pattern("a/b+c/d").is_err());
        assert!(validate_pattern("").is_err());
        assert!(validate_pattern("a/+/c").is_ok());
    }

    #[test]
    fn wildcard_detection() {
        assert!(is_wildcard("a/+/c"));
        assert!(is_wildcard("a/#"));
        assert!(!is_wildcard("a/b/c"));
    }
}
