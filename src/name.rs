//! Channel name grammar: dotted segments, `1..=256` bytes, no `..`, and `$`
//! reserved as a leading prefix for system channels.

use crate::error::{Error, Result};

pub const DEFAULT_SYSTEM_PREFIX: char = '$';
pub const MAX_CHANNEL_NAME_LEN: usize = 256;

pub fn validate_channel_name(name: &str, system_prefix: char) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::ArgumentError("channel name is empty".into()));
    }
    if name.len() > MAX_CHANNEL_NAME_LEN {
        return Err(Error::ArgumentError(format!(
            "channel name exceeds {MAX_CHANNEL_NAME_LEN} bytes"
        )));
    }
    if name.contains("..") {
        return Err(Error::ArgumentError("channel name contains '..'".into()));
    }
    if name.contains(system_prefix) && !name.starts_with(system_prefix) {
        return Err(Error::ArgumentError(format!(
            "'{system_prefix}' is only allowed as a leading prefix for system channels"
        )));
    }
    Ok(())
}

/// Subscribe-side pattern validation: `*` matches one segment, `>` matches
/// one-or-more trailing segments and must be the last segment. The two
/// wildcard kinds cannot be mixed in a single pattern.
pub fn validate_pattern(pattern: &str, system_prefix: char) -> Result<()> {
    validate_channel_name(pattern, system_prefix)?;
    let segments: Vec<&str> = pattern.split('.').collect();
    let has_star = segments.iter().any(|s| *s == "*");
    let has_gt = segments.iter().any(|s| *s == ">");
    if has_star && has_gt {
        return Err(Error::ArgumentError(
            "pattern cannot mix '*' and '>' wildcards".into(),
        ));
    }
    if has_gt {
        let gt_positions: Vec<usize> = segments
            .iter()
            .enumerate()
            .filter(|(_, s)| **s == ">")
            .map(|(i, _)| i)
            .collect();
        if gt_positions.len() > 1 || gt_positions[0] != segments.len() - 1 {
            return Err(Error::ArgumentError(
                "'>' must appear exactly once, as the last segment".into(),
            ));
        }
    }
    Ok(())
}

pub fn is_wildcard_pattern(pattern: &str) -> bool {
    pattern.split('.').any(|s| s == "*" || s == ">")
}

/// Pure match of a concrete channel name against a subscribe-side pattern.
/// Invoked only on subscribe and on channel creation, never on the publish
/// hot path (publish uses each channel's pre-computed subscriber list).
pub fn matches(channel_name: &str, pattern: &str) -> bool {
    let channel_segments: Vec<&str> = channel_name.split('.').collect();
    let pattern_segments: Vec<&str> = pattern.split('.').collect();

    if let Some(last) = pattern_segments.last() {
        if *last == ">" {
            let prefix = &pattern_segments[..pattern_segments.len() - 1];
            if channel_segments.len() <= prefix.len() {
                return false;
            }
            return channel_segments[..prefix.len()] == prefix[..];
        }
    }

    if channel_segments.len() != pattern_segments.len() {
        return false;
    }
    channel_segments
        .iter()
        .zip(pattern_segments.iter())
        .all(|(c, p)| *p == "*" || c == p)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_oversized_names() {
        assert!(validate_channel_name("", '$').is_err());
        assert!(validate_channel_name("   ", '$').is_err());
        let long = "a".repeat(257);
        assert!(validate_channel_name(&long, '$').is_err());
        let ok = "a".repeat(256);
        assert!(validate_channel_name(&ok, '$').is_ok());
        assert!(validate_channel_name("a", '$').is_ok());
    }

    #[test]
    fn rejects_double_dot_and_stray_dollar() {
        assert!(validate_channel_name("a..b", '$').is_err());
        assert!(validate_channel_name("a.$b", '$').is_err());
        assert!(validate_channel_name("$lifecycle", '$').is_ok());
    }

    #[test]
    fn rejects_mixed_wildcards_and_misplaced_gt() {
        assert!(validate_pattern("a.*.>", '$').is_err());
        assert!(validate_pattern("a.>.b", '$').is_err());
        assert!(validate_pattern("a.>", '$').is_ok());
        assert!(validate_pattern("a.*.c", '$').is_ok());
    }

    #[test]
    fn star_matches_exactly_one_segment() {
        assert!(matches("stock.trades.NYSE", "stock.trades.*"));
        assert!(!matches("stock.trades.NYSE.extra", "stock.trades.*"));
        assert!(!matches("stock.trades", "stock.trades.*"));
    }

    #[test]
    fn gt_matches_one_or_more_trailing_segments() {
        assert!(matches("a.b", "a.>"));
        assert!(matches("a.b.c", "a.>"));
        assert!(!matches("a", "a.>"));
    }
}
