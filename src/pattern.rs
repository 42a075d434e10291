//! Wildcard pattern matching for module ids.
//!
//! Used by ACL rules and extension points to select modules by id. `*`
//! matches any run of characters, including the empty run.

/// Match `module_id` against `pattern`.
///
/// A pattern without `*` requires exact equality. Segments between `*`s must
/// appear in order; the first segment is anchored as a prefix unless the
/// pattern starts with `*`, the last as a suffix unless it ends with `*`.
/// Advancement is greedy left-to-right: each middle segment binds to its
/// first occurrence after the current position.
///
/// # Examples
///
/// ```rust
/// use apcore::pattern::match_pattern;
///
/// assert!(match_pattern("*", "anything.at.all"));
/// assert!(match_pattern("billing.*", "billing.charge"));
/// assert!(match_pattern("*.delete", "users.delete"));
/// assert!(match_pattern("fs.*.write", "fs.local.write"));
/// assert!(!match_pattern("billing.*", "users.charge"));
/// ```
#[must_use]
pub fn match_pattern(pattern: &str, module_id: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == module_id;
    }
    let segments: Vec<&str> = pattern.split('*').collect();
    let last_index = segments.len() - 1;
    let mut pos = 0;

    let first = segments[0];
    if !first.is_empty() {
        if !module_id.starts_with(first) {
            return false;
        }
        pos = first.len();
    }

    for segment in &segments[1..last_index] {
        if segment.is_empty() {
            // consecutive '*'s contribute nothing
            continue;
        }
        match module_id[pos..].find(segment) {
            Some(found) => pos += found + segment.len(),
            None => return false,
        }
    }

    let last = segments[last_index];
    if last.is_empty() {
        return true;
    }
    module_id.ends_with(last) && module_id.len() - last.len() >= pos
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lone_star_matches_everything() {
        for id in ["", "a", "deeply.nested.module.id"] {
            assert!(match_pattern("*", id));
        }
    }

    #[test]
    fn no_star_requires_equality() {
        assert!(match_pattern("echo", "echo"));
        assert!(!match_pattern("echo", "echo2"));
        assert!(!match_pattern("echo", "ech"));
    }

    #[test]
    fn anchored_prefix_and_suffix() {
        assert!(match_pattern("fs.*", "fs.read"));
        assert!(!match_pattern("fs.*", "afs.read"));
        assert!(match_pattern("*.write", "fs.write"));
        assert!(!match_pattern("*.write", "fs.write2"));
    }

    #[test]
    fn middle_segments_in_order() {
        assert!(match_pattern("a*b*c", "a-x-b-y-c"));
        assert!(!match_pattern("a*b*c", "a-x-c-y-b"));
        assert!(match_pattern("a**c", "abc"));
    }

    #[test]
    fn suffix_cannot_overlap_consumed_input() {
        assert!(!match_pattern("ab*ba", "aba"));
        assert!(match_pattern("ab*ba", "abba"));
    }
}
