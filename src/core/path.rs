// ============================================================================
// Field Paths
// ============================================================================
//
// Dotted field paths as understood by document update operators:
// `stats.level`, `inventory.items`, `slots[2]`.
//
// ============================================================================

/// Joins a parent path and a child key.
///
/// Index-style keys (`[n]`) attach directly to the prefix.
pub fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        return key.to_string();
    }

    if key.starts_with('[') {
        return format!("{prefix}{key}");
    }

    format!("{prefix}.{key}")
}

/// Splits a dotted path into its field segments.
pub fn split(path: &str) -> impl Iterator<Item = &str> {
    path.split('.').filter(|segment| !segment.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_root() {
        assert_eq!(join("", "level"), "level");
    }

    #[test]
    fn test_join_nested() {
        assert_eq!(join("stats", "level"), "stats.level");
        assert_eq!(join("a.b", "c"), "a.b.c");
    }

    #[test]
    fn test_join_index_key() {
        assert_eq!(join("slots", "[2]"), "slots[2]");
    }

    #[test]
    fn test_split() {
        let segments: Vec<&str> = split("a.b.c").collect();
        assert_eq!(segments, vec!["a", "b", "c"]);
        assert_eq!(split("").count(), 0);
    }
}
