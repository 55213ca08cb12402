//! Hierarchical selection of test groups and cases.

use std::fmt;

/// A slash-delimited path selector.
///
/// A candidate path matches when it agrees with the pattern on every segment
/// present in the shorter of the two, so ancestors and descendants of the
/// selected path both match. A `*` segment matches any single segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    segments: Vec<String>,
}

impl Pattern {
    pub fn parse(pattern: &str) -> Self {
        Self {
            segments: split_path(pattern).map(str::to_string).collect(),
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        self.segments
            .iter()
            .zip(split_path(path))
            .all(|(want, have)| want == "*" || want == have)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_ancestor_and_descendant_match() {
        let pattern = Pattern::parse("foo/bar/spam");
        assert!(pattern.matches("foo/bar"));
        assert!(pattern.matches("foo/bar/spam"));
        assert!(pattern.matches("foo/bar/spam/eggs"));
        assert!(!pattern.matches("foo/zzz"));
    }

    #[test]
    fn test_wildcard_segment() {
        let pattern = Pattern::parse("suite/*/fast");
        assert!(pattern.matches("suite/db/fast"));
        assert!(pattern.matches("suite/web"));
        assert!(!pattern.matches("suite/web/slow"));
    }

    #[test]
    fn test_empty_segments_ignored() {
        let pattern = Pattern::parse("/foo//bar/");
        assert_eq!(pattern.to_string(), "foo/bar");
        assert!(pattern.matches("foo/bar/baz"));
    }

    proptest! {
        #[test]
        fn test_pattern_matches_its_own_prefixes(
            segs in prop::collection::vec("[a-z]{1,6}", 1..6),
        ) {
            let pattern = Pattern::parse(&segs.join("/"));
            for n in 1..=segs.len() {
                let prefix = segs[..n].join("/");
                prop_assert!(pattern.matches(&prefix));
            }
        }
    }
}
