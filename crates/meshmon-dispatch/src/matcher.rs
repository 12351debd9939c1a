use regex::Regex;

use crate::error::DispatchError;

/// Decides whether a changed-path string is relevant to a handler (spec
/// §4.3). The exact/regex split mirrors the two matcher kinds handlers are
/// registered with; `Any` lets a handler claim more than one pattern.
#[derive(Debug, Clone)]
pub enum PathMatcher {
    Exact(String),
    Regex(Regex),
    Any(Vec<PathMatcher>),
}

impl PathMatcher {
    pub fn exact(path: impl Into<String>) -> Self {
        PathMatcher::Exact(path.into())
    }

    /// Joins every pattern with `|`, as a single compiled alternation —
    /// matching the reference matcher's "list of patterns" constructor.
    pub fn regex(patterns: &[&str]) -> Result<Self, DispatchError> {
        let joined = patterns.join("|");
        Ok(PathMatcher::Regex(Regex::new(&joined)?))
    }

    pub fn matches(&self, name: &str) -> bool {
        match self {
            PathMatcher::Exact(path) => path == name,
            PathMatcher::Regex(re) => re.is_match(name),
            PathMatcher::Any(matchers) => matchers.iter().any(|m| m.matches(name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_matches_only_the_exact_path() {
        let m = PathMatcher::exact("nodes.a.values.k");
        assert!(m.matches("nodes.a.values.k"));
        assert!(!m.matches("nodes.a.values.k2"));
    }

    #[test]
    fn regex_matches_any_alternative() {
        let m = PathMatcher::regex(&["^nodes\\..*\\.consistency\\.clock_table\\.", "^nodes\\..*\\.consistency\\.pulse_table\\."])
            .expect("valid pattern");
        assert!(m.matches("nodes.a.consistency.clock_table.b"));
        assert!(m.matches("nodes.a.consistency.pulse_table.b"));
        assert!(!m.matches("nodes.a.values.k"));
    }
}
