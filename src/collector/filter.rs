//! Request path include/exclude filtering

use regex::Regex;

use crate::config::PathFilterConfig;

/// Compiled shell-style path patterns.
///
/// `*` matches any run of characters (including `/`), `?` a single character.
/// Paths are compared without their leading slash.
#[derive(Debug, Clone)]
pub struct PathFilter {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl PathFilter {
    pub fn new<I, E>(include: I, exclude: E) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
        E: IntoIterator,
        E::Item: AsRef<str>,
    {
        Self {
            include: include.into_iter().filter_map(|p| compile(p.as_ref())).collect(),
            exclude: exclude.into_iter().filter_map(|p| compile(p.as_ref())).collect(),
        }
    }

    pub fn from_config(config: &PathFilterConfig) -> Self {
        Self::new(&config.include, &config.exclude)
    }

    /// Exclusions win; otherwise the path must match at least one include pattern.
    pub fn matches(&self, path: &str) -> bool {
        let path = path.trim_start_matches('/');
        if self.exclude.iter().any(|re| re.is_match(path)) {
            return false;
        }
        self.include.iter().any(|re| re.is_match(path))
    }
}

fn compile(pattern: &str) -> Option<Regex> {
    let mut source = String::with_capacity(pattern.len() + 8);
    source.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => source.push_str(".*"),
            '?' => source.push('.'),
            other => source.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    source.push('$');
    Regex::new(&source).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filters() {
        let filter = PathFilter::from_config(&PathFilterConfig::default());

        assert!(filter.matches("api/users"));
        assert!(filter.matches("/api/users/1/posts"));
        assert!(!filter.matches("api/health"));
        assert!(!filter.matches("api/ping"));
        assert!(!filter.matches("web/home"));
        assert!(!filter.matches("api"));
    }

    #[test]
    fn test_star_matches_everything() {
        let filter = PathFilter::new(["*"], ["admin/*"]);
        assert!(filter.matches(""));
        assert!(filter.matches("anything/at/all"));
        assert!(!filter.matches("admin/users"));
    }

    #[test]
    fn test_question_mark_and_literals() {
        let filter = PathFilter::new(["v?/orders.json"], Vec::<String>::new());
        assert!(filter.matches("v1/orders.json"));
        assert!(!filter.matches("v1/ordersXjson"));
        assert!(!filter.matches("v10/orders.json"));
    }

    #[test]
    fn test_empty_include_tracks_nothing() {
        let filter = PathFilter::new(Vec::<String>::new(), Vec::<String>::new());
        assert!(!filter.matches("api/users"));
    }
}
