//! C3 — RegisterPath: a hierarchical, alt-separator-aware register path.

use std::fmt;

/// Ordered sequence of non-empty path components. Lexical form uses `/` as
/// the primary separator; an alternate separator may be set per instance
/// (e.g. `.`, matching map files that spell paths as `FEATURE.AREA1`).
/// `alt_separator` is parsing convenience only and does not affect identity:
/// two paths with the same components are equal regardless of how each was
/// parsed.
#[derive(Clone, Debug, Default)]
pub struct RegisterPath {
    components: Vec<String>,
    alt_separator: Option<char>,
}

impl PartialEq for RegisterPath {
    fn eq(&self, other: &Self) -> bool {
        self.components == other.components
    }
}

impl Eq for RegisterPath {}

impl std::hash::Hash for RegisterPath {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.components.hash(state);
    }
}

impl RegisterPath {
    pub const PRIMARY_SEPARATOR: char = '/';

    pub fn root() -> Self {
        Self { components: Vec::new(), alt_separator: None }
    }

    pub fn with_alt_separator(mut self, sep: char) -> Self {
        self.alt_separator = Some(sep);
        self
    }

    /// Parses `text`, splitting on the primary separator and, if configured,
    /// the alternate separator. Empty components (leading/trailing/doubled
    /// separators) are dropped.
    pub fn parse(text: &str, alt_separator: Option<char>) -> Self {
        let normalized: String = match alt_separator {
            Some(alt) => text.chars().map(|c| if c == alt { Self::PRIMARY_SEPARATOR } else { c }).collect(),
            None => text.to_string(),
        };
        let components = normalized
            .split(Self::PRIMARY_SEPARATOR)
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect();
        Self { components, alt_separator }
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn is_root(&self) -> bool {
        self.is_empty()
    }

    pub fn starts_with(&self, prefix: &RegisterPath) -> bool {
        self.components.len() >= prefix.components.len()
            && self.components[..prefix.components.len()] == prefix.components[..]
    }

    /// Returns the path with `suffix` appended as a new component.
    pub fn push(&self, suffix: &str) -> Self {
        let mut components = self.components.clone();
        components.push(suffix.to_string());
        Self { components, alt_separator: self.alt_separator }
    }

    /// Returns the parent path, or `None` if this is the root.
    pub fn parent(&self) -> Option<Self> {
        if self.components.is_empty() {
            None
        } else {
            let mut components = self.components.clone();
            components.pop();
            Some(Self { components, alt_separator: self.alt_separator })
        }
    }
}

impl fmt::Display for RegisterPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in &self.components {
            write!(f, "/{c}")?;
        }
        if self.components.is_empty() {
            write!(f, "/")?;
        }
        Ok(())
    }
}

impl From<&str> for RegisterPath {
    fn from(s: &str) -> Self {
        RegisterPath::parse(s, None)
    }
}

impl From<String> for RegisterPath {
    fn from(s: String) -> Self {
        RegisterPath::parse(&s, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_strips_empty_components() {
        let p = RegisterPath::parse("/FEATURE/AREA1/", None);
        assert_eq!(p.components(), &["FEATURE", "AREA1"]);
        assert_eq!(p.to_string(), "/FEATURE/AREA1");
    }

    #[test]
    fn alt_separator_is_equivalent() {
        let a = RegisterPath::parse("FEATURE.AREA1", Some('.'));
        let b = RegisterPath::parse("FEATURE/AREA1", None);
        assert_eq!(a, b);
    }

    #[test]
    fn starts_with_and_length() {
        let p = RegisterPath::parse("/BAR/0/8", None);
        let prefix = RegisterPath::parse("/BAR", None);
        assert!(p.starts_with(&prefix));
        assert_eq!(p.len(), 3);
        assert!(!prefix.starts_with(&p));
    }

    #[test]
    fn root_is_empty() {
        assert!(RegisterPath::root().is_root());
        assert!(RegisterPath::root().is_empty());
    }
}
