use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // An absolute ROS graph resource name: "/" followed by zero or more
    // "/"-separated segments, each starting with a letter or underscore
    // and continuing with letters, digits, or underscores.
    static ref ABSOLUTE_NAME: Regex =
        Regex::new(r"^/([A-Za-z_][A-Za-z0-9_]*)(/[A-Za-z_][A-Za-z0-9_]*)*$").unwrap();
}

/// A validated absolute ROS name (a topic, a caller id, or a parameter key).
///
/// Topics, caller ids, and parameter keys all share the same "/"-prefixed
/// slash-separated path shape in ROS1, so one validated newtype covers
/// all three uses
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Name(String);

impl Name {
    /// Validates `raw` as an absolute ROS name. The root name "/" alone is
    /// also accepted (used as a parameter namespace root).
    pub fn new(raw: impl Into<String>) -> crate::Result<Self> {
        let raw = raw.into();
        if raw == "/" || ABSOLUTE_NAME.is_match(&raw) {
            Ok(Self(raw))
        } else {
            Err(crate::Error::InvalidName(raw))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parameter keys are normalized by stripping a trailing "/" so that
    /// `/foo/` and `/foo` address the same cache entry.
    pub fn normalized_param_key(raw: &str) -> crate::Result<Self> {
        let trimmed = if raw.len() > 1 && raw.ends_with('/') {
            &raw[..raw.len() - 1]
        } else {
            raw
        };
        Self::new(trimmed)
    }
}

impl std::fmt::Display for Name {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::ops::Deref for Name {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Name {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn accepts_absolute_names() {
        assert!(Name::new("/a").is_ok());
        assert!(Name::new("/a/b/c").is_ok());
        assert!(Name::new("/a_b/c1").is_ok());
        assert!(Name::new("/").is_ok());
    }

    #[test]
    fn rejects_malformed_names() {
        assert!(Name::new("a").is_err());
        assert!(Name::new("/a/").is_err());
        assert!(Name::new("/1abc").is_err());
        assert!(Name::new("/a//b").is_err());
        assert!(Name::new("").is_err());
    }

    #[test]
    fn normalizes_trailing_slash_for_param_keys() {
        let a = Name::normalized_param_key("/foo/bar/").unwrap();
        let b = Name::normalized_param_key("/foo/bar").unwrap();
        assert_eq!(a, b);
        // root stays root
        assert_eq!(Name::normalized_param_key("/").unwrap().as_str(), "/");
    }
}
