//! Native label and matcher model of the storage engine.

use std::fmt;

use regex::Regex;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label {
    pub name: String,
    pub value: String,
}

impl Label {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A label set in canonical form: sorted by name, every name at most once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Labels(Vec<Label>);

impl Labels {
    /// Builds a canonical label set. Fails if a name occurs twice.
    pub fn new(labels: impl IntoIterator<Item = Label>) -> Result<Self> {
        let mut labels: Vec<Label> = labels.into_iter().collect();
        labels.sort_by(|a, b| a.name.cmp(&b.name));
        if let Some(dup) = labels.windows(2).find(|w| w[0].name == w[1].name) {
            return Err(Error::DuplicateLabelName(dup[0].name.clone()));
        }
        Ok(Self(labels))
    }

    pub fn from_pairs<N, V>(pairs: impl IntoIterator<Item = (N, V)>) -> Result<Self>
    where
        N: Into<String>,
        V: Into<String>,
    {
        Self::new(pairs.into_iter().map(|(n, v)| Label::new(n, v)))
    }

    /// Value of the named label, or `None` if the set doesn't carry it.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .binary_search_by(|l| l.name.as_str().cmp(name))
            .ok()
            .map(|i| self.0[i].value.as_str())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Label> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True if every matcher accepts this label set.
    pub fn matches(&self, matchers: &[Matcher]) -> bool {
        matchers
            .iter()
            .all(|m| m.matches(self.get(&m.name).unwrap_or("")))
    }
}

impl<'a> IntoIterator for &'a Labels {
    type Item = &'a Label;
    type IntoIter = std::slice::Iter<'a, Label>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for Labels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, l) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={:?}", l.name, l.value)?;
        }
        f.write_str("}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchType {
    Equal,
    NotEqual,
    Regexp,
    NotRegexp,
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MatchType::Equal => "=",
            MatchType::NotEqual => "!=",
            MatchType::Regexp => "=~",
            MatchType::NotRegexp => "!~",
        })
    }
}

/// Predicate over a single label value. A label that is absent from a series
/// is matched as the empty string.
#[derive(Debug, Clone)]
pub struct Matcher {
    pub match_type: MatchType,
    pub name: String,
    pub value: String,
    re: Option<Regex>,
}

impl Matcher {
    pub fn new(
        match_type: MatchType,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Self> {
        let name = name.into();
        let value = value.into();

        // Regex matchers are anchored at both ends.
        let re = match match_type {
            MatchType::Regexp | MatchType::NotRegexp => Some(
                Regex::new(&format!("^(?:{})$", value)).map_err(|source| {
                    Error::InvalidMatcher {
                        name: name.clone(),
                        source,
                    }
                })?,
            ),
            MatchType::Equal | MatchType::NotEqual => None,
        };

        Ok(Self {
            match_type,
            name,
            value,
            re,
        })
    }

    pub fn matches(&self, v: &str) -> bool {
        match (self.match_type, &self.re) {
            (MatchType::Equal, _) => self.value == v,
            (MatchType::NotEqual, _) => self.value != v,
            (MatchType::Regexp, Some(re)) => re.is_match(v),
            (MatchType::NotRegexp, Some(re)) => !re.is_match(v),
            (MatchType::Regexp | MatchType::NotRegexp, None) => false,
        }
    }
}

impl PartialEq for Matcher {
    fn eq(&self, other: &Self) -> bool {
        self.match_type == other.match_type && self.name == other.name && self.value == other.value
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{:?}", self.name, self.match_type, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_are_sorted_by_name() {
        let ls = Labels::from_pairs([("job", "api"), ("instance", "a:80"), ("__name__", "heap")])
            .unwrap();
        let names: Vec<_> = ls.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["__name__", "instance", "job"]);
        assert_eq!(ls.get("job"), Some("api"));
        assert_eq!(ls.get("missing"), None);
    }

    #[test]
    fn test_duplicate_label_name_rejected() {
        let err = Labels::from_pairs([("job", "a"), ("job", "b")]).unwrap_err();
        assert!(matches!(err, Error::DuplicateLabelName(name) if name == "job"));
    }

    #[test]
    fn test_regex_matchers_are_anchored() {
        let m = Matcher::new(MatchType::Regexp, "job", "api").unwrap();
        assert!(m.matches("api"));
        assert!(!m.matches("api-server"));

        let m = Matcher::new(MatchType::NotRegexp, "job", "api.*").unwrap();
        assert!(!m.matches("api-server"));
        assert!(m.matches("web"));
    }

    #[test]
    fn test_invalid_regex_rejected() {
        let err = Matcher::new(MatchType::Regexp, "job", "(").unwrap_err();
        assert!(matches!(err, Error::InvalidMatcher { name, .. } if name == "job"));
    }

    #[test]
    fn test_absent_label_matches_empty_string() {
        let ls = Labels::from_pairs([("job", "api")]).unwrap();
        let eq_empty = Matcher::new(MatchType::Equal, "instance", "").unwrap();
        let neq_api = Matcher::new(MatchType::NotEqual, "job", "api").unwrap();
        assert!(ls.matches(&[eq_empty.clone()]));
        assert!(!ls.matches(&[eq_empty, neq_api]));
    }
}
