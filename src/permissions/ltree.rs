//! # Label Paths
//!
//! Materialized group paths in the PostgreSQL `ltree` format.
//!
//! A path is a dot-separated list of labels (`root.team.squad`). Group
//! hierarchy checks compare label by label, so `a.b` is an ancestor of
//! `a.b.c` but not of `a.bc`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use super::errors::PathError;

/// Maximum length of one label
pub const MAX_LABEL_LEN: usize = 256;

/// Maximum number of labels in a path
pub const MAX_DEPTH: usize = 65_535;

/// A validated, non-empty label path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelPath {
    labels: Vec<String>,
}

impl LabelPath {
    /// Parse a dotted path
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        if raw.is_empty() {
            return Err(PathError::Empty);
        }

        let labels = raw
            .split('.')
            .map(|label| validate_label(label).map(|_| label.to_string()))
            .collect::<Result<Vec<_>, _>>()?;

        Self::from_labels(labels)
    }

    /// Single-label path for a group id
    pub fn from_uuid(id: Uuid) -> Self {
        Self {
            labels: vec![uuid_label(id)],
        }
    }

    fn from_labels(labels: Vec<String>) -> Result<Self, PathError> {
        if labels.is_empty() {
            return Err(PathError::Empty);
        }
        if labels.len() > MAX_DEPTH {
            return Err(PathError::TooDeep(labels.len()));
        }
        Ok(Self { labels })
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Number of labels (`nlevel`)
    pub fn depth(&self) -> usize {
        self.labels.len()
    }

    pub fn last(&self) -> &str {
        // Never empty by construction
        self.labels.last().map(String::as_str).unwrap_or_default()
    }

    pub fn is_root(&self) -> bool {
        self.labels.len() == 1
    }

    /// Path of the parent, `None` for a root path
    pub fn parent(&self) -> Option<LabelPath> {
        if self.is_root() {
            return None;
        }
        Some(Self {
            labels: self.labels[..self.labels.len() - 1].to_vec(),
        })
    }

    /// Extend this path by one label
    pub fn child(&self, label: &str) -> Result<LabelPath, PathError> {
        validate_label(label)?;
        let mut labels = self.labels.clone();
        labels.push(label.to_string());
        Self::from_labels(labels)
    }

    /// Child path labelled with a group id
    pub fn child_uuid(&self, id: Uuid) -> Result<LabelPath, PathError> {
        self.child(&uuid_label(id))
    }

    /// `len` labels starting at `start` (`subpath`)
    pub fn subpath(&self, start: usize, len: usize) -> Result<LabelPath, PathError> {
        let end = start.checked_add(len).ok_or(PathError::OutOfRange {
            start,
            len,
            depth: self.depth(),
        })?;
        if len == 0 || end > self.depth() {
            return Err(PathError::OutOfRange {
                start,
                len,
                depth: self.depth(),
            });
        }
        Ok(Self {
            labels: self.labels[start..end].to_vec(),
        })
    }

    /// `self @> other`: self is an ancestor of, or equal to, other
    pub fn is_ancestor_of(&self, other: &LabelPath) -> bool {
        self.depth() <= other.depth() && other.labels[..self.depth()] == self.labels[..]
    }

    /// `self <@ other`: self is a descendant of, or equal to, other
    pub fn is_descendant_of(&self, other: &LabelPath) -> bool {
        other.is_ancestor_of(self)
    }

    pub fn is_strict_ancestor_of(&self, other: &LabelPath) -> bool {
        self.depth() < other.depth() && self.is_ancestor_of(other)
    }

    pub fn is_strict_descendant_of(&self, other: &LabelPath) -> bool {
        other.is_strict_ancestor_of(self)
    }

    /// Longest common prefix (`lca`, inclusive of the paths themselves)
    pub fn common_ancestor(&self, other: &LabelPath) -> Option<LabelPath> {
        let shared: Vec<String> = self
            .labels
            .iter()
            .zip(other.labels.iter())
            .take_while(|(a, b)| a == b)
            .map(|(a, _)| a.clone())
            .collect();

        if shared.is_empty() {
            None
        } else {
            Some(Self { labels: shared })
        }
    }

    /// Replace the `old_prefix` ancestor of this path with `new_prefix`
    pub fn rebase(&self, old_prefix: &LabelPath, new_prefix: &LabelPath) -> Result<LabelPath, PathError> {
        if !old_prefix.is_ancestor_of(self) {
            return Err(PathError::NotAnAncestor {
                path: self.to_string(),
                prefix: old_prefix.to_string(),
            });
        }
        let mut labels = new_prefix.labels.clone();
        labels.extend_from_slice(&self.labels[old_prefix.depth()..]);
        Self::from_labels(labels)
    }
}

/// Label for a group id: the hyphen-free hex form
pub fn uuid_label(id: Uuid) -> String {
    id.simple().to_string()
}

fn validate_label(label: &str) -> Result<(), PathError> {
    if label.is_empty() {
        return Err(PathError::EmptyLabel);
    }
    if label.len() > MAX_LABEL_LEN {
        return Err(PathError::LabelTooLong(label.len()));
    }
    if let Some(c) = label.chars().find(|c| !(c.is_ascii_alphanumeric() || *c == '_')) {
        return Err(PathError::InvalidCharacter {
            label: label.to_string(),
            character: c,
        });
    }
    Ok(())
}

impl fmt::Display for LabelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.labels.join("."))
    }
}

impl FromStr for LabelPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for LabelPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for LabelPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
