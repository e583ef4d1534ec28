//! Namespace prefix rules.
//!
//! A prefix partitions a shared broker cluster and a shared directory between
//! system instances. The directory hands each instance its prefix; before it is
//! used to select topics it must match the instance's [`PrefixFormat`]
//! (exact length, fixed start and end markers). The default format accepts
//! prefixes like `e85da0fd6.`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a prefix failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PrefixError {
    #[error("prefix '{prefix}' has length {found}, expected {expected}")]
    Length {
        prefix: String,
        found: usize,
        expected: usize,
    },
    #[error("prefix '{prefix}' must start with '{start}'")]
    Start { prefix: String, start: String },
    #[error("prefix '{prefix}' must end with '{end}'")]
    End { prefix: String, end: String },
}

/// Shape every prefix of an instance must have.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefixFormat {
    pub length: usize,
    pub start: String,
    pub end: String,
}

impl Default for PrefixFormat {
    fn default() -> Self {
        Self {
            length: 10,
            start: "e".to_string(),
            end: ".".to_string(),
        }
    }
}

impl PrefixFormat {
    pub fn validate(&self, prefix: &str) -> Result<(), PrefixError> {
        if prefix.len() != self.length {
            return Err(PrefixError::Length {
                prefix: prefix.to_string(),
                found: prefix.len(),
                expected: self.length,
            });
        }
        if !prefix.starts_with(self.start.as_str()) {
            return Err(PrefixError::Start {
                prefix: prefix.to_string(),
                start: self.start.clone(),
            });
        }
        if !prefix.ends_with(self.end.as_str()) {
            return Err(PrefixError::End {
                prefix: prefix.to_string(),
                end: self.end.clone(),
            });
        }
        Ok(())
    }

    /// Leading `length` bytes of `name`, if they form a valid prefix.
    pub fn extract<'a>(&self, name: &'a str) -> Option<&'a str> {
        let candidate = name.get(..self.length)?;
        self.validate(candidate).ok().map(|()| candidate)
    }

    /// Whether any prefix can match: both markers fit in `length`, and where
    /// they overlap their bytes agree.
    pub fn is_satisfiable(&self) -> bool {
        let (start, end) = (self.start.as_bytes(), self.end.as_bytes());
        if self.length == 0 || start.len() > self.length || end.len() > self.length {
            return false;
        }
        let end_at = self.length - end.len();
        start.len() <= end_at || start[end_at..] == end[..start.len() - end_at]
    }
}

/// Keep only the names carrying `prefix` literally. Idempotent.
pub fn filter_by_prefix<I, S>(names: I, prefix: &str) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .filter(|name| name.as_ref().starts_with(prefix))
        .map(|name| name.as_ref().to_owned())
        .collect()
}
