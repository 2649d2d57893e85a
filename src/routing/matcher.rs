//! MQTT topic filter matching.
//!
//! # Responsibilities
//! - Validate topic filters (`+` and `#` placement)
//! - Match concrete publish topics against a filter
//!
//! # Design Decisions
//! - `+` matches exactly one level, which may be empty
//! - `#` matches the parent level and any number of child levels
//! - Wildcards never match topics starting with `$` at the first level
//! - No allocation on the match path

use thiserror::Error;

/// Reasons a topic filter is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("topic filter is empty")]
    Empty,

    #[error("'#' must be the last level of '{0}'")]
    MultiLevelNotLast(String),

    #[error("wildcard must occupy a whole level in '{0}'")]
    PartialWildcard(String),

    #[error("topic filter '{0}' contains a NUL character")]
    Nul(String),
}

/// One level of a compiled filter.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Level {
    Literal(String),
    SingleWildcard,
    MultiWildcard,
}

/// A validated MQTT topic filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicFilter {
    levels: Vec<Level>,
}

impl TopicFilter {
    /// Compile and validate a filter.
    pub fn parse(filter: &str) -> Result<Self, FilterError> {
        if filter.is_empty() {
            return Err(FilterError::Empty);
        }
        if filter.contains('\0') {
            return Err(FilterError::Nul(filter.to_string()));
        }

        let parts: Vec<&str> = filter.split('/').collect();
        let last = parts.len() - 1;
        let mut levels = Vec::with_capacity(parts.len());

        for (i, part) in parts.into_iter().enumerate() {
            let level = match part {
                "#" if i == last => Level::MultiWildcard,
                "#" => return Err(FilterError::MultiLevelNotLast(filter.to_string())),
                "+" => Level::SingleWildcard,
                p if p.contains('#') || p.contains('+') => {
                    return Err(FilterError::PartialWildcard(filter.to_string()))
                }
                p => Level::Literal(p.to_string()),
            };
            levels.push(level);
        }

        Ok(Self { levels })
    }

    /// Returns true if the concrete `topic` matches this filter.
    pub fn matches(&self, topic: &str) -> bool {
        if topic.starts_with('$')
            && matches!(
                self.levels.first(),
                Some(Level::SingleWildcard | Level::MultiWildcard)
            )
        {
            return false;
        }

        let mut topic_levels = topic.split('/');
        for level in &self.levels {
            match level {
                Level::MultiWildcard => return true,
                Level::SingleWildcard => {
                    if topic_levels.next().is_none() {
                        return false;
                    }
                }
                Level::Literal(expected) => match topic_levels.next() {
                    Some(actual) if actual == expected => {}
                    _ => return false,
                },
            }
        }
        topic_levels.next().is_none()
    }
}
