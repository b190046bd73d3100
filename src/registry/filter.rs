//! Topic and topic-filter grammar
//!
//! Topics are concrete publish destinations; filters may contain the `+`
//! (exactly one level) and `#` (all remaining levels, last only) wildcards.
//! Both are `/`-separated and may contain empty levels.

use std::fmt;

use crate::utils::error::TopicError;

pub const LEVEL_SEPARATOR: char = '/';
pub const SINGLE_LEVEL: &str = "+";
pub const MULTI_LEVEL: &str = "#";

/// Checks that `topic` can be published to: non-empty, no wildcards, no NUL.
pub fn validate_topic(topic: &str) -> Result<(), TopicError> {
    if topic.is_empty() {
        return Err(TopicError::Empty);
    }
    for c in topic.chars() {
        match c {
            '\0' => return Err(TopicError::Nul),
            '+' | '#' => return Err(TopicError::WildcardInTopic { wildcard: c }),
            _ => {}
        }
    }
    Ok(())
}

/// A validated subscription filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicFilter {
    raw: String,
}

impl TopicFilter {
    pub fn parse(filter: &str) -> Result<Self, TopicError> {
        if filter.is_empty() {
            return Err(TopicError::Empty);
        }
        if filter.contains('\0') {
            return Err(TopicError::Nul);
        }

        let levels: Vec<&str> = filter.split(LEVEL_SEPARATOR).collect();
        let last = levels.len() - 1;
        for (level, segment) in levels.iter().enumerate() {
            let has_wildcard = segment.contains('+') || segment.contains('#');
            if has_wildcard && *segment != SINGLE_LEVEL && *segment != MULTI_LEVEL {
                return Err(TopicError::PartialWildcard {
                    level,
                    segment: segment.to_string(),
                });
            }
            if *segment == MULTI_LEVEL && level != last {
                return Err(TopicError::HashNotLast { level });
            }
        }

        Ok(Self {
            raw: filter.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn levels(&self) -> impl Iterator<Item = &str> {
        self.raw.split(LEVEL_SEPARATOR)
    }

    fn starts_with_wildcard(&self) -> bool {
        self.raw.starts_with(SINGLE_LEVEL) || self.raw.starts_with(MULTI_LEVEL)
    }

    /// Level-by-level match of a single filter against a topic.
    ///
    /// Topics starting with `$` are reserved; a leading wildcard never
    /// matches them.
    pub fn matches(&self, topic: &str) -> bool {
        if topic.starts_with('$') && self.starts_with_wildcard() {
            return false;
        }

        let mut filter_levels = self.levels();
        let mut topic_levels = topic.split(LEVEL_SEPARATOR);
        loop {
            match (filter_levels.next(), topic_levels.next()) {
                (Some(MULTI_LEVEL), _) => return true,
                (Some(SINGLE_LEVEL), Some(_)) => {}
                (Some(f), Some(t)) if f == t => {}
                (None, None) => return true,
                _ => return false,
            }
        }
    }
}

impl fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
