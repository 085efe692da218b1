//! Topic filter validation and wildcard matching
//!
//! Matching follows MQTT 3.1.1 section 4.7: `+` matches exactly one level,
//! `#` matches the parent level and any number of child levels and must be the
//! last level of a filter. Topics starting with `$` are never matched by a
//! wildcard at the first level.

use thiserror::Error;

/// Whether `topic` is matched by `filter`.
///
/// Both arguments are assumed valid; filters are checked by
/// [`validate_topic_filter`] when they enter the subscription registry.
pub fn topic_matches_filter(topic: &str, filter: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut topic_levels = topic.split('/');
    for level in filter.split('/') {
        if level == "#" {
            return true;
        }

        match topic_levels.next() {
            Some(_) if level == "+" => continue,
            Some(name) if name == level => continue,
            _ => return false,
        }
    }

    // Filter exhausted without '#': the topic must be exhausted too
    topic_levels.next().is_none()
}

/// Validate a topic filter before it is subscribed
pub fn validate_topic_filter(filter: &str, max_len: usize) -> Result<(), TopicError> {
    if filter.is_empty() {
        return Err(TopicError::Empty);
    }

    if filter.len() > max_len {
        return Err(TopicError::TooLong {
            len: filter.len(),
            max: max_len,
        });
    }

    if !rumqttc::mqttbytes::valid_filter(filter) {
        return Err(TopicError::InvalidWildcard(filter.to_string()));
    }

    Ok(())
}

/// Validate a topic name used for publishing
pub fn validate_topic_name(topic: &str) -> Result<(), TopicError> {
    if topic.is_empty() {
        return Err(TopicError::Empty);
    }

    if !rumqttc::mqttbytes::valid_topic(topic) {
        return Err(TopicError::WildcardInTopicName(topic.to_string()));
    }

    Ok(())
}

/// Topic validation errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TopicError {
    #[error("Topic cannot be empty")]
    Empty,
    #[error("Topic filter is {len} bytes, limit is {max}")]
    TooLong { len: usize, max: usize },
    #[error("Misplaced wildcard in topic filter: '{0}'")]
    InvalidWildcard(String),
    #[error("Topic name cannot contain wildcards: '{0}'")]
    WildcardInTopicName(String),
}
