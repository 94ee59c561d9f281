//! MQTT topic filter matching.
//!
//! `+` matches exactly one level, `#` matches any number of trailing levels
//! (including none) and may only appear as the last level. Wildcards at the
//! first level never match topics starting with `$`.

use crate::BusError;

pub fn validate_filter(filter: &str) -> Result<(), BusError> {
    if filter.is_empty() {
        return Err(BusError::InvalidFilter(filter.to_string()));
    }
    let levels: Vec<&str> = filter.split('/').collect();
    for (i, level) in levels.iter().enumerate() {
        let wildcard_misuse = (level.contains('+') && *level != "+")
            || (level.contains('#') && (*level != "#" || i != levels.len() - 1));
        if wildcard_misuse {
            return Err(BusError::InvalidFilter(filter.to_string()));
        }
    }
    Ok(())
}

pub fn topic_matches(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
