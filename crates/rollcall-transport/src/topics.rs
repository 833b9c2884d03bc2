//! Topic names and subscription filters.
//!
//! Topics are `/`-separated levels. Filters may use `+` to match exactly one
//! level and `#` as the last level to match any number of remaining levels,
//! including none.

use crate::error::{Result, TransportError};

const SEPARATOR: char = '/';
const SINGLE: &str = "+";
const MULTI: &str = "#";

/// Check that `topic` can be published to.
pub fn validate_topic(topic: &str) -> Result<()> {
    if topic.is_empty() {
        return Err(TransportError::invalid_topic(topic, "empty topic"));
    }
    if topic.contains(['+', '#']) {
        return Err(TransportError::invalid_topic(
            topic,
            "wildcards are not allowed in topic names",
        ));
    }
    Ok(())
}

/// Check that `filter` is a well-formed subscription filter.
pub fn validate_filter(filter: &str) -> Result<()> {
    if filter.is_empty() {
        return Err(TransportError::invalid_topic(filter, "empty filter"));
    }
    let levels: Vec<&str> = filter.split(SEPARATOR).collect();
    let last = levels.len() - 1;
    for (index, level) in levels.iter().enumerate() {
        if level.contains('#') && (*level != MULTI || index != last) {
            return Err(TransportError::invalid_topic(
                filter,
                "'#' must occupy the whole last level",
            ));
        }
        if level.contains('+') && *level != SINGLE {
            return Err(TransportError::invalid_topic(
                filter,
                "'+' must occupy a whole level",
            ));
        }
    }
    Ok(())
}

/// Return true if `topic` matches `filter`.
///
/// ```
/// use rollcall_transport::topics::matches;
///
/// assert!(matches("devices/+/control", "devices/4/control"));
/// assert!(matches("attendance/#", "attendance/check-in/response/4"));
/// assert!(!matches("devices/+/control", "devices/4/5/control"));
/// ```
pub fn matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split(SEPARATOR);
    let mut topic_levels = topic.split(SEPARATOR);

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some(MULTI), _) => return true,
            (Some(SINGLE), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("devices/+/control", "devices/4/control", true)]
    #[case("devices/+/control", "devices/kiosk-a/control", true)]
    #[case("devices/+/control", "devices/4/status", false)]
    #[case("devices/+/control", "devices/control", false)]
    #[case("devices/4/control", "devices/4/control", true)]
    #[case("devices/4/control", "devices/5/control", false)]
    #[case("attendance/#", "attendance", true)]
    #[case("attendance/#", "attendance/check-out/request", true)]
    #[case("#", "anything/at/all", true)]
    #[case("attendance/+/response/4", "attendance/check-in/response/4", true)]
    #[case("attendance/+/response/4", "attendance/check-in/response/5", false)]
    #[case("a/b", "a/b/c", false)]
    #[case("a/b/c", "a/b", false)]
    fn test_matches(#[case] filter: &str, #[case] topic: &str, #[case] expected: bool) {
        assert_eq!(matches(filter, topic), expected);
    }

    #[rstest]
    #[case("devices/+/control")]
    #[case("#")]
    #[case("attendance/#")]
    #[case("+/+")]
    fn test_valid_filters(#[case] filter: &str) {
        assert!(validate_filter(filter).is_ok());
    }

    #[rstest]
    #[case("")]
    #[case("a/#/b")]
    #[case("a/b#")]
    #[case("a/+b/c")]
    fn test_invalid_filters(#[case] filter: &str) {
        assert!(matches!(
            validate_filter(filter),
            Err(TransportError::InvalidTopic { .. })
        ));
    }

    #[test]
    fn test_validate_topic() {
        assert!(validate_topic("attendance/check-in/request").is_ok());
        assert!(validate_topic("").is_err());
        assert!(validate_topic("devices/+/control").is_err());
    }
}
