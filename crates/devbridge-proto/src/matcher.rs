//! Wildcard topic matching.
//!
//! `+` matches exactly one segment, `#` matches whatever remains of the topic
//! (including nothing). Segments are compared left to right.

/// Check whether a subscription `pattern` matches a concrete `topic`.
///
/// An empty topic is only matched by an empty pattern.
#[must_use]
pub fn topic_match(pattern: &str, topic: &str) -> bool {
    if topic.is_empty() || pattern.is_empty() {
        return topic.is_empty() && pattern.is_empty();
    }
    let pattern: Vec<&str> = pattern.split('/').collect();
    let topic: Vec<&str> = topic.split('/').collect();
    segments_match(&pattern, &topic)
}

fn segments_match(pattern: &[&str], topic: &[&str]) -> bool {
    let Some((head, pattern_rest)) = pattern.split_first() else {
        return topic.is_empty();
    };
    if *head == "#" {
        return true;
    }
    match topic.split_first() {
        Some((segment, topic_rest)) => {
            (*head == "+" || head == segment) && segments_match(pattern_rest, topic_rest)
        }
        None => false,
    }
}
