//! Bounded retry of location updates that arrive before their node is known
//!
//! A location event can race ahead of the store write that creates the
//! node. Instead of dropping it, the update is carried as a
//! `PostponedLocation` and retried after a fixed delay until the node
//! appears or the attempt cap is reached.

use crate::feed::types::FeedNodeId;
use crate::store::Location;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay between attempts
    pub delay: Duration,
    /// Postponements allowed after the first attempt
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(1),
            max_attempts: 10,
        }
    }
}

/// A location update together with its retry budget
#[derive(Debug, Clone, PartialEq)]
pub struct PostponedLocation {
    pub feed_id: FeedNodeId,
    pub location: Location,
    postponed: u32,
    max_attempts: u32,
}

impl PostponedLocation {
    pub fn new(feed_id: FeedNodeId, location: Location, policy: &RetryPolicy) -> Self {
        Self {
            feed_id,
            location,
            postponed: 0,
            max_attempts: policy.max_attempts,
        }
    }

    /// Number of times this update has been postponed so far
    pub fn postponed(&self) -> u32 {
        self.postponed
    }

    pub fn attempts_remaining(&self) -> u32 {
        self.max_attempts.saturating_sub(self.postponed)
    }

    /// The next attempt, or `None` once the budget is spent
    pub fn postpone(self) -> Option<Self> {
        if self.postponed >= self.max_attempts {
            return None;
        }
        Some(Self {
            postponed: self.postponed + 1,
            ..self
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location() -> Location {
        Location { lat: 59.91, lng: 10.75, city: "Oslo".to_string() }
    }

    #[test]
    fn test_budget_is_bounded() {
        let policy = RetryPolicy { delay: Duration::from_millis(10), max_attempts: 3 };
        let mut task = PostponedLocation::new(4, location(), &policy);
        assert_eq!(task.attempts_remaining(), 3);

        let mut postponements = 0;
        while let Some(next) = task.clone().postpone() {
            task = next;
            postponements += 1;
        }

        assert_eq!(postponements, 3);
        assert_eq!(task.postponed(), 3);
        assert_eq!(task.attempts_remaining(), 0);
        assert_eq!(task.feed_id, 4);
        assert_eq!(task.location, location());
    }

    #[test]
    fn test_zero_budget_never_postpones() {
        let policy = RetryPolicy { delay: Duration::from_millis(10), max_attempts: 0 };
        assert!(PostponedLocation::new(1, location(), &policy).postpone().is_none());
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay, Duration::from_secs(1));
        assert_eq!(policy.max_attempts, 10);
    }
}
