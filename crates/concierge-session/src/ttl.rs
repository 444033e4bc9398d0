//! Absolute-deadline tracking for cache expiry.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Tracks the deadline of every cached session.
///
/// A deadline is armed when a value is put and is never extended by reads.
#[derive(Debug)]
pub struct TtlTracker {
    deadlines: HashMap<String, Instant>,
    ttl: Duration,
}

impl TtlTracker {
    /// Create a tracker whose default lifetime is `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            deadlines: HashMap::new(),
            ttl,
        }
    }

    /// Arm the deadline for a session using the default TTL.
    pub fn arm(&mut self, session_id: &str) {
        self.arm_for(session_id, self.ttl);
    }

    /// Arm the deadline for a session with an explicit TTL.
    pub fn arm_for(&mut self, session_id: &str, ttl: Duration) {
        self.deadlines
            .insert(session_id.to_string(), Instant::now() + ttl);
    }

    /// Check if a session has expired. Untracked sessions count as expired.
    pub fn is_expired(&self, session_id: &str) -> bool {
        self.is_expired_at(session_id, Instant::now())
    }

    /// Check expiry against a given instant.
    pub fn is_expired_at(&self, session_id: &str, now: Instant) -> bool {
        match self.deadlines.get(session_id) {
            None => true,
            Some(deadline) => now >= *deadline,
        }
    }

    /// Deadline for a session, if tracked.
    pub fn deadline(&self, session_id: &str) -> Option<Instant> {
        self.deadlines.get(session_id).copied()
    }

    /// Remove tracking for a session.
    pub fn remove(&mut self, session_id: &str) {
        self.deadlines.remove(session_id);
    }

    /// Get the number of tracked sessions.
    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    /// Check if there are no tracked sessions.
    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }

    /// Clear all tracking data.
    pub fn clear(&mut self) {
        self.deadlines.clear();
    }

    /// Get the default TTL.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_untracked_is_expired() {
        let tracker = TtlTracker::new(Duration::from_secs(60));
        assert!(tracker.is_expired("session-1"));
    }

    #[test]
    fn test_expiration() {
        let mut tracker = TtlTracker::new(Duration::from_millis(10));
        tracker.arm("session-1");
        assert!(!tracker.is_expired("session-1"));

        thread::sleep(Duration::from_millis(20));

        assert!(tracker.is_expired("session-1"));
    }

    #[test]
    fn test_deadline_is_absolute() {
        let mut tracker = TtlTracker::new(Duration::from_millis(50));
        tracker.arm("session-1");
        let deadline = tracker.deadline("session-1").unwrap();

        // Checking expiry does not move the deadline
        assert!(!tracker.is_expired("session-1"));
        assert_eq!(tracker.deadline("session-1"), Some(deadline));
        assert!(tracker.is_expired_at("session-1", deadline));
    }

    #[test]
    fn test_rearm_replaces_deadline() {
        let mut tracker = TtlTracker::new(Duration::from_millis(10));
        tracker.arm("session-1");
        tracker.arm_for("session-1", Duration::from_secs(60));

        thread::sleep(Duration::from_millis(20));
        assert!(!tracker.is_expired("session-1"));
    }

    #[test]
    fn test_remove() {
        let mut tracker = TtlTracker::new(Duration::from_secs(60));
        tracker.arm("session-1");
        tracker.arm("session-2");

        tracker.remove("session-1");

        assert_eq!(tracker.len(), 1);
        assert!(tracker.is_expired("session-1"));
        assert!(!tracker.is_expired("session-2"));
    }
}
