use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Tells the engine whether a human is working on a document right now
pub trait EditorActivity {
    fn is_editing(&self, path: &str, now: Instant) -> bool;
}

/// Nobody is ever editing. Used for one-shot commands.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoActivity;

impl EditorActivity for NoActivity {
    fn is_editing(&self, _path: &str, _now: Instant) -> bool {
        false
    }
}

/// Infers editing from change notifications: a document that changed
/// within the idle window is being edited.
///
/// Changes caused by our own writes are reported back by the watcher too;
/// those arriving within `echo_window` of a recorded own write are ignored.
#[derive(Debug, Clone)]
pub struct ActivityTracker {
    idle: Duration,
    echo_window: Duration,
    last_change: HashMap<String, Instant>,
    own_writes: HashMap<String, Instant>,
}

impl ActivityTracker {
    pub fn new(idle: Duration, echo_window: Duration) -> Self {
        ActivityTracker {
            idle,
            echo_window,
            last_change: HashMap::new(),
            own_writes: HashMap::new(),
        }
    }

    /// Record that we just wrote `path`
    pub fn record_own_write(&mut self, path: &str, now: Instant) {
        self.own_writes.insert(path.to_string(), now);
    }

    /// Record a change notification. Returns false if it was the echo of
    /// our own write.
    pub fn touch(&mut self, path: &str, now: Instant) -> bool {
        if let Some(written) = self.own_writes.get(path)
            && now.duration_since(*written) <= self.echo_window
        {
            tracing::trace!(path, "ignoring echo of own write");
            return false;
        }
        self.own_writes.remove(path);
        self.last_change.insert(path.to_string(), now);
        true
    }

    /// Forget entries older than both windows
    pub fn prune(&mut self, now: Instant) {
        let keep = self.idle.max(self.echo_window);
        self.last_change
            .retain(|_, t| now.duration_since(*t) <= keep);
        self.own_writes
            .retain(|_, t| now.duration_since(*t) <= keep);
    }
}

impl EditorActivity for ActivityTracker {
    fn is_editing(&self, path: &str, now: Instant) -> bool {
        self.last_change
            .get(path)
            .is_some_and(|t| now.duration_since(*t) < self.idle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEC: Duration = Duration::from_secs(1);

    #[test]
    fn recent_change_means_editing() {
        let t0 = Instant::now();
        let mut tracker = ActivityTracker::new(10 * SEC, 2 * SEC);
        assert!(!tracker.is_editing("a.md", t0));
        assert!(tracker.touch("a.md", t0));
        assert!(tracker.is_editing("a.md", t0 + 9 * SEC));
        assert!(!tracker.is_editing("a.md", t0 + 10 * SEC));
        assert!(!tracker.is_editing("b.md", t0));
    }

    #[test]
    fn own_write_echo_is_ignored() {
        let t0 = Instant::now();
        let mut tracker = ActivityTracker::new(10 * SEC, 2 * SEC);
        tracker.record_own_write("a.md", t0);
        assert!(!tracker.touch("a.md", t0 + SEC));
        assert!(!tracker.is_editing("a.md", t0 + SEC));
        // Later changes are the user's
        assert!(tracker.touch("a.md", t0 + 5 * SEC));
        assert!(tracker.is_editing("a.md", t0 + 6 * SEC));
    }

    #[test]
    fn prune_drops_old_entries() {
        let t0 = Instant::now();
        let mut tracker = ActivityTracker::new(10 * SEC, 2 * SEC);
        tracker.touch("a.md", t0);
        tracker.prune(t0 + 60 * SEC);
        assert!(!tracker.is_editing("a.md", t0 + SEC));
    }
}
