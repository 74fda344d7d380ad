use std::collections::HashMap;
use std::time::{Duration, Instant};

/// State of a [`Debouncer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceState {
    Idle,
    /// Will fire once `deadline` passes without another trigger
    Pending { deadline: Instant },
    /// A fire is in flight; `retrigger` records triggers that arrived meanwhile
    Firing { retrigger: bool },
}

/// Collapses a burst of triggers into one fire after a quiet period.
///
/// Only one fire is ever in flight: `poll` hands out a fire, and the
/// caller reports back with `finish`.
#[derive(Debug, Clone)]
pub struct Debouncer {
    delay: Duration,
    state: DebounceState,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Debouncer {
            delay,
            state: DebounceState::Idle,
        }
    }

    pub fn state(&self) -> DebounceState {
        self.state
    }

    pub fn is_pending(&self) -> bool {
        !matches!(self.state, DebounceState::Idle)
    }

    /// Record activity, pushing the deadline out
    pub fn trigger(&mut self, now: Instant) {
        self.state = match self.state {
            DebounceState::Idle | DebounceState::Pending { .. } => DebounceState::Pending {
                deadline: now + self.delay,
            },
            DebounceState::Firing { .. } => DebounceState::Firing { retrigger: true },
        };
    }

    /// True when the caller should fire now. The debouncer stays in
    /// `Firing` until `finish` is called.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.state {
            DebounceState::Pending { deadline } if now >= deadline => {
                self.state = DebounceState::Firing { retrigger: false };
                true
            }
            _ => false,
        }
    }

    /// Fire immediately if anything is pending, regardless of the deadline
    pub fn poll_now(&mut self) -> bool {
        match self.state {
            DebounceState::Pending { .. } => {
                self.state = DebounceState::Firing { retrigger: false };
                true
            }
            _ => false,
        }
    }

    /// The fire handed out by `poll` failed; fire again after another
    /// quiet period
    pub fn retry(&mut self, now: Instant) {
        if matches!(self.state, DebounceState::Firing { .. }) {
            self.state = DebounceState::Pending {
                deadline: now + self.delay,
            };
        }
    }

    /// The fire handed out by `poll` is done
    pub fn finish(&mut self, now: Instant) {
        self.state = match self.state {
            DebounceState::Firing { retrigger: true } => DebounceState::Pending {
                deadline: now + self.delay,
            },
            _ => DebounceState::Idle,
        };
    }
}

/// Fixed-period timer that notices when it has been starved (e.g. the host
/// slept) and restarts itself.
#[derive(Debug, Clone)]
pub struct IntervalTimer {
    period: Duration,
    stale_after: Duration,
    last_run: Instant,
}

impl IntervalTimer {
    pub fn new(period: Duration, stale_after: Duration, now: Instant) -> Self {
        IntervalTimer {
            period,
            stale_after,
            last_run: now,
        }
    }

    /// True once per elapsed period; marks the run
    pub fn due(&mut self, now: Instant) -> bool {
        if now.duration_since(self.last_run) >= self.period {
            self.last_run = now;
            true
        } else {
            false
        }
    }

    /// True when the timer has not run within the stale window
    pub fn is_stale(&self, now: Instant) -> bool {
        now.duration_since(self.last_run) > self.stale_after
    }

    /// Start a fresh period so the next run happens immediately
    pub fn restart(&mut self, now: Instant) {
        self.last_run = now.checked_sub(self.period).unwrap_or(now);
    }
}

/// Per-path coalescing of "document changed" notifications
#[derive(Debug, Clone)]
pub struct ChangeCoalescer {
    quiet: Duration,
    pending: HashMap<String, Instant>,
}

impl ChangeCoalescer {
    pub fn new(quiet: Duration) -> Self {
        ChangeCoalescer {
            quiet,
            pending: HashMap::new(),
        }
    }

    pub fn notify(&mut self, path: &str, now: Instant) {
        self.pending.insert(path.to_string(), now + self.quiet);
    }

    pub fn is_pending(&self, path: &str) -> bool {
        self.pending.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Paths whose quiet period has passed and that are not held back by
    /// `hold`. Returned paths are removed; held paths stay queued.
    pub fn take_ready(&mut self, now: Instant, hold: impl Fn(&str) -> bool) -> Vec<String> {
        let mut ready: Vec<String> = self
            .pending
            .iter()
            .filter(|(path, deadline)| now >= **deadline && !hold(path))
            .map(|(path, _)| path.clone())
            .collect();
        ready.sort();
        for path in &ready {
            self.pending.remove(path);
        }
        ready
    }
}
