//! Timer min-heap driving the event loop's `Poll::poll` timeout. Each
//! entry fires once at or after its deadline; re-arming is an explicit
//! new push, matching the idle/script-timeout model in the design.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

use mio::Token;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Idle,
    ScriptTerm,
    ScriptKill,
    Sweep,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    deadline: Instant,
    token: Token,
    kind: TimerKind,
    /// Monotonically increasing generation so a connection's stale timer
    /// (from before it was reset) can be told apart from its current one.
    generation: u64,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline
    }
}
impl Eq for Entry {}
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse so `BinaryHeap` (a max-heap) pops the earliest deadline.
        other.deadline.cmp(&self.deadline)
    }
}
impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
pub struct TimerWheel {
    heap: BinaryHeap<Entry>,
}

impl TimerWheel {
    pub fn new() -> Self {
        Self { heap: BinaryHeap::new() }
    }

    pub fn arm(&mut self, deadline: Instant, token: Token, kind: TimerKind, generation: u64) {
        self.heap.push(Entry { deadline, token, kind, generation });
    }

    /// How long until the next timer fires, for `Poll::poll`'s timeout
    /// argument. `None` means block indefinitely.
    pub fn next_timeout(&self, now: Instant) -> Option<std::time::Duration> {
        self.heap.peek().map(|e| e.deadline.saturating_duration_since(now))
    }

    /// Pops every timer whose deadline has passed, handing each to the
    /// caller as `(token, kind, generation)`. The caller is responsible
    /// for checking the generation against the connection's current one
    /// before acting, since a reset connection leaves stale entries in
    /// the heap rather than paying to remove them up front.
    pub fn drain_expired(&mut self, now: Instant) -> Vec<(Token, TimerKind, u64)> {
        let mut fired = Vec::new();
        while let Some(top) = self.heap.peek() {
            if top.deadline > now {
                break;
            }
            let e = self.heap.pop().unwrap();
            fired.push((e.token, e.kind, e.generation));
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn fires_in_deadline_order() {
        let mut wheel = TimerWheel::new();
        let base = Instant::now();
        wheel.arm(base + Duration::from_secs(2), Token(1), TimerKind::Idle, 0);
        wheel.arm(base + Duration::from_secs(1), Token(2), TimerKind::Idle, 0);
        let fired = wheel.drain_expired(base + Duration::from_secs(3));
        assert_eq!(fired.len(), 2);
        assert_eq!(fired[0].0, Token(2));
        assert_eq!(fired[1].0, Token(1));
    }

    #[test]
    fn nothing_fires_before_deadline() {
        let mut wheel = TimerWheel::new();
        let base = Instant::now();
        wheel.arm(base + Duration::from_secs(5), Token(1), TimerKind::Idle, 0);
        assert!(wheel.drain_expired(base).is_empty());
    }
}
