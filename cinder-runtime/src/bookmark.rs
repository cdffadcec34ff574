//! Deferred re-entry queue.
//!
//! A bookmark is a token the machine wants to be re-entered with once its
//! deadline has passed. The queue is a binary heap ordered by deadline and
//! insertion sequence; cancelling or running a token early leaves a stale heap
//! entry behind that is skipped when it surfaces.

use std::{
    cmp::Reverse,
    collections::{BinaryHeap, HashMap, HashSet},
};

pub type Token = u64;

/// First token handed out to script timeouts. Host tokens stay below it, and
/// every token above it is still exact as a script number.
pub const SCRIPT_TOKEN_BASE: Token = 1 << 52;

/// Whether `token` lies in the range reserved for script timeouts.
pub fn is_script_token(token: Token) -> bool {
    token >= SCRIPT_TOKEN_BASE
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Bookmark {
    when: u64,
    seq: u64,
    token: Token,
}
impl PartialOrd for Bookmark {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Bookmark {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.when, self.seq).cmp(&(other.when, other.seq))
    }
}

#[derive(Debug, Default)]
pub struct BookmarkScheduler {
    now: u64,
    seq: u64,
    queue: BinaryHeap<Reverse<Bookmark>>,
    /// Token to the sequence number of its live heap entry.
    live: HashMap<Token, u64>,
    /// `(token, deadline)` pairs not yet forwarded to the host.
    announcements: Vec<(Token, u64)>,
}

impl BookmarkScheduler {
    pub fn now(&self) -> u64 {
        self.now
    }

    /// Move the clock forward. The clock never goes back.
    pub fn advance(&mut self, now: u64) {
        self.now = self.now.max(now);
    }

    /// Queue `token` at `now + timeout_ms`. Scheduling a pending token again
    /// replaces its deadline.
    pub fn schedule_soon(&mut self, token: Token, timeout_ms: u64) {
        let when = self.now.saturating_add(timeout_ms);
        self.schedule_at(token, when);
        self.announcements.push((token, when));
    }

    fn schedule_at(&mut self, token: Token, when: u64) {
        self.seq += 1;
        self.live.insert(token, self.seq);
        self.queue.push(Reverse(Bookmark {
            when,
            seq: self.seq,
            token,
        }));
    }

    fn is_live(&self, b: &Bookmark) -> bool {
        self.live.get(&b.token) == Some(&b.seq)
    }

    /// Remove and return the earliest bookmark due at `now`, with its deadline.
    pub fn pop_due(&mut self, now: u64) -> Option<(Token, u64)> {
        while let Some(Reverse(b)) = self.queue.peek().copied() {
            if !self.is_live(&b) {
                self.queue.pop();
                continue;
            }
            if b.when > now {
                return None;
            }
            self.queue.pop();
            self.live.remove(&b.token);
            return Some((b.token, b.when));
        }
        None
    }

    /// Remove a pending token regardless of its deadline.
    pub fn take(&mut self, token: Token) -> bool {
        self.live.remove(&token).is_some()
    }

    pub fn is_pending(&self, token: Token) -> bool {
        self.live.contains_key(&token)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Deadline of the earliest pending bookmark.
    pub fn next_deadline(&mut self) -> Option<u64> {
        while let Some(Reverse(b)) = self.queue.peek().copied() {
            if self.is_live(&b) {
                return Some(b.when);
            }
            self.queue.pop();
        }
        None
    }

    pub fn drain_announcements(&mut self) -> Vec<(Token, u64)> {
        std::mem::take(&mut self.announcements)
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.live.clear();
        self.announcements.clear();
    }
}

/// Book-keeping for one servicing pass.
///
/// A token that comes due again within the pass it already ran in (a callback
/// that reschedules itself with a zero timeout) is held back until the next
/// pass instead of being run in a loop.
#[derive(Debug, Default)]
pub struct ServicePass {
    serviced: HashSet<Token>,
    deferred: Vec<(Token, u64)>,
}

impl ServicePass {
    /// Whether `token` may run in this pass.
    pub fn admit(&mut self, token: Token, when: u64) -> bool {
        if self.serviced.insert(token) {
            true
        } else {
            self.deferred.push((token, when));
            false
        }
    }

    pub fn serviced(&self) -> usize {
        self.serviced.len()
    }

    /// Requeue held-back tokens, unless they were rescheduled or cancelled meanwhile.
    pub fn finish(self, scheduler: &mut BookmarkScheduler) {
        for (token, when) in self.deferred {
            if !scheduler.is_pending(token) {
                scheduler.schedule_at(token, when);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn drain(s: &mut BookmarkScheduler, now: u64) -> Vec<Token> {
        std::iter::from_fn(|| s.pop_due(now).map(|(t, _)| t)).collect()
    }

    #[test]
    fn services_in_deadline_order_and_never_early() {
        let mut s = BookmarkScheduler::default();
        for (token, timeout) in [(1, 30), (2, 10), (3, 20), (4, 10), (5, 100)] {
            s.schedule_soon(token, timeout);
        }
        let due = drain(&mut s, 25);
        // equal deadlines keep insertion order
        assert_eq!(due, vec![2, 4, 3]);
        assert_eq!(s.len(), 2);
        assert_eq!(s.next_deadline(), Some(30));
        assert_eq!(drain(&mut s, 99), vec![1]);
        assert_eq!(drain(&mut s, 100), vec![5]);
        assert!(s.is_empty());
    }

    #[test]
    fn take_and_reschedule_leave_no_ghosts() {
        let mut s = BookmarkScheduler::default();
        s.schedule_soon(1, 10);
        s.schedule_soon(2, 10);
        assert!(s.take(1));
        assert!(!s.take(1));
        s.schedule_soon(2, 50);
        assert_eq!(drain(&mut s, 20), Vec::<Token>::new());
        assert_eq!(drain(&mut s, 50), vec![2]);
    }

    #[test]
    fn deadlines_are_relative_to_the_clock() {
        let mut s = BookmarkScheduler::default();
        s.advance(100);
        s.advance(40);
        assert_eq!(s.now(), 100);
        s.schedule_soon(7, 5);
        assert_eq!(s.drain_announcements(), vec![(7, 105)]);
        assert!(s.drain_announcements().is_empty());
        assert_eq!(s.pop_due(104), None);
        assert_eq!(s.pop_due(105), Some((7, 105)));
    }

    #[test]
    fn pass_defers_repeated_tokens() {
        let mut s = BookmarkScheduler::default();
        let mut pass = ServicePass::default();
        s.schedule_soon(1, 0);
        let (t, when) = s.pop_due(0).unwrap();
        assert!(pass.admit(t, when));
        // the callback reschedules itself immediately
        s.schedule_soon(1, 0);
        let (t, when) = s.pop_due(0).unwrap();
        assert!(!pass.admit(t, when));
        assert_eq!(s.pop_due(0), None);
        pass.finish(&mut s);
        assert_eq!(s.pop_due(0), Some((1, 0)));
    }

    #[test]
    fn script_range_starts_above_host_tokens() {
        assert!(!is_script_token(1));
        assert!(!is_script_token(SCRIPT_TOKEN_BASE - 1));
        assert!(is_script_token(SCRIPT_TOKEN_BASE));
        let last = (SCRIPT_TOKEN_BASE * 2 - 1) as f64;
        assert_eq!(last as u64, SCRIPT_TOKEN_BASE * 2 - 1);
    }
}
