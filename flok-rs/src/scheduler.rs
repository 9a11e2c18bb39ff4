//! Delayed resumption of suspended scripts.
//!
//! A `wait` hands a [`Continuation`] to a [`Scheduler`], which must deliver
//! it back to the logic thread after the requested number of ticks; the
//! logic thread then calls [`crate::Engine::resume`].
//!
//! Two implementations are provided:
//!
//! - [`TickScheduler`] is driven by the host's own game loop via
//!   [`TickScheduler::advance`], which makes it deterministic (tests use it).
//! - [`TokioScheduler`] sleeps on the tokio timer and forwards due
//!   continuations over a channel, for hosts built around a `tokio::select!`
//!   loop:
//!
//! ```rust,ignore
//! let (sched, mut due) = TokioScheduler::new(config.tick_duration());
//! engine.set_scheduler(Box::new(sched));
//! loop {
//!     tokio::select! {
//!         Some(c) = due.recv() => { engine.resume(c); }
//!         // … host events …
//!     }
//! }
//! ```

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::script::Continuation;

/// Something that can run a continuation later.
pub trait Scheduler: Send {
    fn schedule(&mut self, delay_ticks: u64, continuation: Continuation);
}

// ── TickScheduler ─────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct TickQueue {
    now: u64,
    next_seq: u64,
    /// `(due tick, insertion order, continuation)`.
    entries: Vec<(u64, u64, Continuation)>,
}

/// Host-driven scheduler counted in ticks.
///
/// Cloning yields another handle to the same queue, so the engine can own
/// one handle while the host keeps another to drive it.
#[derive(Debug, Clone, Default)]
pub struct TickScheduler {
    queue: Arc<Mutex<TickQueue>>,
}

impl TickScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self) -> MutexGuard<'_, TickQueue> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Move time forward and return every continuation that became due,
    /// earliest first (ties in scheduling order).
    pub fn advance(&self, ticks: u64) -> Vec<Continuation> {
        let mut q = self.queue();
        q.now = q.now.saturating_add(ticks);
        let now = q.now;
        let (mut ready, waiting): (Vec<_>, Vec<_>) =
            std::mem::take(&mut q.entries).into_iter().partition(|(due, _, _)| *due <= now);
        q.entries = waiting;
        ready.sort_by_key(|(due, seq, _)| (*due, *seq));
        ready.into_iter().map(|(_, _, c)| c).collect()
    }

    /// Ticks until the soonest pending continuation is due.
    pub fn next_due(&self) -> Option<u64> {
        let q = self.queue();
        q.entries.iter().map(|(due, _, _)| due.saturating_sub(q.now)).min()
    }

    /// Current tick count.
    pub fn now(&self) -> u64 {
        self.queue().now
    }

    pub fn len(&self) -> usize {
        self.queue().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue().entries.is_empty()
    }

    /// Drop every pending continuation.
    pub fn clear(&self) {
        self.queue().entries.clear();
    }
}

impl Scheduler for TickScheduler {
    fn schedule(&mut self, delay_ticks: u64, continuation: Continuation) {
        let mut q = self.queue();
        let due = q.now.saturating_add(delay_ticks);
        let seq = q.next_seq;
        q.next_seq += 1;
        trace!(target: "flok", "continuation of {} due at tick {due}", continuation.script.name());
        q.entries.push((due, seq, continuation));
    }
}

// ── TokioScheduler ────────────────────────────────────────────────────────────

/// Scheduler backed by the tokio timer.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    tick: Duration,
    tx: mpsc::UnboundedSender<Continuation>,
}

impl TokioScheduler {
    /// A scheduler whose ticks last `tick`, plus the receiver on which due
    /// continuations arrive.
    pub fn new(tick: Duration) -> (Self, mpsc::UnboundedReceiver<Continuation>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (TokioScheduler { tick, tx }, rx)
    }

    pub fn tick(&self) -> Duration {
        self.tick
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&mut self, delay_ticks: u64, continuation: Continuation) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(
                target: "flok",
                "no async runtime; dropping continuation of {}",
                continuation.script.name()
            );
            return;
        };
        let delay = self.tick.saturating_mul(u32::try_from(delay_ticks).unwrap_or(u32::MAX));
        let tx = self.tx.clone();
        handle.spawn(async move {
            tokio::time::sleep(delay).await;
            // The receiver is gone only when the host is shutting down.
            let _ = tx.send(continuation);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{CompiledScript, Frame, Suspension};

    fn continuation(name: &str, delay_ticks: u64) -> Continuation {
        let script = Arc::new(CompiledScript::compile(name, "").unwrap());
        Continuation::new(script, Suspension { delay_ticks, pending: Vec::new() }, Frame::new(1))
    }

    fn names(cs: &[Continuation]) -> Vec<&str> {
        cs.iter().map(|c| c.script.name()).collect()
    }

    #[test]
    fn empty_scheduler() {
        let s = TickScheduler::new();
        assert!(s.is_empty());
        assert_eq!(s.next_due(), None);
        assert!(s.advance(100).is_empty());
    }

    #[test]
    fn advance_releases_only_due_continuations() {
        let mut s = TickScheduler::new();
        s.schedule(5, continuation("late", 5));
        s.schedule(1, continuation("early", 1));
        assert_eq!(s.len(), 2);
        assert_eq!(s.next_due(), Some(1));
        assert!(s.advance(0).is_empty());
        assert_eq!(names(&s.advance(1)), vec!["early"]);
        assert_eq!(s.next_due(), Some(4));
        assert!(s.advance(3).is_empty());
        assert_eq!(names(&s.advance(1)), vec!["late"]);
        assert!(s.is_empty());
        assert_eq!(s.now(), 5);
    }

    #[test]
    fn ties_keep_scheduling_order() {
        let mut s = TickScheduler::new();
        s.schedule(2, continuation("a", 2));
        s.schedule(1, continuation("b", 1));
        s.schedule(2, continuation("c", 2));
        assert_eq!(names(&s.advance(10)), vec!["b", "a", "c"]);
    }

    #[test]
    fn delay_is_relative_to_current_tick() {
        let mut s = TickScheduler::new();
        s.advance(10);
        s.schedule(3, continuation("x", 3));
        assert_eq!(s.next_due(), Some(3));
        assert!(s.advance(2).is_empty());
        assert_eq!(s.advance(1).len(), 1);
    }

    #[test]
    fn clones_share_the_queue() {
        let mut engine_side = TickScheduler::new();
        let host_side = engine_side.clone();
        engine_side.schedule(1, continuation("x", 1));
        assert_eq!(host_side.len(), 1);
        host_side.clear();
        assert!(engine_side.is_empty());
    }

    #[tokio::test]
    async fn tokio_scheduler_delivers_after_delay() {
        let (mut s, mut rx) = TokioScheduler::new(Duration::from_millis(1));
        s.schedule(2, continuation("later", 2));
        s.schedule(1, continuation("sooner", 1));
        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        let second = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        let mut got = vec![first.script.name().to_owned(), second.script.name().to_owned()];
        got.sort();
        assert_eq!(got, vec!["later", "sooner"]);
    }

    #[test]
    fn tokio_scheduler_without_runtime_drops() {
        let (mut s, mut rx) = TokioScheduler::new(Duration::from_millis(1));
        s.schedule(1, continuation("x", 1));
        assert!(rx.try_recv().is_err());
    }
}
