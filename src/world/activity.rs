//! The activity tracker (C4): counts in-flight orchestrator turns per world and emits
//! `response-start` / `response-end` / `idle` on the `world` channel.
//!
//! Grounded on the bookend pattern in the teacher's `agent.rs::send()`
//! (`SendStarted`/`SendCompleted` always emitted in pairs around the LLM round-trip),
//! generalized into a counter with RAII cleanup so the "finally-style discipline"
//! §7 requires falls out of `Drop` rather than manual bookkeeping at every return site.

use crate::world::bus::{ActivityEventType, EventBus, WorldActivityEvent, WorldChannelEvent};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

pub struct ActivityTracker {
    bus: Arc<EventBus>,
    pending: AtomicUsize,
    activity_id: AtomicU64,
    active_sources: StdMutex<HashSet<String>>,
}

impl ActivityTracker {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            pending: AtomicUsize::new(0),
            activity_id: AtomicU64::new(0),
            active_sources: StdMutex::new(HashSet::new()),
        }
    }

    pub fn is_processing(&self) -> bool {
        self.pending.load(Ordering::SeqCst) > 0
    }

    /// Begin one unit of in-flight work, returning a guard whose `Drop` calls `end`.
    /// Bumps `activity_id` only when the counter transitions 0 -> 1, so the id is
    /// stable for every event in the current busy period.
    pub async fn begin(self: &Arc<Self>, source: impl Into<String>) -> ActivityGuard {
        let source = source.into();
        let previous = self.pending.fetch_add(1, Ordering::SeqCst);
        if previous == 0 {
            self.activity_id.fetch_add(1, Ordering::SeqCst);
        }
        self.active_sources.lock().unwrap().insert(source.clone());

        let event = self.snapshot_event(ActivityEventType::ResponseStart, Some(source.clone()));
        self.bus.emit_world(WorldChannelEvent::Activity(event)).await;

        ActivityGuard {
            tracker: self.clone(),
            source: Some(source),
            ended: false,
        }
    }

    /// Decrement the counter synchronously (so `is_processing()` reflects the end of
    /// the turn immediately) and return the event to emit. Called from
    /// `ActivityGuard::drop` and `ActivityGuard::end` (the latter for callers that can
    /// await the emission directly instead of relying on the spawned fallback).
    fn end_sync(&self, source: Option<String>) -> WorldActivityEvent {
        if let Some(src) = &source {
            self.active_sources.lock().unwrap().remove(src);
        }
        let previous = self.pending.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "activity counter underflow");

        let remaining = previous.saturating_sub(1);
        let event_type = if remaining > 0 {
            ActivityEventType::ResponseEnd
        } else {
            ActivityEventType::Idle
        };
        self.snapshot_event(event_type, source)
    }

    fn snapshot_event(&self, event_type: ActivityEventType, source: Option<String>) -> WorldActivityEvent {
        WorldActivityEvent {
            event_type,
            pending_operations: self.pending.load(Ordering::SeqCst),
            activity_id: self.activity_id.load(Ordering::SeqCst),
            timestamp: Utc::now(),
            source,
            active_sources: self.active_sources.lock().unwrap().iter().cloned().collect(),
        }
    }
}

/// RAII handle returned by [`ActivityTracker::begin`].
///
/// The counter decrement happens synchronously (so `is_processing()` is accurate the
/// instant the guard is dropped); emitting the `response-end`/`idle` event requires an
/// `.await`, so callers that can should call [`ActivityGuard::end`] explicitly before
/// dropping. If the guard is dropped without an explicit `end()` (an early `?` return,
/// cancellation, or panic unwind), `Drop` decrements the counter immediately and
/// spawns a task to emit the event, preserving the "finally-style discipline" §7
/// requires without making `Drop` itself `async`.
pub struct ActivityGuard {
    tracker: Arc<ActivityTracker>,
    source: Option<String>,
    ended: bool,
}

impl ActivityGuard {
    pub async fn end(mut self) {
        let event = self.tracker.end_sync(self.source.take());
        self.ended = true;
        self.tracker.bus.emit_world(WorldChannelEvent::Activity(event)).await;
    }
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        if self.ended {
            return;
        }
        let event = self.tracker.end_sync(self.source.take());
        let bus = self.tracker.bus.clone();
        tokio::spawn(async move {
            bus.emit_world(WorldChannelEvent::Activity(event)).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counter_is_zero_when_idle() {
        let bus = Arc::new(EventBus::new());
        let tracker = Arc::new(ActivityTracker::new(bus));
        assert!(!tracker.is_processing());
    }

    #[tokio::test]
    async fn begin_sets_processing_true() {
        let bus = Arc::new(EventBus::new());
        let tracker = Arc::new(ActivityTracker::new(bus));
        let guard = tracker.begin("agent-1").await;
        assert!(tracker.is_processing());
        guard.end().await;
        assert!(!tracker.is_processing());
    }

    #[tokio::test]
    async fn drop_without_explicit_end_still_decrements() {
        let bus = Arc::new(EventBus::new());
        let tracker = Arc::new(ActivityTracker::new(bus));
        let guard = tracker.begin("agent-1").await;
        drop(guard);
        assert!(!tracker.is_processing());
    }

    #[tokio::test]
    async fn activity_id_stable_across_one_busy_period() {
        let bus = Arc::new(EventBus::new());
        let tracker = Arc::new(ActivityTracker::new(bus));
        let g1 = tracker.begin("a").await;
        let id_after_first_begin = tracker.activity_id.load(Ordering::SeqCst);
        let g2 = tracker.begin("b").await;
        let id_after_second_begin = tracker.activity_id.load(Ordering::SeqCst);
        assert_eq!(id_after_first_begin, id_after_second_begin);
        drop(g1);
        drop(g2);
    }
}
