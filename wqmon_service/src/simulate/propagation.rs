//! Delayed contamination propagation through the distribution tree.
//!
//! A contamination event sits on one node. Once its trigger time arrives it
//! spreads to every direct child of that node, each child event triggering
//! one transit delay later, and keeps its own node polluted for a fixed
//! active window.
//!
//! Events move through three phases:
//!
//!   Pending     queued, trigger time not reached yet
//!   Propagated  triggered, children scheduled, node polluted
//!   Expired     active window elapsed, dropped from the working set
//!
//! Pending events live in a min-heap keyed by trigger time, so a step only
//! looks at events that are due. An event is popped from the heap exactly
//! once, which is what makes fan-out happen at most once per event.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;

use crate::model::Severity;
use crate::network::{Network, NodeIndex};

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventPhase {
    Pending,
    Propagated,
    Expired,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContaminationEvent {
    pub node: NodeIndex,
    pub trigger_at: DateTime<Utc>,
    pub severity: Severity,
    pub phase: EventPhase,
}

impl ContaminationEvent {
    /// First instant at which the event no longer pollutes its node.
    ///
    /// Saturates at the end of representable time.
    pub fn expires_at(&self, active_window: Duration) -> DateTime<Utc> {
        self.trigger_at
            .checked_add_signed(active_window)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

// Heap entry. `seq` breaks ties between events due at the same instant so
// they fire in scheduling order.
#[derive(Debug)]
struct Queued {
    seq: u64,
    event: ContaminationEvent,
}

impl Queued {
    fn key(&self) -> (DateTime<Utc>, u64) {
        (self.event.trigger_at, self.seq)
    }
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PropagationSettings {
    /// Chance per step that a random pump gets a fresh event.
    pub trigger_probability: f64,
    /// Delay between a node's event triggering and its children's.
    pub transit_delay: Duration,
    /// How long a triggered event keeps its node polluted.
    pub active_window: Duration,
}

/// What one `step` did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutcome {
    /// Spontaneous event created this step, if any.
    pub triggered: Option<ContaminationEvent>,
    /// Events that became due and fanned out to their children.
    pub propagated: Vec<ContaminationEvent>,
    /// Events whose active window elapsed.
    pub expired: Vec<ContaminationEvent>,
}

#[derive(Debug)]
pub struct PropagationEngine {
    settings: PropagationSettings,
    pending: BinaryHeap<Reverse<Queued>>,
    active: Vec<ContaminationEvent>,
    next_seq: u64,
}

impl PropagationEngine {
    pub fn new(settings: PropagationSettings) -> Self {
        Self { settings, pending: BinaryHeap::new(), active: Vec::new(), next_seq: 0 }
    }

    pub fn settings(&self) -> &PropagationSettings {
        &self.settings
    }

    /// Queues an event on `node`, due at `trigger_at`.
    pub fn schedule(&mut self, node: NodeIndex, severity: Severity, trigger_at: DateTime<Utc>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.push(Reverse(Queued {
            seq,
            event: ContaminationEvent { node, trigger_at, severity, phase: EventPhase::Pending },
        }));
    }

    /// Advances the engine to `now`.
    ///
    /// 1. With the configured probability, a uniformly chosen pump gets a new
    ///    event of random severity, due immediately.
    /// 2. Every pending event due at or before `now` is moved to the active
    ///    set and schedules one child event per direct child at
    ///    `now + transit_delay`. Children that would fall past the end of
    ///    representable time are never due and are not scheduled.
    /// 3. Active events whose window has elapsed are dropped.
    pub fn step<R: Rng + ?Sized>(
        &mut self,
        network: &Network,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> StepOutcome {
        let mut outcome = StepOutcome::default();

        let pumps = network.pumps();
        if !pumps.is_empty() && rng.random_bool(self.settings.trigger_probability) {
            let node = pumps[rng.random_range(0..pumps.len())];
            let severity = if rng.random_bool(0.5) { Severity::Red } else { Severity::Amber };
            self.schedule(node, severity, now);
            outcome.triggered = Some(ContaminationEvent {
                node,
                trigger_at: now,
                severity,
                phase: EventPhase::Pending,
            });
        }

        while self.pending.peek().is_some_and(|Reverse(q)| q.event.trigger_at <= now) {
            let Some(Reverse(Queued { mut event, .. })) = self.pending.pop() else { break };

            if let Some(child_at) = now.checked_add_signed(self.settings.transit_delay) {
                for &child in network.children(event.node) {
                    self.schedule(child, event.severity, child_at);
                }
            }

            event.phase = EventPhase::Propagated;
            outcome.propagated.push(event.clone());
            self.active.push(event);
        }

        let window = self.settings.active_window;
        let (expired, still_active): (Vec<_>, Vec<_>) = self
            .active
            .drain(..)
            .partition(|e| e.expires_at(window) <= now);
        self.active = still_active;
        outcome.expired = expired
            .into_iter()
            .map(|mut e| {
                e.phase = EventPhase::Expired;
                e
            })
            .collect();

        outcome
    }

    /// Worst contamination currently polluting `node`.
    pub fn contamination(&self, node: NodeIndex) -> Option<Severity> {
        self.active.iter().filter(|e| e.node == node).map(|e| e.severity).max()
    }

    /// Events currently polluting their nodes.
    pub fn active_events(&self) -> &[ContaminationEvent] {
        &self.active
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Trigger time of the next pending event.
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.pending.peek().map(|Reverse(q)| q.event.trigger_at)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
