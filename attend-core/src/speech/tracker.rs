//! Turn (pipeline) identity and validity.
//!
//! The tracker is the only mutable state shared between the capture thread
//! (which creates, confirms and invalidates turns) and the interaction
//! thread (which gates synthesis and playback on it). Every read and write
//! goes through one `parking_lot::Mutex`, so a state change made by one
//! thread is visible to the next lock holder on the other.

use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::Transition;

/// Opaque, strictly increasing turn identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineId(pub u64);

impl fmt::Display for PipelineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "turn-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    /// Speech end detected, not yet held long enough.
    Pending,
    /// End confirmed. Terminal: a later false end does not revoke it.
    Confirmed,
    /// Aborted from outside. Terminal.
    Cancelled,
    /// Speech resumed before the end was confirmed. Terminal.
    False,
}

impl PipelineState {
    pub fn is_valid(self) -> bool {
        matches!(self, Self::Pending | Self::Confirmed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pipeline {
    pub id: PipelineId,
    pub state: PipelineState,
    /// Capture offset of the frame that created the turn.
    pub created_at: Duration,
    /// Set once the turn's audio has been handed to STT, cleared when the
    /// interaction loop is done with it.
    pub processing: bool,
}

impl Pipeline {
    fn busy(&self) -> bool {
        self.state == PipelineState::Confirmed && self.processing
    }
}

/// Why a turn is being invalidated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationReason {
    /// Speech resumed. Leaves a confirmed turn untouched.
    FalseEnd,
    /// Explicit reset from outside. Cancels pending and confirmed turns.
    Aborted,
}

#[derive(Debug, Default)]
struct TrackerInner {
    current: Option<Pipeline>,
    next_id: u64,
}

#[derive(Debug, Default)]
pub struct PipelineTracker {
    inner: Mutex<TrackerInner>,
}

impl PipelineTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<Pipeline> {
        self.inner.lock().current
    }

    /// True iff a current turn exists and is Pending or Confirmed.
    pub fn is_valid(&self) -> bool {
        self.inner
            .lock()
            .current
            .is_some_and(|p| p.state.is_valid())
    }

    /// True iff `id` is still the current turn and is Pending or Confirmed.
    pub fn is_valid_for(&self, id: PipelineId) -> bool {
        self.state_of(id).is_some_and(PipelineState::is_valid)
    }

    pub fn is_confirmed(&self, id: PipelineId) -> bool {
        self.state_of(id) == Some(PipelineState::Confirmed)
    }

    /// State of `id`, or `None` once it has been superseded.
    pub fn state_of(&self, id: PipelineId) -> Option<PipelineState> {
        self.inner
            .lock()
            .current
            .filter(|p| p.id == id)
            .map(|p| p.state)
    }

    /// Apply the bookkeeping a state machine transition implies, under one
    /// lock acquisition. Returns the turn the transition touched.
    pub fn apply(&self, transition: &Transition, now: Duration) -> Option<PipelineId> {
        let mut inner = self.inner.lock();
        match transition {
            Transition::StartPotential => {
                Self::release_locked(&mut inner);
                None
            }
            Transition::EndPotential { .. } => Self::begin_locked(&mut inner, now),
            Transition::Ended => Self::confirm_locked(&mut inner),
            Transition::FalseEnd => {
                Self::invalidate_locked(&mut inner, InvalidationReason::FalseEnd)
            }
            Transition::Started | Transition::FalseStart => None,
        }
    }

    /// Create a new Pending turn. No-op (returns `None`) while a confirmed
    /// turn is still processing.
    pub fn begin(&self, now: Duration) -> Option<PipelineId> {
        Self::begin_locked(&mut self.inner.lock(), now)
    }

    /// Drop the current turn identity unless a confirmed turn is still
    /// processing. Returns whether anything was cleared.
    pub fn release(&self) -> bool {
        Self::release_locked(&mut self.inner.lock())
    }

    /// Pending → Confirmed. Returns the newly confirmed turn.
    pub fn confirm(&self) -> Option<PipelineId> {
        Self::confirm_locked(&mut self.inner.lock())
    }

    /// Mark the current turn False or Cancelled. Returns the affected turn.
    pub fn invalidate(&self, reason: InvalidationReason) -> Option<PipelineId> {
        Self::invalidate_locked(&mut self.inner.lock(), reason)
    }

    pub fn mark_processing(&self, id: PipelineId) -> bool {
        self.set_processing(id, true)
    }

    pub fn finish_processing(&self, id: PipelineId) -> bool {
        self.set_processing(id, false)
    }

    fn set_processing(&self, id: PipelineId, processing: bool) -> bool {
        let mut inner = self.inner.lock();
        match inner.current.as_mut() {
            Some(p) if p.id == id => {
                p.processing = processing;
                true
            }
            _ => false,
        }
    }

    fn begin_locked(inner: &mut TrackerInner, now: Duration) -> Option<PipelineId> {
        if let Some(current) = inner.current {
            if current.busy() {
                debug!(pipeline = %current.id, "confirmed turn still processing, not starting a new one");
                return None;
            }
        }
        let id = PipelineId(inner.next_id);
        inner.next_id += 1;
        inner.current = Some(Pipeline {
            id,
            state: PipelineState::Pending,
            created_at: now,
            processing: false,
        });
        debug!(pipeline = %id, "turn pending");
        Some(id)
    }

    fn release_locked(inner: &mut TrackerInner) -> bool {
        match inner.current {
            Some(current) if current.busy() => false,
            Some(_) => {
                inner.current = None;
                true
            }
            None => false,
        }
    }

    fn confirm_locked(inner: &mut TrackerInner) -> Option<PipelineId> {
        let current = inner.current.as_mut()?;
        if current.state != PipelineState::Pending {
            return None;
        }
        current.state = PipelineState::Confirmed;
        debug!(pipeline = %current.id, "turn confirmed");
        Some(current.id)
    }

    fn invalidate_locked(
        inner: &mut TrackerInner,
        reason: InvalidationReason,
    ) -> Option<PipelineId> {
        let current = inner.current.as_mut()?;
        let next = match (current.state, reason) {
            (PipelineState::Pending, InvalidationReason::FalseEnd) => PipelineState::False,
            (PipelineState::Pending | PipelineState::Confirmed, InvalidationReason::Aborted) => {
                PipelineState::Cancelled
            }
            _ => return None,
        };
        current.state = next;
        debug!(pipeline = %current.id, state = ?next, "turn invalidated");
        Some(current.id)
    }
}
