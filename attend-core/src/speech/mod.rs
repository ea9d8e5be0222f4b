//! Debounced speech state machine.
//!
//! Raw VAD boundaries are noisy, so a boundary only becomes a turn event once
//! it has held for a threshold measured on frame arrival:
//!
//! ```text
//!            start                 none ≥ start_threshold
//!   Idle ───────────▶ StartPotential ───────────────────▶ Started
//!    ▲                  │  ▲    │                           │  ▲
//!    │        end       │  └────┘ start (re-arm)       end  │  │ start
//!    └──────────────────┘                                   ▼  │ (FalseEnd)
//!    │   (FalseStart)                                   EndPotential
//!    │                                                      │
//!    └──────────────────────────────────────────────────────┘
//!                     none ≥ end_threshold (Ended)
//! ```
//!
//! [`SpeechStateMachine::step`] is a pure function of the current state, one
//! VAD decision and the frame's arrival time. Turn bookkeeping lives in
//! [`tracker::PipelineTracker`]; the capture loop applies both.

pub mod tracker;

use std::time::Duration;

use crate::vad::VadDecision;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpeechPhase {
    #[default]
    Idle,
    StartPotential,
    Started,
    EndPotential,
}

/// Bounds of one utterance, as capture offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeechSegment {
    pub start: Duration,
    /// `None` while speech is ongoing.
    pub end: Option<Duration>,
}

impl SpeechSegment {
    pub fn is_valid(&self) -> bool {
        self.end.map_or(true, |end| end >= self.start)
    }

    pub fn duration(&self) -> Option<Duration> {
        self.end.map(|end| end.saturating_sub(self.start))
    }
}

/// Externally visible result of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    StartPotential,
    Started,
    /// Carries the utterance bounds so the capture loop can extract audio.
    EndPotential { segment: SpeechSegment },
    Ended,
    FalseStart,
    FalseEnd,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeechThresholds {
    pub start: Duration,
    pub end: Duration,
}

impl SpeechThresholds {
    /// Negative or NaN seconds become zero; values too large for a
    /// `Duration` (including infinity) saturate to `Duration::MAX`.
    pub fn from_secs(start: f64, end: f64) -> Self {
        Self {
            start: secs(start),
            end: secs(end),
        }
    }
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(Duration::MAX)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeechStateMachine {
    phase: SpeechPhase,
    start_time: Option<Duration>,
    end_time: Option<Duration>,
    thresholds: SpeechThresholds,
}

impl SpeechStateMachine {
    pub fn new(thresholds: SpeechThresholds) -> Self {
        Self {
            phase: SpeechPhase::Idle,
            start_time: None,
            end_time: None,
            thresholds,
        }
    }

    pub fn phase(&self) -> SpeechPhase {
        self.phase
    }

    pub fn thresholds(&self) -> SpeechThresholds {
        self.thresholds
    }

    /// Current utterance bounds, if speech has started.
    pub fn segment(&self) -> Option<SpeechSegment> {
        self.start_time.map(|start| SpeechSegment {
            start,
            end: self.end_time,
        })
    }

    /// Compute the next state for `input` observed at `now`.
    ///
    /// A blip (`StartEnd`) acts as a start outside speech and as an end
    /// during confirmed speech; it is ignored while an end is pending.
    pub fn step(mut self, input: VadDecision, now: Duration) -> (Self, Option<Transition>) {
        use SpeechPhase::*;

        let transition = match (self.phase, input) {
            (Idle | StartPotential, d) if d.has_start() => {
                self.phase = StartPotential;
                self.start_time = Some(now);
                self.end_time = None;
                Some(Transition::StartPotential)
            }
            (StartPotential, VadDecision::NoChange) if self.held(self.start_time, self.thresholds.start, now) => {
                self.phase = Started;
                Some(Transition::Started)
            }
            (StartPotential, VadDecision::End { .. }) => {
                self.phase = Idle;
                self.start_time = None;
                Some(Transition::FalseStart)
            }
            (Started, d) if d.has_end() => {
                self.phase = EndPotential;
                self.end_time = Some(now);
                let start = self.start_time.unwrap_or(now);
                Some(Transition::EndPotential {
                    segment: SpeechSegment {
                        start,
                        end: Some(now),
                    },
                })
            }
            (EndPotential, VadDecision::NoChange) if self.held(self.end_time, self.thresholds.end, now) => {
                self.phase = Idle;
                self.start_time = None;
                self.end_time = None;
                Some(Transition::Ended)
            }
            (EndPotential, VadDecision::Start { .. }) => {
                self.phase = Started;
                self.end_time = None;
                Some(Transition::FalseEnd)
            }
            _ => None,
        };
        (self, transition)
    }

    /// In-place form of [`step`](Self::step).
    pub fn advance(&mut self, input: VadDecision, now: Duration) -> Option<Transition> {
        let (next, transition) = self.step(input, now);
        *self = next;
        transition
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.thresholds);
    }

    fn held(&self, since: Option<Duration>, threshold: Duration, now: Duration) -> bool {
        since.is_some_and(|t| now.saturating_sub(t) >= threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const START: VadDecision = VadDecision::Start { at: 0.0 };
    const END: VadDecision = VadDecision::End { at: 0.0 };
    const BLIP: VadDecision = VadDecision::StartEnd { start: 0.0, end: 0.0 };
    const NONE: VadDecision = VadDecision::NoChange;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn machine() -> SpeechStateMachine {
        SpeechStateMachine::new(SpeechThresholds::from_secs(0.25, 0.8))
    }

    #[test]
    fn out_of_range_thresholds_saturate() {
        let t = SpeechThresholds::from_secs(f64::INFINITY, f64::NAN);
        assert_eq!(t.start, Duration::MAX);
        assert_eq!(t.end, Duration::ZERO);

        let t = SpeechThresholds::from_secs(-1.0, f64::NEG_INFINITY);
        assert_eq!(t.start, Duration::ZERO);
        assert_eq!(t.end, Duration::ZERO);

        let mut m = SpeechStateMachine::new(SpeechThresholds::from_secs(f64::INFINITY, 0.8));
        assert_eq!(m.advance(START, ms(0)), Some(Transition::StartPotential));
        assert_eq!(m.advance(NONE, ms(60_000)), None);
    }

    fn run(m: &mut SpeechStateMachine, inputs: &[(VadDecision, u64)]) -> Vec<Transition> {
        inputs
            .iter()
            .filter_map(|&(d, t)| m.advance(d, ms(t)))
            .collect()
    }

    #[test]
    fn full_utterance_emits_four_transitions() {
        let mut m = machine();
        let seen = run(
            &mut m,
            &[
                (START, 0),
                (NONE, 100),
                (NONE, 300),
                (NONE, 400),
                (END, 1000),
                (NONE, 1500),
                (NONE, 1900),
                (NONE, 2000),
            ],
        );
        assert_eq!(
            seen,
            vec![
                Transition::StartPotential,
                Transition::Started,
                Transition::EndPotential {
                    segment: SpeechSegment {
                        start: ms(0),
                        end: Some(ms(1000)),
                    },
                },
                Transition::Ended,
            ]
        );
        assert_eq!(m.phase(), SpeechPhase::Idle);
        assert_eq!(m.segment(), None);
    }

    #[test]
    fn end_before_start_threshold_is_a_false_start() {
        let mut m = machine();
        let seen = run(&mut m, &[(START, 0), (NONE, 100), (END, 200)]);
        assert_eq!(seen, vec![Transition::StartPotential, Transition::FalseStart]);
        assert_eq!(m.phase(), SpeechPhase::Idle);
    }

    #[test]
    fn start_during_end_potential_is_a_false_end() {
        let mut m = machine();
        run(&mut m, &[(START, 0), (NONE, 300), (END, 1000)]);
        assert_eq!(m.phase(), SpeechPhase::EndPotential);

        assert_eq!(m.advance(START, ms(1200)), Some(Transition::FalseEnd));
        assert_eq!(m.phase(), SpeechPhase::Started);
        assert_eq!(
            m.segment(),
            Some(SpeechSegment {
                start: ms(0),
                end: None,
            })
        );
    }

    #[test]
    fn repeated_start_rearms_the_start_timer() {
        let mut m = machine();
        assert_eq!(m.advance(START, ms(0)), Some(Transition::StartPotential));
        assert_eq!(m.advance(START, ms(200)), Some(Transition::StartPotential));
        // 300ms after the first start, but only 100ms after the second.
        assert_eq!(m.advance(NONE, ms(300)), None);
        assert_eq!(m.advance(NONE, ms(450)), Some(Transition::Started));
    }

    #[test]
    fn blip_is_a_start_outside_speech() {
        let mut m = machine();
        assert_eq!(m.advance(BLIP, ms(0)), Some(Transition::StartPotential));
    }

    #[test]
    fn blip_is_an_end_during_speech_and_ignored_while_end_pending() {
        let mut m = machine();
        run(&mut m, &[(START, 0), (NONE, 300)]);
        assert!(matches!(
            m.advance(BLIP, ms(600)),
            Some(Transition::EndPotential { .. })
        ));
        assert_eq!(m.advance(BLIP, ms(700)), None);
        assert_eq!(m.phase(), SpeechPhase::EndPotential);
    }

    #[test]
    fn stray_boundaries_are_ignored() {
        let mut m = machine();
        assert_eq!(m.advance(END, ms(0)), None);
        run(&mut m, &[(START, 10), (NONE, 300)]);
        assert_eq!(m.advance(START, ms(400)), None);
        run(&mut m, &[(END, 500)]);
        assert_eq!(m.advance(END, ms(600)), None);
    }

    #[test]
    fn end_not_confirmed_before_threshold() {
        let mut m = machine();
        run(&mut m, &[(START, 0), (NONE, 300), (END, 1000)]);
        assert_eq!(m.advance(NONE, ms(1799)), None);
        assert_eq!(m.advance(NONE, ms(1800)), Some(Transition::Ended));
    }

    #[test]
    fn step_is_pure() {
        let m = machine();
        let (next, t) = m.step(START, ms(5));
        assert_eq!(t, Some(Transition::StartPotential));
        assert_eq!(m.phase(), SpeechPhase::Idle);
        assert_eq!(next.phase(), SpeechPhase::StartPotential);
    }

    #[test]
    fn segment_validity() {
        let open = SpeechSegment {
            start: ms(10),
            end: None,
        };
        assert!(open.is_valid());
        assert_eq!(open.duration(), None);
        let closed = SpeechSegment {
            start: ms(10),
            end: Some(ms(60)),
        };
        assert_eq!(closed.duration(), Some(ms(50)));
        let inverted = SpeechSegment {
            start: ms(60),
            end: Some(ms(10)),
        };
        assert!(!inverted.is_valid());
    }
}
