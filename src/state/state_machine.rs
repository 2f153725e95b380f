use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle status stored in the Session Record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EncounterStatus {
    /// Participants are joining; no round has started.
    Waiting,
    /// A round is being played.
    InProgress,
    /// The host closed the round; the grace window is open.
    RoundEnding,
    /// Round damage has been resolved and is on display.
    ShowingResults,
    /// The encounter is over.
    Ended,
}

impl EncounterStatus {
    /// Position of the status inside one round cycle.
    fn ordinal(self) -> u8 {
        match self {
            EncounterStatus::Waiting => 0,
            EncounterStatus::InProgress => 1,
            EncounterStatus::RoundEnding => 2,
            EncounterStatus::ShowingResults => 3,
            EncounterStatus::Ended => 4,
        }
    }
}

/// Events that can be applied to the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// Host starts round 0.
    Start,
    /// Host closes the current round and opens the grace window.
    EndRound,
    /// The grace window deadline passed.
    ExpireRound,
    /// A vote decided to skip the rest of the round.
    SkipRound,
    /// Host moves on to the next round.
    Advance,
    /// Host ends the encounter.
    Finalize,
}

/// Error returned when an event cannot apply to the current status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?} (round {round_index})")]
pub struct InvalidTransition {
    /// Status the record was in.
    pub from: EncounterStatus,
    /// Round the record was in.
    pub round_index: u32,
    /// Rejected event.
    pub event: LifecycleEvent,
}

/// Reasons a transition cannot be planned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// Another actor already moved the record past this event.
    Stale {
        /// Status found in the record.
        status: EncounterStatus,
        /// Round found in the record.
        round_index: u32,
    },
    /// The event is not legal from the current position.
    InvalidTransition(InvalidTransition),
}

/// A validated transition ready to be written inside the same transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    /// Status the record is in.
    pub from: EncounterStatus,
    /// Status the record moves to.
    pub to: EncounterStatus,
    /// Event being applied.
    pub event: LifecycleEvent,
    /// Round index after the transition.
    pub round_index: u32,
}

/// Position of a record in the encounter timeline. `Ended` sorts after
/// everything regardless of the round.
fn position(status: EncounterStatus, round_index: u32) -> (u32, u8) {
    match status {
        EncounterStatus::Ended => (u32::MAX, status.ordinal()),
        other => (round_index, other.ordinal()),
    }
}

/// Plan `event` for the round the caller believes is current.
///
/// The record decides: when it already sits at or beyond the event's
/// destination the caller lost a race and gets [`PlanError::Stale`]; when the
/// event cannot be reached from here it gets [`PlanError::InvalidTransition`].
pub fn plan(
    status: EncounterStatus,
    round_index: u32,
    event: LifecycleEvent,
    expected_round: u32,
) -> Result<Plan, PlanError> {
    let invalid = || {
        PlanError::InvalidTransition(InvalidTransition {
            from: status,
            round_index,
            event,
        })
    };

    let destination = destination(event, expected_round);
    if position(status, round_index) >= destination {
        return Err(PlanError::Stale {
            status,
            round_index,
        });
    }

    if round_index != expected_round {
        return Err(invalid());
    }

    let to = compute_transition(status, event).ok_or_else(invalid)?;
    let round_index = match event {
        LifecycleEvent::Advance => round_index + 1,
        _ => round_index,
    };

    Ok(Plan {
        from: status,
        to,
        event,
        round_index,
    })
}

/// Timeline position an event leads to.
fn destination(event: LifecycleEvent, round: u32) -> (u32, u8) {
    match event {
        LifecycleEvent::Start => position(EncounterStatus::InProgress, 0),
        LifecycleEvent::EndRound => position(EncounterStatus::RoundEnding, round),
        LifecycleEvent::ExpireRound | LifecycleEvent::SkipRound => {
            position(EncounterStatus::ShowingResults, round)
        }
        LifecycleEvent::Advance => position(EncounterStatus::InProgress, round.saturating_add(1)),
        LifecycleEvent::Finalize => position(EncounterStatus::Ended, round),
    }
}

/// Transition table.
fn compute_transition(status: EncounterStatus, event: LifecycleEvent) -> Option<EncounterStatus> {
    let next = match (status, event) {
        (EncounterStatus::Waiting, LifecycleEvent::Start) => EncounterStatus::InProgress,
        (EncounterStatus::InProgress, LifecycleEvent::EndRound) => EncounterStatus::RoundEnding,
        (EncounterStatus::RoundEnding, LifecycleEvent::ExpireRound) => {
            EncounterStatus::ShowingResults
        }
        (
            EncounterStatus::InProgress | EncounterStatus::RoundEnding,
            LifecycleEvent::SkipRound,
        ) => EncounterStatus::ShowingResults,
        (EncounterStatus::ShowingResults, LifecycleEvent::Advance) => EncounterStatus::InProgress,
        (from, LifecycleEvent::Finalize) if from != EncounterStatus::Ended => {
            EncounterStatus::Ended
        }
        _ => return None,
    };
    Some(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(status: &mut EncounterStatus, round: &mut u32, event: LifecycleEvent) {
        let plan = plan(*status, *round, event, *round).unwrap();
        *status = plan.to;
        *round = plan.round_index;
    }

    #[test]
    fn full_happy_path_through_two_rounds() {
        let mut status = EncounterStatus::Waiting;
        let mut round = 0;

        apply(&mut status, &mut round, LifecycleEvent::Start);
        assert_eq!(status, EncounterStatus::InProgress);
        apply(&mut status, &mut round, LifecycleEvent::EndRound);
        assert_eq!(status, EncounterStatus::RoundEnding);
        apply(&mut status, &mut round, LifecycleEvent::ExpireRound);
        assert_eq!(status, EncounterStatus::ShowingResults);
        apply(&mut status, &mut round, LifecycleEvent::Advance);
        assert_eq!((status, round), (EncounterStatus::InProgress, 1));
        apply(&mut status, &mut round, LifecycleEvent::SkipRound);
        assert_eq!(status, EncounterStatus::ShowingResults);
        apply(&mut status, &mut round, LifecycleEvent::Finalize);
        assert_eq!(status, EncounterStatus::Ended);
    }

    #[test]
    fn duplicate_expiry_is_stale() {
        let err = plan(
            EncounterStatus::ShowingResults,
            2,
            LifecycleEvent::ExpireRound,
            2,
        )
        .unwrap_err();
        assert_eq!(
            err,
            PlanError::Stale {
                status: EncounterStatus::ShowingResults,
                round_index: 2
            }
        );
    }

    #[test]
    fn expiry_for_an_older_round_is_stale() {
        let err = plan(EncounterStatus::RoundEnding, 3, LifecycleEvent::ExpireRound, 2).unwrap_err();
        assert!(matches!(err, PlanError::Stale { .. }));
    }

    #[test]
    fn duplicate_advance_is_stale() {
        let err = plan(EncounterStatus::InProgress, 1, LifecycleEvent::Advance, 0).unwrap_err();
        assert!(matches!(err, PlanError::Stale { .. }));
    }

    #[test]
    fn skip_after_host_ended_round_still_applies() {
        let plan = plan(EncounterStatus::RoundEnding, 0, LifecycleEvent::SkipRound, 0).unwrap();
        assert_eq!(plan.to, EncounterStatus::ShowingResults);
    }

    #[test]
    fn ending_a_round_before_start_is_invalid() {
        let err = plan(EncounterStatus::Waiting, 0, LifecycleEvent::EndRound, 0).unwrap_err();
        match err {
            PlanError::InvalidTransition(invalid) => {
                assert_eq!(invalid.from, EncounterStatus::Waiting);
                assert_eq!(invalid.event, LifecycleEvent::EndRound);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn future_round_is_invalid() {
        let err = plan(EncounterStatus::InProgress, 0, LifecycleEvent::EndRound, 4).unwrap_err();
        assert!(matches!(err, PlanError::InvalidTransition(_)));
    }

    #[test]
    fn finalize_is_stale_once_ended() {
        let err = plan(EncounterStatus::Ended, 5, LifecycleEvent::Finalize, 0).unwrap_err();
        assert!(matches!(err, PlanError::Stale { .. }));
        let ok = plan(EncounterStatus::InProgress, 5, LifecycleEvent::Finalize, 5).unwrap();
        assert_eq!(ok.to, EncounterStatus::Ended);
    }

    #[test]
    fn every_status_is_stale_for_events_after_end() {
        let err = plan(EncounterStatus::Ended, 0, LifecycleEvent::Start, 0).unwrap_err();
        assert!(matches!(err, PlanError::Stale { .. }));
    }
}
