use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::phase::VisibleStatus,
    services::{
        ability_service::{CastOutcome, RequestResolution},
        lifecycle_service::TransitionOutcome,
        vote_service::{BallotReceipt, VoteResolution},
    },
    state::{
        abilities::AbilityName,
        vote::{BallotStatus, VoteChoice},
    },
};

/// Answer for the round the participant is looking at.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct SubmitAnswerRequest {
    pub round_index: u32,
    pub choice: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AnswerResponse {
    /// False when an answer already existed or the round had moved on.
    pub recorded: bool,
}

/// Ability cast. Supplying `request_id` makes retries idempotent.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct AbilityCastRequest {
    #[serde(default)]
    pub request_id: Option<Uuid>,
    pub ability: AbilityName,
    #[serde(default)]
    #[validate(length(max = 16))]
    pub targets: Vec<Uuid>,
}

/// What the submitting client learns about its cast.
#[derive(Debug, Clone, Copy, Serialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AbilityStatus {
    /// Effect applied and MP charged.
    Applied,
    /// Dropped without effect or cost; see the targeted notice.
    Rejected,
    /// Same request id seen before; nothing new was queued.
    Duplicate,
    /// Consumed by another resolver before this handler got to it.
    Processed,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AbilityResponse {
    pub request_id: Uuid,
    pub status: AbilityStatus,
    pub message: Option<String>,
}

impl From<CastOutcome> for AbilityResponse {
    fn from(outcome: CastOutcome) -> Self {
        let (status, message) = match outcome.resolution {
            _ if outcome.duplicate => (AbilityStatus::Duplicate, None),
            RequestResolution::Applied { log } => (AbilityStatus::Applied, Some(log)),
            RequestResolution::Rejected(rejection) => {
                (AbilityStatus::Rejected, Some(rejection.to_string()))
            }
            RequestResolution::Gone => (AbilityStatus::Processed, None),
        };
        Self {
            request_id: outcome.request_id,
            status,
            message,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct VoteRequest {
    pub choice: VoteChoice,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct VoteResponse {
    pub vote_id: Uuid,
    pub status: BallotStatus,
    pub votes_for: usize,
    pub votes_against: usize,
    pub eligible_voter_count: u32,
}

impl From<BallotReceipt> for VoteResponse {
    fn from(receipt: BallotReceipt) -> Self {
        Self {
            vote_id: receipt.vote.id,
            status: receipt.status,
            votes_for: receipt.vote.votes_for.len(),
            votes_against: receipt.vote.votes_against.len(),
            eligible_voter_count: receipt.vote.eligible_voter_count,
        }
    }
}

/// Round grace timer fired on a client.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct RoundTimerRequest {
    pub round_index: u32,
}

/// Vote deadline timer fired on a client.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct VoteTimerRequest {
    pub vote_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct VoteTimerResponse {
    pub resolution: VoteResolution,
}

/// Optional guard on host transitions: the round the host is looking at.
/// When it no longer matches, the transition is reported as not applied.
#[derive(Debug, Default, Deserialize, ToSchema, Validate)]
pub struct HostActionRequest {
    #[serde(default)]
    pub round_index: Option<u32>,
}

/// Result of a lifecycle transition.
#[derive(Debug, Serialize, ToSchema)]
pub struct TransitionResponse {
    /// False when someone else already performed the transition.
    pub applied: bool,
    pub status: VisibleStatus,
    pub round_index: u32,
}

impl From<TransitionOutcome> for TransitionResponse {
    fn from(outcome: TransitionOutcome) -> Self {
        Self {
            applied: outcome.applied,
            status: VisibleStatus::from(&outcome.session),
            round_index: outcome.session.round_index,
        }
    }
}
