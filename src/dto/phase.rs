use serde::Serialize;
use utoipa::ToSchema;

use crate::state::{
    session::{ArchiveState, SessionRecord},
    state_machine::EncounterStatus,
};

/// Encounter status exposed to clients (REST/SSE). `Ended` is split by archive
/// progress so clients know when the summary can be fetched.
#[derive(Debug, Serialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VisibleStatus {
    /// Participants are joining.
    Waiting,
    /// A round is being played.
    InProgress,
    /// Grace window after the host closed the round.
    RoundEnding,
    /// Round results on display.
    ShowingResults,
    /// Over, summary not written yet.
    Archiving,
    /// Over and archived.
    Archived,
}

impl From<&SessionRecord> for VisibleStatus {
    fn from(session: &SessionRecord) -> Self {
        match session.status {
            EncounterStatus::Waiting => VisibleStatus::Waiting,
            EncounterStatus::InProgress => VisibleStatus::InProgress,
            EncounterStatus::RoundEnding => VisibleStatus::RoundEnding,
            EncounterStatus::ShowingResults => VisibleStatus::ShowingResults,
            EncounterStatus::Ended => match session.archive {
                Some(ArchiveState::Archived) => VisibleStatus::Archived,
                _ => VisibleStatus::Archiving,
            },
        }
    }
}
