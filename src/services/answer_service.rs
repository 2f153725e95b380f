use tracing::debug;
use uuid::Uuid;

use crate::{
    dao::document_store::keys,
    dto::actions::SubmitAnswerRequest,
    error::ServiceError,
    services::records::{load_session, require_participant},
    state::{SharedState, session::AnswerSubmission},
};

/// Record a participant's answer for a round. Late answers and second answers
/// for the same round are ignored; the return value says whether this call
/// recorded anything.
pub async fn submit_answer(
    state: &SharedState,
    encounter_id: Uuid,
    participant_id: Uuid,
    request: SubmitAnswerRequest,
) -> Result<bool, ServiceError> {
    let now = state.now();
    let recorded = state
        .documents()
        .run_transaction(|tx| -> Result<_, ServiceError> {
            let session = load_session(tx, encounter_id)?;
            require_participant(&session, participant_id)?;
            if session.is_fallen(&participant_id) {
                return Err(ServiceError::InvalidState(
                    "fallen participants cannot answer".into(),
                ));
            }
            if request.round_index != session.round_index || !session.accepts_round_input() {
                return Ok(false);
            }
            let Some(question) = session.current_question() else {
                return Ok(false);
            };
            if request.choice >= question.choices.len() {
                return Err(ServiceError::InvalidInput(format!(
                    "choice {} does not exist",
                    request.choice
                )));
            }
            if session.removed_answer_choices.contains(&request.choice) {
                return Err(ServiceError::InvalidInput(format!(
                    "choice {} was removed this round",
                    request.choice
                )));
            }

            let key = keys::answer(encounter_id, session.round_index, participant_id);
            if tx.get::<AnswerSubmission>(&key)?.is_some() {
                return Ok(false);
            }
            tx.set(
                key,
                AnswerSubmission {
                    participant_id,
                    round_index: session.round_index,
                    choice: request.choice,
                    submitted_at: now,
                },
            );
            Ok(true)
        })
        .await?;

    debug!(
        %encounter_id,
        %participant_id,
        round_index = request.round_index,
        recorded,
        "answer submitted"
    );
    Ok(recorded)
}
