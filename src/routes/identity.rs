use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::error::AppError;

/// Header carrying the caller identity issued by the identity provider.
pub const PARTICIPANT_HEADER: &str = "x-participant-id";

/// Caller identity read from [`PARTICIPANT_HEADER`]. Handlers taking it reject
/// requests without a well-formed header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParticipantId(pub Uuid);

impl<S> FromRequestParts<S> for ParticipantId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let provided = parts
            .headers
            .get(PARTICIPANT_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| {
                AppError::Unauthorized("missing identity header `X-Participant-Id`".into())
            })?;

        Uuid::parse_str(provided.trim())
            .map(ParticipantId)
            .map_err(|_| AppError::Unauthorized("malformed identity header".into()))
    }
}
