use super::{ApiError, AppState, Org};
use crate::model::{AnswerSubmission, SessionDescription, SdpType, SignalingRecord};
use axum::{extract::State, Json};

pub(super) async fn get_record(State(state): State<AppState>, Org(org): Org) -> Json<SignalingRecord> {
    Json(state.hub.record(&org))
}

pub(super) async fn put_offer(
    State(state): State<AppState>,
    Org(org): Org,
    Json(offer): Json<SessionDescription>,
) -> Result<Json<SignalingRecord>, ApiError> {
    if offer.kind != SdpType::Offer {
        return Err(ApiError::Unprocessable("expected an offer"));
    }
    Ok(Json(state.hub.put_offer(&org, offer)))
}

pub(super) async fn put_answer(
    State(state): State<AppState>,
    Org(org): Org,
    Json(submission): Json<AnswerSubmission>,
) -> Result<Json<SignalingRecord>, ApiError> {
    if submission.offer.kind != SdpType::Offer {
        return Err(ApiError::Unprocessable("submission must reference an offer"));
    }
    if submission.answer.kind != SdpType::Answer {
        return Err(ApiError::Unprocessable("expected an answer"));
    }
    Ok(Json(state.hub.put_answer(&org, submission)?))
}

// тело запроса игнорируется
pub(super) async fn clear(State(state): State<AppState>, Org(org): Org) -> Json<SignalingRecord> {
    Json(state.hub.clear(&org))
}
