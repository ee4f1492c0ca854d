use super::{AppState, Org};
use crate::model::{DisplayAggregateState, DisplayContent, PresentationSettings};
use axum::{extract::State, Json};

pub(super) async fn get_aggregate(
    State(state): State<AppState>,
    Org(org): Org,
) -> Json<DisplayAggregateState> {
    Json(state.hub.aggregate(&org))
}

pub(super) async fn put_content(
    State(state): State<AppState>,
    Org(org): Org,
    Json(content): Json<DisplayContent>,
) -> Json<DisplayAggregateState> {
    Json(state.hub.set_content(&org, content))
}

pub(super) async fn put_settings(
    State(state): State<AppState>,
    Org(org): Org,
    Json(settings): Json<PresentationSettings>,
) -> Json<DisplayAggregateState> {
    Json(state.hub.set_settings(&org, settings))
}
