//! `GET /api/events?role=...`: одно событие `changed` без данных на каждое изменение

use super::{AppState, Org};
use crate::model::Role;
use crate::notifier::CHANGED_EVENT;
use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;
use tracing::{debug, warn};

const KEEP_ALIVE: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
pub(super) struct EventsQuery {
    role: Option<Role>,
}

pub(super) async fn stream(
    State(state): State<AppState>,
    Org(org): Org,
    Query(query): Query<EventsQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let role = query.role.unwrap_or(Role::Operator);
    let rx = state.hub.notifier().subscribe(&org, role);
    debug!(%org, %role, "sse subscriber connected");

    let events = BroadcastStream::new(rx).map(move |item| {
        if let Err(e) = item {
            // пропущенные события всё равно означают «изменилось»
            warn!(%role, error = %e, "sse subscriber lagged");
        }
        Ok(Event::default().event(CHANGED_EVENT).data(""))
    });

    Sse::new(events).keep_alive(KeepAlive::new().interval(KEEP_ALIVE).text("keep-alive"))
}
