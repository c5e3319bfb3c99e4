//! Server-sent-event stream
//!
//! `GET /events?session_id=...` hands each UI connection a live
//! subscription to the session's broadcaster topic. Each wire event's
//! `event:` field carries the ProgressEvent variant name and `data:` the
//! JSON payload. A reconnecting client starts fresh.

use std::collections::HashMap;
use std::convert::Infallible;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::debug;

use crate::state::SharedState;

/// `GET /events`
pub async fn events(
    State(state): State<SharedState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, StatusCode> {
    let Some(session_id) = params.get("session_id").cloned() else {
        return Err(StatusCode::BAD_REQUEST);
    };

    debug!(session = session_id, "sse subscriber connected");
    let receiver = state.broadcaster.subscribe(&session_id);

    let stream = BroadcastStream::new(receiver).filter_map(|item| match item {
        Ok(event) => {
            let wire = Event::default().event(event.event_type());
            match wire.json_data(&event) {
                Ok(ready) => Some(Ok(ready)),
                Err(_) => None,
            }
        }
        // A lagging consumer lost its oldest events; the stream carries on
        Err(BroadcastStreamRecvError::Lagged(missed)) => {
            debug!(missed, "sse subscriber lagged");
            None
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
