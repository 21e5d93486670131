//! Lifecycle event stream (SSE)
//!
//! Relays session lifecycle events to connected observers. Each client first
//! gets a `status` event with the current state and pairing code.

use axum::{
    Router,
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
};
use futures::stream::{self, Stream, StreamExt};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::BroadcastStream;

use crate::api::AppState;
use crate::session::LifecycleEvent;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/events", get(event_stream))
}

fn to_sse(event: &LifecycleEvent) -> Option<Event> {
    Event::default().event(event.name()).json_data(event).ok()
}

async fn event_stream(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.session.subscribe();
    let initial = Event::default()
        .event("status")
        .json_data(state.session.status())
        .ok();

    let updates = BroadcastStream::new(rx).filter_map(|result| async move {
        match result {
            Ok(event) => to_sse(&event),
            Err(e) => {
                tracing::warn!("SSE client lagging: {}", e);
                None
            }
        }
    });

    let stream = stream::iter(initial).chain(updates).map(Ok);
    Sse::new(stream).keep_alive(KeepAlive::default())
}
