// crates/server/src/routes/stream.rs
//! The streaming endpoint: a long-lived SSE connection carrying one job's
//! ordered event sequence.
//!
//! Each SSE frame carries `id:` (the event's sequence number), `event:` (the
//! kind tag), and `data:` (the kind-specific JSON payload). The first frame
//! is a `retry:` reconnection hint; a browser `EventSource` then resumes
//! automatically by echoing the last received id in `Last-Event-ID`.
//! Non-browser clients can pass `?after=<seq>` instead.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tokio_stream::{Stream, StreamExt};

use jobtail_core::JobEvent;

use crate::error::ApiResult;
use crate::fanout;
use crate::state::AppState;

/// Query parameters for the streaming endpoint.
#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    /// Resume strictly after this sequence number (alternative to the
    /// `Last-Event-ID` header).
    pub after: Option<u64>,
}

/// GET /api/jobs/:id/events — SSE stream of a job's events.
///
/// Delivers the backlog after the resumption point, then live updates, in
/// strictly increasing sequence order with no gaps or duplicates. The stream
/// ends when the terminal event has been delivered. Unknown job ids get an
/// immediate 404 and no stream.
pub async fn stream_job_events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let last_seen = resume_point(&headers, query.after);
    let events = fanout::subscribe(&state, &id, last_seen).await?;

    let retry_hint = Event::default().retry(state.config.retry_hint);
    let stream = tokio_stream::once(Ok::<_, Infallible>(retry_hint))
        .chain(events.map(|event| Ok(sse_event(&event))));

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(state.config.keep_alive)
            .text("keep-alive"),
    ))
}

/// Resolve the resumption point: the `Last-Event-ID` header (sent by
/// auto-reconnecting clients) wins over the `after` query parameter; absent
/// both, stream from the beginning.
fn resume_point(headers: &HeaderMap, after: Option<u64>) -> u64 {
    headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .or(after)
        .unwrap_or(0)
}

/// Render one log entry as an SSE frame.
fn sse_event(event: &JobEvent) -> Event {
    Event::default()
        .id(event.seq.to_string())
        .event(event.kind().as_str())
        .data(event.payload.to_wire().to_string())
}

/// Build the streaming router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/jobs/{id}/events", get(stream_job_events))
}
