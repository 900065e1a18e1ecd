use axum::{
    extract::{Path, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
};
use futures::stream::{self, Stream, StreamExt};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};

use super::ApiError;
use crate::{
    metrics::SSE_CONNECTIONS_ACTIVE,
    models::session::{SessionEvent, SessionSnapshot},
    services::AppState,
};

/// SSE endpoint for session state changes
/// GET /api/v1/sessions/{id}/stream
///
/// Starts with a `snapshot` event carrying the full session, then relays
/// every `SessionEvent` until the session ends or the client leaves.
pub async fn session_stream(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    tracing::info!("Client connected to SSE stream: session={}", session_id);

    let session = state.sessions.get(&session_id).await?;
    let (snapshot, receiver) = {
        let guard = session.lock().await;
        (guard.snapshot(), guard.subscribe())
    };
    // the registry entry stays alive while the session exists; once it is
    // removed every sender is dropped and the stream closes
    drop(session);

    let stream = create_event_stream(session_id, snapshot, receiver);
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

struct StreamState {
    session_id: String,
    snapshot: Option<SessionSnapshot>,
    receiver: broadcast::Receiver<SessionEvent>,
    _guard: ConnectionGuard,
}

/// Keeps the active-connections gauge in step with stream lifetime.
struct ConnectionGuard;

impl ConnectionGuard {
    fn new() -> Self {
        SSE_CONNECTIONS_ACTIVE.inc();
        ConnectionGuard
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        SSE_CONNECTIONS_ACTIVE.dec();
    }
}

/// One SSE message before it is encoded.
#[derive(Debug, PartialEq)]
struct Frame {
    event: &'static str,
    data: String,
}

impl From<Frame> for Event {
    fn from(frame: Frame) -> Self {
        Event::default().event(frame.event).data(frame.data)
    }
}

fn create_event_stream(
    session_id: String,
    snapshot: SessionSnapshot,
    receiver: broadcast::Receiver<SessionEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    frame_stream(session_id, snapshot, receiver).map(|frame| Ok(Event::from(frame)))
}

fn frame_stream(
    session_id: String,
    snapshot: SessionSnapshot,
    receiver: broadcast::Receiver<SessionEvent>,
) -> impl Stream<Item = Frame> {
    let initial = StreamState {
        session_id,
        snapshot: Some(snapshot),
        receiver,
        _guard: ConnectionGuard::new(),
    };

    stream::unfold(initial, |mut st| async move {
        if let Some(snapshot) = st.snapshot.take() {
            let data = serde_json::to_string(&snapshot).unwrap_or_else(|_| "{}".to_string());
            return Some((Frame { event: "snapshot", data }, st));
        }

        match st.receiver.recv().await {
            Ok(session_event) => {
                let frame = Frame {
                    event: session_event.event_name(),
                    data: session_event.to_sse_data(),
                };
                Some((frame, st))
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(
                    "SSE client lagged behind: session={}, skipped={}",
                    st.session_id,
                    skipped
                );
                let frame = Frame {
                    event: "lagged",
                    data: json!({ "skipped": skipped }).to_string(),
                };
                Some((frame, st))
            }
            Err(RecvError::Closed) => {
                tracing::info!("SSE stream closed: session={}", st.session_id);
                None
            }
        }
    })
}
