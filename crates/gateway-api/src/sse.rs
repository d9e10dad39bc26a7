//! Server-Sent Events push stream.
//!
//! `GET /api/events` opens a session on the gateway and streams its
//! events. The first event is always `connected`, carrying the session id
//! the browser passes back on subscribe/unsubscribe. When the client goes
//! away the response stream is dropped, and with it the [`SessionGuard`]
//! that closes the session.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, KeepAliveStream, Sse};
use futures::Stream;
use gateway_core::gateway::Gateway;
use gateway_types::{PushEvent, SessionId};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use crate::state::AppState;

type EventStream = Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>>;

/// Closes a gateway session when dropped.
#[derive(Debug)]
pub struct SessionGuard {
    gateway: Arc<Gateway>,
    session_id: SessionId,
}

impl SessionGuard {
    /// Guard `session_id` on `gateway`.
    pub const fn new(gateway: Arc<Gateway>, session_id: SessionId) -> Self {
        Self {
            gateway,
            session_id,
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        info!(session_id = %self.session_id, "SSE client disconnected");
        self.gateway.close_session(self.session_id);
    }
}

/// A session's event stream that owns the session's [`SessionGuard`].
pub struct SessionStream {
    inner: EventStream,
    guard: SessionGuard,
}

impl Stream for SessionStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl core::fmt::Debug for SessionStream {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SessionStream")
            .field("guard", &self.guard)
            .finish_non_exhaustive()
    }
}

/// Convert a push event into an SSE frame.
pub fn to_sse_event(event: &PushEvent) -> Event {
    let data = event.to_json().unwrap_or_else(|e| {
        warn!(event = event.event_name(), error = %e, "Failed to serialize push event");
        String::from("{}")
    });
    Event::default().event(event.event_name()).data(data)
}

/// Open a push session and stream its events.
pub async fn events(State(state): State<Arc<AppState>>) -> Sse<KeepAliveStream<SessionStream>> {
    let opened = state.gateway.open_session();
    let session_id = opened.session_id;
    info!(session_id = %session_id, "SSE client connected");

    let connected = PushEvent::Connected(opened.connected);
    let stream = tokio_stream::once(connected)
        .chain(ReceiverStream::new(opened.events))
        .map(|event| Ok(to_sse_event(&event)));

    let stream = SessionStream {
        inner: Box::pin(stream),
        guard: SessionGuard::new(Arc::clone(&state.gateway), session_id),
    };
    Sse::new(stream).keep_alive(KeepAlive::default())
}
