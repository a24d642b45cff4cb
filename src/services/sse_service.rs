use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::{
    broadcast::{self, error::RecvError},
    mpsc,
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dto::{
        session::SessionView,
        sse::{FlagsChangedEvent, ServerEvent, SessionClosedEvent},
    },
    error::ServiceError,
    services::session_service,
    state::{FlagsChanged, SessionUpdate, SharedState},
};

/// Event name carrying a full session snapshot.
pub const SESSION_UPDATED: &str = "session.updated";
/// Event name announcing a flag ledger change.
pub const FLAGS_CHANGED: &str = "flags.changed";
/// Event name sent once when the session is deleted.
pub const SESSION_CLOSED: &str = "session.closed";

/// Open the change stream of `session_id`, starting with its current snapshot.
pub async fn subscribe_session(
    state: &SharedState,
    session_id: Uuid,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>> + use<>>, ServiceError> {
    // Subscribe before reading so no commit falls between the snapshot and the stream.
    let session_rx = state.hub().subscribe_session(session_id);
    let flags_rx = state.hub().subscribe_flags(session_id);

    let Some(current) = session_service::load_state(state, session_id).await? else {
        return Err(ServiceError::NotFound(format!(
            "session `{session_id}` not found"
        )));
    };
    let initial = session_event(SessionView::from(current));
    info!(%session_id, "session SSE stream connected");

    Ok(to_sse_stream(session_id, initial, session_rx, flags_rx))
}

fn session_event(view: SessionView) -> Option<ServerEvent> {
    ServerEvent::json(Some(SESSION_UPDATED.to_string()), &view)
        .inspect_err(|err| warn!(error = %err, "failed to serialize session snapshot"))
        .ok()
}

fn to_server_event(update: SessionUpdate) -> Option<ServerEvent> {
    match update {
        SessionUpdate::Changed(session) => session_event(session.into()),
        SessionUpdate::Closed { session_id } => ServerEvent::json(
            Some(SESSION_CLOSED.to_string()),
            &SessionClosedEvent { session_id },
        )
        .ok(),
    }
}

fn flags_event(notice: FlagsChanged) -> Option<ServerEvent> {
    ServerEvent::json(
        Some(FLAGS_CHANGED.to_string()),
        &FlagsChangedEvent {
            session_id: notice.session_id,
            version: notice.version,
        },
    )
    .ok()
}

fn into_event(payload: ServerEvent) -> Event {
    let mut event = Event::default().data(payload.data);
    if let Some(name) = payload.event {
        event = event.event(name);
    }
    event
}

/// Merge both hub receivers into one SSE response, forwarding events until the
/// client disconnects or the session closes.
fn to_sse_stream(
    session_id: Uuid,
    initial: Option<ServerEvent>,
    mut session_rx: broadcast::Receiver<SessionUpdate>,
    mut flags_rx: broadcast::Receiver<FlagsChanged>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    tokio::spawn(async move {
        if let Some(initial) = initial {
            if tx.send(Ok(into_event(initial))).await.is_err() {
                return;
            }
        }

        let mut flags_open = true;
        loop {
            let (payload, closing) = tokio::select! {
                _ = tx.closed() => break,
                recv_result = session_rx.recv() => match recv_result {
                    Ok(update) => {
                        let closing = matches!(update, SessionUpdate::Closed { .. });
                        (to_server_event(update), closing)
                    }
                    Err(RecvError::Closed) => break,
                    Err(RecvError::Lagged(skipped)) => {
                        // Snapshots are full records; the next one catches up.
                        debug!(%session_id, skipped, "session SSE stream lagged");
                        continue;
                    }
                },
                recv_result = flags_rx.recv(), if flags_open => match recv_result {
                    Ok(notice) => (flags_event(notice), false),
                    Err(RecvError::Closed) => {
                        flags_open = false;
                        continue;
                    }
                    Err(RecvError::Lagged(_)) => (
                        flags_event(FlagsChanged { session_id, version: 0 }),
                        false,
                    ),
                },
            };

            if let Some(payload) = payload {
                if tx.send(Ok(into_event(payload))).await.is_err() {
                    break;
                }
            }
            if closing {
                break;
            }
        }

        info!(%session_id, "session SSE stream disconnected");
    });

    // response stream reads from mpsc; when client disconnects axum drops this stream
    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::state::session::Session;

    #[test]
    fn updates_map_to_named_events() {
        let session = Session::new(
            "ABCDEF".into(),
            "Theme".into(),
            "host".into(),
            Duration::from_secs(60),
        );
        let id = session.id;

        let updated = to_server_event(SessionUpdate::Changed(session)).unwrap();
        assert_eq!(updated.event.as_deref(), Some(SESSION_UPDATED));
        assert!(updated.data.contains("\"code\":\"ABCDEF\""));

        let closed = to_server_event(SessionUpdate::Closed { session_id: id }).unwrap();
        assert_eq!(closed.event.as_deref(), Some(SESSION_CLOSED));

        let flags = flags_event(FlagsChanged {
            session_id: id,
            version: 7,
        })
        .unwrap();
        assert_eq!(flags.event.as_deref(), Some(FLAGS_CHANGED));
        assert!(flags.data.contains("\"version\":7"));
    }
}
