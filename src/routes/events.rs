use std::{convert::Infallible, time::Duration};

use axum::{
    Router,
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
};
use futures::Stream;
use tokio::sync::{
    broadcast::{self, error::RecvError},
    mpsc,
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use crate::state::{SharedState, events::DomainEvent};

/// Configure the realtime event endpoint.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/events", get(event_stream))
}

/// Stream domain events to connected frontends.
pub async fn event_stream(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.events().subscribe();
    info!("new event stream connection");
    to_sse_stream(receiver)
}

/// Convert a broadcast receiver into an SSE response, forwarding events and
/// tearing down once the client disconnects.
fn to_sse_stream(
    mut receiver: broadcast::Receiver<DomainEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    // forwarder task: reads from broadcast and pushes into mpsc
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tx.closed() => break,
                recv_result = receiver.recv() => {
                    match recv_result {
                        Ok(payload) => {
                            let data = match serde_json::to_string(&payload) {
                                Ok(data) => data,
                                Err(err) => {
                                    warn!(error = %err, "dropping unserializable event");
                                    continue;
                                }
                            };
                            if tx.send(Ok(Event::default().data(data))).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Closed) => break,
                        Err(RecvError::Lagged(_)) => {
                            // Skip lagged messages but keep the stream alive.
                            continue;
                        }
                    }
                }
            }
        }
        info!("event stream disconnected");
    });

    Sse::new(ReceiverStream::new(rx))
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
