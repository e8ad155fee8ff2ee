use axum::{
    body::Bytes,
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::api::SharedState;
use super::hub::{Notification, Subscription};

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

/// `GET /ws/{project_id}`: stream the project's notifications.
///
/// The first frame is a `snapshot` of the job as stored in the queue. Live
/// events follow in publish order. The socket subscribes before the snapshot
/// is read, so events published during the lookup are delivered after the
/// snapshot even when the snapshot already reflects them. Clients treat the
/// snapshot as the baseline and ignore leading events that do not move the
/// job past it. No event published after the subscription is lost.
pub async fn ws_handler(
    Path(project_id): Path<String>,
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, project_id))
}

async fn handle_socket(socket: WebSocket, state: SharedState, project_id: String) {
    // Subscribe before reading the snapshot so nothing published in between is lost.
    let subscription = state.hub.subscribe(&project_id);
    let job = match state.queue.get_by_project(&project_id).await {
        Ok(job) => job,
        Err(e) => {
            warn!(project_id = %project_id, error = %format!("{:#}", e), "Snapshot lookup failed");
            None
        }
    };

    let (mut sender, receiver) = socket.split();
    let snapshot = Notification::snapshot(&project_id, job.as_ref());
    if let Some(frame) = encode(&snapshot)
        && sender.send(frame).await.is_err()
    {
        return;
    }

    debug!(project_id = %project_id, "Subscriber connected");
    run_socket_loop(sender, receiver, subscription).await;
    debug!(project_id = %project_id, "Subscriber disconnected");
}

fn encode(event: &Notification) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            warn!(error = %e, "Failed to serialize notification");
            None
        }
    }
}

/// Forward the subscription to the socket with ping/pong keepalive.
///
/// If no Pong arrives within [`PONG_TIMEOUT`] after a Ping, the connection
/// is considered dead and the loop exits. Dropping the subscription on exit
/// unsubscribes the connection.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut subscription: Subscription,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // First tick is immediate.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    break;
                }
                if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            event = subscription.recv() => {
                let Some(event) = event else { break };
                if let Some(frame) = encode(&event)
                    && sender.send(frame).await.is_err()
                {
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    // Text, Binary and Ping from the client are ignored
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
}
