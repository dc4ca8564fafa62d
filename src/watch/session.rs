use actix_ws::Message;
use futures_util::StreamExt;
use tracing::{debug, warn};

use crate::db::SnapshotStream;
use crate::models::requests::ServiceRequest;
use crate::watch::protocol::{ClientMessage, ServerMessage};

/// Forward every snapshot of `snapshots` to the socket until either side closes.
///
/// A failed subscription is reported once as an `error` message and the
/// socket is closed.
pub async fn run(
    mut session: actix_ws::Session,
    mut msg_stream: actix_ws::MessageStream,
    mut snapshots: SnapshotStream<ServiceRequest>,
    label: String,
) {
    debug!(subscription = %label, "Watch session opened");

    loop {
        tokio::select! {
            Some(msg) = msg_stream.next() => {
                match msg {
                    Ok(Message::Text(text)) => {
                        if let Ok(ClientMessage::Ping) = serde_json::from_str::<ClientMessage>(&text) {
                            if send(&mut session, &ServerMessage::Pong).await.is_err() {
                                break;
                            }
                        }
                    }
                    Ok(Message::Ping(bytes)) => {
                        if session.pong(&bytes).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
            snapshot = snapshots.next() => {
                match snapshot {
                    Some(Ok(requests)) => {
                        if send(&mut session, &ServerMessage::Snapshot { requests }).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(subscription = %label, "Watch stream failed: {e}");
                        let _ = send(&mut session, &ServerMessage::Error { message: e.to_string() }).await;
                        break;
                    }
                    None => break,
                }
            }
            else => break,
        }
    }

    debug!(subscription = %label, "Watch session closed");
    let _ = session.close(None).await;
}

async fn send(session: &mut actix_ws::Session, msg: &ServerMessage) -> Result<(), actix_ws::Closed> {
    let json = match serde_json::to_string(msg) {
        Ok(j) => j,
        Err(_) => return Ok(()),
    };
    session.text(json).await
}
