//! Real-time channel
//!
//! Pumps frames between one WebSocket and its room's coordinator. Outbound
//! frames arrive on an unbounded queue registered with the room; inbound
//! text frames are beat segments.

use crate::room::schema::BeatEvent;
use crate::room::{ConnectionId, RoomHandle};
use crate::utils::error::{AppError, ErrorResponse};
use axum::extract::ws::{Message, WebSocket};
use tokio::sync::mpsc;

/// Serve one channel until either side hangs up
pub async fn serve(mut socket: WebSocket, room: RoomHandle) {
    let id = ConnectionId::new();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let replies = tx.clone();

    if let Err(e) = room.connect(id, tx).await {
        tracing::warn!("Could not open channel on room {}: {}", room.room_id(), e);
        let _ = socket.send(Message::Text(error_frame(e))).await;
        return;
    }

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                let Some(frame) = outbound else { break };
                if socket.send(Message::Text(frame)).await.is_err() {
                    break;
                }
            }
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = submit(&room, id, &text).await {
                            let _ = replies.send(error_frame(e));
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!("Channel {} errored: {}", id, e);
                        break;
                    }
                }
            }
        }
    }

    room.disconnect(id);
}

/// Parse a segment frame and hand it to the room
async fn submit(room: &RoomHandle, id: ConnectionId, text: &str) -> Result<(), AppError> {
    let events = parse_segment(text)?;
    room.submit_segment(id, events).await?;
    Ok(())
}

fn parse_segment(text: &str) -> Result<Vec<BeatEvent>, AppError> {
    serde_json::from_str(text).map_err(|e| AppError::MalformedRequest(e.to_string()))
}

fn error_frame(error: AppError) -> String {
    serde_json::to_string(&ErrorResponse::from(error)).unwrap_or_default()
}
