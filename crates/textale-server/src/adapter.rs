use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use textale_gateway::{ChannelSession, SessionEvent};
use textale_types::events::{ClientFrame, ServerFrame};

use crate::AppState;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Drive one client's session over a WebSocket.
///
/// This loop is the rendering side: it selects over client frames, the
/// session's live delivery queue and the heartbeat, turns each into a
/// `SessionEvent`, and writes whatever frames the session returns.
pub async fn run_session(socket: WebSocket, state: AppState, peer: SocketAddr) {
    let (mut sender, mut receiver) = socket.split();

    let (mut session, mut deliveries) = ChannelSession::new(
        state.services.clone(),
        state.session_config.clone(),
        peer.ip().to_string(),
    );
    info!("Connection from {} (session {})", peer, session.id());

    if send_frames(&mut sender, session.greeting()).await.is_err() {
        session.close();
        return;
    }

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;
    let mut pong_received = true;
    let mut missed_heartbeats: u8 = 0;

    loop {
        let event = tokio::select! {
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientFrame>(&text) {
                    Ok(frame) => SessionEvent::from(frame),
                    Err(e) => {
                        let raw: String = text.chars().take(200).collect();
                        warn!("{} bad frame: {} -- raw: {}", peer, e, raw);
                        continue;
                    }
                },
                Some(Ok(Message::Pong(_))) => {
                    pong_received = true;
                    continue;
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => continue,
            },
            Some(delivery) = deliveries.recv() => SessionEvent::Incoming(delivery),
            _ = heartbeat.tick() => {
                if std::mem::replace(&mut pong_received, false) {
                    missed_heartbeats = 0;
                } else {
                    missed_heartbeats += 1;
                    if missed_heartbeats >= 2 {
                        warn!("Heartbeat timeout for {} (missed {} pongs), dropping connection", peer, missed_heartbeats);
                        break;
                    }
                }
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                continue;
            }
        };

        let frames = session.handle(event).await;
        let closed = frames.contains(&ServerFrame::Closed);
        if send_frames(&mut sender, frames).await.is_err() || closed {
            break;
        }
    }

    // Cancels the live feed before anything else is released
    session.close();
    if let Err(e) = sender.close().await {
        debug!("Closing socket for {}: {}", peer, e);
    }
    info!("Disconnected: {}", peer);
}

async fn send_frames(
    sender: &mut SplitSink<WebSocket, Message>,
    frames: Vec<ServerFrame>,
) -> Result<(), axum::Error> {
    for frame in frames {
        let text = serde_json::to_string(&frame).map_err(axum::Error::new)?;
        sender.send(Message::Text(text.into())).await?;
    }
    Ok(())
}
