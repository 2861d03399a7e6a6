//! WebSocket client for the gateway with automatic reconnect.
//!
//! A background task owns the socket. Commands go in through an unbounded
//! channel, events come out through another. Joined rooms are remembered
//! and re-joined after every reconnect. Commands issued while disconnected
//! are dropped, matching the server's at-most-once delivery.

use std::collections::HashSet;
use std::time::Duration;

use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tracing::{debug, info, warn};
use uuid::Uuid;

use zenzone_types::events::{GatewayCommand, GatewayEvent};

use crate::error::ClientError;

pub const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Exponential reconnect delay: 500 ms doubling up to 30 s.
#[derive(Debug)]
pub struct Backoff {
    current: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            current: INITIAL_BACKOFF,
        }
    }
}

impl Backoff {
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(MAX_BACKOFF);
        delay
    }

    pub fn reset(&mut self) {
        self.current = INITIAL_BACKOFF;
    }
}

/// What the session sees from the realtime task.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    /// Socket is up and rooms were re-joined. `reconnect` is false only for
    /// the first connection; after a reconnect history must be re-fetched.
    Connected { reconnect: bool },
    Disconnected,
    Gateway(GatewayEvent),
}

/// Handle to the background connection task.
pub struct RealtimeClient {
    commands: mpsc::UnboundedSender<GatewayCommand>,
    events: mpsc::UnboundedReceiver<RealtimeEvent>,
}

impl RealtimeClient {
    /// Spawn the connection task. `base_url` is the HTTP origin of the server.
    pub fn spawn(base_url: &str, token: &str) -> Self {
        let url = gateway_url(base_url, token);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        tokio::spawn(run(url, cmd_rx, event_tx));
        Self {
            commands: cmd_tx,
            events: event_rx,
        }
    }

    pub fn commands(&self) -> mpsc::UnboundedSender<GatewayCommand> {
        self.commands.clone()
    }

    /// Queue a command. Fails only once the connection task has stopped.
    pub fn send(&self, command: GatewayCommand) -> Result<(), ClientError> {
        self.commands.send(command).map_err(|_| ClientError::Closed)
    }

    pub async fn next_event(&mut self) -> Option<RealtimeEvent> {
        self.events.recv().await
    }
}

pub fn gateway_url(base_url: &str, token: &str) -> String {
    let origin = base_url.trim_end_matches('/');
    let ws_origin = if let Some(rest) = origin.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = origin.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        origin.to_string()
    };
    format!("{}/gateway?token={}", ws_origin, token)
}

/// Keep the joined room set in step with outgoing commands.
fn track_rooms(rooms: &mut HashSet<Uuid>, command: &GatewayCommand) {
    match command {
        GatewayCommand::JoinRoom { appointment_id, .. } => {
            rooms.insert(*appointment_id);
        }
        GatewayCommand::LeaveRoom { appointment_id } => {
            rooms.remove(appointment_id);
        }
        _ => {}
    }
}

enum LoopExit {
    /// Socket dropped, try again.
    Reconnect,
    /// Every handle is gone.
    Shutdown,
}

async fn run(
    url: String,
    mut commands: mpsc::UnboundedReceiver<GatewayCommand>,
    events: mpsc::UnboundedSender<RealtimeEvent>,
) {
    let mut backoff = Backoff::default();
    let mut rooms: HashSet<Uuid> = HashSet::new();
    let mut connected_before = false;

    loop {
        match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((stream, _)) => {
                backoff.reset();
                let (mut tx, mut rx) = stream.split();

                let mut rejoined = true;
                for appointment_id in &rooms {
                    let join = GatewayCommand::JoinRoom {
                        appointment_id: *appointment_id,
                        user_id: None,
                    };
                    if let Err(e) = send_command(&mut tx, &join).await {
                        warn!("Rejoin failed: {}", e);
                        rejoined = false;
                        break;
                    }
                }

                if rejoined {
                    info!("Gateway connected ({} rooms)", rooms.len());
                    let _ = events.send(RealtimeEvent::Connected {
                        reconnect: connected_before,
                    });
                    connected_before = true;

                    let exit = loop {
                        tokio::select! {
                            command = commands.recv() => {
                                let Some(command) = command else {
                                    break LoopExit::Shutdown;
                                };
                                track_rooms(&mut rooms, &command);
                                if let Err(e) = send_command(&mut tx, &command).await {
                                    warn!("Gateway send failed: {}", e);
                                    break LoopExit::Reconnect;
                                }
                            }
                            frame = rx.next() => match frame {
                                Some(Ok(WsMessage::Text(text))) => {
                                    match serde_json::from_str::<GatewayEvent>(&text) {
                                        Ok(event) => {
                                            if events.send(RealtimeEvent::Gateway(event)).is_err() {
                                                break LoopExit::Shutdown;
                                            }
                                        }
                                        Err(e) => debug!("Ignoring unknown gateway frame: {}", e),
                                    }
                                }
                                Some(Ok(WsMessage::Close(_))) | None => break LoopExit::Reconnect,
                                Some(Ok(_)) => {}
                                Some(Err(e)) => {
                                    warn!("Gateway read error: {}", e);
                                    break LoopExit::Reconnect;
                                }
                            },
                        }
                    };

                    if matches!(exit, LoopExit::Shutdown) {
                        let _ = tx.close().await;
                        return;
                    }
                    let _ = events.send(RealtimeEvent::Disconnected);
                }
            }
            Err(e) => warn!("Gateway connect failed: {}", e),
        }

        // Keep tracking rooms while waiting so the rejoin set stays current
        let delay = tokio::time::sleep(backoff.next_delay());
        tokio::pin!(delay);
        loop {
            tokio::select! {
                _ = &mut delay => break,
                command = commands.recv() => match command {
                    Some(command) => track_rooms(&mut rooms, &command),
                    None => return,
                },
            }
        }
    }
}

async fn send_command<S>(tx: &mut S, command: &GatewayCommand) -> Result<(), ClientError>
where
    S: Sink<WsMessage, Error = tungstenite::Error> + Unpin,
{
    let text = serde_json::to_string(command)?;
    tx.send(WsMessage::Text(text.into())).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_to_cap_and_resets() {
        let mut b = Backoff::default();
        let delays: Vec<u64> = (0..8).map(|_| b.next_delay().as_millis() as u64).collect();
        assert_eq!(delays, [500, 1000, 2000, 4000, 8000, 16000, 30000, 30000]);

        b.reset();
        assert_eq!(b.next_delay(), INITIAL_BACKOFF);
    }

    #[test]
    fn test_gateway_url() {
        assert_eq!(gateway_url("http://localhost:3000/", "t"), "ws://localhost:3000/gateway?token=t");
        assert_eq!(gateway_url("https://chat.example", "t"), "wss://chat.example/gateway?token=t");
    }

    #[test]
    fn test_room_tracking() {
        let mut rooms = HashSet::new();
        let id = Uuid::new_v4();
        track_rooms(&mut rooms, &GatewayCommand::JoinRoom { appointment_id: id, user_id: None });
        track_rooms(&mut rooms, &GatewayCommand::Typing { appointment_id: id, is_typing: true });
        assert!(rooms.contains(&id));
        track_rooms(&mut rooms, &GatewayCommand::LeaveRoom { appointment_id: id });
        assert!(rooms.is_empty());
    }

    #[tokio::test]
    async fn test_failed_frame_write_is_a_websocket_error() {
        let mut sink = Box::pin(futures_util::sink::unfold((), |_, _frame: WsMessage| async {
            Err::<(), _>(tungstenite::Error::ConnectionClosed)
        }));
        let leave = GatewayCommand::LeaveRoom {
            appointment_id: Uuid::nil(),
        };

        let err = send_command(&mut sink, &leave).await.unwrap_err();
        assert!(matches!(err, ClientError::WebSocket(_)));
        assert_eq!(
            err.user_message(),
            "Could not reach the server. Retry when you are back online."
        );
    }

    #[test]
    fn test_send_after_task_exit_is_closed() {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (_event_tx, events) = mpsc::unbounded_channel();
        let client = RealtimeClient { commands, events };
        drop(command_rx);

        let result = client.send(GatewayCommand::LeaveRoom {
            appointment_id: Uuid::nil(),
        });
        assert!(matches!(result, Err(ClientError::Closed)));
    }
}
