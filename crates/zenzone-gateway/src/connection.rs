use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use zenzone_db::{Database, GateError};
use zenzone_types::api::Claims;
use zenzone_types::events::{GatewayCommand, GatewayEvent};

use crate::broker::{Broker, ConnId};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long a connection without an upgrade token has to send `Identify`.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything a connection needs besides its socket.
#[derive(Clone)]
pub struct GatewayContext {
    pub broker: Broker,
    pub db: Arc<Database>,
    pub jwt_secret: Arc<str>,
}

/// Handle a WebSocket connection whose JWT was validated at the HTTP upgrade.
pub async fn handle_connection_authenticated(socket: WebSocket, ctx: GatewayContext, claims: Claims) {
    let (mut sender, receiver) = socket.split();

    info!("{} ({}) connected to gateway (pre-authenticated)", claims.username, claims.sub);

    if send_event(&mut sender, &ready(&claims)).await.is_err() {
        return;
    }

    run_connection_loop(sender, receiver, ctx, claims).await;
}

/// Handle a connection that authenticates with an `Identify` command.
pub async fn handle_connection(socket: WebSocket, ctx: GatewayContext) {
    let (mut sender, mut receiver) = socket.split();

    let claims = match wait_for_identify(&mut receiver, &ctx.jwt_secret).await {
        Some(claims) => claims,
        None => {
            warn!("WebSocket client failed to identify, closing");
            return;
        }
    };

    info!("{} ({}) connected to gateway", claims.username, claims.sub);

    if send_event(&mut sender, &ready(&claims)).await.is_err() {
        return;
    }

    run_connection_loop(sender, receiver, ctx, claims).await;
}

fn ready(claims: &Claims) -> GatewayEvent {
    GatewayEvent::Ready {
        user_id: claims.sub,
        username: claims.username.clone(),
    }
}

async fn send_event(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    event: &GatewayEvent,
) -> Result<(), ()> {
    let text = serde_json::to_string(event).map_err(|e| warn!("Unserializable event: {}", e))?;
    sender
        .send(Message::Text(text.into()))
        .await
        .map_err(|_| ())
}

async fn run_connection_loop(
    mut sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut receiver: futures_util::stream::SplitStream<WebSocket>,
    ctx: GatewayContext,
    claims: Claims,
) {
    let (conn_id, mut events_rx) = ctx.broker.register(claims.sub).await;

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward broker events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = events_rx.recv() => {
                    let Some(event) = event else { break };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let recv_ctx = ctx.clone();
    let recv_claims = claims.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => handle_command(&recv_ctx, conn_id, &recv_claims, cmd).await,
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            recv_claims.username,
                            recv_claims.sub,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    let rooms = ctx.broker.unregister(conn_id).await;
    info!(
        "{} ({}) disconnected from gateway, left {} room(s)",
        claims.username,
        claims.sub,
        rooms.len()
    );
}

async fn wait_for_identify(
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
    jwt_secret: &str,
) -> Option<Claims> {
    use jsonwebtoken::{DecodingKey, Validation, decode};

    let identify = async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) =
                    serde_json::from_str::<GatewayCommand>(&text)
                {
                    let token_data = decode::<Claims>(
                        &token,
                        &DecodingKey::from_secret(jwt_secret.as_bytes()),
                        &Validation::default(),
                    )
                    .ok()?;

                    return Some(token_data.claims);
                }
            }
        }
        None
    };

    tokio::time::timeout(IDENTIFY_TIMEOUT, identify).await.ok().flatten()
}

async fn reject(ctx: &GatewayContext, conn_id: ConnId, message: impl Into<String>) {
    ctx.broker
        .send_to_connection(conn_id, GatewayEvent::Error { message: message.into() })
        .await;
}

/// Apply one client command. Failures are reported to the sending
/// connection as an `Error` event and never close it.
pub(crate) async fn handle_command(ctx: &GatewayContext, conn_id: ConnId, claims: &Claims, cmd: GatewayCommand) {
    match cmd {
        GatewayCommand::Identify { .. } => {} // Already handled

        GatewayCommand::JoinRoom {
            appointment_id,
            user_id,
        } => {
            if user_id.is_some_and(|id| id != claims.sub) {
                reject(ctx, conn_id, "userId does not match the authenticated user").await;
                return;
            }

            let db = ctx.db.clone();
            let (uid, role) = (claims.sub, claims.role);
            let gate = tokio::task::spawn_blocking(move || {
                let access = db.authorize(uid, role, appointment_id)?;
                if db.is_blocked(access.psychiatrist_id(), access.student_id())? {
                    return Err(GateError::Forbidden("this conversation is blocked"));
                }
                Ok(access)
            })
            .await;

            match gate {
                Ok(Ok(_)) => {
                    if ctx.broker.join(conn_id, appointment_id).await {
                        info!("{} ({}) joined room {}", claims.username, claims.sub, appointment_id);
                    }
                }
                Ok(Err(GateError::Storage(e))) => {
                    warn!("Gate lookup failed for room {}: {}", appointment_id, e);
                    reject(ctx, conn_id, "could not join room").await;
                }
                Ok(Err(e)) => {
                    debug!("{} denied room {}: {}", claims.sub, appointment_id, e);
                    reject(ctx, conn_id, e.to_string()).await;
                }
                Err(e) => {
                    warn!("spawn_blocking join error: {}", e);
                    reject(ctx, conn_id, "could not join room").await;
                }
            }
        }

        GatewayCommand::LeaveRoom { appointment_id } => {
            if ctx.broker.leave(conn_id, appointment_id).await {
                info!("{} ({}) left room {}", claims.username, claims.sub, appointment_id);
            }
        }

        GatewayCommand::SendMessage(echo) => {
            let appointment_id = echo.appointment_id;
            if !ctx.broker.is_member(conn_id, appointment_id).await {
                reject(ctx, conn_id, "join the room before sending").await;
                return;
            }

            // Broadcast the stored record, not the client's copy
            let db = ctx.db.clone();
            let message_id = echo.id;
            let stored = match tokio::task::spawn_blocking(move || db.get_message(message_id)).await {
                Ok(Ok(stored)) => stored,
                Ok(Err(e)) => {
                    warn!("Message lookup failed for {}: {}", message_id, e);
                    None
                }
                Err(e) => {
                    warn!("spawn_blocking join error: {}", e);
                    None
                }
            };

            let Some(stored) = stored.filter(|m| m.appointment_id == appointment_id && m.sender_id == claims.sub)
            else {
                reject(ctx, conn_id, "message not found for this room").await;
                return;
            };

            let delivered = ctx
                .broker
                .publish(appointment_id, GatewayEvent::ReceiveMessage(stored), None)
                .await;
            ctx.broker
                .publish(appointment_id, GatewayEvent::ReloadChat { appointment_id }, Some(conn_id))
                .await;
            debug!("Message {} delivered to {} connection(s)", message_id, delivered);
        }

        GatewayCommand::Typing {
            appointment_id,
            is_typing,
        } => {
            if !ctx.broker.is_member(conn_id, appointment_id).await {
                return;
            }
            ctx.broker
                .publish(
                    appointment_id,
                    GatewayEvent::UserTyping {
                        appointment_id,
                        user_id: claims.sub,
                        is_typing,
                    },
                    Some(conn_id),
                )
                .await;
        }

        GatewayCommand::PresencePing { appointment_id } => {
            if !ctx.broker.is_member(conn_id, appointment_id).await {
                reject(ctx, conn_id, "join the room before asking for presence").await;
                return;
            }
            let online = ctx.broker.others_present(appointment_id, claims.sub).await;
            ctx.broker
                .send_to_connection(
                    conn_id,
                    GatewayEvent::PeerOnline {
                        appointment_id,
                        user_id: None,
                        online,
                        timestamp: chrono::Utc::now(),
                    },
                )
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tokio::sync::mpsc::UnboundedReceiver;
    use zenzone_db::models::{NewMessage, NewUser};
    use zenzone_types::models::{AppointmentStatus, Role};

    struct Fixture {
        ctx: GatewayContext,
        student: Claims,
        doctor: Claims,
        appointment: Uuid,
    }

    fn claims(id: Uuid, username: &str, role: Role) -> Claims {
        Claims {
            sub: id,
            username: username.into(),
            role,
            college: "north".into(),
            exp: usize::MAX,
        }
    }

    fn fixture(status: AppointmentStatus) -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let student = claims(Uuid::new_v4(), "amy", Role::Student);
        let doctor = claims(Uuid::new_v4(), "dr_bell", Role::Psychiatrist);
        for c in [&student, &doctor] {
            db.create_user(&NewUser {
                id: c.sub,
                username: &c.username,
                password_hash: "x",
                role: c.role,
                college: "north",
            })
            .unwrap();
        }
        let appointment = Uuid::new_v4();
        db.insert_appointment(appointment, student.sub, doctor.sub, "north", Utc::now(), "hi")
            .unwrap();
        db.set_appointment_status(appointment, status).unwrap();

        Fixture {
            ctx: GatewayContext {
                broker: Broker::new(),
                db: Arc::new(db),
                jwt_secret: Arc::from("test-secret"),
            },
            student,
            doctor,
            appointment,
        }
    }

    async fn connect_and_join(f: &Fixture, who: &Claims) -> (ConnId, UnboundedReceiver<GatewayEvent>) {
        let (conn, rx) = f.ctx.broker.register(who.sub).await;
        handle_command(
            &f.ctx,
            conn,
            who,
            GatewayCommand::JoinRoom {
                appointment_id: f.appointment,
                user_id: Some(who.sub),
            },
        )
        .await;
        (conn, rx)
    }

    fn drain(rx: &mut UnboundedReceiver<GatewayEvent>) -> Vec<GatewayEvent> {
        let mut out = vec![];
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn test_join_requires_approved_appointment() {
        let f = fixture(AppointmentStatus::Pending);
        let (conn, mut rx) = connect_and_join(&f, &f.student).await;

        assert!(!f.ctx.broker.is_member(conn, f.appointment).await);
        assert!(matches!(drain(&mut rx).as_slice(), [GatewayEvent::Error { .. }]));
    }

    #[tokio::test]
    async fn test_join_rejects_spoofed_user_id() {
        let f = fixture(AppointmentStatus::Approved);
        let (conn, mut rx) = f.ctx.broker.register(f.student.sub).await;
        handle_command(
            &f.ctx,
            conn,
            &f.student,
            GatewayCommand::JoinRoom {
                appointment_id: f.appointment,
                user_id: Some(f.doctor.sub),
            },
        )
        .await;

        assert!(!f.ctx.broker.is_member(conn, f.appointment).await);
        assert!(matches!(drain(&mut rx).as_slice(), [GatewayEvent::Error { .. }]));
    }

    #[tokio::test]
    async fn test_echo_broadcasts_stored_message() {
        let f = fixture(AppointmentStatus::Approved);
        let (doc_conn, mut doc_rx) = connect_and_join(&f, &f.doctor).await;
        let (student_conn, mut student_rx) = connect_and_join(&f, &f.student).await;
        drain(&mut doc_rx);
        drain(&mut student_rx);

        let id = Uuid::new_v4();
        f.ctx
            .db
            .insert_message(&NewMessage {
                id,
                appointment_id: f.appointment,
                sender_id: f.student.sub,
                recipient_id: f.doctor.sub,
                content: "hello",
                attachments: &[],
                created_at: Utc::now(),
            })
            .unwrap();
        let stored = f.ctx.db.get_message(id).unwrap().unwrap();

        // A tampered echo still broadcasts what the server stored
        let mut echo = stored.clone();
        echo.content = "tampered".into();
        handle_command(&f.ctx, student_conn, &f.student, GatewayCommand::SendMessage(echo)).await;

        let doc_events = drain(&mut doc_rx);
        assert_eq!(doc_events[0], GatewayEvent::ReceiveMessage(stored.clone()));
        assert!(matches!(doc_events[1], GatewayEvent::ReloadChat { .. }));

        // The sender's own connection gets the message but no reload
        assert_eq!(drain(&mut student_rx), vec![GatewayEvent::ReceiveMessage(stored)]);
        let _ = doc_conn;
    }

    #[tokio::test]
    async fn test_echo_of_someone_elses_message_is_rejected() {
        let f = fixture(AppointmentStatus::Approved);
        let (_doc_conn, mut doc_rx) = connect_and_join(&f, &f.doctor).await;
        let (student_conn, mut student_rx) = connect_and_join(&f, &f.student).await;
        drain(&mut doc_rx);
        drain(&mut student_rx);

        let id = Uuid::new_v4();
        f.ctx
            .db
            .insert_message(&NewMessage {
                id,
                appointment_id: f.appointment,
                sender_id: f.doctor.sub,
                recipient_id: f.student.sub,
                content: "from the doctor",
                attachments: &[],
                created_at: Utc::now(),
            })
            .unwrap();
        let stored = f.ctx.db.get_message(id).unwrap().unwrap();

        handle_command(&f.ctx, student_conn, &f.student, GatewayCommand::SendMessage(stored)).await;

        assert!(drain(&mut doc_rx).is_empty());
        assert!(matches!(drain(&mut student_rx).as_slice(), [GatewayEvent::Error { .. }]));
    }

    #[tokio::test]
    async fn test_typing_skips_sender_and_presence_ping() {
        let f = fixture(AppointmentStatus::Approved);
        let (student_conn, mut student_rx) = connect_and_join(&f, &f.student).await;

        handle_command(
            &f.ctx,
            student_conn,
            &f.student,
            GatewayCommand::PresencePing { appointment_id: f.appointment },
        )
        .await;
        assert!(matches!(
            drain(&mut student_rx).as_slice(),
            [GatewayEvent::PeerOnline { online: false, user_id: None, .. }]
        ));

        let (_doc_conn, mut doc_rx) = connect_and_join(&f, &f.doctor).await;
        drain(&mut student_rx);

        handle_command(
            &f.ctx,
            student_conn,
            &f.student,
            GatewayCommand::Typing {
                appointment_id: f.appointment,
                is_typing: true,
            },
        )
        .await;

        assert_eq!(
            drain(&mut doc_rx),
            vec![GatewayEvent::UserTyping {
                appointment_id: f.appointment,
                user_id: f.student.sub,
                is_typing: true,
            }]
        );
        assert!(drain(&mut student_rx).is_empty());
    }

    #[tokio::test]
    async fn test_presence_ping_requires_membership() {
        let f = fixture(AppointmentStatus::Approved);
        let (_doc_conn, _doc_rx) = connect_and_join(&f, &f.doctor).await;

        // Registered but never joined, so the gate was never passed
        let outsider = claims(Uuid::new_v4(), "eve", Role::Student);
        let (conn, mut rx) = f.ctx.broker.register(outsider.sub).await;
        handle_command(
            &f.ctx,
            conn,
            &outsider,
            GatewayCommand::PresencePing { appointment_id: f.appointment },
        )
        .await;

        assert!(matches!(drain(&mut rx).as_slice(), [GatewayEvent::Error { .. }]));
    }

    #[tokio::test]
    async fn test_blocked_pair_cannot_join_and_eviction_stops_typing() {
        let f = fixture(AppointmentStatus::Approved);
        let (student_conn, mut student_rx) = connect_and_join(&f, &f.student).await;
        let (_doc_conn, mut doc_rx) = connect_and_join(&f, &f.doctor).await;
        drain(&mut student_rx);

        f.ctx.db.block_user(f.doctor.sub, f.student.sub).unwrap();
        assert_eq!(f.ctx.broker.evict_room(f.appointment).await, 2);
        assert!(matches!(
            drain(&mut student_rx).as_slice(),
            [GatewayEvent::ReloadChat { .. }]
        ));
        drain(&mut doc_rx);

        handle_command(
            &f.ctx,
            student_conn,
            &f.student,
            GatewayCommand::Typing {
                appointment_id: f.appointment,
                is_typing: true,
            },
        )
        .await;
        assert!(drain(&mut doc_rx).is_empty());

        // Rejoining goes through the gate again and the block holds
        handle_command(
            &f.ctx,
            student_conn,
            &f.student,
            GatewayCommand::JoinRoom {
                appointment_id: f.appointment,
                user_id: None,
            },
        )
        .await;
        assert!(!f.ctx.broker.is_member(student_conn, f.appointment).await);
        assert!(matches!(drain(&mut student_rx).as_slice(), [GatewayEvent::Error { .. }]));
    }
}
