//! WebSocket gateway: forwards realtime topics to a connected client.
//!
//! The connection is authenticated at the HTTP upgrade. Afterwards the
//! client drives it with `Subscribe`/`Unsubscribe` commands; each live
//! topic is one forwarding task that owns the hub subscription, so
//! aborting the task tears the subscription down. A chat topic's task
//! also follows the subscriber's memberships and ends itself once the
//! subscriber leaves or is removed from that chat.

use std::collections::HashMap;
use std::time::Duration;

use axum::{
    Extension,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message as WsMessage, WebSocket},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use agora_chat::{Backend, Session};
use agora_realtime::Subscription;
use agora_types::events::{GatewayCommand, GatewayEvent, RowChange, Topic};
use agora_types::models::ChatMember;

use crate::AppState;

/// Ping every 15 seconds; two missed pongs drop the connection.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
const OUTBOX_CAPACITY: usize = 256;

pub async fn ws_upgrade(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let backend = state.backend.clone();
    ws.on_upgrade(move |socket| handle_connection(socket, backend, session))
}

async fn handle_connection(socket: WebSocket, backend: Backend, session: Session) {
    let user_id = session.user_id;
    let (mut sender, mut receiver) = socket.split();
    let (outbox, mut events) = mpsc::channel::<GatewayEvent>(OUTBOX_CAPACITY);
    let mut topics: HashMap<Topic, JoinHandle<()>> = HashMap::new();

    info!("{} connected to gateway", user_id);
    if send_event(&mut sender, &GatewayEvent::Ready { user_id }).await.is_err() {
        return;
    }

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;
    let mut pong_received = true;
    let mut missed_heartbeats: u8 = 0;

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                let msg = match incoming {
                    Some(Ok(msg)) => msg,
                    _ => break,
                };
                match msg {
                    WsMessage::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                        Ok(cmd) => {
                            let reply = handle_command(&backend, session, cmd, &mut topics, &outbox).await;
                            if send_event(&mut sender, &reply).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            let raw: String = text.chars().take(200).collect();
                            warn!("{} bad command: {} -- raw: {}", user_id, e, raw);
                            let reply = GatewayEvent::Error { message: format!("bad command: {}", e) };
                            if send_event(&mut sender, &reply).await.is_err() {
                                break;
                            }
                        }
                    },
                    WsMessage::Pong(_) => pong_received = true,
                    WsMessage::Close(_) => break,
                    _ => {}
                }
            }
            Some(event) = events.recv() => {
                if send_event(&mut sender, &event).await.is_err() {
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if std::mem::replace(&mut pong_received, false) {
                    missed_heartbeats = 0;
                } else {
                    missed_heartbeats += 1;
                    if missed_heartbeats >= 2 {
                        warn!("Heartbeat timeout for {}, dropping connection", user_id);
                        break;
                    }
                }
                if sender.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }

    for (_, task) in topics.drain() {
        task.abort();
    }
    info!("{} disconnected from gateway", user_id);
}

async fn send_event(
    sender: &mut futures_util::stream::SplitSink<WebSocket, WsMessage>,
    event: &GatewayEvent,
) -> Result<(), ()> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to encode gateway event: {}", e);
            return Ok(());
        }
    };
    sender.send(WsMessage::Text(text.into())).await.map_err(|_| ())
}

/// Chat topics need membership; a membership topic is only ever your own.
async fn may_subscribe(backend: &Backend, session: Session, topic: Topic) -> bool {
    match topic {
        Topic::Memberships(user_id) => user_id == session.user_id,
        Topic::Messages(chat_id) | Topic::Typing(chat_id) => {
            let user_id = session.user_id;
            backend
                .db_call(move |db| db.is_member(chat_id, user_id))
                .await
                .unwrap_or_else(|e| {
                    warn!("Membership check for {:?} failed: {}", topic, e);
                    false
                })
        }
    }
}

async fn handle_command(
    backend: &Backend,
    session: Session,
    cmd: GatewayCommand,
    topics: &mut HashMap<Topic, JoinHandle<()>>,
    outbox: &mpsc::Sender<GatewayEvent>,
) -> GatewayEvent {
    // Forwarders revoked by a membership change have already finished.
    topics.retain(|_, task| !task.is_finished());

    match cmd {
        GatewayCommand::Subscribe { topic } => {
            if topics.contains_key(&topic) {
                return GatewayEvent::Subscribed { topic };
            }
            // Watch memberships before the check so a removal cannot slip in between.
            let memberships = backend.hub().subscribe_memberships(session.user_id);
            if !may_subscribe(backend, session, topic).await {
                return GatewayEvent::Error {
                    message: format!("not allowed to subscribe to {:?}", topic),
                };
            }
            topics.insert(topic, spawn_forwarder(backend, topic, memberships, outbox.clone()));
            debug!("{} subscribed to {:?}", session.user_id, topic);
            GatewayEvent::Subscribed { topic }
        }
        GatewayCommand::Unsubscribe { topic } => {
            if let Some(task) = topics.remove(&topic) {
                task.abort();
                debug!("{} unsubscribed from {:?}", session.user_id, topic);
            }
            GatewayEvent::Unsubscribed { topic }
        }
    }
}

/// Subscribe now, then forward every change into the connection's outbox.
/// `memberships` is the subscriber's own membership topic.
fn spawn_forwarder(
    backend: &Backend,
    topic: Topic,
    memberships: Subscription<ChatMember>,
    outbox: mpsc::Sender<GatewayEvent>,
) -> JoinHandle<()> {
    let hub = backend.hub();
    match topic {
        Topic::Messages(chat_id) => {
            let sub = hub.subscribe_messages(chat_id);
            tokio::spawn(forward_chat_topic(sub, memberships, topic, chat_id, outbox, move |change| {
                GatewayEvent::MessageChange { chat_id, change }
            }))
        }
        Topic::Typing(chat_id) => {
            let sub = hub.subscribe_typing(chat_id);
            tokio::spawn(forward_chat_topic(sub, memberships, topic, chat_id, outbox, move |change| {
                GatewayEvent::TypingChange { chat_id, change }
            }))
        }
        Topic::Memberships(_) => {
            let mut sub = memberships;
            tokio::spawn(async move {
                while let Some(change) = sub.recv().await {
                    if outbox.send(GatewayEvent::MembershipChange { change }).await.is_err() {
                        break;
                    }
                }
            })
        }
    }
}

/// Forward one chat's changes until the subscriber's own membership row
/// for that chat is deleted, then report the topic as unsubscribed.
async fn forward_chat_topic<T, F>(
    mut sub: Subscription<T>,
    mut memberships: Subscription<ChatMember>,
    topic: Topic,
    chat_id: Uuid,
    outbox: mpsc::Sender<GatewayEvent>,
    wrap: F,
) where
    T: Clone + Send + 'static,
    F: Fn(RowChange<T>) -> GatewayEvent,
{
    loop {
        tokio::select! {
            // Membership first: a removal is published before anything sent after it.
            biased;
            change = memberships.recv() => match change {
                Some(RowChange::Delete(member)) if member.chat_id == chat_id => {
                    debug!("{} no longer in chat {}, dropping {:?}", member.user_id, chat_id, topic);
                    let _ = outbox.send(GatewayEvent::Unsubscribed { topic }).await;
                    break;
                }
                Some(_) => {}
                None => break,
            },
            change = sub.recv() => match change {
                Some(change) => {
                    if outbox.send(wrap(change)).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
        }
    }
}
