//! WebSocket transport binding live connections to the coordinator.
//!
//! Every socket task is a thin pipe: inbound frames are parsed at the
//! boundary and forwarded into one mpsc channel; the single hub task
//! owns the [`Coordinator`] and the connection map, so events from
//! both clients are processed strictly one at a time. Outbound
//! delivery is fire-and-forget through per-connection queues.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use duet_core::{ConnId, Coordinator, Outbound};
use duet_shared::constants::MAX_WS_FRAME_SIZE;
use duet_shared::{ClientEvent, ServerEvent};

/// Notifications from socket tasks to the hub task.
#[derive(Debug)]
pub enum HubEvent {
    Connected {
        conn: ConnId,
        tx: mpsc::UnboundedSender<ServerEvent>,
    },
    Inbound {
        conn: ConnId,
        event: ClientEvent,
    },
    Closed {
        conn: ConnId,
    },
}

/// Shared handle the socket tasks use to reach the hub.
#[derive(Clone)]
pub struct Hub {
    tx: mpsc::UnboundedSender<HubEvent>,
    next_conn: Arc<AtomicU64>,
}

impl Hub {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<HubEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                next_conn: Arc::new(AtomicU64::new(1)),
            },
            rx,
        )
    }

    fn mint_conn(&self) -> ConnId {
        ConnId(self.next_conn.fetch_add(1, Ordering::Relaxed))
    }
}

/// The single logical thread of the system: consumes hub events one at
/// a time, waking early only for a ringing deadline.
pub async fn run_hub(mut coordinator: Coordinator, mut rx: mpsc::UnboundedReceiver<HubEvent>) {
    let mut conns: HashMap<ConnId, mpsc::UnboundedSender<ServerEvent>> = HashMap::new();

    loop {
        let deadline = coordinator.next_deadline();
        tokio::select! {
            hub_event = rx.recv() => {
                let Some(hub_event) = hub_event else {
                    info!("All hub senders dropped, coordinator stopping");
                    break;
                };
                match hub_event {
                    HubEvent::Connected { conn, tx } => {
                        debug!(conn = %conn, "Connection registered");
                        conns.insert(conn, tx);
                    }
                    HubEvent::Inbound { conn, event } => {
                        let out = coordinator.handle_event(conn, event, Utc::now());
                        deliver(&conns, out);
                    }
                    HubEvent::Closed { conn } => {
                        conns.remove(&conn);
                        let out = coordinator.handle_disconnect(conn);
                        deliver(&conns, out);
                    }
                }
            }
            () = ring_alarm(deadline) => {
                let out = coordinator.expire(Utc::now());
                deliver(&conns, out);
            }
        }
    }
}

/// Resolves at the ringing deadline, or never when no call is ringing.
async fn ring_alarm(deadline: Option<DateTime<Utc>>) {
    match deadline {
        Some(at) => {
            let wait = (at - Utc::now())
                .to_std()
                .unwrap_or(std::time::Duration::ZERO);
            tokio::time::sleep(wait).await;
        }
        None => std::future::pending().await,
    }
}

fn deliver(conns: &HashMap<ConnId, mpsc::UnboundedSender<ServerEvent>>, out: Vec<Outbound>) {
    for outbound in out {
        match outbound {
            Outbound::Direct { to, event } => {
                if let Some(tx) = conns.get(&to) {
                    // A failed send means the socket is tearing down;
                    // its Closed notification is already on the way.
                    let _ = tx.send(event);
                }
            }
            Outbound::Broadcast { event } => {
                for tx in conns.values() {
                    let _ = tx.send(event.clone());
                }
            }
        }
    }
}

pub async fn ws_handler(State(hub): State<Hub>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.max_message_size(MAX_WS_FRAME_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, hub))
}

async fn handle_socket(socket: WebSocket, hub: Hub) {
    let conn = hub.mint_conn();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerEvent>();

    if hub
        .tx
        .send(HubEvent::Connected { conn, tx: out_tx })
        .is_err()
    {
        return;
    }
    info!(conn = %conn, "WebSocket connected");

    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(event) = out_rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(text) => {
                    if sink.send(WsMessage::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(e) => error!(error = %e, "Failed to encode outbound event"),
            }
        }
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => {
                    if hub.tx.send(HubEvent::Inbound { conn, event }).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(conn = %conn, error = %e, "Dropping malformed event");
                }
            },
            Ok(WsMessage::Close(_)) => break,
            // Pings are answered by axum itself; binary frames are not
            // part of the protocol.
            Ok(_) => {}
            Err(e) => {
                debug!(conn = %conn, error = %e, "WebSocket read error");
                break;
            }
        }
    }

    info!(conn = %conn, "WebSocket closed");
    let _ = hub.tx.send(HubEvent::Closed { conn });
    writer.abort();
}
