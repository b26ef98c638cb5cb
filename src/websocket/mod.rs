//! WebSocket server for real-time batch lifecycle updates

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{broadcast::error::RecvError, mpsc, RwLock};
use uuid::Uuid;

use crate::events::{EventBus, LifecycleEvent};

/// WebSocket server state
#[derive(Clone)]
pub struct WsState {
    events: EventBus,
    /// Connected clients registry
    clients: Arc<RwLock<HashMap<String, ClientInfo>>>,
}

/// Client connection information
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    /// Empty means every batch
    pub subscribed_batches: HashSet<u64>,
}

impl ClientInfo {
    fn wants(&self, event: &LifecycleEvent) -> bool {
        self.subscribed_batches.is_empty() || self.subscribed_batches.contains(&event.batch_id())
    }
}

/// Client message types
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ClientMessage {
    Subscribe { batch_ids: Vec<u64> },
    Unsubscribe { batch_ids: Vec<u64> },
    Ping,
}

/// Server message types
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ServerMessage {
    Event { event: LifecycleEvent },
    Subscribed { batch_ids: Vec<u64> },
    Unsubscribed { batch_ids: Vec<u64> },
    Pong,
    Error { message: String },
}

impl WsState {
    pub fn new(events: EventBus) -> Self {
        Self {
            events,
            clients: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    async fn register_client(&self, client_id: String) {
        self.clients
            .write()
            .await
            .insert(client_id, ClientInfo::default());
    }

    async fn unregister_client(&self, client_id: &str) {
        self.clients.write().await.remove(client_id);
        tracing::info!("Client {} disconnected", client_id);
    }

    async fn subscribe(&self, client_id: &str, batch_ids: &[u64]) {
        let mut clients = self.clients.write().await;
        if let Some(client) = clients.get_mut(client_id) {
            client.subscribed_batches.extend(batch_ids.iter().copied());
        }
    }

    async fn unsubscribe(&self, client_id: &str, batch_ids: &[u64]) {
        let mut clients = self.clients.write().await;
        if let Some(client) = clients.get_mut(client_id) {
            for id in batch_ids {
                client.subscribed_batches.remove(id);
            }
        }
    }

    async fn should_forward(&self, client_id: &str, event: &LifecycleEvent) -> bool {
        self.clients
            .read()
            .await
            .get(client_id)
            .map_or(false, |client| client.wants(event))
    }
}

/// WebSocket handler - upgrades HTTP connection to WebSocket
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<WsState>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: WsState) {
    let client_id = Uuid::new_v4().to_string();
    state.register_client(client_id.clone()).await;
    tracing::info!("Client {} connected", client_id);

    let (mut sender, mut receiver) = socket.split();

    // Replies from recv_task go out through the send task
    let (internal_tx, mut internal_rx) = mpsc::channel::<ServerMessage>(32);

    let mut rx = state.events.subscribe();
    let send_state = state.clone();
    let send_client_id = client_id.clone();

    let mut send_task = tokio::spawn(async move {
        loop {
            let outgoing = tokio::select! {
                received = rx.recv() => match received {
                    Ok(event) => {
                        if !send_state.should_forward(&send_client_id, &event).await {
                            continue;
                        }
                        ServerMessage::Event { event }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("Client {} lagged, {} events dropped", send_client_id, skipped);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
                Some(msg) = internal_rx.recv() => msg,
                else => break,
            };

            if let Ok(text) = serde_json::to_string(&outgoing) {
                if sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        }
    });

    let recv_state = state.clone();
    let recv_client_id = client_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    let reply = match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(ClientMessage::Subscribe { batch_ids }) => {
                            recv_state.subscribe(&recv_client_id, &batch_ids).await;
                            tracing::info!("Client {} subscribed to {:?}", recv_client_id, batch_ids);
                            ServerMessage::Subscribed { batch_ids }
                        }
                        Ok(ClientMessage::Unsubscribe { batch_ids }) => {
                            recv_state.unsubscribe(&recv_client_id, &batch_ids).await;
                            tracing::info!("Client {} unsubscribed from {:?}", recv_client_id, batch_ids);
                            ServerMessage::Unsubscribed { batch_ids }
                        }
                        Ok(ClientMessage::Ping) => {
                            tracing::debug!("Ping from client {}", recv_client_id);
                            ServerMessage::Pong
                        }
                        Err(e) => ServerMessage::Error {
                            message: format!("Unrecognized message: {}", e),
                        },
                    };
                    if internal_tx.send(reply).await.is_err() {
                        break;
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    state.unregister_client(&client_id).await;
}
