//! WebSocket gateway for players
//!
//! [`ConnectionBroadcaster`] keeps the game → connections and user →
//! connection maps, fans game events out to subscribers and routes inbound
//! claims to the hall. A connection going away only removes it from the
//! maps; the game keeps drawing for everyone else.
//!
//! Each user has one live session. When `api.session_secret` is set the
//! user id on `/ws` must come with a matching session token; otherwise the
//! id is trusted and authentication is left to the gateway in front.

use super::auth::verify_session_token;
use super::handlers::AppState;
use crate::games::types::{
    now_millis, CardId, CategoryPrizes, Claim, ClaimKind, ClaimVerdict, CompletionReason, GameEvent,
    GameEventSink, GameId, GameSnapshot, Payout, SettlementStatus, UserId, WinnerRecord,
};
use crate::config::ApiConfig;
use crate::hall::BingoHall;
use crate::metrics::HallMetrics;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub type ConnectionId = u64;

/// Messages a player may send
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    JoinGame { game_id: GameId },
    LeaveGame { game_id: GameId },
    ClaimQuine { game_id: GameId, card_id: CardId },
    ClaimBingo { game_id: GameId, card_id: CardId },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Winners {
    pub quine: Vec<WinnerRecord>,
    pub bingo: Vec<WinnerRecord>,
}

/// Messages pushed to players
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Current state, sent once after JOIN_GAME
    GameState { game: Box<GameSnapshot> },
    NumberDrawn {
        game_id: GameId,
        number: u8,
        sequence_index: u32,
    },
    /// Immediate acknowledgement to the claimant
    ClaimReceived { claim: Claim },
    ClaimValidated { claim: Claim, result: ClaimVerdict },
    GameCompleted {
        game_id: GameId,
        reason: CompletionReason,
        winners: Winners,
        prizes: CategoryPrizes,
        payouts: Vec<Payout>,
        settlement: SettlementStatus,
    },
    Error { code: String, message: String },
}

impl ServerMessage {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl From<GameEvent> for ServerMessage {
    fn from(event: GameEvent) -> Self {
        match event {
            GameEvent::NumberDrawn {
                game_id,
                number,
                sequence_index,
            } => ServerMessage::NumberDrawn {
                game_id,
                number,
                sequence_index,
            },
            GameEvent::GameCompleted {
                game_id,
                reason,
                quine_winners,
                bingo_winners,
                payouts,
                prizes,
                settlement,
            } => ServerMessage::GameCompleted {
                game_id,
                reason,
                winners: Winners {
                    quine: quine_winners,
                    bingo: bingo_winners,
                },
                prizes,
                payouts,
                settlement,
            },
        }
    }
}

struct Connection {
    user_id: UserId,
    outbound: mpsc::Sender<ServerMessage>,
    games: HashSet<GameId>,
}

/// Outbound messages buffered per connection before it counts as stalled
pub const OUTBOUND_BUFFER: usize = 256;

pub struct ConnectionBroadcaster {
    next_id: AtomicU64,
    connections: DashMap<ConnectionId, Connection>,
    games: DashMap<GameId, HashSet<ConnectionId>>,
    users: DashMap<UserId, ConnectionId>,
    metrics: Option<Arc<HallMetrics>>,
}

impl ConnectionBroadcaster {
    pub fn new(metrics: Option<Arc<HallMetrics>>) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            connections: DashMap::new(),
            games: DashMap::new(),
            users: DashMap::new(),
            metrics,
        }
    }

    /// Register an authenticated connection. A user's earlier session is told
    /// it was replaced and then dropped.
    pub fn connect(&self, user_id: UserId) -> (ConnectionId, mpsc::Receiver<ServerMessage>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (outbound, rx) = mpsc::channel(OUTBOUND_BUFFER);
        self.connections.insert(
            id,
            Connection {
                user_id: user_id.clone(),
                outbound,
                games: HashSet::new(),
            },
        );
        let previous = self.users.insert(user_id.clone(), id);
        if let Some(m) = &self.metrics {
            m.websocket_connections.inc();
        }

        if let Some(previous) = previous {
            info!(connection = previous, user_id = %user_id, "Session replaced by a newer connection");
            self.send_to(previous, ServerMessage::error("SESSION_REPLACED", "signed in from another connection"));
            self.unsubscribe(previous);
        }
        (id, rx)
    }

    pub fn subscribe(&self, connection: ConnectionId, game_id: GameId) -> bool {
        let Some(mut conn) = self.connections.get_mut(&connection) else {
            return false;
        };
        conn.games.insert(game_id);
        drop(conn);
        self.games.entry(game_id).or_default().insert(connection);
        debug!(connection, game_id = %game_id, "Subscribed");
        true
    }

    /// Stop receiving events for one game
    pub fn leave(&self, connection: ConnectionId, game_id: GameId) {
        if let Some(mut conn) = self.connections.get_mut(&connection) {
            conn.games.remove(&game_id);
        }
        self.remove_from_game(connection, game_id);
    }

    fn remove_from_game(&self, connection: ConnectionId, game_id: GameId) {
        let emptied = match self.games.get_mut(&game_id) {
            Some(mut subscribers) => {
                subscribers.remove(&connection);
                subscribers.is_empty()
            }
            None => false,
        };
        if emptied {
            self.games.remove_if(&game_id, |_, subscribers| subscribers.is_empty());
        }
    }

    /// Drop a connection from every map. Called on disconnect.
    pub fn unsubscribe(&self, connection: ConnectionId) {
        let Some((_, conn)) = self.connections.remove(&connection) else {
            return;
        };
        for game_id in &conn.games {
            self.remove_from_game(connection, *game_id);
        }
        self.users.remove_if(&conn.user_id, |_, current| *current == connection);
        if let Some(m) = &self.metrics {
            m.websocket_connections.dec();
        }
        debug!(connection, user_id = %conn.user_id, "Connection removed");
    }

    /// Queue a message for one connection. A stalled or closed connection is dropped.
    pub fn send_to(&self, connection: ConnectionId, message: ServerMessage) -> bool {
        let result = match self.connections.get(&connection) {
            Some(conn) => conn.outbound.try_send(message),
            None => return false,
        };
        match result {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(connection, "Outbound buffer full, dropping connection");
                self.unsubscribe(connection);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.unsubscribe(connection);
                false
            }
        }
    }

    fn subscribers(&self, game_id: GameId) -> Vec<ConnectionId> {
        self.games
            .get(&game_id)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Fan a message out to every subscriber of a game
    pub fn broadcast(&self, game_id: GameId, message: ServerMessage) -> usize {
        self.broadcast_except(game_id, message, None)
    }

    fn broadcast_except(&self, game_id: GameId, message: ServerMessage, skip: Option<ConnectionId>) -> usize {
        let mut delivered = 0;
        for id in self.subscribers(game_id) {
            if Some(id) == skip {
                continue;
            }
            if self.send_to(id, message.clone()) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Forward a claim to its game. The claimant gets the acknowledgement and
    /// the verdict; other subscribers see the verdict only when it is a win.
    pub async fn route_claim(
        &self,
        connection: ConnectionId,
        game_id: GameId,
        card_id: CardId,
        kind: ClaimKind,
        hall: &BingoHall,
    ) -> Option<ClaimVerdict> {
        let user_id = self.connections.get(&connection)?.user_id.clone();
        let claim = Claim {
            game_id,
            card_id,
            user_id,
            kind,
            submitted_at: now_millis(),
        };

        self.send_to(connection, ServerMessage::ClaimReceived { claim: claim.clone() });

        let verdict = match hall.submit_claim(claim.clone()).await {
            Ok(verdict) => verdict,
            Err(e) => {
                debug!(game_id = %game_id, card_id = %card_id, "Claim rejected: {}", e);
                ClaimVerdict::rejected(e.code(), e.to_string())
            }
        };

        let message = ServerMessage::ClaimValidated {
            claim,
            result: verdict.clone(),
        };
        if verdict.valid {
            self.broadcast_except(game_id, message.clone(), Some(connection));
        }
        self.send_to(connection, message);
        Some(verdict)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn subscriber_count(&self, game_id: GameId) -> usize {
        self.games.get(&game_id).map(|s| s.len()).unwrap_or(0)
    }
}

impl GameEventSink for ConnectionBroadcaster {
    fn publish(&self, game_id: GameId, event: GameEvent) {
        let delivered = self.broadcast(game_id, event.into());
        debug!(game_id = %game_id, delivered, "Event fanned out");
    }
}

/// GET /ws query
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub user_id: String,
    pub token: Option<String>,
}

/// Resolve the player a socket acts for
pub fn authorize(api: &ApiConfig, query: &WsQuery) -> Result<UserId, (StatusCode, &'static str)> {
    let user_id = query.user_id.trim();
    if user_id.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "user_id is required"));
    }
    let user_id = UserId::new(user_id);

    if let Some(secret) = &api.session_secret {
        match query.token.as_deref() {
            Some(token) if verify_session_token(secret, &user_id, token) => {}
            _ => return Err((StatusCode::UNAUTHORIZED, "invalid session token")),
        }
    }
    Ok(user_id)
}

/// GET /ws?user_id=...&token=...
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    match authorize(&state.hall.config().api, &params) {
        Ok(user_id) => ws.on_upgrade(move |socket| handle_socket(socket, user_id, state)),
        Err(rejection) => {
            debug!(user_id = %params.user_id, "WebSocket connection refused: {}", rejection.1);
            rejection.into_response()
        }
    }
}

async fn handle_socket(socket: WebSocket, user_id: UserId, state: Arc<AppState>) {
    let broadcaster = state.broadcaster.clone();
    let (connection, mut outbound) = broadcaster.connect(user_id.clone());
    info!(connection, user_id = %user_id, total = broadcaster.connection_count(), "🔌 Player connected");

    let (mut sender, mut receiver) = socket.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to serialize server message: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    // The send task ends once the broadcaster drops this connection
    loop {
        tokio::select! {
            frame = receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => handle_client_message(&state, connection, &text).await,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(connection, "WebSocket error: {}", e);
                    break;
                }
            },
            _ = &mut send_task => break,
        }
    }

    broadcaster.unsubscribe(connection);
    send_task.abort();
    info!(connection, user_id = %user_id, remaining = broadcaster.connection_count(), "🔌 Player disconnected");
}

/// Subscribe before reading the snapshot so no draw falls between the two.
/// A draw in that gap arrives both as NUMBER_DRAWN and inside GAME_STATE;
/// clients de-duplicate on `sequenceIndex`.
pub fn join_game(broadcaster: &ConnectionBroadcaster, hall: &BingoHall, connection: ConnectionId, game_id: GameId) {
    if let Err(e) = hall.get_game_state(game_id) {
        broadcaster.send_to(connection, ServerMessage::error(e.code(), e.to_string()));
        return;
    }
    if !broadcaster.subscribe(connection, game_id) {
        return;
    }
    match hall.get_game_state(game_id) {
        Ok(snapshot) => {
            broadcaster.send_to(
                connection,
                ServerMessage::GameState {
                    game: Box::new(snapshot),
                },
            );
        }
        Err(e) => {
            broadcaster.leave(connection, game_id);
            broadcaster.send_to(connection, ServerMessage::error(e.code(), e.to_string()));
        }
    }
}

async fn handle_client_message(state: &AppState, connection: ConnectionId, text: &str) {
    let broadcaster = &state.broadcaster;
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            broadcaster.send_to(connection, ServerMessage::error("BAD_REQUEST", format!("Malformed message: {}", e)));
            return;
        }
    };

    match message {
        ClientMessage::JoinGame { game_id } => join_game(broadcaster, &state.hall, connection, game_id),
        ClientMessage::LeaveGame { game_id } => broadcaster.leave(connection, game_id),
        ClientMessage::ClaimQuine { game_id, card_id } => {
            broadcaster
                .route_claim(connection, game_id, card_id, ClaimKind::Quine, &state.hall)
                .await;
        }
        ClientMessage::ClaimBingo { game_id, card_id } => {
            broadcaster
                .route_claim(connection, game_id, card_id, ClaimKind::Bingo, &state.hall)
                .await;
        }
    }
}
