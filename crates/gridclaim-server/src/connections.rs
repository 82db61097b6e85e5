use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::sync::mpsc;
use uuid::Uuid;

use gridclaim_core::game::GameId;
use gridclaim_core::net::messages::ServerMessage;
use gridclaim_core::net::protocol::encode_server_message;

/// Per-connection sender for outbound frames.
/// Bounded; a full queue drops frames for that connection only.
pub type ConnectionSender = mpsc::Sender<Bytes>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Handle to one open socket: its identity plus the queue feeding its writer task.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    sender: ConnectionSender,
}

impl Connection {
    pub fn new(sender: ConnectionSender) -> Self {
        Self {
            id: ConnectionId::new(),
            sender,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a frame without waiting. Returns false if the client is slow or gone.
    pub fn send(&self, data: Bytes) -> bool {
        match self.sender.try_send(data) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(conn_id = %self.id, error = %e, "Dropping frame for slow or closed connection");
                false
            },
        }
    }

    /// Encode and queue a message to this connection only.
    pub fn send_message(&self, msg: &ServerMessage) -> bool {
        match encode_server_message(msg) {
            Ok(data) => self.send(data),
            Err(e) => {
                tracing::error!(kind = msg.kind(), error = %e, "Failed to encode message");
                false
            },
        }
    }
}

struct PlayerConnections {
    player: String,
    connections: Vec<Connection>,
}

/// Players of one game in first-connect order.
#[derive(Default)]
struct GameConnections {
    players: Vec<PlayerConnections>,
}

impl GameConnections {
    fn snapshot(&self) -> Vec<Connection> {
        self.players
            .iter()
            .flat_map(|p| p.connections.iter().cloned())
            .collect()
    }
}

/// Result of removing a connection from one game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub game_id: GameId,
    pub player: String,
    /// The player has no connections left and was announced as gone.
    pub player_left: bool,
    /// The game has no connected players left and its entry was removed.
    pub game_empty: bool,
}

/// Tracks which sockets belong to which player of which game.
///
/// The registry never touches game state. Sends happen after the lock is
/// released, on a snapshot taken while it was held.
#[derive(Default)]
pub struct ConnectionRegistry {
    games: Mutex<HashMap<GameId, GameConnections>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<GameId, GameConnections>> {
        self.games.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach a connection to a player of a game.
    pub fn register(&self, game_id: &str, player: &str, conn: Connection) {
        let mut games = self.lock();
        let entry = games.entry(game_id.to_string()).or_default();
        let index = match entry.players.iter().position(|p| p.player == player) {
            Some(i) => i,
            None => {
                entry.players.push(PlayerConnections {
                    player: player.to_string(),
                    connections: Vec::new(),
                });
                entry.players.len() - 1
            },
        };
        let slot = &mut entry.players[index].connections;
        if !slot.iter().any(|c| c.id == conn.id) {
            tracing::debug!(game_id, player, conn_id = %conn.id, "Connection registered");
            slot.push(conn);
        }
    }

    /// Detach a connection from every game it was registered in.
    ///
    /// Players left with no connection are removed and announced to the rest of
    /// their game; games left with no players are removed entirely.
    pub fn unregister(&self, conn_id: ConnectionId) -> Vec<Departure> {
        let mut departures = Vec::new();
        let mut announcements: Vec<(Vec<Connection>, String)> = Vec::new();
        {
            let mut games = self.lock();
            for (game_id, entry) in games.iter_mut() {
                let Some(index) = entry
                    .players
                    .iter()
                    .position(|p| p.connections.iter().any(|c| c.id == conn_id))
                else {
                    continue;
                };
                let slot = &mut entry.players[index];
                slot.connections.retain(|c| c.id != conn_id);
                let player = slot.player.clone();
                let player_left = slot.connections.is_empty();
                if player_left {
                    entry.players.remove(index);
                    announcements.push((entry.snapshot(), player.clone()));
                }
                departures.push(Departure {
                    game_id: game_id.clone(),
                    player,
                    player_left,
                    game_empty: entry.players.is_empty(),
                });
            }
            games.retain(|_, entry| !entry.players.is_empty());
        }

        for (targets, player) in announcements {
            if targets.is_empty() {
                continue;
            }
            let msg = ServerMessage::PlayerLeft { player };
            if let Ok(data) = encode_server_message(&msg) {
                for conn in &targets {
                    conn.send(data.clone());
                }
            }
        }
        for d in &departures {
            tracing::debug!(game_id = %d.game_id, player = %d.player, conn_id = %conn_id, player_left = d.player_left, "Connection unregistered");
        }
        departures
    }

    /// Every connection of a game at this instant.
    pub fn snapshot(&self, game_id: &str) -> Vec<Connection> {
        self.lock()
            .get(game_id)
            .map(GameConnections::snapshot)
            .unwrap_or_default()
    }

    /// Send a frame to every connection registered for the game when the call
    /// begins. Returns how many connections accepted it.
    pub fn broadcast(&self, game_id: &str, data: Bytes) -> usize {
        let targets = self.snapshot(game_id);
        targets.iter().filter(|c| c.send(data.clone())).count()
    }

    /// Encode and broadcast a message to a game.
    pub fn broadcast_message(&self, game_id: &str, msg: &ServerMessage) -> usize {
        match encode_server_message(msg) {
            Ok(data) => self.broadcast(game_id, data),
            Err(e) => {
                tracing::error!(game_id, kind = msg.kind(), error = %e, "Failed to encode broadcast");
                0
            },
        }
    }

    /// Direct reply to one connection, registered or not.
    pub fn send_to(&self, conn: &Connection, msg: &ServerMessage) -> bool {
        conn.send_message(msg)
    }

    /// Names of players holding at least one connection, in first-connect order.
    pub fn online_players(&self, game_id: &str) -> Vec<String> {
        self.lock()
            .get(game_id)
            .map(|entry| entry.players.iter().map(|p| p.player.clone()).collect())
            .unwrap_or_default()
    }

    /// Remove a game's entry and hand back the connections it held.
    pub fn take_game(&self, game_id: &str) -> Vec<Connection> {
        self.lock()
            .remove(game_id)
            .map(|entry| entry.snapshot())
            .unwrap_or_default()
    }

    pub fn has_game(&self, game_id: &str) -> bool {
        self.lock().contains_key(game_id)
    }

    /// (games with connections, registered connections)
    pub fn stats(&self) -> (usize, usize) {
        let games = self.lock();
        let connections = games
            .values()
            .map(|g| g.players.iter().map(|p| p.connections.len()).sum::<usize>())
            .sum();
        (games.len(), connections)
    }
}
