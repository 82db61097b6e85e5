use serde::{Deserialize, Serialize};

use crate::game::{Field, Game, GameId};

/// Messages sent from a browser client to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    Join { player: String, game_id: GameId },
    #[serde(rename_all = "camelCase")]
    StartGame { player: String, game_id: GameId },
    #[serde(rename_all = "camelCase")]
    PlayPosition {
        player: String,
        game_id: GameId,
        x: i32,
        y: i32,
    },
}

impl ClientMessage {
    /// Game the message targets.
    pub fn game_id(&self) -> &str {
        match self {
            Self::Join { game_id, .. }
            | Self::StartGame { game_id, .. }
            | Self::PlayPosition { game_id, .. } => game_id,
        }
    }

    /// Player the message claims to come from.
    pub fn player(&self) -> &str {
        match self {
            Self::Join { player, .. }
            | Self::StartGame { player, .. }
            | Self::PlayPosition { player, .. } => player,
        }
    }
}

/// Messages sent from the server to connected clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    GameNotFound { game_id: GameId },
    PlayerNotFound { player: String },
    /// Full snapshot sent to every connection whenever someone (re)joins.
    JoinGame { game: Game },
    GameStarted { game: Game },
    PlayerLeft { player: String },
    OnlinePlayers { players: Vec<String> },
    UpdateGamePosition { field: Field },
    #[serde(rename_all = "camelCase")]
    TimerUpdate { time_left: i64 },
    GameOver { winners: Vec<String> },
}

impl ServerMessage {
    /// Wire tag of the message, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::GameNotFound { .. } => "gameNotFound",
            Self::PlayerNotFound { .. } => "playerNotFound",
            Self::JoinGame { .. } => "joinGame",
            Self::GameStarted { .. } => "gameStarted",
            Self::PlayerLeft { .. } => "playerLeft",
            Self::OnlinePlayers { .. } => "onlinePlayers",
            Self::UpdateGamePosition { .. } => "updateGamePosition",
            Self::TimerUpdate { .. } => "timerUpdate",
            Self::GameOver { .. } => "gameOver",
        }
    }
}
