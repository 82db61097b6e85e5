use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::player::{Player, PlayerColor};

/// Stable identifier of a game, derived from the creator and game name.
pub type GameId = String;

/// Number of grid rows in every game.
pub const GRID_ROWS: u8 = 4;
/// Number of grid columns in every game.
pub const GRID_COLUMNS: u8 = 4;

/// Lifecycle of a game. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GameState {
    Waiting,
    Started,
    Ended,
}

impl fmt::Display for GameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Waiting => write!(f, "waiting"),
            Self::Started => write!(f, "started"),
            Self::Ended => write!(f, "ended"),
        }
    }
}

/// One claimable grid cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub row: u8,
    pub column: u8,
    /// Name of the owning player, once claimed.
    pub owned: Option<String>,
}

/// Owned-field tally for one player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerScore {
    pub player: String,
    pub score: usize,
}

/// Why a claim on a field was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveRejection {
    OutOfBounds,
    AlreadyOwned,
}

/// Outcomes of game operations that did not apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameError {
    GameNotFound(GameId),
    PlayerNotFound(String),
    /// The action is not valid in the game's current state.
    InvalidState { state: GameState },
    InvalidMove { x: i32, y: i32, reason: MoveRejection },
    /// The roster already holds one player per palette color.
    Capacity { max: usize },
}

impl fmt::Display for GameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GameNotFound(id) => write!(f, "game not found: {id}"),
            Self::PlayerNotFound(name) => write!(f, "player not found: {name}"),
            Self::InvalidState { state } => write!(f, "action not allowed while game is {state}"),
            Self::InvalidMove {
                x,
                y,
                reason: MoveRejection::OutOfBounds,
            } => write!(f, "field ({x}, {y}) is outside the grid"),
            Self::InvalidMove {
                x,
                y,
                reason: MoveRejection::AlreadyOwned,
            } => write!(f, "field ({x}, {y}) is already owned"),
            Self::Capacity { max } => write!(f, "game is full ({max} players)"),
        }
    }
}

impl std::error::Error for GameError {}

/// Derive the game id from the creator and game name.
///
/// The same pair always yields the same id; distinct pairs that concatenate to the
/// same string collide.
pub fn derive_game_id(creator_name: &str, game_name: &str) -> GameId {
    let mut hasher = Sha256::new();
    hasher.update(creator_name.as_bytes());
    hasher.update(game_name.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..16])
}

/// Authoritative state of one game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Game {
    pub id: GameId,
    pub name: String,
    pub state: GameState,
    pub players: Vec<Player>,
    /// Row-major grid, `row_n * column_n` entries.
    pub fields: Vec<Field>,
    pub row_n: u8,
    pub column_n: u8,
}

impl Game {
    /// New waiting game with an unowned grid and the creator as sole player.
    pub fn new(name: impl Into<String>, creator_name: impl Into<String>) -> Self {
        let name = name.into();
        let creator_name = creator_name.into();
        let fields = (0..GRID_ROWS)
            .flat_map(|row| {
                (0..GRID_COLUMNS).map(move |column| Field {
                    row,
                    column,
                    owned: None,
                })
            })
            .collect();

        Self {
            id: derive_game_id(&creator_name, &name),
            name,
            state: GameState::Waiting,
            players: vec![Player {
                name: creator_name,
                color: PlayerColor::default(),
            }],
            fields,
            row_n: GRID_ROWS,
            column_n: GRID_COLUMNS,
        }
    }

    pub fn is_member(&self, player_name: &str) -> bool {
        self.players.iter().any(|p| p.name == player_name)
    }

    pub fn field(&self, row: u8, column: u8) -> Option<&Field> {
        if row >= self.row_n || column >= self.column_n {
            return None;
        }
        self.fields
            .get(usize::from(row) * usize::from(self.column_n) + usize::from(column))
    }

    /// Add a player to the roster.
    ///
    /// Existing members are accepted in any state without changes. New players
    /// are only accepted while waiting and while palette colors remain.
    pub fn join(&mut self, player_name: &str) -> Result<(), GameError> {
        if self.is_member(player_name) {
            return Ok(());
        }
        if self.state != GameState::Waiting {
            return Err(GameError::InvalidState { state: self.state });
        }
        let color =
            PlayerColor::for_join_order(self.players.len()).ok_or(GameError::Capacity {
                max: PlayerColor::PALETTE.len(),
            })?;
        self.players.push(Player {
            name: player_name.to_string(),
            color,
        });
        Ok(())
    }

    /// Move from waiting to started on behalf of a member.
    pub fn start(&mut self, requester: &str) -> Result<(), GameError> {
        if self.state != GameState::Waiting {
            return Err(GameError::InvalidState { state: self.state });
        }
        if !self.is_member(requester) {
            return Err(GameError::PlayerNotFound(requester.to_string()));
        }
        self.state = GameState::Started;
        Ok(())
    }

    /// Claim the field at row `x`, column `y`. First claim wins.
    pub fn play(&mut self, player_name: &str, x: i32, y: i32) -> Result<Field, GameError> {
        if self.state != GameState::Started {
            return Err(GameError::InvalidState { state: self.state });
        }
        if !self.is_member(player_name) {
            return Err(GameError::PlayerNotFound(player_name.to_string()));
        }
        let out_of_bounds = GameError::InvalidMove {
            x,
            y,
            reason: MoveRejection::OutOfBounds,
        };
        let (Ok(row), Ok(column)) = (u8::try_from(x), u8::try_from(y)) else {
            return Err(out_of_bounds);
        };
        if row >= self.row_n || column >= self.column_n {
            return Err(out_of_bounds);
        }

        let index = usize::from(row) * usize::from(self.column_n) + usize::from(column);
        let field = self.fields.get_mut(index).ok_or(out_of_bounds)?;
        if field.owned.is_some() {
            return Err(GameError::InvalidMove {
                x,
                y,
                reason: MoveRejection::AlreadyOwned,
            });
        }
        field.owned = Some(player_name.to_string());
        Ok(field.clone())
    }

    /// Owned-field count for every roster player, in roster order.
    pub fn scores(&self) -> Vec<PlayerScore> {
        self.players
            .iter()
            .map(|p| PlayerScore {
                player: p.name.clone(),
                score: self
                    .fields
                    .iter()
                    .filter(|f| f.owned.as_deref() == Some(p.name.as_str()))
                    .count(),
            })
            .collect()
    }

    /// Every player whose score equals the maximum, in roster order.
    pub fn winners(&self) -> Vec<String> {
        let scores = self.scores();
        let Some(best) = scores.iter().map(|s| s.score).max() else {
            return Vec::new();
        };
        scores
            .into_iter()
            .filter(|s| s.score == best)
            .map(|s| s.player)
            .collect()
    }

    /// Move from started to ended and resolve the winners.
    pub fn end(&mut self) -> Result<Vec<String>, GameError> {
        if self.state != GameState::Started {
            return Err(GameError::InvalidState { state: self.state });
        }
        self.state = GameState::Ended;
        Ok(self.winners())
    }
}
