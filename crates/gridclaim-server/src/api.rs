use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};

use gridclaim_core::game::{Game, GameId};

use crate::error::AppError;
use crate::state::AppState;

const MAX_NAME_LEN: usize = 32;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGameBody {
    pub game_name: String,
    pub player_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinGameBody {
    pub player_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameIdResponse {
    pub game_id: GameId,
}

#[derive(Debug, Deserialize)]
pub struct GameQuery {
    pub player: Option<String>,
}

/// Trim a display name and reject empty, overlong or control-character names.
fn validate_name(field: &str, raw: &str) -> Result<String, AppError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest(format!("{field} must not be empty")));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(AppError::BadRequest(format!(
            "{field} exceeds {MAX_NAME_LEN} chars"
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(AppError::BadRequest(format!(
            "{field} contains control characters"
        )));
    }
    Ok(name.to_string())
}

/// POST /api/v1/games: create a game with its first player.
pub async fn create_game(
    State(state): State<AppState>,
    Json(body): Json<CreateGameBody>,
) -> Result<(StatusCode, Json<GameIdResponse>), AppError> {
    let game_name = validate_name("gameName", &body.game_name)?;
    let player_name = validate_name("playerName", &body.player_name)?;
    let game = Game::new(&game_name, &player_name);
    let game_id = game.id.clone();
    if state.store.insert_game(game) {
        // Timers of the replaced game must not drive the new one
        state.scheduler.cancel_game(&game_id);
    }
    Ok((StatusCode::CREATED, Json(GameIdResponse { game_id })))
}

/// POST /api/v1/games/{game_id}/players: add a player to a waiting game.
pub async fn join_game(
    State(state): State<AppState>,
    Path(game_id): Path<String>,
    Json(body): Json<JoinGameBody>,
) -> Result<Json<GameIdResponse>, AppError> {
    let player_name = validate_name("playerName", &body.player_name)?;
    let game_id = state.store.join_game(&game_id, &player_name)?;
    Ok(Json(GameIdResponse { game_id }))
}

/// GET /api/v1/games/{game_id}: current snapshot, optionally only for a member.
pub async fn get_game(
    State(state): State<AppState>,
    Path(game_id): Path<String>,
    Query(query): Query<GameQuery>,
) -> Result<Json<Game>, AppError> {
    let game = state
        .store
        .retrieve_game(&game_id)
        .ok_or_else(|| AppError::NotFound(format!("game not found: {game_id}")))?;
    if let Some(player) = query.player
        && !game.is_member(&player)
    {
        return Err(AppError::NotFound(format!("player not found: {player}")));
    }
    Ok(Json(game))
}
