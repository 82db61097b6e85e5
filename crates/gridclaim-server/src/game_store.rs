use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use gridclaim_core::game::{Field, Game, GameError, GameId, GameState};

type SharedGame = Arc<Mutex<Game>>;

/// Authoritative in-memory registry of games.
///
/// The map lock is only held to look up or insert a game; every mutation runs
/// under that game's own mutex, so operations on different games never contend.
#[derive(Default)]
pub struct GameStore {
    games: RwLock<HashMap<GameId, SharedGame>>,
}

fn lock_game(game: &SharedGame) -> MutexGuard<'_, Game> {
    game.lock().unwrap_or_else(PoisonError::into_inner)
}

impl GameStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, game_id: &str) -> Result<SharedGame, GameError> {
        self.games
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(game_id)
            .cloned()
            .ok_or_else(|| GameError::GameNotFound(game_id.to_string()))
    }

    /// Run `f` with exclusive access to one game.
    fn with_game<T>(
        &self,
        game_id: &str,
        f: impl FnOnce(&mut Game) -> Result<T, GameError>,
    ) -> Result<T, GameError> {
        let game = self.get(game_id)?;
        let mut guard = lock_game(&game);
        f(&mut guard)
    }

    /// Create a game and return its id. An existing game with the same id is replaced.
    pub fn create_game(&self, name: &str, creator_name: &str) -> GameId {
        let game = Game::new(name, creator_name);
        let id = game.id.clone();
        self.insert_game(game);
        id
    }

    /// Store a freshly built game. Returns true if it replaced a game with the same id.
    pub fn insert_game(&self, game: Game) -> bool {
        let id = game.id.clone();
        let name = game.name.clone();
        let creator = game.players.first().map(|p| p.name.clone()).unwrap_or_default();
        let replaced = self
            .games
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), Arc::new(Mutex::new(game)))
            .is_some();
        if replaced {
            tracing::warn!(game_id = %id, %creator, "Game id collision, replaced existing game");
        }
        tracing::info!(game_id = %id, %name, %creator, "Game created");
        replaced
    }

    /// Snapshot of a game.
    pub fn retrieve_game(&self, game_id: &str) -> Option<Game> {
        let game = self.get(game_id).ok()?;
        let guard = lock_game(&game);
        Some(guard.clone())
    }

    /// Run `f` against a game while holding its lock. Join, start, play and end
    /// cannot interleave with `f`.
    pub fn inspect<T>(&self, game_id: &str, f: impl FnOnce(&Game) -> T) -> Option<T> {
        let game = self.get(game_id).ok()?;
        let guard = lock_game(&game);
        Some(f(&guard))
    }

    pub fn game_state(&self, game_id: &str) -> Option<GameState> {
        let game = self.get(game_id).ok()?;
        let state = lock_game(&game).state;
        Some(state)
    }

    /// Add a player to a game's roster. Re-joining members is a no-op success.
    pub fn join_game(&self, game_id: &str, player_name: &str) -> Result<GameId, GameError> {
        self.with_game(game_id, |game| {
            let was_member = game.is_member(player_name);
            game.join(player_name)?;
            if !was_member {
                tracing::info!(game_id, player = player_name, "Player joined roster");
            }
            Ok(game.id.clone())
        })
    }

    /// Start a waiting game on behalf of a member. Returns the started snapshot.
    pub fn start_game(&self, game_id: &str, requester: &str) -> Result<Game, GameError> {
        self.with_game(game_id, |game| {
            game.start(requester)?;
            tracing::info!(game_id, player = requester, "Game started");
            Ok(game.clone())
        })
    }

    /// Claim a field. Returns the updated field.
    pub fn play_position(
        &self,
        game_id: &str,
        player_name: &str,
        x: i32,
        y: i32,
    ) -> Result<Field, GameError> {
        self.with_game(game_id, |game| game.play(player_name, x, y))
    }

    /// End a started game and return its winners.
    pub fn end_game(&self, game_id: &str) -> Result<Vec<String>, GameError> {
        self.end_game_with(game_id, |_| ()).map(|(winners, ())| winners)
    }

    /// End a started game and run `on_end` before the game's lock is released,
    /// so nothing can observe the game as ended without also observing `on_end`.
    pub fn end_game_with<T>(
        &self,
        game_id: &str,
        on_end: impl FnOnce(&[String]) -> T,
    ) -> Result<(Vec<String>, T), GameError> {
        self.with_game(game_id, |game| {
            let winners = game.end()?;
            tracing::info!(
                game_id,
                scores = ?game.scores(),
                winners = ?winners,
                "Game ended"
            );
            let extra = on_end(&winners);
            Ok((winners, extra))
        })
    }

    /// Number of games ever created in this process.
    pub fn len(&self) -> usize {
        self.games
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
