pub mod game;
pub mod net;
pub mod player;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers {
    use crate::game::Game;

    /// Create a waiting game owned by the first name, with the rest joined in order.
    pub fn make_game(name: &str, players: &[&str]) -> Game {
        let (creator, rest) = players
            .split_first()
            .expect("make_game needs at least one player");
        let mut game = Game::new(name, *creator);
        for p in rest {
            game.join(p).expect("test roster exceeds palette");
        }
        game
    }

    /// Same as [`make_game`], then started by the creator.
    pub fn make_started_game(name: &str, players: &[&str]) -> Game {
        let mut game = make_game(name, players);
        game.start(players[0]).expect("fresh game must start");
        game
    }
}
