use std::sync::Arc;

use gridclaim_core::game::{Game, GameError, GameState};
use gridclaim_core::net::messages::{ClientMessage, ServerMessage};

use crate::connections::{Connection, ConnectionId, ConnectionRegistry, Departure};
use crate::game_store::GameStore;
use crate::scheduler::BroadcastScheduler;

enum JoinOutcome {
    Registered,
    Ended(Game),
    NotMember(GameState),
}

/// Applies inbound client messages to the store and fans out the results.
pub struct MessageRouter {
    store: Arc<GameStore>,
    connections: Arc<ConnectionRegistry>,
    scheduler: Arc<BroadcastScheduler>,
}

impl MessageRouter {
    pub fn new(
        store: Arc<GameStore>,
        connections: Arc<ConnectionRegistry>,
        scheduler: Arc<BroadcastScheduler>,
    ) -> Self {
        Self {
            store,
            connections,
            scheduler,
        }
    }

    pub fn dispatch(&self, conn: &Connection, msg: ClientMessage) {
        tracing::debug!(
            conn_id = %conn.id(),
            game_id = msg.game_id(),
            player = msg.player(),
            "Inbound message"
        );
        if self.store.game_state(msg.game_id()).is_none() {
            self.reply_game_not_found(conn, msg.game_id());
            return;
        }

        match msg {
            ClientMessage::Join { player, game_id } => {
                self.handle_join(conn, &game_id, &player);
            },
            ClientMessage::StartGame { player, game_id } => {
                self.handle_start(conn, &game_id, &player);
            },
            ClientMessage::PlayPosition {
                player,
                game_id,
                x,
                y,
            } => self.handle_play(&game_id, &player, x, y),
        }
    }

    fn handle_join(&self, conn: &Connection, game_id: &str, player: &str) {
        // Registration and the snapshot share the game's lock: any move or end of
        // the game lands either in the snapshot or after this connection is listed.
        let outcome = self.store.inspect(game_id, |game| {
            if !game.is_member(player) {
                return JoinOutcome::NotMember(game.state);
            }
            if game.state == GameState::Ended {
                return JoinOutcome::Ended(game.clone());
            }
            self.connections.register(game_id, player, conn.clone());
            // Queued before the lock is released so it precedes any later gameOver
            self.connections.broadcast_message(
                game_id,
                &ServerMessage::JoinGame { game: game.clone() },
            );
            JoinOutcome::Registered
        });

        let Some(outcome) = outcome else {
            self.reply_game_not_found(conn, game_id);
            return;
        };
        match outcome {
            JoinOutcome::Registered => {
                self.scheduler.ensure_heartbeat(game_id);
            },
            JoinOutcome::Ended(game) => {
                // Not registered: the game will never broadcast again
                let winners = game.winners();
                self.connections.send_to(conn, &ServerMessage::JoinGame { game });
                self.connections
                    .send_to(conn, &ServerMessage::GameOver { winners });
            },
            // Roster membership only comes from the HTTP API
            JoinOutcome::NotMember(GameState::Waiting) => {
                self.connections.send_to(
                    conn,
                    &ServerMessage::PlayerNotFound {
                        player: player.to_string(),
                    },
                );
            },
            JoinOutcome::NotMember(_) => self.reply_game_not_found(conn, game_id),
        }
    }

    fn handle_start(&self, conn: &Connection, game_id: &str, player: &str) {
        match self.store.start_game(game_id, player) {
            Ok(game) => {
                self.scheduler.start_countdown(game_id);
                self.connections
                    .broadcast_message(game_id, &ServerMessage::GameStarted { game });
            },
            Err(GameError::InvalidState { .. } | GameError::GameNotFound(_)) => {
                self.reply_game_not_found(conn, game_id);
            },
            Err(e) => {
                tracing::debug!(game_id, player, error = %e, "startGame ignored");
            },
        }
    }

    fn handle_play(&self, game_id: &str, player: &str, x: i32, y: i32) {
        match self.store.play_position(game_id, player, x, y) {
            Ok(field) => {
                self.connections
                    .broadcast_message(game_id, &ServerMessage::UpdateGamePosition { field });
            },
            Err(e) => {
                tracing::debug!(game_id, player, x, y, error = %e, "playPosition ignored");
            },
        }
    }

    fn reply_game_not_found(&self, conn: &Connection, game_id: &str) {
        self.connections.send_to(
            conn,
            &ServerMessage::GameNotFound {
                game_id: game_id.to_string(),
            },
        );
    }

    /// Forget a closed connection. Games left without connections lose their heartbeat.
    pub fn disconnect(&self, conn_id: ConnectionId) -> Vec<Departure> {
        let departures = self.connections.unregister(conn_id);
        for d in &departures {
            if d.player_left {
                tracing::info!(game_id = %d.game_id, player = %d.player, "Player left");
            }
            if d.game_empty {
                self.scheduler.cancel_heartbeat_if_idle(&d.game_id);
            }
        }
        departures
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use tokio::sync::mpsc;

    use super::*;
    use crate::config::TimersConfig;
    use crate::scheduler::TaskKind;
    use gridclaim_core::game::Field;
    use gridclaim_core::net::protocol::decode_server_message;

    struct Fixture {
        store: Arc<GameStore>,
        connections: Arc<ConnectionRegistry>,
        scheduler: Arc<BroadcastScheduler>,
        router: MessageRouter,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(GameStore::new());
        let connections = Arc::new(ConnectionRegistry::new());
        let scheduler = Arc::new(BroadcastScheduler::new(
            Arc::clone(&store),
            Arc::clone(&connections),
            TimersConfig {
                heartbeat_interval_ms: 60_000,
                countdown_tick_ms: 60_000,
                countdown_secs: 60,
            },
        ));
        let router = MessageRouter::new(
            Arc::clone(&store),
            Arc::clone(&connections),
            Arc::clone(&scheduler),
        );
        Fixture {
            store,
            connections,
            scheduler,
            router,
        }
    }

    fn client() -> (Connection, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(32);
        (Connection::new(tx), rx)
    }

    fn drain(rx: &mut mpsc::Receiver<Bytes>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(data) = rx.try_recv() {
            out.push(decode_server_message(&data).unwrap());
        }
        out
    }

    fn join(player: &str, game_id: &str) -> ClientMessage {
        ClientMessage::Join {
            player: player.into(),
            game_id: game_id.into(),
        }
    }

    fn start(player: &str, game_id: &str) -> ClientMessage {
        ClientMessage::StartGame {
            player: player.into(),
            game_id: game_id.into(),
        }
    }

    fn play(player: &str, game_id: &str, x: i32, y: i32) -> ClientMessage {
        ClientMessage::PlayPosition {
            player: player.into(),
            game_id: game_id.into(),
            x,
            y,
        }
    }

    #[tokio::test]
    async fn unknown_game_replies_only_to_sender() {
        let fx = fixture();
        let id = fx.store.create_game("G", "Alice");
        let (alice, mut ra) = client();
        fx.router.dispatch(&alice, join("Alice", &id));
        drain(&mut ra);

        let (stranger, mut rs) = client();
        fx.router.dispatch(&stranger, play("Alice", "nope", 0, 0));
        assert_eq!(
            drain(&mut rs),
            vec![ServerMessage::GameNotFound {
                game_id: "nope".into()
            }]
        );
        assert!(drain(&mut ra).is_empty());
    }

    #[tokio::test]
    async fn member_join_broadcasts_snapshot_and_starts_heartbeat() {
        let fx = fixture();
        let id = fx.store.create_game("G", "Alice");
        fx.store.join_game(&id, "Bob").unwrap();
        let (alice, mut ra) = client();
        let (bob, mut rb) = client();

        fx.router.dispatch(&alice, join("Alice", &id));
        fx.router.dispatch(&bob, join("Bob", &id));

        let alice_msgs = drain(&mut ra);
        assert_eq!(alice_msgs.len(), 2);
        let ServerMessage::JoinGame { game } = &alice_msgs[1] else {
            panic!("expected joinGame, got {:?}", alice_msgs[1]);
        };
        assert_eq!(game.players.len(), 2);
        assert_eq!(drain(&mut rb).len(), 1);
        assert!(fx.scheduler.is_active(&id, TaskKind::Heartbeat));
    }

    #[tokio::test]
    async fn non_member_join_depends_on_state() {
        let fx = fixture();
        let id = fx.store.create_game("G", "Alice");
        let (eve, mut re) = client();

        fx.router.dispatch(&eve, join("Eve", &id));
        assert_eq!(
            drain(&mut re),
            vec![ServerMessage::PlayerNotFound {
                player: "Eve".into()
            }]
        );

        fx.store.start_game(&id, "Alice").unwrap();
        fx.router.dispatch(&eve, join("Eve", &id));
        assert_eq!(
            drain(&mut re),
            vec![ServerMessage::GameNotFound {
                game_id: id.clone()
            }]
        );
        assert!(!fx.scheduler.is_active(&id, TaskKind::Heartbeat));
    }

    #[tokio::test]
    async fn start_broadcasts_and_starts_countdown() {
        let fx = fixture();
        let id = fx.store.create_game("G", "Alice");
        let (alice, mut ra) = client();
        fx.router.dispatch(&alice, join("Alice", &id));
        drain(&mut ra);

        fx.router.dispatch(&alice, start("Mallory", &id));
        assert!(drain(&mut ra).is_empty());
        assert_eq!(fx.store.game_state(&id), Some(GameState::Waiting));

        fx.router.dispatch(&alice, start("Alice", &id));
        let msgs = drain(&mut ra);
        assert!(matches!(&msgs[..], [ServerMessage::GameStarted { game }] if game.state == GameState::Started));
        assert!(fx.scheduler.is_active(&id, TaskKind::Countdown));

        fx.router.dispatch(&alice, start("Alice", &id));
        assert_eq!(
            drain(&mut ra),
            vec![ServerMessage::GameNotFound { game_id: id }]
        );
    }

    #[tokio::test]
    async fn play_broadcasts_success_and_ignores_failures() {
        let fx = fixture();
        let id = fx.store.create_game("G", "Alice");
        fx.store.join_game(&id, "Bob").unwrap();
        let (alice, mut ra) = client();
        let (bob, mut rb) = client();
        fx.router.dispatch(&alice, join("Alice", &id));
        fx.router.dispatch(&bob, join("Bob", &id));

        fx.router.dispatch(&alice, play("Alice", &id, 0, 0));
        assert!(drain(&mut ra).iter().all(|m| matches!(m, ServerMessage::JoinGame { .. })));

        fx.router.dispatch(&alice, start("Alice", &id));
        drain(&mut ra);
        drain(&mut rb);

        fx.router.dispatch(&alice, play("Alice", &id, 0, 1));
        let expected = ServerMessage::UpdateGamePosition {
            field: Field {
                row: 0,
                column: 1,
                owned: Some("Alice".into()),
            },
        };
        assert_eq!(drain(&mut ra), vec![expected.clone()]);
        assert_eq!(drain(&mut rb), vec![expected]);

        fx.router.dispatch(&bob, play("Bob", &id, 0, 1));
        fx.router.dispatch(&bob, play("Bob", &id, 9, 9));
        fx.router.dispatch(&bob, play("Eve", &id, 1, 1));
        assert!(drain(&mut ra).is_empty());
        assert!(drain(&mut rb).is_empty());
    }

    #[tokio::test]
    async fn last_disconnect_cancels_heartbeat() {
        let fx = fixture();
        let id = fx.store.create_game("G", "Alice");
        fx.store.join_game(&id, "Bob").unwrap();
        let (alice, _ra) = client();
        let (bob, mut rb) = client();
        fx.router.dispatch(&alice, join("Alice", &id));
        fx.router.dispatch(&bob, join("Bob", &id));
        drain(&mut rb);

        let departures = fx.router.disconnect(alice.id());
        assert!(departures[0].player_left && !departures[0].game_empty);
        assert_eq!(
            drain(&mut rb),
            vec![ServerMessage::PlayerLeft {
                player: "Alice".into()
            }]
        );
        assert!(fx.scheduler.is_active(&id, TaskKind::Heartbeat));

        let departures = fx.router.disconnect(bob.id());
        assert!(departures[0].game_empty);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!fx.scheduler.is_active(&id, TaskKind::Heartbeat));
    }

    #[tokio::test]
    async fn rejoin_during_teardown_keeps_heartbeat() {
        let fx = fixture();
        let id = fx.store.create_game("G", "Alice");
        let (tab1, _r1) = client();
        let (tab2, mut r2) = client();
        fx.router.dispatch(&tab1, join("Alice", &id));
        assert!(fx.scheduler.is_active(&id, TaskKind::Heartbeat));

        // Interleave a second tab's join between the two halves of disconnect
        let departures = fx.connections.unregister(tab1.id());
        assert!(departures[0].game_empty);
        fx.router.dispatch(&tab2, join("Alice", &id));
        assert!(!fx.scheduler.cancel_heartbeat_if_idle(&id));

        assert!(fx.scheduler.is_active(&id, TaskKind::Heartbeat));
        assert_eq!(fx.connections.online_players(&id), vec!["Alice"]);
        assert!(matches!(&drain(&mut r2)[..], [ServerMessage::JoinGame { .. }]));
    }

    #[tokio::test]
    async fn member_join_after_end_gets_game_over_without_registering() {
        let fx = fixture();
        let id = fx.store.create_game("G", "Alice");
        fx.store.join_game(&id, "Bob").unwrap();
        fx.store.start_game(&id, "Alice").unwrap();
        fx.store.play_position(&id, "Bob", 2, 2).unwrap();
        fx.store.end_game(&id).unwrap();

        let (alice, mut ra) = client();
        fx.router.dispatch(&alice, join("Alice", &id));
        let msgs = drain(&mut ra);
        assert!(matches!(
            &msgs[..],
            [ServerMessage::JoinGame { game }, ServerMessage::GameOver { winners }]
                if game.state == GameState::Ended && winners == &["Bob"]
        ));
        assert!(!fx.connections.has_game(&id));
        assert!(!fx.scheduler.is_active(&id, TaskKind::Heartbeat));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn join_racing_game_end_always_ends_with_game_over() {
        let rt = tokio::runtime::Handle::current();
        for _ in 0..50 {
            let fx = fixture();
            let id = fx.store.create_game("G", "Alice");
            fx.store.start_game(&id, "Alice").unwrap();
            fx.store.play_position(&id, "Alice", 0, 0).unwrap();
            let (alice, mut ra) = client();

            std::thread::scope(|scope| {
                scope.spawn(|| {
                    let _rt = rt.enter();
                    fx.router.dispatch(&alice, join("Alice", &id));
                });
                scope.spawn(|| fx.scheduler.finish_game(&id));
            });

            let msgs = drain(&mut ra);
            assert!(
                matches!(
                    &msgs[..],
                    [ServerMessage::JoinGame { .. }, ServerMessage::GameOver { winners }]
                        if winners == &["Alice"]
                ),
                "got {msgs:?}"
            );
            assert!(!fx.connections.has_game(&id));
            assert!(!fx.scheduler.is_active(&id, TaskKind::Heartbeat));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn join_racing_a_move_never_misses_the_claim() {
        let rt = tokio::runtime::Handle::current();
        for _ in 0..50 {
            let fx = fixture();
            let id = fx.store.create_game("G", "Alice");
            fx.store.join_game(&id, "Bob").unwrap();
            fx.store.start_game(&id, "Alice").unwrap();
            let (alice, _ra) = client();
            let (bob, mut rb) = client();
            fx.router.dispatch(&alice, join("Alice", &id));

            std::thread::scope(|scope| {
                scope.spawn(|| {
                    let _rt = rt.enter();
                    fx.router.dispatch(&bob, join("Bob", &id));
                });
                scope.spawn(|| fx.router.dispatch(&alice, play("Alice", &id, 3, 0)));
            });

            let msgs = drain(&mut rb);
            let ServerMessage::JoinGame { game } = &msgs[0] else {
                panic!("expected joinGame first, got {msgs:?}");
            };
            let in_snapshot = game
                .field(3, 0)
                .is_some_and(|f| f.owned.as_deref() == Some("Alice"));
            let updated = msgs[1..]
                .iter()
                .any(|m| matches!(m, ServerMessage::UpdateGamePosition { .. }));
            assert!(in_snapshot || updated, "claim lost: {msgs:?}");
        }
    }
}
