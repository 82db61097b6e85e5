use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use gridclaim_core::game::{GameId, GameState};
use gridclaim_core::net::messages::ServerMessage;
use gridclaim_core::net::protocol::encode_server_message;

use crate::config::TimersConfig;
use crate::connections::ConnectionRegistry;
use crate::game_store::GameStore;

/// Periodic per-game broadcasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// `onlinePlayers` while anyone is connected.
    Heartbeat,
    /// `timerUpdate` once per tick, then the end of the game.
    Countdown,
}

impl TaskKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Heartbeat => "heartbeat",
            Self::Countdown => "countdown",
        }
    }
}

struct ScheduledTask {
    generation: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

type TaskKey = (GameId, TaskKind);

/// Owns the heartbeat and countdown tasks of every game.
///
/// At most one live task exists per `(game, kind)`. A task that exits on its own
/// removes its entry only if the entry still carries its generation.
pub struct BroadcastScheduler {
    store: Arc<GameStore>,
    connections: Arc<ConnectionRegistry>,
    timers: TimersConfig,
    tasks: Mutex<HashMap<TaskKey, ScheduledTask>>,
    next_generation: AtomicU64,
}

impl BroadcastScheduler {
    pub fn new(
        store: Arc<GameStore>,
        connections: Arc<ConnectionRegistry>,
        timers: TimersConfig,
    ) -> Self {
        Self {
            store,
            connections,
            timers,
            tasks: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
        }
    }

    fn lock_tasks(&self) -> MutexGuard<'_, HashMap<TaskKey, ScheduledTask>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start the heartbeat of a game unless one is running or the game is over.
    /// Returns true if a new task was spawned.
    pub fn ensure_heartbeat(self: &Arc<Self>, game_id: &str) -> bool {
        // Checked under the task lock so a concurrent end of the game either sees
        // this task and cancels it, or this call sees the game as ended.
        self.spawn_if(game_id, TaskKind::Heartbeat, self.timers.heartbeat_interval(), || {
            matches!(
                self.store.game_state(game_id),
                Some(GameState::Waiting | GameState::Started)
            )
        })
    }

    /// Start the countdown of a freshly started game.
    /// Returns true if a new task was spawned.
    pub fn start_countdown(self: &Arc<Self>, game_id: &str) -> bool {
        self.spawn_if(game_id, TaskKind::Countdown, self.timers.countdown_tick(), || true)
    }

    /// Stop a task. No further tick of it will start. Returns true if one was registered.
    pub fn cancel(&self, game_id: &str, kind: TaskKind) -> bool {
        let removed = self.lock_tasks().remove(&(game_id.to_string(), kind));
        Self::stop(game_id, kind, removed)
    }

    /// Stop the heartbeat of a game that has no registered connection left.
    ///
    /// The registry is re-checked under the task lock. A join that registered in
    /// the meantime keeps the heartbeat, and one that registers afterwards finds
    /// no task and starts a new one.
    pub fn cancel_heartbeat_if_idle(&self, game_id: &str) -> bool {
        let mut tasks = self.lock_tasks();
        if self.connections.has_game(game_id) {
            tracing::debug!(game_id, "Heartbeat kept, game has connections again");
            return false;
        }
        let removed = tasks.remove(&(game_id.to_string(), TaskKind::Heartbeat));
        drop(tasks);
        Self::stop(game_id, TaskKind::Heartbeat, removed)
    }

    /// Stop both tasks of a game.
    pub fn cancel_game(&self, game_id: &str) {
        self.cancel(game_id, TaskKind::Heartbeat);
        self.cancel(game_id, TaskKind::Countdown);
    }

    fn stop(game_id: &str, kind: TaskKind, removed: Option<ScheduledTask>) -> bool {
        match removed {
            Some(task) => {
                task.cancel.cancel();
                tracing::debug!(game_id, task = kind.as_str(), "Scheduled task cancelled");
                true
            },
            None => false,
        }
    }

    pub fn is_active(&self, game_id: &str, kind: TaskKind) -> bool {
        self.lock_tasks()
            .get(&(game_id.to_string(), kind))
            .is_some_and(|task| !task.handle.is_finished())
    }

    /// Cancel every task, used on shutdown.
    pub fn cancel_all(&self) {
        let tasks: Vec<ScheduledTask> = self.lock_tasks().drain().map(|(_, t)| t).collect();
        for task in &tasks {
            task.cancel.cancel();
        }
        if !tasks.is_empty() {
            tracing::info!(count = tasks.len(), "Cancelled scheduled tasks");
        }
    }

    fn spawn_if(
        self: &Arc<Self>,
        game_id: &str,
        kind: TaskKind,
        period: Duration,
        allowed: impl FnOnce() -> bool,
    ) -> bool {
        let key = (game_id.to_string(), kind);
        let mut tasks = self.lock_tasks();
        if tasks.get(&key).is_some_and(|t| !t.handle.is_finished()) || !allowed() {
            return false;
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(self).run(
            game_id.to_string(),
            kind,
            period,
            generation,
            cancel.clone(),
        ));
        tasks.insert(
            key,
            ScheduledTask {
                generation,
                cancel,
                handle,
            },
        );
        tracing::debug!(game_id, task = kind.as_str(), ?period, "Scheduled task started");
        true
    }

    async fn run(
        self: Arc<Self>,
        game_id: GameId,
        kind: TaskKind,
        period: Duration,
        generation: u64,
        cancel: CancellationToken,
    ) {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut time_left = self.timers.countdown_secs;

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = interval.tick() => {},
            }
            let flow = match kind {
                TaskKind::Heartbeat => self.heartbeat_tick(&game_id),
                TaskKind::Countdown => self.countdown_tick(&game_id, &mut time_left),
            };
            if flow.is_break() {
                break;
            }
        }

        self.release(&game_id, kind, generation);
    }

    fn release(&self, game_id: &str, kind: TaskKind, generation: u64) {
        let mut tasks = self.lock_tasks();
        let key = (game_id.to_string(), kind);
        if tasks.get(&key).is_some_and(|t| t.generation == generation) {
            tasks.remove(&key);
        }
    }

    fn heartbeat_tick(&self, game_id: &str) -> ControlFlow<()> {
        match self.store.game_state(game_id) {
            Some(GameState::Waiting | GameState::Started) => {},
            state => {
                tracing::debug!(game_id, ?state, "Heartbeat stopping");
                return ControlFlow::Break(());
            },
        }
        let players = self.connections.online_players(game_id);
        self.connections
            .broadcast_message(game_id, &ServerMessage::OnlinePlayers { players });
        ControlFlow::Continue(())
    }

    fn countdown_tick(&self, game_id: &str, time_left: &mut i64) -> ControlFlow<()> {
        if self.store.game_state(game_id) != Some(GameState::Started) {
            tracing::debug!(game_id, "Countdown stopping, game not running");
            return ControlFlow::Break(());
        }
        if *time_left < 0 {
            self.finish_game(game_id);
            return ControlFlow::Break(());
        }
        self.connections.broadcast_message(
            game_id,
            &ServerMessage::TimerUpdate {
                time_left: *time_left,
            },
        );
        *time_left -= 1;
        ControlFlow::Continue(())
    }

    /// End the game, tell everyone still connected, and drop its connections.
    pub(crate) fn finish_game(&self, game_id: &str) {
        // Taking the connections under the game lock means a join either lands
        // in `targets` or observes the game as ended.
        let (winners, targets) = match self
            .store
            .end_game_with(game_id, |_| self.connections.take_game(game_id))
        {
            Ok(ended) => ended,
            Err(e) => {
                tracing::debug!(game_id, error = %e, "Game already finished");
                return;
            },
        };
        let msg = ServerMessage::GameOver { winners };
        match encode_server_message(&msg) {
            Ok(data) => {
                for conn in &targets {
                    conn.send(data.clone());
                }
            },
            Err(e) => tracing::error!(game_id, error = %e, "Failed to encode gameOver"),
        }
        self.cancel(game_id, TaskKind::Heartbeat);
        tracing::info!(game_id, notified = targets.len(), "Game over sent");
    }
}
