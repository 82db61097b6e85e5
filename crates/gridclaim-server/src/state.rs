use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::ServerConfig;
use crate::connections::ConnectionRegistry;
use crate::game_store::GameStore;
use crate::router::MessageRouter;
use crate::scheduler::BroadcastScheduler;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<GameStore>,
    pub connections: Arc<ConnectionRegistry>,
    pub scheduler: Arc<BroadcastScheduler>,
    pub router: Arc<MessageRouter>,
    pub config: Arc<ServerConfig>,
    /// Open WebSocket connections, registered with a game or not.
    pub ws_connection_count: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let store = Arc::new(GameStore::new());
        let connections = Arc::new(ConnectionRegistry::new());
        let scheduler = Arc::new(BroadcastScheduler::new(
            Arc::clone(&store),
            Arc::clone(&connections),
            config.timers.clone(),
        ));
        let router = Arc::new(MessageRouter::new(
            Arc::clone(&store),
            Arc::clone(&connections),
            Arc::clone(&scheduler),
        ));
        Self {
            store,
            connections,
            scheduler,
            router,
            config: Arc::new(config),
            ws_connection_count: Arc::new(AtomicUsize::new(0)),
        }
    }
}

/// Increments a counter on creation and decrements it on drop.
pub struct ConnectionGuard {
    counter: Arc<AtomicUsize>,
}

impl ConnectionGuard {
    pub fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self { counter }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }
}
