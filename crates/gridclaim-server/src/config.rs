use std::time::Duration;

use serde::Deserialize;

use gridclaim_core::net::protocol::DEFAULT_SUBPROTOCOL;

/// Top-level server configuration, loaded from `gridclaim.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// Exact `Origin` header values allowed to open a WebSocket.
    pub allowed_origins: Vec<String>,
    /// Subprotocol clients must offer in `Sec-WebSocket-Protocol`.
    pub subprotocol: String,
    pub limits: LimitsConfig,
    pub timers: TimersConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:3333".to_string(),
            allowed_origins: vec!["http://localhost:3333".to_string()],
            subprotocol: DEFAULT_SUBPROTOCOL.to_string(),
            limits: LimitsConfig::default(),
            timers: TimersConfig::default(),
        }
    }
}

/// Infrastructure limits (connection caps, buffer sizes, rate limits).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_ws_connections: usize,
    /// Outbound frames queued per connection before further frames are dropped.
    pub player_message_buffer: usize,
    pub ws_rate_limit_per_sec: f64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_ws_connections: 200,
            player_message_buffer: 256,
            ws_rate_limit_per_sec: 50.0,
        }
    }
}

/// Periods of the per-game scheduled broadcasts.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimersConfig {
    pub heartbeat_interval_ms: u64,
    pub countdown_tick_ms: u64,
    /// Value of the first `timerUpdate`; the game ends one tick after it reaches 0.
    pub countdown_secs: i64,
}

impl Default for TimersConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 3000,
            countdown_tick_ms: 1000,
            countdown_secs: 60,
        }
    }
}

impl TimersConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn countdown_tick(&self) -> Duration {
        Duration::from_millis(self.countdown_tick_ms)
    }
}

impl ServerConfig {
    /// Validate configuration. Warnings are logged; hard errors are returned.
    pub fn validate(&self) -> Result<(), String> {
        if self.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(format!(
                "listen_addr is not a valid socket address: {}",
                self.listen_addr
            ));
        }

        if self.allowed_origins.is_empty() {
            tracing::warn!("allowed_origins is empty; every WebSocket upgrade will be rejected");
        }
        if self.subprotocol.trim().is_empty() {
            return Err("subprotocol must not be empty".to_string());
        }

        if self.limits.max_ws_connections == 0 {
            return Err("limits.max_ws_connections must be > 0".to_string());
        }
        if self.limits.player_message_buffer == 0 {
            return Err("limits.player_message_buffer must be > 0".to_string());
        }
        if self.limits.ws_rate_limit_per_sec <= 0.0 {
            return Err("limits.ws_rate_limit_per_sec must be > 0".to_string());
        }

        if self.timers.heartbeat_interval_ms == 0 {
            return Err("timers.heartbeat_interval_ms must be > 0".to_string());
        }
        if self.timers.countdown_tick_ms == 0 {
            return Err("timers.countdown_tick_ms must be > 0".to_string());
        }
        if self.timers.countdown_secs < 0 {
            return Err("timers.countdown_secs must be >= 0".to_string());
        }

        Ok(())
    }

    /// Load config from `gridclaim.toml` if it exists, then apply env var overrides.
    pub fn load() -> Self {
        let mut config = match std::fs::read_to_string("gridclaim.toml") {
            Ok(content) => match toml::from_str::<ServerConfig>(&content) {
                Ok(cfg) => {
                    tracing::info!("Loaded configuration from gridclaim.toml");
                    cfg
                },
                Err(e) => {
                    tracing::warn!("Failed to parse gridclaim.toml: {e}, using defaults");
                    ServerConfig::default()
                },
            },
            Err(_) => {
                tracing::info!("No gridclaim.toml found, using defaults");
                ServerConfig::default()
            },
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config
    }

    fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(addr) = var("GRIDCLAIM_LISTEN_ADDR")
            && !addr.is_empty()
        {
            self.listen_addr = addr;
        }
        // PORT only swaps the port of whatever address is configured
        if let Some(port) = var("PORT")
            && let Ok(port) = port.parse::<u16>()
            && let Ok(mut addr) = self.listen_addr.parse::<std::net::SocketAddr>()
        {
            addr.set_port(port);
            self.listen_addr = addr.to_string();
        }
        if let Some(origins) = var("GRIDCLAIM_ALLOWED_ORIGINS") {
            self.allowed_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(protocol) = var("GRIDCLAIM_SUBPROTOCOL")
            && !protocol.is_empty()
        {
            self.subprotocol = protocol;
        }

        if let Some(val) = var("GRIDCLAIM_MAX_WS_CONNECTIONS")
            && let Ok(n) = val.parse::<usize>()
        {
            self.limits.max_ws_connections = n;
        }
        if let Some(val) = var("GRIDCLAIM_HEARTBEAT_MS")
            && let Ok(n) = val.parse::<u64>()
        {
            self.timers.heartbeat_interval_ms = n;
        }
        if let Some(val) = var("GRIDCLAIM_COUNTDOWN_SECS")
            && let Ok(n) = val.parse::<i64>()
        {
            self.timers.countdown_secs = n;
        }
    }
}
