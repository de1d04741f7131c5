use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

/// Reads an environment variable and parses it, falling back to `default`
/// when the variable is unset or malformed.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(key = key, value = %raw, "Ignoring malformed environment variable");
                default
            }
        },
        Err(_) => default,
    }
}

/// Tuning for stream sessions and the event bus
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Period of the per-session tick loop
    pub tick_interval: Duration,
    /// Tile batches are flushed every N ticks
    pub tile_flush_ticks: u64,
    /// A heartbeat is written after N consecutive ticks without output
    pub heartbeat_idle_ticks: u32,
    /// Maximum tile entries per frame, for both cold start and live batches
    pub snapshot_chunk_size: usize,
    /// Ring size of each category's broadcast channel
    pub channel_capacity: usize,
    /// Frames buffered between a session and its HTTP response body
    pub frame_buffer: usize,
}

impl StreamConfig {
    pub fn new() -> Self {
        let defaults = Self::defaults();
        Self {
            tick_interval: Duration::from_millis(
                env_or("MAPSYNC_TICK_MS", defaults.tick_interval.as_millis() as u64).max(1),
            ),
            tile_flush_ticks: env_or("MAPSYNC_TILE_FLUSH_TICKS", defaults.tile_flush_ticks).max(1),
            heartbeat_idle_ticks: env_or(
                "MAPSYNC_HEARTBEAT_IDLE_TICKS",
                defaults.heartbeat_idle_ticks,
            )
            .max(1),
            snapshot_chunk_size: env_or("MAPSYNC_SNAPSHOT_CHUNK", defaults.snapshot_chunk_size)
                .max(1),
            channel_capacity: env_or("MAPSYNC_CHANNEL_CAPACITY", defaults.channel_capacity).max(1),
            frame_buffer: env_or("MAPSYNC_FRAME_BUFFER", defaults.frame_buffer).max(1),
        }
    }

    /// Built-in values, independent of the environment
    pub fn defaults() -> Self {
        Self {
            tick_interval: Duration::from_millis(500),
            tile_flush_ticks: 20,
            heartbeat_idle_ticks: 10,
            snapshot_chunk_size: 2_000,
            channel_capacity: 65_536,
            frame_buffer: 64,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-level settings for the HTTP server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
}

impl ServerConfig {
    pub fn new() -> Self {
        Self {
            bind_addr: env_or("MAPSYNC_BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 3000))),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}
