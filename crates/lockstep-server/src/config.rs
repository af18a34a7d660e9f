use std::path::Path;
use std::time::Duration;

use rod_transport::EndpointConfig;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub server: ServerSection,
    #[serde(default)]
    pub scheduler: SchedulerSection,
    #[serde(default)]
    pub transport: TransportSection,
    pub logging: LoggingSection,
}

#[derive(Debug, Deserialize)]
pub struct ServerSection {
    pub address: String,
    pub port: u16,
}

#[derive(Debug, Deserialize)]
pub struct SchedulerSection {
    /// Lockstep tick rate. Default matches spec.md §4.4's 20 Hz.
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
    /// Grace period an empty room survives before GC (spec.md §4.4).
    #[serde(default = "default_room_gc_seconds")]
    pub room_gc_seconds: u64,
}

fn default_frame_interval_ms() -> u64 {
    50
}

fn default_room_gc_seconds() -> u64 {
    60
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            frame_interval_ms: default_frame_interval_ms(),
            room_gc_seconds: default_room_gc_seconds(),
        }
    }
}

impl SchedulerSection {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn room_gc(&self) -> Duration {
        Duration::from_secs(self.room_gc_seconds)
    }
}

/// Mirrors spec.md §4.2's hard-coded transport timings, made
/// config-overridable per SPEC_FULL's ambient configuration section.
#[derive(Debug, Deserialize)]
pub struct TransportSection {
    #[serde(default = "default_retransmit_ms")]
    pub retransmit_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,
    #[serde(default = "default_inactivity_timeout_ms")]
    pub inactivity_timeout_ms: u64,
}

fn default_retransmit_ms() -> u64 {
    100
}

fn default_max_retries() -> u32 {
    10
}

fn default_heartbeat_ms() -> u64 {
    1_000
}

fn default_inactivity_timeout_ms() -> u64 {
    3_000
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            retransmit_ms: default_retransmit_ms(),
            max_retries: default_max_retries(),
            heartbeat_ms: default_heartbeat_ms(),
            inactivity_timeout_ms: default_inactivity_timeout_ms(),
        }
    }
}

impl TransportSection {
    pub fn to_endpoint_config(&self) -> EndpointConfig {
        let mut config = EndpointConfig::default();
        config.retransmit_interval = Duration::from_millis(self.retransmit_ms);
        config.max_retries = self.max_retries;
        config.heartbeat_interval = Duration::from_millis(self.heartbeat_ms);
        config.inactivity_timeout = Duration::from_millis(self.inactivity_timeout_ms);
        config
    }
}

#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    pub level: String,
}

impl ServerConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }
}
