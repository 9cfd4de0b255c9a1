use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// used when the settings provider has no host
    pub default_host: String,
    /// used when the settings provider has no port
    pub default_port: u16,

    /// interval between keep-alive pings on an open connection. A failed ping is reported, but
    ///  the connection is only considered lost when the receive side fails.
    pub ping_interval: Duration,
    /// capacity of the queue between a connection's background loops and the controller
    pub event_queue_capacity: usize,

    /// size of the generated all-alive roster that is shown before any server data arrived
    pub default_player_count: u32,
}

impl ControllerConfig {
    pub fn new() -> ControllerConfig {
        ControllerConfig {
            default_host: "localhost".to_string(),
            default_port: 8765,
            ping_interval: Duration::from_secs(2),
            event_queue_capacity: 1024,
            default_player_count: 456,
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig::new()
    }
}

/// Source of user-editable connection settings. It is queried on every `connect`, so changed
///  settings take effect on the next reconnect.
pub trait SettingsProvider: Send + Sync {
    fn server_host(&self) -> Option<String>;
    fn server_port(&self) -> Option<u16>;
}

#[derive(Debug, Clone, Default)]
pub struct StaticSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl StaticSettings {
    pub fn new(host: impl Into<String>, port: u16) -> StaticSettings {
        StaticSettings {
            host: Some(host.into()),
            port: Some(port),
        }
    }
}

impl SettingsProvider for StaticSettings {
    fn server_host(&self) -> Option<String> {
        self.host.clone()
    }

    fn server_port(&self) -> Option<u16> {
        self.port
    }
}
