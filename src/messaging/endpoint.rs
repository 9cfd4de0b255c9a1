use std::fmt::{Debug, Formatter};

use crate::controller::controller_config::{ControllerConfig, SettingsProvider};

/// The server a session connects to.
#[derive(Clone, Eq, PartialEq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Debug for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Endpoint {
        Endpoint {
            host: host.into(),
            port,
        }
    }

    /// Resolve the endpoint from user settings, falling back to the configured defaults for
    ///  anything that is not set. Settings stores typically report a missing host as an empty
    ///  string and a missing port as 0, so these are treated as 'not set' as well.
    pub fn from_settings(settings: &dyn SettingsProvider, config: &ControllerConfig) -> Endpoint {
        let host = settings.server_host()
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| config.default_host.clone());
        let port = settings.server_port()
            .filter(|&p| p != 0)
            .unwrap_or(config.default_port);

        Endpoint::new(host, port)
    }

    pub fn url(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }
}
