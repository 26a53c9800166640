use super::RequestsLoggingLevel;
use crate::config::DEFAULT_PORT;

/// Admin API settings. The API only ever listens on the loopback interface.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub requests_logging_level: RequestsLoggingLevel,
    pub port: u16,
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            requests_logging_level: RequestsLoggingLevel::default(),
            port: DEFAULT_PORT,
        }
    }
}
