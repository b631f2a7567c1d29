//! Resolved startup configuration for the connection plane. CLI argument
//! parsing and environment loading proper live in the `agent` binary crate
//! (out of scope for the core subsystem); this is the data it produces.

use crate::error::{AgentError, AgentResult};

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub bind_addr: String,
    /// Startup secret compared against the `auth` handshake nonce. No
    /// insecure fallback: a real token is mandatory, and construction fails
    /// closed if one isn't supplied.
    pub connection_token: String,
    pub enable_remote_auto_shutdown: bool,
    pub build_commit: Option<String>,
}

impl AgentConfig {
    pub fn new(bind_addr: String, connection_token: String) -> AgentResult<Self> {
        if connection_token.is_empty() {
            return Err(AgentError::Config("connection token must not be empty".into()));
        }
        Ok(Self {
            bind_addr,
            connection_token,
            enable_remote_auto_shutdown: false,
            build_commit: None,
        })
    }

    pub fn with_auto_shutdown(mut self, enabled: bool) -> Self {
        self.enable_remote_auto_shutdown = enabled;
        self
    }

    pub fn with_build_commit(mut self, commit: Option<String>) -> Self {
        self.build_commit = commit;
        self
    }
}
