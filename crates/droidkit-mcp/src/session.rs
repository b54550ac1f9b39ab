//! Per-connection session state and the lifecycle gate.
//!
//! ```text
//! Uninitialized --initialize--> Initialized --(any)--> Initialized
//!        \                            /
//!         `----- EOF / shutdown ---> Closed
//! ```

use crate::protocol::{ClientCapabilities, ClientInfo, InitializeParams, JsonRpcError};

/// Method name of the handshake request.
pub const INITIALIZE: &str = "initialize";

/// Lifecycle of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transport open, handshake not yet completed.
    Uninitialized,
    /// Handshake completed; all methods are admitted.
    Initialized,
    /// Stream closed; nothing more is admitted.
    Closed,
}

/// Connection-scoped state, owned by the runtime loop and handed to the dispatcher.
#[derive(Debug)]
pub struct Session {
    state: SessionState,
    client_protocol_version: Option<String>,
    client_capabilities: Option<ClientCapabilities>,
    client_info: Option<ClientInfo>,
    awaiting_initialized: bool,
    handshakes: u32,
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: SessionState::Uninitialized,
            client_protocol_version: None,
            client_capabilities: None,
            client_info: None,
            awaiting_initialized: false,
            handshakes: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_initialized(&self) -> bool {
        self.state == SessionState::Initialized
    }

    /// Decide whether a request for `method` may proceed.
    ///
    /// `initialize` is always admitted while the session is open; every other
    /// method needs a completed handshake.
    pub fn admit(&mut self, method: &str) -> Result<(), JsonRpcError> {
        match self.state {
            SessionState::Closed => Err(JsonRpcError::invalid_request("session is closed")),
            _ if method == INITIALIZE => Ok(()),
            SessionState::Uninitialized => Err(JsonRpcError::not_initialized(method)),
            SessionState::Initialized => {
                if self.awaiting_initialized {
                    tracing::debug!(
                        method,
                        "request received before the client sent its initialized notification"
                    );
                    self.awaiting_initialized = false;
                }
                Ok(())
            }
        }
    }

    /// Record a successful `initialize` exchange.
    ///
    /// A repeated handshake is treated like the first one: the client's
    /// details are replaced and capabilities are advertised again.
    pub fn complete_handshake(&mut self, params: InitializeParams, canonical_version: &str) {
        if params.protocol_version != canonical_version {
            tracing::warn!(
                client_version = %params.protocol_version,
                server_version = %canonical_version,
                "protocol version mismatch; advertising server version"
            );
        }
        if self.handshakes > 0 {
            tracing::debug!(handshakes = self.handshakes + 1, "repeated initialize handshake");
        }

        tracing::info!(
            client = %params.client_info.name,
            client_version = %params.client_info.version,
            "session initialized"
        );

        self.client_protocol_version = Some(params.protocol_version);
        self.client_capabilities = Some(params.capabilities);
        self.client_info = Some(params.client_info);
        self.state = SessionState::Initialized;
        self.awaiting_initialized = true;
        self.handshakes += 1;
    }

    /// The client confirmed the handshake.
    pub fn acknowledge_initialized(&mut self) {
        if self.state != SessionState::Initialized {
            tracing::debug!("initialized notification received before initialize");
        }
        self.awaiting_initialized = false;
    }

    /// Transition to `Closed`. Idempotent.
    pub fn close(&mut self) {
        if self.state != SessionState::Closed && self.awaiting_initialized {
            tracing::debug!("session closed without an initialized notification");
        }
        self.state = SessionState::Closed;
    }

    /// Protocol version the client asked for.
    pub fn client_protocol_version(&self) -> Option<&str> {
        self.client_protocol_version.as_deref()
    }

    pub fn client_info(&self) -> Option<&ClientInfo> {
        self.client_info.as_ref()
    }

    pub fn client_capabilities(&self) -> Option<&ClientCapabilities> {
        self.client_capabilities.as_ref()
    }

    /// Whether the handshake completed but `initialized` has not arrived yet.
    pub fn awaiting_initialized(&self) -> bool {
        self.awaiting_initialized
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MCP_PROTOCOL_VERSION;

    #[test]
    fn test_only_initialize_before_handshake() {
        let mut session = Session::new();
        assert_eq!(session.state(), SessionState::Uninitialized);
        assert!(session.admit(INITIALIZE).is_ok());

        let err = session.admit("tools/call").unwrap_err();
        assert_eq!(err.code, JsonRpcError::SERVER_NOT_INITIALIZED);
        assert!(err.message.contains("tools/call"));
    }

    #[test]
    fn test_handshake_opens_gate() {
        let mut session = Session::new();
        session.complete_handshake(InitializeParams::default(), MCP_PROTOCOL_VERSION);
        assert!(session.is_initialized());
        assert!(session.awaiting_initialized());
        assert!(session.admit("tools/list").is_ok());
        assert!(!session.awaiting_initialized());
    }

    #[test]
    fn test_repeated_handshake_replaces_client_details() {
        let mut session = Session::new();
        session.complete_handshake(InitializeParams::default(), MCP_PROTOCOL_VERSION);

        let mut second = InitializeParams::default();
        second.client_info.name = "other-client".to_string();
        second.protocol_version = "2025-03-26".to_string();
        session.complete_handshake(second, MCP_PROTOCOL_VERSION);

        assert!(session.is_initialized());
        assert_eq!(session.client_info().unwrap().name, "other-client");
        assert_eq!(session.client_protocol_version(), Some("2025-03-26"));
    }

    #[test]
    fn test_closed_session_admits_nothing() {
        let mut session = Session::new();
        session.complete_handshake(InitializeParams::default(), MCP_PROTOCOL_VERSION);
        session.acknowledge_initialized();
        session.close();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.admit(INITIALIZE).is_err());
        assert!(session.admit("tools/list").is_err());
    }
}
