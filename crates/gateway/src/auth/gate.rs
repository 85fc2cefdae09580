// Handshake-time connection gating: identity and Origin validation.
//
// Both checks are pure; the WebSocket handler decides how to reject (close
// before accept for origin failures, error frame then close for identity
// failures). No business message is ever dispatched for a rejected
// connection.

use crewline_common::types::UserIdentity;

use crate::error::{ErrorKind, GatewayError};

#[derive(Debug, Clone, Default)]
pub struct ConnectionGate {
    allowed_origins: Vec<String>,
}

impl ConnectionGate {
    pub fn new(allowed_origins: Vec<String>) -> Self {
        Self { allowed_origins }
    }

    /// The handshake must carry a resolved, active identity.
    pub fn validate_authentication<'a>(
        &self,
        identity: Option<&'a UserIdentity>,
    ) -> Result<&'a UserIdentity, GatewayError> {
        let identity = identity.ok_or_else(|| {
            GatewayError::new(ErrorKind::AuthenticationFailed, "Authentication required")
        })?;

        if !identity.is_active {
            return Err(GatewayError::new(
                ErrorKind::AuthenticationFailed,
                "User account is inactive",
            ));
        }

        Ok(identity)
    }

    /// A missing Origin header always fails. With a configured allow-list
    /// the origin must be a member; with an empty allow-list any non-empty
    /// origin passes. The permissive default is deliberate — set
    /// `CREWLINE_GATEWAY_ALLOWED_ORIGINS` in production.
    pub fn validate_origin(&self, origin: Option<&str>) -> Result<(), GatewayError> {
        let origin = origin.filter(|value| !value.is_empty()).ok_or_else(|| {
            GatewayError::new(ErrorKind::OriginRejected, "Origin header missing")
        })?;

        if !self.allowed_origins.is_empty()
            && !self.allowed_origins.iter().any(|allowed| allowed == origin)
        {
            return Err(GatewayError::new(
                ErrorKind::OriginRejected,
                format!("Origin '{origin}' is not allowed"),
            ));
        }

        Ok(())
    }
}
