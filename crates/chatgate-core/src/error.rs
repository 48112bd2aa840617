//! Gateway error types.
//!
//! Every fallible operation in the gateway surfaces a [`GatewayError`].  The
//! variants follow the phase in which a call can fail: request validation,
//! client configuration, the HTTP transport itself, the provider protocol,
//! and decoding of the provider's reply.

/// Unified error type for the chat gateway.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    // -- Before any I/O ------------------------------------------------------
    /// The chat request was rejected before any network effect (e.g. an empty
    /// message, or global parameters for the wrong provider).
    #[error("validation error: {reason}")]
    Validation { reason: String },

    /// The client configuration is unusable: unknown provider tag, missing
    /// credentials, or an invalid proxy URL.
    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    // -- Network -------------------------------------------------------------
    /// Connecting to the provider failed (DNS, refused connection, timeout) or
    /// the body could not be read.
    #[error("transport error: {reason}")]
    Transport { reason: String },

    /// The provider answered with a non-success status, or embedded an error
    /// object in a response body or stream frame.
    #[error("provider error {code}: {message}")]
    Protocol { code: String, message: String },

    // -- Decoding ------------------------------------------------------------
    /// A non-streaming response body was not valid provider JSON.
    #[error("decode error: {reason}")]
    Decode { reason: String },

    /// JSON serialization of an outgoing payload failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    // -- Generic -------------------------------------------------------------
    /// Catch-all for unexpected internal errors.  Prefer a typed variant
    /// whenever possible.
    #[error("internal gateway error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the gateway crate.
pub type Result<T> = std::result::Result<T, GatewayError>;

impl GatewayError {
    /// Shorthand for a [`GatewayError::Validation`].
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Shorthand for a [`GatewayError::Configuration`].
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Shorthand for a [`GatewayError::Protocol`].
    pub fn protocol(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Protocol {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Returns `true` for errors raised before any network effect.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// Returns `true` for configuration errors.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }

    /// Returns `true` for transport-level failures.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// Returns `true` for provider-reported errors.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol { .. })
    }

    /// Returns `true` for malformed non-streaming responses.
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode { .. })
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport {
            reason: err.to_string(),
        }
    }
}
