//! Error taxonomy shared by the fetch pipeline.
//!
//! Hitting a configured cap is deliberately *not* an error; it travels as a
//! `limit_reached` flag on otherwise successful results.

use thiserror::Error;

pub type HarvestResult<T> = Result<T, HarvestError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HarvestError {
    /// Any failed network call: non-2xx status, I/O failure or a body that
    /// does not decode into the expected shape.
    #[error("request to {endpoint} failed: {message}")]
    Transport { endpoint: String, message: String },

    /// Channel resolution by handle and by raw id both came back empty.
    #[error("channel not found: {0}")]
    ChannelNotFound(String),

    #[error("video not found: {0}")]
    VideoNotFound(String),

    /// No usable API key was supplied; raised before any request is made.
    #[error("a YouTube Data API key is required")]
    CredentialMissing,

    #[error("invalid export state: {0}")]
    InvalidState(String),

    /// The artifact collaborator refused a payload.
    #[error("could not save {filename}: {message}")]
    Sink { filename: String, message: String },
}

impl HarvestError {
    pub fn transport(endpoint: impl Into<String>, message: impl ToString) -> Self {
        Self::Transport {
            endpoint: endpoint.into(),
            message: message.to_string(),
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// Masks `secret` inside transport messages. `ureq` echoes the request URL
    /// (query string included) in its errors.
    pub fn redact(self, secret: &str) -> Self {
        match self {
            Self::Transport { endpoint, message } if !secret.is_empty() => Self::Transport {
                endpoint,
                message: message.replace(secret, "***"),
            },
            other => other,
        }
    }
}
