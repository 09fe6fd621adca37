//! The seam between the retry engine and whatever actually sends mail.

use std::{fmt, time::Duration};

use async_trait::async_trait;
use mailer_smtp::client::ClientError;
use thiserror::Error;

use crate::message::Message;

/// Something that can hand a message to a mail relay.
///
/// Implementations must be shareable across workers; one call is one
/// delivery attempt.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, message: &Message) -> Result<(), TransportError>;
}

/// How likely a failed attempt is to succeed if repeated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Network trouble or a 4xx reply.
    Transient,
    /// A 5xx reply, refused credentials, missing TLS.
    Permanent,
    /// Anything we cannot classify.
    Unknown,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::Unknown => "unknown",
        })
    }
}

/// A failed delivery attempt.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Relay did not respond to {stage} within {after:?}")]
    Timeout { stage: &'static str, after: Duration },

    #[error("TLS handshake failed: {0}")]
    Tls(String),

    #[error("TLS required but not offered by the relay")]
    TlsRequired,

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Relay rejected the message: {code} {message}")]
    Rejected { code: u16, message: String },

    #[error("SMTP protocol error: {0}")]
    Protocol(String),

    /// Failure from a non-SMTP transport.
    #[error("{message}")]
    Other { kind: FailureKind, message: String },
}

impl TransportError {
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::Connection(_) | Self::Timeout { .. } | Self::Tls(_) => FailureKind::Transient,
            Self::TlsRequired | Self::Authentication(_) => FailureKind::Permanent,
            Self::Rejected { code, .. } => match *code {
                400..500 => FailureKind::Transient,
                500..600 => FailureKind::Permanent,
                _ => FailureKind::Unknown,
            },
            Self::Protocol(_) => FailureKind::Unknown,
            Self::Other { kind, .. } => *kind,
        }
    }

    /// Convenience for transports outside this crate.
    #[must_use]
    pub fn other(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Other {
            kind,
            message: message.into(),
        }
    }
}

impl From<ClientError> for TransportError {
    fn from(error: ClientError) -> Self {
        match error {
            ClientError::Io(e) => Self::Connection(e.to_string()),
            ClientError::ConnectionClosed => {
                Self::Connection("Connection closed unexpectedly".to_string())
            }
            ClientError::TlsError(msg) => Self::Tls(msg),
            ClientError::StartTlsUnavailable => Self::TlsRequired,
            ClientError::SmtpError { code, message } => Self::Rejected { code, message },
            // 4xx during AUTH is the relay having trouble, not bad credentials
            ClientError::AuthFailed { code, message } if (400..500).contains(&code) => {
                Self::Rejected { code, message }
            }
            ClientError::AuthFailed { code, message } => {
                Self::Authentication(format!("{code} {message}"))
            }
            ClientError::NoAuthMechanism(offered) => Self::Authentication(format!(
                "no supported mechanism (relay offers: {offered})"
            )),
            ClientError::ParseError(msg) => Self::Protocol(msg),
            ClientError::Utf8Error(e) => Self::Protocol(e.to_string()),
        }
    }
}
