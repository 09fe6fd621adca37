//! SMTP relay transport.
//!
//! Every [`SmtpTransport::send`] opens a fresh session to the configured
//! relay:
//! - connect and read the greeting (implicit TLS first on port 465)
//! - EHLO, then STARTTLS according to the [`TlsPolicy`]
//! - AUTH when credentials are configured and the relay offers it
//! - MAIL FROM, RCPT TO, DATA, QUIT

use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use mailer_common::tracing;
use mailer_smtp::client::{ClientError, Credentials, MessageBuilder, SmtpClient};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::{
    message::Message,
    transport::{Transport, TransportError},
};

/// Port where the relay expects TLS from the first byte.
pub const SMTPS_PORT: u16 = 465;

/// When to negotiate TLS with the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TlsPolicy {
    /// Use STARTTLS when offered. If the upgrade fails, reconnect and send
    /// in plaintext (RFC 3207 section 4.1).
    #[default]
    Opportunistic,
    /// Fail the attempt unless STARTTLS succeeds.
    Required,
    /// Never use STARTTLS.
    Disabled,
}

/// Per-stage timeouts for a relay session, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpTimeouts {
    /// Connecting, the TLS handshake and the greeting.
    #[serde(default = "default_connect_timeout")]
    pub connect_secs: u64,

    /// EHLO/HELO, STARTTLS and AUTH.
    #[serde(default = "default_command_timeout")]
    pub command_secs: u64,

    /// Sending the message content and waiting for the relay to accept it.
    #[serde(default = "default_data_timeout")]
    pub data_secs: u64,

    #[serde(default = "default_quit_timeout")]
    pub quit_secs: u64,
}

impl Default for SmtpTimeouts {
    fn default() -> Self {
        Self {
            connect_secs: default_connect_timeout(),
            command_secs: default_command_timeout(),
            data_secs: default_data_timeout(),
            quit_secs: default_quit_timeout(),
        }
    }
}

const fn default_connect_timeout() -> u64 {
    30
}

const fn default_command_timeout() -> u64 {
    30
}

const fn default_data_timeout() -> u64 {
    120
}

const fn default_quit_timeout() -> u64 {
    10
}

const fn default_port() -> u16 {
    587
}

const fn default_accept_invalid_certs() -> bool {
    true
}

fn default_helo_name() -> String {
    "localhost".to_string()
}

/// Relay account and connection settings.
///
/// Read once at startup and shared read-only between workers.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpTransportConfig {
    #[serde(default)]
    pub host: String,

    /// Default: 587 (submission)
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Envelope sender and From address. Defaults to `username`.
    #[serde(default)]
    pub from: Option<String>,

    #[serde(default)]
    pub tls: TlsPolicy,

    /// Skip certificate and hostname verification.
    ///
    /// **SECURITY WARNING**: this leaves the relay connection open to
    /// man-in-the-middle attacks. It defaults to `true` for compatibility
    /// with existing deployments that relay through self-signed endpoints.
    #[serde(default = "default_accept_invalid_certs")]
    pub accept_invalid_certs: bool,

    /// Negotiate TLS before any SMTP traffic. When unset, this is inferred
    /// from the port (465).
    #[serde(default)]
    pub implicit_tls: Option<bool>,

    /// Name announced in EHLO/HELO.
    #[serde(default = "default_helo_name")]
    pub helo_name: String,

    #[serde(default)]
    pub timeouts: SmtpTimeouts,
}

impl Default for SmtpTransportConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            username: String::new(),
            password: String::new(),
            from: None,
            tls: TlsPolicy::default(),
            accept_invalid_certs: default_accept_invalid_certs(),
            implicit_tls: None,
            helo_name: default_helo_name(),
            timeouts: SmtpTimeouts::default(),
        }
    }
}

impl std::fmt::Debug for SmtpTransportConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpTransportConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("from", &self.from)
            .field("tls", &self.tls)
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .field("implicit_tls", &self.implicit_tls)
            .field("helo_name", &self.helo_name)
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

impl SmtpTransportConfig {
    /// The address used for MAIL FROM and the From header.
    #[must_use]
    pub fn from_address(&self) -> &str {
        self.from
            .as_deref()
            .filter(|from| !from.is_empty())
            .unwrap_or(&self.username)
    }

    #[must_use]
    pub fn uses_implicit_tls(&self) -> bool {
        self.implicit_tls.unwrap_or(self.port == SMTPS_PORT)
    }

    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn credentials(&self) -> Option<Credentials> {
        (!self.username.is_empty() && !self.password.is_empty()).then(|| Credentials {
            username: self.username.clone(),
            password: self.password.clone(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TlsOutcome {
    Secured,
    Plaintext,
    RetryWithoutTls,
}

/// Delivers each message over its own SMTP session.
#[derive(Debug, Clone)]
pub struct SmtpTransport {
    config: Arc<SmtpTransportConfig>,
}

impl SmtpTransport {
    #[must_use]
    pub fn new(config: SmtpTransportConfig) -> Self {
        if config.accept_invalid_certs {
            tracing::warn!(
                relay = %config.address(),
                "SECURITY WARNING: TLS certificate validation is disabled for the relay"
            );
        }

        Self {
            config: Arc::new(config),
        }
    }

    #[must_use]
    pub fn config(&self) -> &SmtpTransportConfig {
        &self.config
    }

    async fn connect_and_greet(&self) -> Result<SmtpClient, TransportError> {
        let config = &self.config;
        let limit = Duration::from_secs(config.timeouts.connect_secs);

        let mut client = timed(
            limit,
            "connect",
            SmtpClient::connect(&config.address(), config.host.clone()),
        )
        .await?
        .accept_invalid_certs(config.accept_invalid_certs);

        if config.uses_implicit_tls() {
            client = timed(limit, "TLS handshake", client.implicit_tls()).await?;
        }

        timed(limit, "greeting", client.read_greeting()).await?;
        Ok(client)
    }

    async fn negotiate_tls(&self, client: &mut SmtpClient) -> Result<TlsOutcome, TransportError> {
        let config = &self.config;
        let limit = Duration::from_secs(config.timeouts.command_secs);

        let offered = timed(limit, "EHLO", client.ehlo(&config.helo_name))
            .await?
            .supports_starttls();

        if client.is_tls() || config.tls == TlsPolicy::Disabled {
            return Ok(if client.is_tls() {
                TlsOutcome::Secured
            } else {
                TlsOutcome::Plaintext
            });
        }

        if !offered {
            if config.tls == TlsPolicy::Required {
                return Err(TransportError::TlsRequired);
            }
            tracing::debug!(relay = %config.address(), "Relay does not offer STARTTLS");
            return Ok(TlsOutcome::Plaintext);
        }

        match timed(limit, "STARTTLS", client.starttls()).await {
            Ok(_) => {
                timed(limit, "EHLO", client.ehlo(&config.helo_name)).await?;
                Ok(TlsOutcome::Secured)
            }
            Err(err) if config.tls == TlsPolicy::Opportunistic => {
                tracing::warn!(
                    relay = %config.address(),
                    error = %err,
                    "STARTTLS failed, retrying without TLS"
                );
                Ok(TlsOutcome::RetryWithoutTls)
            }
            Err(err) => Err(err),
        }
    }

    /// One delivery. A refused opportunistic STARTTLS costs a second dial,
    /// since the first connection is in an unknown state after the failure.
    async fn session(&self, message: &Message) -> Result<(), TransportError> {
        let config = &self.config;
        let command = Duration::from_secs(config.timeouts.command_secs);

        let mut client = self.connect_and_greet().await?;

        if self.negotiate_tls(&mut client).await? == TlsOutcome::RetryWithoutTls {
            drop(client);
            client = self.connect_and_greet().await?;
            timed(command, "EHLO", client.ehlo(&config.helo_name)).await?;
        }

        if let Some(credentials) = config.credentials() {
            if client.capabilities().supports_auth() {
                timed(command, "AUTH", client.authenticate(&credentials)).await?;
            } else {
                tracing::warn!(
                    relay = %config.address(),
                    "Relay does not advertise AUTH, sending unauthenticated"
                );
            }
        }

        let content = self.render(message);

        timed(command, "MAIL FROM", client.mail_from(config.from_address())).await?;
        timed(command, "RCPT TO", client.rcpt_to(message.to())).await?;
        timed(command, "DATA", client.data()).await?;
        timed(
            Duration::from_secs(config.timeouts.data_secs),
            "message content",
            client.send_data(&content),
        )
        .await?;

        // The relay has taken the message; a failed QUIT changes nothing
        let quit = Duration::from_secs(config.timeouts.quit_secs);
        if let Err(err) = timed(quit, "QUIT", client.quit()).await {
            tracing::debug!(relay = %config.address(), error = %err, "QUIT failed after delivery");
        }

        Ok(())
    }

    fn render(&self, message: &Message) -> String {
        let mut builder = MessageBuilder::new()
            .from(self.config.from_address())
            .to(message.to())
            .subject(message.subject())
            .header("Date", chrono::Utc::now().to_rfc2822())
            .header(
                "Message-ID",
                format!("<{}@{}>", Ulid::new(), self.config.helo_name),
            )
            .html(message.body());

        if let Some(name) = message.sender_display_name() {
            builder = builder.from_name(name);
        }

        builder.build()
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn send(&self, message: &Message) -> Result<(), TransportError> {
        self.session(message).await
    }
}

async fn timed<T>(
    limit: Duration,
    stage: &'static str,
    operation: impl Future<Output = Result<T, ClientError>>,
) -> Result<T, TransportError> {
    tokio::time::timeout(limit, operation)
        .await
        .map_err(|_| TransportError::Timeout {
            stage,
            after: limit,
        })?
        .map_err(TransportError::from)
}
