//! Command-level SMTP client for submitting to a relay.

use mailer_common::{incoming, outgoing};
use tokio::net::TcpStream;

use super::{
    auth::{self, Credentials, Mechanism},
    capabilities::Capabilities,
    connection::ClientConnection,
    error::{ClientError, Result},
    response::Response,
};

/// Initial size of the read buffer for SMTP responses.
const BUFFER_SIZE: usize = 8192;

/// Maximum size of the read buffer to prevent unbounded growth (1MB).
const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// A single session with an SMTP relay.
///
/// Each method maps to one SMTP command and checks the reply code the
/// command requires, so callers can chain them with `?`.
pub struct SmtpClient {
    connection: Option<ClientConnection>,
    buffer: Vec<u8>,
    buffer_pos: usize,
    server_domain: String,
    accept_invalid_certs: bool,
    capabilities: Capabilities,
}

impl SmtpClient {
    /// Open a plain TCP connection to `addr`.
    ///
    /// `server_domain` is the name checked against the relay's certificate
    /// once TLS is negotiated.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails.
    pub async fn connect(addr: &str, server_domain: impl Into<String>) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;

        Ok(Self {
            connection: Some(ClientConnection::Plain(stream)),
            buffer: vec![0u8; BUFFER_SIZE],
            buffer_pos: 0,
            server_domain: server_domain.into(),
            accept_invalid_certs: false,
            capabilities: Capabilities::default(),
        })
    }

    /// Skip certificate and hostname verification on TLS upgrades.
    #[must_use]
    pub const fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    /// Negotiate TLS before any SMTP traffic (SMTPS, usually port 465).
    ///
    /// # Errors
    ///
    /// Returns an error if the handshake fails.
    pub async fn implicit_tls(mut self) -> Result<Self> {
        self.upgrade().await?;
        Ok(self)
    }

    #[must_use]
    pub fn is_tls(&self) -> bool {
        self.connection.as_ref().is_some_and(ClientConnection::is_tls)
    }

    /// Capabilities from the most recent EHLO.
    #[must_use]
    pub const fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Reads the server greeting, which must be a 220.
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails or the relay refuses the session.
    pub async fn read_greeting(&mut self) -> Result<Response> {
        let response = self.read_response().await?;
        incoming!("{} {}", response.code, response.message());
        response.expect(&[220])
    }

    async fn send_command(&mut self, command: &str) -> Result<()> {
        let connection = self
            .connection
            .as_mut()
            .ok_or(ClientError::ConnectionClosed)?;
        connection.send(format!("{command}\r\n").as_bytes()).await?;
        connection.flush().await
    }

    /// Sends a raw command and reads the reply without checking its code.
    ///
    /// # Errors
    ///
    /// Returns an error if sending or reading fails.
    pub async fn command(&mut self, command: &str) -> Result<Response> {
        outgoing!("{command}");
        self.exchange(command).await
    }

    /// Like [`Self::command`], but the command text is kept out of the logs.
    pub(crate) async fn command_redacted(&mut self, command: &str) -> Result<Response> {
        outgoing!("<redacted>");
        self.exchange(command).await
    }

    async fn exchange(&mut self, command: &str) -> Result<Response> {
        self.send_command(command).await?;
        let response = self.read_response().await?;
        incoming!("{} {}", response.code, response.message());
        Ok(response)
    }

    /// Sends EHLO and records the advertised capabilities, falling back to
    /// HELO for relays that reject EHLO.
    ///
    /// # Errors
    ///
    /// Returns an error if both greetings are refused.
    pub async fn ehlo(&mut self, domain: &str) -> Result<&Capabilities> {
        let response = self.command(&format!("EHLO {domain}")).await?;

        self.capabilities = if response.is_success() {
            Capabilities::from_ehlo(&response)
        } else {
            self.command(&format!("HELO {domain}")).await?.expect(&[250])?;
            Capabilities::default()
        };

        Ok(&self.capabilities)
    }

    /// Sends STARTTLS and upgrades the connection.
    ///
    /// The relay forgets the session state after the upgrade, so EHLO has to
    /// be sent again before continuing.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::StartTlsUnavailable` if the last EHLO did not
    /// advertise STARTTLS, or an error if the relay refuses or the handshake
    /// fails.
    pub async fn starttls(&mut self) -> Result<Response> {
        if !self.capabilities.supports_starttls() {
            return Err(ClientError::StartTlsUnavailable);
        }

        let response = self.command("STARTTLS").await?.expect(&[220])?;
        self.upgrade().await?;
        self.capabilities = Capabilities::default();
        Ok(response)
    }

    async fn upgrade(&mut self) -> Result<()> {
        let connection = self.connection.take().ok_or(ClientError::ConnectionClosed)?;
        // Anything buffered before the handshake belongs to the plain session
        self.buffer_pos = 0;
        self.connection = Some(
            connection
                .upgrade_to_tls(&self.server_domain, self.accept_invalid_certs)
                .await?,
        );
        Ok(())
    }

    /// Authenticates with the best mechanism both sides support.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::NoAuthMechanism` when there is no common
    /// mechanism and `ClientError::AuthFailed` when the credentials are
    /// refused.
    pub async fn authenticate(&mut self, credentials: &Credentials) -> Result<Response> {
        let mechanism = Mechanism::negotiate(self.capabilities.mechanisms())?;
        auth::authenticate(self, mechanism, credentials).await
    }

    /// # Errors
    ///
    /// Returns an error unless the relay replies 250.
    pub async fn mail_from(&mut self, from: &str) -> Result<Response> {
        self.command(&format!("MAIL FROM:<{from}>")).await?.expect(&[250])
    }

    /// # Errors
    ///
    /// Returns an error unless the relay replies 250 or 251.
    pub async fn rcpt_to(&mut self, to: &str) -> Result<Response> {
        self.command(&format!("RCPT TO:<{to}>"))
            .await?
            .expect(&[250, 251])
    }

    /// # Errors
    ///
    /// Returns an error unless the relay replies 354.
    pub async fn data(&mut self) -> Result<Response> {
        self.command("DATA").await?.expect(&[354])
    }

    /// Sends the message content followed by the end-of-data marker.
    ///
    /// # Errors
    ///
    /// Returns an error unless the relay accepts the message with a 250.
    pub async fn send_data(&mut self, content: &str) -> Result<Response> {
        let payload = dot_stuff(content);
        outgoing!("<{} bytes of message content>", payload.len());

        let connection = self
            .connection
            .as_mut()
            .ok_or(ClientError::ConnectionClosed)?;
        connection.send(payload.as_bytes()).await?;
        connection.flush().await?;

        let response = self.read_response().await?;
        incoming!("{} {}", response.code, response.message());
        response.expect(&[250])
    }

    /// Ends the session. The reply code is not checked.
    ///
    /// # Errors
    ///
    /// Returns an error if sending or reading fails.
    pub async fn quit(&mut self) -> Result<Response> {
        self.command("QUIT").await
    }

    /// Reads a complete SMTP response from the server.
    async fn read_response(&mut self) -> Result<Response> {
        loop {
            if let Some((response, consumed)) =
                Response::parse_response(&self.buffer[..self.buffer_pos])?
            {
                self.buffer.copy_within(consumed..self.buffer_pos, 0);
                self.buffer_pos -= consumed;
                return Ok(response);
            }

            if self.buffer_pos >= self.buffer.len() {
                let new_size = self.buffer.len() * 2;
                if new_size > MAX_BUFFER_SIZE {
                    return Err(ClientError::ParseError(format!(
                        "Response too large (exceeds {MAX_BUFFER_SIZE} bytes)"
                    )));
                }
                self.buffer.resize(new_size, 0);
            }

            let connection = self
                .connection
                .as_mut()
                .ok_or(ClientError::ConnectionClosed)?;
            let n = connection.read(&mut self.buffer[self.buffer_pos..]).await?;
            self.buffer_pos += n;
        }
    }
}

/// Prepare message content for the DATA phase (RFC 5321 section 4.5.2).
///
/// Line endings become CRLF, lines starting with `.` gain a second `.`,
/// and the terminating `.` line is appended.
pub(crate) fn dot_stuff(content: &str) -> String {
    let mut out = String::with_capacity(content.len() + 16);

    for line in content.lines() {
        if line.starts_with('.') {
            out.push('.');
        }
        out.push_str(line);
        out.push_str("\r\n");
    }

    out.push_str(".\r\n");
    out
}
