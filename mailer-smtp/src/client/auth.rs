//! SMTP AUTH for submission accounts (RFC 4954).

use base64::{Engine, engine::general_purpose::STANDARD};

use super::{
    error::{ClientError, Result},
    response::Response,
    smtp_client::SmtpClient,
};

/// Mechanisms we can drive, in order of preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mechanism {
    Plain,
    Login,
}

impl Mechanism {
    /// Pick the first mechanism we support out of those the server offers.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::NoAuthMechanism` when there is no overlap.
    pub fn negotiate(offered: &[String]) -> Result<Self> {
        [Self::Plain, Self::Login]
            .into_iter()
            .find(|m| offered.iter().any(|o| o.eq_ignore_ascii_case(m.as_str())))
            .ok_or_else(|| ClientError::NoAuthMechanism(offered.join(" ")))
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::Login => "LOGIN",
        }
    }
}

/// Credentials of the relay account.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

fn auth_error(response: &Response) -> ClientError {
    ClientError::AuthFailed {
        code: response.code,
        message: response.message(),
    }
}

/// `\0username\0password`, base64 encoded, sent with the command.
pub(crate) fn plain_payload(credentials: &Credentials) -> String {
    STANDARD.encode(format!(
        "\0{}\0{}",
        credentials.username, credentials.password
    ))
}

pub(crate) async fn authenticate(
    client: &mut SmtpClient,
    mechanism: Mechanism,
    credentials: &Credentials,
) -> Result<Response> {
    match mechanism {
        Mechanism::Plain => {
            let response = client
                .command_redacted(&format!("AUTH PLAIN {}", plain_payload(credentials)))
                .await?;
            if response.is_success() {
                Ok(response)
            } else {
                Err(auth_error(&response))
            }
        }
        Mechanism::Login => {
            let response = client.command("AUTH LOGIN").await?;
            if !response.is_intermediate() {
                return Err(auth_error(&response));
            }

            let response = client
                .command_redacted(&STANDARD.encode(&credentials.username))
                .await?;
            if !response.is_intermediate() {
                return Err(auth_error(&response));
            }

            let response = client
                .command_redacted(&STANDARD.encode(&credentials.password))
                .await?;
            if response.is_success() {
                Ok(response)
            } else {
                Err(auth_error(&response))
            }
        }
    }
}
