//! SMTP submission client.
//!
//! Covers what a mail-submission agent needs to hand a message to a relay:
//!
//! - Plain TCP, implicit TLS and STARTTLS connections
//! - EHLO capability discovery with a HELO fallback
//! - AUTH PLAIN and AUTH LOGIN
//! - Dot-stuffed DATA transfer
//!
//! # Examples
//!
//! ```no_run
//! use mailer_smtp::client::{Credentials, MessageBuilder, SmtpClient};
//!
//! # async fn example() -> Result<(), mailer_smtp::client::ClientError> {
//! let mut client = SmtpClient::connect("smtp.example.com:587", "smtp.example.com").await?;
//! client.read_greeting().await?;
//!
//! if client.ehlo("client.example.com").await?.supports_starttls() {
//!     client.starttls().await?;
//!     client.ehlo("client.example.com").await?;
//! }
//!
//! client
//!     .authenticate(&Credentials {
//!         username: "noreply@example.com".into(),
//!         password: "secret".into(),
//!     })
//!     .await?;
//!
//! let message = MessageBuilder::new()
//!     .from("noreply@example.com")
//!     .to("owner@example.com")
//!     .subject("Hello")
//!     .html("<p>Hello</p>")
//!     .build();
//!
//! client.mail_from("noreply@example.com").await?;
//! client.rcpt_to("owner@example.com").await?;
//! client.data().await?;
//! client.send_data(&message).await?;
//! client.quit().await?;
//! # Ok(())
//! # }
//! ```

mod auth;
mod capabilities;
mod connection;
mod error;
mod message;
mod response;
mod smtp_client;

pub use auth::{Credentials, Mechanism};
pub use capabilities::Capabilities;
pub use error::{ClientError, Result};
pub use message::MessageBuilder;
pub use response::{Response, ResponseLine};
pub use smtp_client::SmtpClient;
