//! Outbound mail service.
//!
//! Glues the dispatch core to the outside world: configuration loading,
//! validation of incoming send requests, and the line-oriented `serve` loop
//! used by the `mailer` binary.

pub mod config;
pub mod request;
pub mod serve;

pub use config::{ConfigError, MailerConfig};
pub use request::{RequestError, SendRequest};
