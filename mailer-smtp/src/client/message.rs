//! Builder for the HTML messages the mailer submits.

use std::fmt::Write;

use base64::{Engine, engine::general_purpose::STANDARD};

/// Builder for a single-part `text/html` message.
///
/// # Examples
///
/// ```
/// use mailer_smtp::client::MessageBuilder;
///
/// let message = MessageBuilder::new()
///     .from("noreply@example.com")
///     .from_name("PetClinic")
///     .to("owner@example.com")
///     .subject("Visit confirmed")
///     .html("<p>See you soon</p>")
///     .build();
///
/// assert!(message.contains("From: \"PetClinic\" <noreply@example.com>\r\n"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct MessageBuilder {
    from: Option<String>,
    from_name: Option<String>,
    to: Vec<String>,
    subject: Option<String>,
    headers: Vec<(String, String)>,
    html: Option<String>,
}

impl MessageBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the address in the From header.
    #[must_use]
    pub fn from(mut self, address: impl Into<String>) -> Self {
        self.from = Some(address.into());
        self
    }

    /// Sets a display name to show alongside the From address.
    ///
    /// Empty names are ignored.
    #[must_use]
    pub fn from_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.from_name = (!name.is_empty()).then_some(name);
        self
    }

    /// Adds a recipient to the To header.
    #[must_use]
    pub fn to(mut self, address: impl Into<String>) -> Self {
        self.to.push(address.into());
        self
    }

    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Adds an extra header, written after the standard ones.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn html(mut self, body: impl Into<String>) -> Self {
        self.html = Some(body.into());
        self
    }

    /// Renders headers and body with CRLF line endings.
    #[must_use]
    pub fn build(self) -> String {
        let mut message = String::with_capacity(512 + self.html.as_ref().map_or(0, String::len));

        // Writing into a String cannot fail
        if let Some(from) = &self.from {
            match &self.from_name {
                Some(name) => {
                    let _ = write!(message, "From: {} <{from}>\r\n", display_name(name));
                }
                None => {
                    let _ = write!(message, "From: {from}\r\n");
                }
            }
        }

        if !self.to.is_empty() {
            let _ = write!(message, "To: {}\r\n", self.to.join(", "));
        }

        if let Some(subject) = &self.subject {
            let _ = write!(message, "Subject: {}\r\n", encode_word(subject));
        }

        for (name, value) in &self.headers {
            let _ = write!(message, "{name}: {value}\r\n");
        }

        message.push_str("MIME-Version: 1.0\r\n");
        message.push_str("Content-Type: text/html; charset=utf-8\r\n");
        message.push_str("Content-Transfer-Encoding: 8bit\r\n");
        message.push_str("\r\n");

        if let Some(html) = &self.html {
            message.push_str(html);
        }

        message
    }
}

/// Quote a display name, or encode it when it is not plain ASCII.
fn display_name(name: &str) -> String {
    if name.is_ascii() && !name.contains(['\r', '\n']) {
        let escaped = name.replace('\\', "\\\\").replace('"', "\\\"");
        format!("\"{escaped}\"")
    } else {
        encode_word(name)
    }
}

/// RFC 2047 `B` encoding for header text that is not plain ASCII.
fn encode_word(text: &str) -> String {
    if text.is_ascii() && !text.contains(['\r', '\n']) {
        text.to_string()
    } else {
        format!("=?utf-8?B?{}?=", STANDARD.encode(text))
    }
}
