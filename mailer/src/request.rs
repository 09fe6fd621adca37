//! Send requests as they arrive from callers.

use mailer_dispatch::Message;
use mailparse::MailAddr;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("Malformed request: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Invalid recipient '{address}': {reason}")]
    InvalidRecipient { address: String, reason: String },
}

/// One email to send.
///
/// `subject` and `body` must be present but may be empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    pub to: String,
    pub subject: String,
    pub body: String,
    #[serde(
        default,
        alias = "sender_display_name",
        skip_serializing_if = "Option::is_none"
    )]
    pub sender_display_name: Option<String>,
}

impl SendRequest {
    /// Parse a request from a JSON object.
    pub fn from_json(json: &str) -> Result<Self, RequestError> {
        Ok(serde_json::from_str(json)?)
    }

    /// The bare recipient address.
    ///
    /// `to` has to be exactly one mailbox, optionally with a display name
    /// (`Jane <jane@example.com>`); the name is dropped.
    pub fn recipient(&self) -> Result<String, RequestError> {
        let invalid = |reason: &str| RequestError::InvalidRecipient {
            address: self.to.clone(),
            reason: reason.to_string(),
        };

        if self.to.contains(['\r', '\n']) {
            return Err(invalid("contains a line break"));
        }

        let list = mailparse::addrparse(&self.to).map_err(|e| invalid(&e.to_string()))?;

        let addr = match list.as_slice() {
            [MailAddr::Single(single)] => single.addr.trim(),
            [MailAddr::Group(_)] => return Err(invalid("groups are not supported")),
            [] => return Err(invalid("no address given")),
            _ => return Err(invalid("exactly one recipient is required")),
        };

        // Whatever the parser tolerated around the mailbox has to be absent
        // from the original too: a bare address stands alone, a named one
        // ends at its closing bracket.
        let raw = self.to.trim();
        let framed = if raw.contains('<') {
            raw.ends_with('>')
        } else {
            raw == addr
        };
        if !framed {
            return Err(invalid("unexpected text around the address"));
        }

        if addr.contains(|c: char| {
            c.is_whitespace() || c.is_control() || "<>;,()[]\\\"".contains(c)
        }) {
            return Err(invalid("contains characters not allowed in an address"));
        }

        let Some((local, domain)) = addr.split_once('@') else {
            return Err(invalid("not an address"));
        };

        if local.is_empty() || domain.contains('@') || domain.split('.').any(str::is_empty) {
            return Err(invalid("not an address"));
        }

        Ok(addr.to_string())
    }
}

impl TryFrom<SendRequest> for Message {
    type Error = RequestError;

    fn try_from(request: SendRequest) -> Result<Self, Self::Error> {
        let to = request.recipient()?;
        let message = Self::new(to, request.subject, request.body);

        Ok(match request.sender_display_name {
            Some(name) => message.with_sender_display_name(name),
            None => message,
        })
    }
}
