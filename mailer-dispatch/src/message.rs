/// An outbound email, immutable once built.
///
/// Addresses are not checked here; callers validate before building.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    to: String,
    subject: String,
    body: String,
    sender_display_name: Option<String>,
}

impl Message {
    #[must_use]
    pub fn new(to: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            body: body.into(),
            sender_display_name: None,
        }
    }

    /// Name shown next to the relay account in the From header.
    ///
    /// An empty name means no display name.
    #[must_use]
    pub fn with_sender_display_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.sender_display_name = (!name.is_empty()).then_some(name);
        self
    }

    #[must_use]
    pub fn to(&self) -> &str {
        &self.to
    }

    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// HTML body.
    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    #[must_use]
    pub fn sender_display_name(&self) -> Option<&str> {
        self.sender_display_name.as_deref()
    }
}
