//! ESMTP extensions advertised in an EHLO reply.

use super::response::Response;

/// The subset of EHLO keywords the submission client acts on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    starttls: bool,
    auth: Vec<String>,
}

impl Capabilities {
    /// Read capabilities from an EHLO reply.
    ///
    /// The first line is the server greeting and carries no keyword.
    #[must_use]
    pub fn from_ehlo(response: &Response) -> Self {
        let mut capabilities = Self::default();

        for line in response.lines.iter().skip(1) {
            let mut words = line.split_whitespace();
            let Some(keyword) = words.next() else {
                continue;
            };

            match keyword.to_ascii_uppercase().as_str() {
                "STARTTLS" => capabilities.starttls = true,
                // Some older relays still advertise `AUTH=LOGIN`
                keyword if keyword == "AUTH" || keyword.starts_with("AUTH=") => {
                    let inline = keyword.strip_prefix("AUTH=").filter(|m| !m.is_empty());
                    for mechanism in inline.into_iter().chain(words) {
                        let mechanism = mechanism.to_ascii_uppercase();
                        if !capabilities.auth.contains(&mechanism) {
                            capabilities.auth.push(mechanism);
                        }
                    }
                }
                _ => {}
            }
        }

        capabilities
    }

    #[must_use]
    pub const fn supports_starttls(&self) -> bool {
        self.starttls
    }

    #[must_use]
    pub fn supports_auth(&self) -> bool {
        !self.auth.is_empty()
    }

    #[must_use]
    pub fn supports_mechanism(&self, mechanism: &str) -> bool {
        self.auth.iter().any(|m| m.eq_ignore_ascii_case(mechanism))
    }

    /// Advertised AUTH mechanisms, upper-cased.
    #[must_use]
    pub fn mechanisms(&self) -> &[String] {
        &self.auth
    }
}
