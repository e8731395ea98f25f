//! Room link value types.
//!
//! Both types keep their contents out of `Debug` output and wipe them on
//! drop. The raw text is only reachable through explicit accessors.

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{LinkError, Result};

/// Upper bound on either identifier, manual or generated.
pub const MAX_FIELD_LEN: usize = 128;

/// RFC 3986 unreserved characters: safe in a query value without escaping.
pub fn is_unreserved(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~')
}

/// Publisher ("push") and viewer ("audience") identifiers for one room.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct RoomLink {
    push_id: String,
    audience: String,
}

impl RoomLink {
    /// Builds a link from caller-supplied identifiers.
    ///
    /// `push_id` is required; an empty `audience` means the room has no
    /// separate viewer key.
    pub fn new(push_id: &str, audience: &str) -> Result<Self> {
        if push_id.is_empty() {
            return Err(LinkError::Validation(
                "Push ID (Room Name) is required.".to_string(),
            ));
        }
        check_field("Push ID", push_id)?;
        check_field("Audience", audience)?;
        Ok(Self {
            push_id: push_id.to_owned(),
            audience: audience.to_owned(),
        })
    }

    pub fn push_id(&self) -> &str {
        &self.push_id
    }

    pub fn audience(&self) -> &str {
        &self.audience
    }

    pub fn has_audience(&self) -> bool {
        !self.audience.is_empty()
    }
}

impl fmt::Debug for RoomLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomLink")
            .field("push_id", &"<redacted>")
            .field("audience", &if self.has_audience() { "<redacted>" } else { "<none>" })
            .finish()
    }
}

fn check_field(label: &str, value: &str) -> Result<()> {
    if value.len() > MAX_FIELD_LEN {
        return Err(LinkError::Validation(format!(
            "{label} must be at most {MAX_FIELD_LEN} characters."
        )));
    }
    if !value.chars().all(is_unreserved) {
        return Err(LinkError::Validation(format!(
            "{label} may only contain letters, digits, '-', '.', '_' and '~'."
        )));
    }
    Ok(())
}

/// Fully-formed room address handed to the display surface.
///
/// Only the codec creates these, so every value is in canonical form.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct CanonicalUrl(String);

impl CanonicalUrl {
    pub(crate) fn from_canonical(url: String) -> Self {
        Self(url)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for CanonicalUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CanonicalUrl(<redacted, {} bytes>)", self.0.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_id_is_required() {
        let err = RoomLink::new("", "viewer").unwrap_err();
        assert_eq!(err.to_string(), "Push ID (Room Name) is required.");
    }

    #[test]
    fn audience_may_be_empty() {
        let link = RoomLink::new("room42", "").unwrap();
        assert!(!link.has_audience());
    }

    #[test]
    fn rejects_reserved_characters() {
        assert!(matches!(
            RoomLink::new("room 42", ""),
            Err(LinkError::Validation(_))
        ));
        assert!(matches!(
            RoomLink::new("room42", "pa&ss#word"),
            Err(LinkError::Validation(_))
        ));
        assert!(RoomLink::new("a-b.c_d~e", "Z9").is_ok());
    }

    #[test]
    fn rejects_overlong_fields() {
        let long = "a".repeat(MAX_FIELD_LEN + 1);
        assert!(RoomLink::new(&long, "").is_err());
        assert!(RoomLink::new("room", &long).is_err());
    }

    #[test]
    fn debug_output_is_redacted() {
        let link = RoomLink::new("room42", "viewerKeyABC").unwrap();
        let shown = format!("{link:?}");
        assert!(!shown.contains("room42"));
        assert!(!shown.contains("viewerKeyABC"));

        let url = CanonicalUrl::from_canonical("https://vdo.ninja/?push=room42".into());
        assert!(!format!("{url:?}").contains("room42"));
    }
}
