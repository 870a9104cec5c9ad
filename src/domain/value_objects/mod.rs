//! Value objects for the credential storefront

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Error, Result};

/// The secret a customer actually receives.
///
/// Modeled as a tagged variant so a credential with neither form is
/// unrepresentable. Persisted as three nullable columns; [`from_columns`]
/// rejects rows where both forms are empty.
///
/// [`from_columns`]: CredentialPayload::from_columns
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CredentialPayload {
    EmailPassword { email: String, password: String },
    Link { url: String },
}

impl CredentialPayload {
    pub fn email_password(email: impl Into<String>, password: impl Into<String>) -> Result<Self> {
        let email = email.into().trim().to_string();
        let password = password.into();
        if email.is_empty() || password.is_empty() {
            return Err(Error::Validation(
                "credential requires both email and password".into(),
            ));
        }
        Ok(Self::EmailPassword { email, password })
    }

    pub fn link(url: impl Into<String>) -> Result<Self> {
        let url = url.into().trim().to_string();
        if url.is_empty() {
            return Err(Error::Validation("credential link must not be empty".into()));
        }
        Ok(Self::Link { url })
    }

    /// Rebuild from nullable storage columns. Email+password wins when both
    /// forms are present; neither form is a validation failure.
    pub fn from_columns(
        email: Option<String>,
        password: Option<String>,
        link: Option<String>,
    ) -> Result<Self> {
        match (email, password, link) {
            (Some(e), Some(p), _) if !e.is_empty() && !p.is_empty() => {
                Ok(Self::EmailPassword { email: e, password: p })
            }
            (_, _, Some(l)) if !l.is_empty() => Ok(Self::Link { url: l }),
            _ => Err(Error::Validation(
                "credential has neither email+password nor link".into(),
            )),
        }
    }

    /// Split back into `(email, password, link)` storage columns.
    pub fn to_columns(&self) -> (Option<&str>, Option<&str>, Option<&str>) {
        match self {
            Self::EmailPassword { email, password } => (Some(email), Some(password), None),
            Self::Link { url } => (None, None, Some(url)),
        }
    }
}

/// Bucket label matching interchangeable credentials to a variation
/// without one-to-one linkage, e.g. `netflix/4k-shared`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupKey {
    group: String,
    subgroup: Option<String>,
}

impl GroupKey {
    pub fn new(group: impl Into<String>, subgroup: Option<String>) -> Result<Self> {
        let group = group.into().trim().to_lowercase();
        if group.is_empty() {
            return Err(Error::Validation("credential group must not be empty".into()));
        }
        let subgroup = subgroup
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());
        Ok(Self { group, subgroup })
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn subgroup(&self) -> Option<&str> {
        self.subgroup.as_deref()
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.subgroup {
            Some(s) => write!(f, "{}/{}", self.group, s),
            None => write!(f, "{}", self.group),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_requires_some_form() {
        assert!(CredentialPayload::from_columns(None, None, None).is_err());
        assert!(CredentialPayload::from_columns(Some("a@b.c".into()), None, None).is_err());
    }

    #[test]
    fn test_payload_email_password_wins() {
        let p = CredentialPayload::from_columns(
            Some("a@b.c".into()),
            Some("pw".into()),
            Some("https://x".into()),
        )
        .unwrap();
        assert_eq!(p, CredentialPayload::EmailPassword { email: "a@b.c".into(), password: "pw".into() });
    }

    #[test]
    fn test_payload_columns_roundtrip() {
        let p = CredentialPayload::link("https://share.example/abc").unwrap();
        let (e, pw, l) = p.to_columns();
        assert!(e.is_none() && pw.is_none());
        assert_eq!(l, Some("https://share.example/abc"));
    }

    #[test]
    fn test_group_key() {
        let g = GroupKey::new("Netflix", Some("  4K-Shared ".into())).unwrap();
        assert_eq!(g.group(), "netflix");
        assert_eq!(g.subgroup(), Some("4k-shared"));
        assert_eq!(g.to_string(), "netflix/4k-shared");
        assert!(GroupKey::new("  ", None).is_err());
        assert_eq!(GroupKey::new("hbo", Some("".into())).unwrap().subgroup(), None);
    }
}
