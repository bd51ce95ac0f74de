use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::PathError;

/// Opaque key that names an entity within its enclosing container.
///
/// Identifiers are compared by value. Within one container an identifier is
/// never reused for a different logical entity, so holding an `Identifier`
/// is enough to refer to "that entity" across snapshots.
///
/// The only syntactic rule is that an identifier is non-empty. Anything else,
/// including `/`, is allowed; paths percent-encode such characters.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identifier(String);

impl Identifier {
    /// Create an identifier, rejecting the empty string.
    pub fn new(value: impl Into<String>) -> Result<Self, PathError> {
        let value = value.into();
        if value.is_empty() {
            return Err(PathError::InvalidIdentifier(value));
        }
        Ok(Self(value))
    }

    /// Create a fresh identifier that has never been handed out before.
    ///
    /// Uses a UUID v7, so identifiers minted by one process sort roughly by
    /// creation time.
    pub fn unique(prefix: &str) -> Self {
        Self(format!("{prefix}{}", uuid::Uuid::now_v7().simple()))
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identifier({})", self.0)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Identifier {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Identifier> for String {
    fn from(id: Identifier) -> Self {
        id.0
    }
}

/// Literal conversion for tests and constants.
///
/// Panics on the empty string, which is a programming error at the call site.
impl From<&str> for Identifier {
    fn from(value: &str) -> Self {
        Self::new(value).expect("identifier literal must not be empty")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_identifier_rejected() {
        assert_eq!(
            Identifier::new(""),
            Err(PathError::InvalidIdentifier(String::new()))
        );
    }

    #[test]
    fn equality_is_by_value() {
        assert_eq!(Identifier::from("world"), Identifier::new("world").unwrap());
        assert_ne!(Identifier::from("world"), Identifier::from("World"));
    }

    #[test]
    fn unique_identifiers_differ() {
        let a = Identifier::unique("t-");
        let b = Identifier::unique("t-");
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("t-"));
    }

    #[test]
    fn serde_is_a_plain_string() {
        let id = Identifier::from("a/b");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"a/b\"");
        let back: Identifier = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<Identifier>("\"\"").is_err());
    }
}
