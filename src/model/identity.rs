//! Identity: the signed-in principal every bookmark operation is scoped to

use serde::{Deserialize, Serialize};

/// Unique identifier for an identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityId(String);

impl IdentityId {
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IdentityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for IdentityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Optional profile data attached by the identity provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// The signed-in user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: IdentityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, rename = "user_metadata")]
    pub metadata: IdentityMetadata,
}

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: IdentityId::from_string(id),
            email: None,
            metadata: IdentityMetadata::default(),
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_full_name(mut self, full_name: impl Into<String>) -> Self {
        self.metadata.full_name = Some(full_name.into());
        self
    }

    /// Human-readable label: full name, then name, then email, then id.
    pub fn display_label(&self) -> &str {
        self.metadata
            .full_name
            .as_deref()
            .or(self.metadata.name.as_deref())
            .or(self.email.as_deref())
            .unwrap_or(self.id.as_str())
    }
}

/// Credentials presented to a backend's sign-in.
///
/// The bundled backends trust the caller; a hosted provider would run its
/// own OAuth exchange and only echo back what it verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignIn {
    pub user_id: String,
    pub email: Option<String>,
    pub metadata: IdentityMetadata,
}

impl SignIn {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: None,
            metadata: IdentityMetadata::default(),
        }
    }

    pub fn into_identity(self) -> Identity {
        Identity {
            id: IdentityId::from_string(self.user_id),
            email: self.email,
            metadata: self.metadata,
        }
    }
}
