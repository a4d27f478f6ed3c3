use serde::{Deserialize, Serialize};

use super::enums::AuthStrategy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub is_guest: bool,
    #[serde(default)]
    pub auth_strategies: Vec<AuthStrategy>,
}

impl User {
    /// A local guest identity; guests never have profiles.
    pub fn guest(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            email: None,
            is_guest: true,
            auth_strategies: vec![AuthStrategy::Guest],
        }
    }
}

/// Tokens produced by an external sign-in flow.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCredentials {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

impl std::fmt::Debug for SessionCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCredentials")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
