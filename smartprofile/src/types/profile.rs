use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix the backend uses for placeholder shares issued before a real
/// key generation has run.
pub const DEVELOPMENT_SHARE_PREFIX: &str = "dev-";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmartProfile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub client_share: Option<String>,
}

impl SmartProfile {
    pub fn has_development_share(&self) -> bool {
        self.client_share
            .as_deref()
            .is_some_and(|s| s.starts_with(DEVELOPMENT_SHARE_PREFIX))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProfileRequest {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameProfileRequest {
    pub name: String,
}
