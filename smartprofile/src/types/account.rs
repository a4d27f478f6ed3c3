use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::enums::{AccountType, PrivacyMode};
use super::proof::LinkProof;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedAccount {
    pub id: String,
    #[serde(rename = "type")]
    pub account_type: AccountType,
    /// Address, email or handle.
    pub identifier: String,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub profile_ids: Vec<String>,
    #[serde(default)]
    pub is_primary: bool,
}

impl LinkedAccount {
    pub fn belongs_to(&self, profile_id: &str) -> bool {
        self.profile_ids.iter().any(|p| p == profile_id)
    }
}

/// `GET /accounts` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedAccountList {
    #[serde(default)]
    pub privacy_mode: PrivacyMode,
    #[serde(default)]
    pub accounts: Vec<LinkedAccount>,
}

/// `POST /accounts/link` body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkAccountRequest {
    #[serde(rename = "type")]
    pub account_type: AccountType,
    pub proof: LinkProof,
    pub profile_id: String,
    pub privacy_mode: PrivacyMode,
}
