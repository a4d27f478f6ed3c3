use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::{MpcOperation, MpcStatus};

/// A protocol message produced by the device-side party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct P1Message {
    pub round: u32,
    /// Hex-encoded payload.
    pub payload: String,
}

/// `POST /mpc/generate` response: the server party's public material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudKeyBundle {
    pub public_key: String,
    #[serde(default)]
    pub key_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub profile_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeygenStartRequest {
    pub profile_id: String,
    pub p1_messages: Vec<P1Message>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignStartRequest {
    pub profile_id: String,
    /// Hex-encoded message to sign.
    pub message: String,
    pub p1_messages: Vec<P1Message>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MpcStartResponse {
    pub session_id: String,
}

/// `GET /mpc/session/{id}` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MpcSessionStatus {
    pub session_id: String,
    pub status: MpcStatus,
    #[serde(default)]
    pub result: Option<MpcSessionResult>,
    #[serde(default)]
    pub error: Option<String>,
    /// Server-party messages for this round, recorded in the transcript.
    #[serde(default)]
    pub messages: Vec<P1Message>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MpcSessionResult {
    #[serde(default)]
    pub wallet_address: Option<String>,
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default)]
    pub key_share_ref: Option<String>,
    #[serde(default)]
    pub signature: Option<String>,
}

/// Which party produced a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageOrigin {
    Device,
    Server,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEntry {
    pub origin: MessageOrigin,
    pub message: P1Message,
}

/// Client-side record of one MPC handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MpcSession {
    pub session_id: String,
    /// Id assigned by the backend once the start call succeeds.
    pub remote_session_id: Option<String>,
    pub profile_id: String,
    pub operation: MpcOperation,
    pub messages: Vec<TranscriptEntry>,
    pub status: MpcStatus,
    pub created_at: DateTime<Utc>,
}

impl MpcSession {
    pub fn new(session_id: String, profile_id: String, operation: MpcOperation) -> Self {
        Self {
            session_id,
            remote_session_id: None,
            profile_id,
            operation,
            messages: Vec::new(),
            status: MpcStatus::Pending,
            created_at: Utc::now(),
        }
    }

    /// Apply a status change. Returns `false` (and leaves the session
    /// untouched) when the transition is not allowed.
    pub fn transition(&mut self, next: MpcStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        true
    }
}

/// Key material reference persisted after a successful keygen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyShareRecord {
    pub session_id: String,
    pub key_share_ref: String,
    pub wallet_address: String,
    #[serde(default)]
    pub public_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletInfo {
    pub profile_id: String,
    pub address: String,
    #[serde(default)]
    pub public_key: Option<String>,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
}

impl WalletInfo {
    pub fn from_record(profile_id: &str, record: &KeyShareRecord) -> Self {
        Self {
            profile_id: profile_id.to_string(),
            address: record.wallet_address.clone(),
            public_key: record.public_key.clone(),
            session_id: record.session_id.clone(),
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureResult {
    pub profile_id: String,
    /// Hex-encoded signature blob.
    pub signature: String,
    pub session_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_transitions_stop_at_terminal() {
        let mut s = MpcSession::new("s1".into(), "p1".into(), MpcOperation::Keygen);
        assert!(s.transition(MpcStatus::InProgress));
        assert!(s.transition(MpcStatus::Cancelled));
        assert!(!s.transition(MpcStatus::Completed));
        assert_eq!(s.status, MpcStatus::Cancelled);
    }

    #[test]
    fn test_status_response_parses() {
        let json = r#"{
            "sessionId": "mpc-42",
            "status": "completed",
            "result": {
                "walletAddress": "0x52908400098527886E0F7030069857D2E4169EE7",
                "keyShareRef": "share-abc"
            }
        }"#;
        let status: MpcSessionStatus = serde_json::from_str(json).unwrap();
        assert_eq!(status.status, MpcStatus::Completed);
        let result = status.result.unwrap();
        assert_eq!(result.key_share_ref.as_deref(), Some("share-abc"));
        assert!(result.signature.is_none());
        assert!(status.messages.is_empty());
    }
}
