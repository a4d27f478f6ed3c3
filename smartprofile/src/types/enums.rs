use std::fmt;

use serde::{Deserialize, Serialize};

/// How the current session was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuthStrategy {
    Email,
    Wallet,
    Google,
    Apple,
    Twitter,
    Discord,
    Passkey,
    Guest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SocialProvider {
    Google,
    Apple,
    Twitter,
    Discord,
    Github,
}

impl fmt::Display for SocialProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SocialProvider::Google => "google",
            SocialProvider::Apple => "apple",
            SocialProvider::Twitter => "twitter",
            SocialProvider::Discord => "discord",
            SocialProvider::Github => "github",
        };
        f.write_str(s)
    }
}

/// Kind of credential a [`super::LinkedAccount`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "provider", rename_all = "camelCase")]
pub enum AccountType {
    Wallet,
    Email,
    Social(SocialProvider),
    Passkey,
}

impl AccountType {
    pub fn is_wallet(&self) -> bool {
        matches!(self, AccountType::Wallet)
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountType::Wallet => f.write_str("wallet"),
            AccountType::Email => f.write_str("email"),
            AccountType::Social(p) => write!(f, "social:{p}"),
            AccountType::Passkey => f.write_str("passkey"),
        }
    }
}

/// Whether linked accounts may be shared across a user's profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrivacyMode {
    /// An account may belong to several profiles.
    #[default]
    Linked,
    /// An account belongs to exactly one profile.
    Isolated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MpcOperation {
    Keygen,
    Sign,
}

impl fmt::Display for MpcOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MpcOperation::Keygen => f.write_str("keygen"),
            MpcOperation::Sign => f.write_str("sign"),
        }
    }
}

/// Lifecycle of an MPC session. The last four variants are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MpcStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

impl MpcStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, MpcStatus::Pending | MpcStatus::InProgress)
    }

    /// Allowed transitions: `pending -> inProgress`, and any non-terminal
    /// state to any terminal state.
    pub fn can_transition_to(self, next: MpcStatus) -> bool {
        match (self, next) {
            (MpcStatus::Pending, MpcStatus::InProgress) => true,
            (from, to) => !from.is_terminal() && to.is_terminal(),
        }
    }
}

impl fmt::Display for MpcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MpcStatus::Pending => "pending",
            MpcStatus::InProgress => "inProgress",
            MpcStatus::Completed => "completed",
            MpcStatus::Failed => "failed",
            MpcStatus::Cancelled => "cancelled",
            MpcStatus::TimedOut => "timedOut",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states_cannot_transition() {
        let terminal = [
            MpcStatus::Completed,
            MpcStatus::Failed,
            MpcStatus::Cancelled,
            MpcStatus::TimedOut,
        ];
        for from in terminal {
            assert!(from.is_terminal());
            for to in terminal {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
            assert!(!from.can_transition_to(MpcStatus::InProgress));
        }
    }

    #[test]
    fn test_live_states_reach_terminal() {
        assert!(MpcStatus::Pending.can_transition_to(MpcStatus::InProgress));
        assert!(MpcStatus::Pending.can_transition_to(MpcStatus::Cancelled));
        assert!(MpcStatus::InProgress.can_transition_to(MpcStatus::Completed));
        assert!(MpcStatus::InProgress.can_transition_to(MpcStatus::TimedOut));
        assert!(!MpcStatus::InProgress.can_transition_to(MpcStatus::Pending));
    }

    #[test]
    fn test_account_type_serde() {
        let json = serde_json::to_string(&AccountType::Social(SocialProvider::Google)).unwrap();
        assert_eq!(json, r#"{"kind":"social","provider":"google"}"#);
        let wallet: AccountType = serde_json::from_str(r#"{"kind":"wallet"}"#).unwrap();
        assert_eq!(wallet, AccountType::Wallet);
    }
}
