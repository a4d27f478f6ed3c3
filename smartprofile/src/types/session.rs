use serde::{Deserialize, Serialize};

use super::profile::SmartProfile;
use super::user::User;

/// Top-level session state.
///
/// `Loading` and `Unauthenticated` are entry states; there is no terminal
/// state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Loading,
    Unauthenticated,
    /// Authenticated with zero profiles.
    NeedsProfile,
    Authenticated,
    Locked,
}

impl SessionState {
    pub const ALL: [SessionState; 5] = [
        SessionState::Loading,
        SessionState::Unauthenticated,
        SessionState::NeedsProfile,
        SessionState::Authenticated,
        SessionState::Locked,
    ];
}

/// Published view of the session, derived predicates included.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub user: Option<User>,
    pub active_profile: Option<SmartProfile>,
    pub profiles: Vec<SmartProfile>,
    pub is_switching_profile: bool,
    pub profile_switch_progress: u8,
    pub error_message: Option<String>,
}

impl SessionSnapshot {
    pub fn needs_onboarding(&self) -> bool {
        self.state == SessionState::NeedsProfile
    }

    pub fn is_loading(&self) -> bool {
        self.state == SessionState::Loading
    }

    pub fn can_proceed(&self) -> bool {
        self.state == SessionState::Authenticated && self.active_profile.is_some()
    }

    pub fn is_locked(&self) -> bool {
        self.state == SessionState::Locked
    }

    pub fn show_error(&self) -> bool {
        self.error_message.is_some()
    }
}

/// Notifications emitted after the corresponding state change is committed.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    ProfileChanged(SmartProfile),
    SessionEnded,
    Locked,
    Unlocked,
}
