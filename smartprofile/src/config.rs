use std::time::Duration;

use crate::types::PrivacyMode;

/// Configuration for the identity core.
///
/// Use [`Default::default()`] for the design values, then set `api_url`.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Base URL of the identity/profile/MPC backend.
    pub api_url: String,
    /// Per-call network timeout.
    pub request_timeout: Duration,
    /// Backgrounded time after which an authenticated session locks.
    pub lock_timeout: Duration,
    /// Hard wall-clock limit for one MPC session.
    pub mpc_session_timeout: Duration,
    /// Delay between MPC session status polls.
    pub mpc_poll_interval: Duration,
    /// Consecutive transient poll failures tolerated before a session fails.
    pub mpc_max_poll_retries: u32,
    /// Privacy mode assumed until the backend reports one.
    pub default_privacy_mode: PrivacyMode,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            request_timeout: Duration::from_secs(30),
            lock_timeout: Duration::from_secs(30 * 60), // 30 minutes
            mpc_session_timeout: Duration::from_secs(60),
            mpc_poll_interval: Duration::from_secs(2),
            mpc_max_poll_retries: 3,
            default_privacy_mode: PrivacyMode::Linked,
        }
    }
}

impl CoreConfig {
    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            lock_timeout: self.lock_timeout,
            default_privacy_mode: self.default_privacy_mode,
        }
    }

    pub fn mpc(&self) -> MpcConfig {
        MpcConfig {
            session_timeout: self.mpc_session_timeout,
            request_timeout: self.request_timeout,
            poll_interval: self.mpc_poll_interval,
            max_poll_retries: self.mpc_max_poll_retries,
        }
    }
}

/// Settings consumed by [`crate::SessionCoordinator`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub lock_timeout: Duration,
    pub default_privacy_mode: PrivacyMode,
}

impl Default for SessionConfig {
    fn default() -> Self {
        CoreConfig::default().session()
    }
}

/// Settings consumed by [`crate::MpcSessionCoordinator`].
#[derive(Debug, Clone)]
pub struct MpcConfig {
    pub session_timeout: Duration,
    pub request_timeout: Duration,
    pub poll_interval: Duration,
    pub max_poll_retries: u32,
}

impl Default for MpcConfig {
    fn default() -> Self {
        CoreConfig::default().mpc()
    }
}
