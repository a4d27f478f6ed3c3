use thiserror::Error;

/// Raw failures of the backend HTTP seam.
///
/// These never reach callers of the coordinators; they are folded into
/// [`IdentityError`] at the coordinator boundary.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("HTTP error {status}: {message}")]
    Http { status: u16, message: String },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("conflict: {message}")]
    Conflict {
        identifier: Option<String>,
        message: String,
    },

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("request timed out")]
    Timeout,

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl BackendError {
    /// Connectivity failures, timeouts, throttling and server-side errors.
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Http { status, .. } => *status >= 500 || *status == 429,
            BackendError::Request(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            BackendError::Connection(_) | BackendError::Timeout => true,
            BackendError::Unauthorized(_)
            | BackendError::Conflict { .. }
            | BackendError::Json(_)
            | BackendError::Url(_) => false,
        }
    }

    /// Invalid, expired or revoked credentials.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, BackendError::Unauthorized(_))
    }
}

/// Failures of the secret store seam.
#[derive(Error, Debug)]
pub enum SecretStoreError {
    #[error("secret store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("secret store encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("secret store lock poisoned")]
    Poisoned,
}

/// Broad classes of [`IdentityError`], used by callers that only need to
/// decide between retry, re-login and "tell the user".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    Authentication,
    Conflict,
    StateViolation,
    Mpc,
    Storage,
}

/// The closed error taxonomy surfaced by the coordinators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("network error: {0}")]
    Network(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("account {identifier} is already linked to a different user")]
    AccountConflict { identifier: String, message: String },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("session is locked")]
    SessionLocked,

    #[error("a profile switch is already in progress")]
    SwitchInProgress,

    #[error("profile switch failed: {0}")]
    ProfileSwitchFailed(String),

    #[error("profile creation failed: {0}")]
    ProfileCreationFailed(String),

    #[error("invalid proof: {0}")]
    InvalidProof(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("biometric verification failed")]
    BiometricDenied,

    #[error("secure storage error: {0}")]
    Storage(String),

    #[error("an MPC operation is already in progress for this profile")]
    OperationInProgress,

    #[error("no key share found for this profile")]
    KeyShareNotFound,

    #[error("MPC request timed out")]
    RequestTimeout,

    #[error("MPC operation failed: {0}")]
    OperationFailed(String),

    #[error("MPC operation cancelled: {0}")]
    OperationCancelled(String),
}

impl IdentityError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IdentityError::Network(_)
            | IdentityError::ProfileSwitchFailed(_)
            | IdentityError::ProfileCreationFailed(_) => ErrorKind::Network,
            IdentityError::Authentication(_) | IdentityError::BiometricDenied => {
                ErrorKind::Authentication
            }
            IdentityError::AccountConflict { .. } => ErrorKind::Conflict,
            IdentityError::InvalidState(_)
            | IdentityError::SessionLocked
            | IdentityError::SwitchInProgress
            | IdentityError::InvalidProof(_)
            | IdentityError::Validation(_)
            | IdentityError::NotFound(_) => ErrorKind::StateViolation,
            IdentityError::Storage(_) => ErrorKind::Storage,
            IdentityError::OperationInProgress
            | IdentityError::KeyShareNotFound
            | IdentityError::RequestTimeout
            | IdentityError::OperationFailed(_)
            | IdentityError::OperationCancelled(_) => ErrorKind::Mpc,
        }
    }

    /// Single human-readable message shown next to `show_error`.
    pub fn user_message(&self) -> String {
        match self {
            IdentityError::Network(_) => {
                "Unable to reach the server. Check your connection and try again.".into()
            }
            IdentityError::Authentication(_) => {
                "Your session has expired. Please sign in again.".into()
            }
            IdentityError::AccountConflict { identifier, .. } => format!(
                "{identifier} is already linked to another account. \
                 Switch to that account to use it."
            ),
            IdentityError::SessionLocked => "Unlock the app to continue.".into(),
            IdentityError::SwitchInProgress => {
                "Please wait for the current profile switch to finish.".into()
            }
            IdentityError::ProfileSwitchFailed(reason) => {
                format!("Could not switch profile: {reason}")
            }
            IdentityError::ProfileCreationFailed(reason) => {
                format!("Could not create profile: {reason}")
            }
            IdentityError::BiometricDenied => "Biometric verification failed.".into(),
            IdentityError::OperationInProgress => {
                "A wallet operation is already running for this profile.".into()
            }
            IdentityError::KeyShareNotFound => "This profile does not have a wallet yet.".into(),
            IdentityError::RequestTimeout => {
                "The wallet operation timed out. Please try again.".into()
            }
            other => other.to_string(),
        }
    }

    /// Whether reporting this error must end the session.
    pub fn invalidates_session(&self) -> bool {
        matches!(self, IdentityError::Authentication(_))
    }

    /// Fold a backend failure into the closed taxonomy. Conflicts and auth
    /// failures keep their own kinds; everything else is a network error.
    pub fn from_backend(err: BackendError) -> Self {
        match err {
            BackendError::Unauthorized(msg) => IdentityError::Authentication(msg),
            BackendError::Conflict {
                identifier,
                message,
            } => IdentityError::AccountConflict {
                identifier: identifier.unwrap_or_else(|| "this account".into()),
                message,
            },
            BackendError::Http { status: 404, message } => IdentityError::NotFound(message),
            other => IdentityError::Network(other.to_string()),
        }
    }
}

impl From<SecretStoreError> for IdentityError {
    fn from(e: SecretStoreError) -> Self {
        IdentityError::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, IdentityError>;
pub type BackendResult<T> = std::result::Result<T, BackendError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let http = |status| BackendError::Http {
            status,
            message: String::new(),
        };
        assert!(http(503).is_transient());
        assert!(http(429).is_transient());
        assert!(!http(400).is_transient());
        assert!(BackendError::Timeout.is_transient());
        assert!(BackendError::Connection("reset".into()).is_transient());
        assert!(!BackendError::Unauthorized("expired".into()).is_transient());
    }

    #[test]
    fn test_auth_failure_maps_to_authentication() {
        let err = IdentityError::from_backend(BackendError::Unauthorized("revoked".into()));
        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert!(err.invalidates_session());
    }

    #[test]
    fn test_conflict_stays_distinct_from_network() {
        let err = IdentityError::from_backend(BackendError::Conflict {
            identifier: Some("alice@example.com".into()),
            message: "linked elsewhere".into(),
        });
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(err.user_message().contains("alice@example.com"));

        let err = IdentityError::from_backend(BackendError::Connection("refused".into()));
        assert_eq!(err.kind(), ErrorKind::Network);
        assert!(!err.invalidates_session());
    }

    #[test]
    fn test_mpc_errors_are_mpc_kind() {
        for e in [
            IdentityError::OperationInProgress,
            IdentityError::KeyShareNotFound,
            IdentityError::RequestTimeout,
            IdentityError::OperationFailed("bad".into()),
            IdentityError::OperationCancelled("user".into()),
        ] {
            assert_eq!(e.kind(), ErrorKind::Mpc);
        }
    }
}
