pub mod account_link;
pub mod backend;
pub mod config;
pub mod error;
pub mod mpc;
pub mod profile_store;
pub mod rest;
pub mod secrets;
pub mod session;
pub mod types;

// ---- Top-level re-exports for ergonomic usage ----

// Coordinators
pub use account_link::AccountLinkGraph;
pub use mpc::{Ed25519P1Generator, MpcSessionCoordinator, P1MessageGenerator};
pub use profile_store::ProfileStore;
pub use session::{BiometricVerifier, NoBiometrics, SessionCoordinator, SessionLink};

// Config + errors
pub use config::{CoreConfig, MpcConfig, SessionConfig};
pub use error::{BackendError, ErrorKind, IdentityError, Result, SecretStoreError};

// Seams
pub use backend::BackendClient;
pub use rest::BackendHttpClient;
pub use secrets::{FileSecretStore, MemorySecretStore, SecretStore};

// Session + user
pub use types::{
    AuthStrategy, SessionCredentials, SessionEvent, SessionSnapshot, SessionState, SmartProfile,
    User,
};

// Linked accounts
pub use types::{AccountType, LinkProof, LinkedAccount, LinkedAccountList, PrivacyMode, SocialProvider};

// MPC
pub use types::{MpcOperation, MpcSession, MpcStatus, SignatureResult, WalletInfo};
