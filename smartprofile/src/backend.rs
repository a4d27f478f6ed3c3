use async_trait::async_trait;

use crate::error::BackendResult;
use crate::types::*;

/// Identity/profile/MPC backend as seen by the coordinators.
///
/// [`crate::rest::BackendHttpClient`] is the production implementation.
#[async_trait]
pub trait BackendClient: Send + Sync {
    async fn current_user(&self) -> BackendResult<User>;
    async fn list_profiles(&self) -> BackendResult<Vec<SmartProfile>>;
    async fn create_profile(&self, name: &str) -> BackendResult<SmartProfile>;
    async fn activate_profile(&self, profile_id: &str) -> BackendResult<SmartProfile>;
    async fn rename_profile(&self, profile_id: &str, name: &str) -> BackendResult<SmartProfile>;
    async fn delete_profile(&self, profile_id: &str) -> BackendResult<()>;

    async fn list_accounts(&self) -> BackendResult<LinkedAccountList>;
    async fn link_account(&self, request: &LinkAccountRequest) -> BackendResult<LinkedAccount>;
    async fn unlink_account(&self, account_id: &str) -> BackendResult<()>;
    async fn set_primary_account(&self, account_id: &str) -> BackendResult<LinkedAccount>;

    async fn logout(&self) -> BackendResult<()>;

    async fn mpc_generate(&self, profile_id: &str) -> BackendResult<CloudKeyBundle>;
    async fn mpc_keygen_start(&self, request: &KeygenStartRequest)
        -> BackendResult<MpcStartResponse>;
    async fn mpc_sign_start(&self, request: &SignStartRequest) -> BackendResult<MpcStartResponse>;
    async fn mpc_session_status(&self, session_id: &str) -> BackendResult<MpcSessionStatus>;
}
