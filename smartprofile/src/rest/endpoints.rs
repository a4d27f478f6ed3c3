use async_trait::async_trait;

use crate::backend::BackendClient;
use crate::error::BackendResult;
use crate::rest::BackendHttpClient;
use crate::types::*;

#[async_trait]
impl BackendClient for BackendHttpClient {
    // --- User ---

    /// GET /users/me - The authenticated user.
    async fn current_user(&self) -> BackendResult<User> {
        self.get("/users/me").await
    }

    // --- Profiles ---

    /// GET /profiles - All profiles of the user, with the active flag.
    async fn list_profiles(&self) -> BackendResult<Vec<SmartProfile>> {
        self.get("/profiles").await
    }

    /// POST /profiles - Create a profile (not activated).
    async fn create_profile(&self, name: &str) -> BackendResult<SmartProfile> {
        let body = CreateProfileRequest {
            name: name.to_string(),
        };
        self.post("/profiles", &body).await
    }

    /// POST /profiles/{id}/activate - Make a profile the active one.
    async fn activate_profile(&self, profile_id: &str) -> BackendResult<SmartProfile> {
        self.post_no_body(&format!("/profiles/{profile_id}/activate"))
            .await
    }

    /// PATCH /profiles/{id} - Rename a profile.
    async fn rename_profile(&self, profile_id: &str, name: &str) -> BackendResult<SmartProfile> {
        let body = RenameProfileRequest {
            name: name.to_string(),
        };
        self.patch(&format!("/profiles/{profile_id}"), &body).await
    }

    /// DELETE /profiles/{id}
    async fn delete_profile(&self, profile_id: &str) -> BackendResult<()> {
        self.delete(&format!("/profiles/{profile_id}")).await
    }

    // --- Linked accounts ---

    /// GET /accounts - Linked accounts and the user's privacy mode.
    async fn list_accounts(&self) -> BackendResult<LinkedAccountList> {
        self.get("/accounts").await
    }

    /// POST /accounts/link - Link an account from a provider proof.
    async fn link_account(&self, request: &LinkAccountRequest) -> BackendResult<LinkedAccount> {
        self.post("/accounts/link", request).await
    }

    /// DELETE /accounts/{id}
    async fn unlink_account(&self, account_id: &str) -> BackendResult<()> {
        self.delete(&format!("/accounts/{account_id}")).await
    }

    /// POST /accounts/{id}/primary - Mark a wallet as the profile's primary.
    async fn set_primary_account(&self, account_id: &str) -> BackendResult<LinkedAccount> {
        self.post_no_body(&format!("/accounts/{account_id}/primary"))
            .await
    }

    // --- Auth ---

    /// POST /auth/logout - Revoke the current tokens.
    async fn logout(&self) -> BackendResult<()> {
        self.post_empty("/auth/logout").await
    }

    // --- MPC proxy ---

    /// POST /mpc/generate - Server party's public key bundle.
    async fn mpc_generate(&self, profile_id: &str) -> BackendResult<CloudKeyBundle> {
        let body = GenerateRequest {
            profile_id: profile_id.to_string(),
        };
        self.post("/mpc/generate", &body).await
    }

    /// POST /mpc/keygen/start - Submit P1 messages, open a keygen session.
    async fn mpc_keygen_start(
        &self,
        request: &KeygenStartRequest,
    ) -> BackendResult<MpcStartResponse> {
        self.post("/mpc/keygen/start", request).await
    }

    /// POST /mpc/sign/start - Submit P1 messages, open a signing session.
    async fn mpc_sign_start(&self, request: &SignStartRequest) -> BackendResult<MpcStartResponse> {
        self.post("/mpc/sign/start", request).await
    }

    /// GET /mpc/session/{id} - Session status and result.
    async fn mpc_session_status(&self, session_id: &str) -> BackendResult<MpcSessionStatus> {
        self.get(&format!("/mpc/session/{session_id}")).await
    }
}
