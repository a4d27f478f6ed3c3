//! Session coordinator: the single source of truth for whether the user can
//! proceed.
//!
//! State mutations happen under one short-lived lock and are published on a
//! `watch` channel while that lock is held, so observers always see committed
//! snapshots in order. Events go out on a `broadcast` channel strictly after
//! the mutation they describe.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::account_link::AccountLinkGraph;
use crate::backend::BackendClient;
use crate::config::SessionConfig;
use crate::error::{BackendError, BackendResult, IdentityError, Result};
use crate::profile_store::ProfileStore;
use crate::secrets::{SecretStore, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
use crate::types::*;

const MAX_PROFILE_NAME_LEN: usize = 64;

/// Device-local biometric check (Face ID, fingerprint, ...).
#[async_trait]
pub trait BiometricVerifier: Send + Sync {
    /// Returns `true` when the user passed the check.
    async fn verify(&self) -> bool;
}

/// Verifier for devices without biometric hardware; never unlocks.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBiometrics;

#[async_trait]
impl BiometricVerifier for NoBiometrics {
    async fn verify(&self) -> bool {
        false
    }
}

#[derive(Debug)]
struct SessionInner {
    state: SessionState,
    user: Option<User>,
    profiles: ProfileStore,
    error: Option<IdentityError>,
    /// Target of the profile switch in flight, if any.
    switching_to: Option<String>,
    switch_progress: u8,
    /// Cancelled when the current session ends.
    session_token: CancellationToken,
}

impl SessionInner {
    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            user: self.user.clone(),
            active_profile: self.profiles.active().cloned(),
            profiles: self.profiles.all().to_vec(),
            is_switching_profile: self.switching_to.is_some(),
            profile_switch_progress: self.switch_progress,
            error_message: self.error.as_ref().map(IdentityError::user_message),
        }
    }

    /// Gate for operations that mutate profiles or accounts.
    fn require_authenticated(&self) -> Result<()> {
        match self.state {
            SessionState::Authenticated => Ok(()),
            SessionState::Locked => Err(IdentityError::SessionLocked),
            other => Err(IdentityError::InvalidState(format!(
                "operation requires an authenticated session (state: {other:?})"
            ))),
        }
    }

    fn require_active_profile(&self) -> Result<String> {
        self.require_authenticated()?;
        self.profiles
            .active_id()
            .map(str::to_string)
            .ok_or_else(|| IdentityError::InvalidState("no active profile".into()))
    }
}

/// State shared with the background lock timer and [`SessionLink`] holders.
struct Shared {
    inner: Mutex<SessionInner>,
    secrets: Arc<dyn SecretStore>,
    accounts: AccountLinkGraph,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    events_tx: broadcast::Sender<SessionEvent>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mutate the state and publish the resulting snapshot.
    fn update<R>(&self, f: impl FnOnce(&mut SessionInner) -> R) -> R {
        let mut inner = self.lock();
        let out = f(&mut inner);
        self.snapshot_tx.send_replace(inner.snapshot());
        out
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events_tx.send(event);
    }

    /// Clear secrets and local state, then announce the end of session.
    ///
    /// Secrets are cleared under the state lock, so writers holding a
    /// [`SessionLink`] token never land after the clear. The state is reset
    /// even if clearing fails.
    fn end_session(&self) -> Result<()> {
        let cleared = self.update(|inner| {
            inner.session_token.cancel();
            inner.session_token = CancellationToken::new();
            let cleared = self.secrets.clear_all();
            self.accounts.clear();
            inner.state = SessionState::Unauthenticated;
            inner.user = None;
            inner.profiles.clear();
            inner.error = None;
            inner.switching_to = None;
            inner.switch_progress = 0;
            cleared
        });
        self.emit(SessionEvent::SessionEnded);
        info!("session ended");
        cleared.map_err(IdentityError::from)
    }

    /// End the session after the backend rejected its credentials and leave
    /// `err` for the UI.
    fn reject_credentials(&self, err: &IdentityError) {
        warn!(error = %err, "authentication rejected, ending session");
        if let Err(e) = self.end_session() {
            warn!(error = %e, "failed to clear secrets after auth failure");
        }
        self.update(|inner| inner.error = Some(err.clone()));
    }

    fn lock_if_authenticated(&self) -> bool {
        let locked = self.update(|inner| {
            if inner.state == SessionState::Authenticated {
                inner.state = SessionState::Locked;
                true
            } else {
                false
            }
        });
        if locked {
            info!("session locked after background timeout");
            self.emit(SessionEvent::Locked);
        }
        locked
    }
}

/// Handle through which other coordinators follow the session they run
/// under. Obtained from [`SessionCoordinator::link`].
#[derive(Clone)]
pub struct SessionLink {
    shared: Arc<Shared>,
}

impl SessionLink {
    /// Admit an operation on the current session. The returned token is
    /// cancelled when that session ends.
    pub(crate) fn begin(&self) -> Result<CancellationToken> {
        let inner = self.shared.lock();
        inner.require_authenticated()?;
        Ok(inner.session_token.clone())
    }

    /// Run `write` only if the session behind `token` is still current.
    /// Holds the state lock throughout, so an ending session waits for it.
    pub(crate) fn commit<T>(
        &self,
        token: &CancellationToken,
        write: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        let _inner = self.shared.lock();
        if token.is_cancelled() {
            return Err(IdentityError::OperationCancelled("session ended".into()));
        }
        write()
    }

    /// Pass `err` through, ending the session first if it is an auth failure.
    pub(crate) fn report(&self, err: IdentityError) -> IdentityError {
        if err.invalidates_session() {
            self.shared.reject_credentials(&err);
        }
        err
    }
}

impl std::fmt::Debug for SessionLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLink")
            .field("state", &self.shared.lock().state)
            .finish()
    }
}

struct BackgroundTimer {
    entered_at: Instant,
    cancel: CancellationToken,
}

/// Top-level session state machine.
///
/// Construct one per process and share it (e.g. in an `Arc`); all entry
/// points take `&self`.
pub struct SessionCoordinator {
    backend: Arc<dyn BackendClient>,
    biometrics: Arc<dyn BiometricVerifier>,
    config: SessionConfig,
    shared: Arc<Shared>,
    /// Serialises profile mutations (switch, create, rename, delete).
    profile_gate: tokio::sync::Mutex<()>,
    background: Mutex<Option<BackgroundTimer>>,
}

impl SessionCoordinator {
    pub fn new(
        backend: Arc<dyn BackendClient>,
        secrets: Arc<dyn SecretStore>,
        biometrics: Arc<dyn BiometricVerifier>,
        config: SessionConfig,
    ) -> Self {
        let inner = SessionInner {
            state: SessionState::Loading,
            user: None,
            profiles: ProfileStore::new(),
            error: None,
            switching_to: None,
            switch_progress: 0,
            session_token: CancellationToken::new(),
        };
        let (snapshot_tx, _) = watch::channel(inner.snapshot());
        let (events_tx, _) = broadcast::channel(64);
        let accounts = AccountLinkGraph::new(Arc::clone(&backend), config.default_privacy_mode);

        Self {
            backend,
            biometrics,
            config,
            shared: Arc::new(Shared {
                inner: Mutex::new(inner),
                secrets,
                accounts,
                snapshot_tx,
                events_tx,
            }),
            profile_gate: tokio::sync::Mutex::new(()),
            background: Mutex::new(None),
        }
    }

    /// Handle for coordinators that must follow this session.
    pub fn link(&self) -> SessionLink {
        SessionLink {
            shared: Arc::clone(&self.shared),
        }
    }

    // --- Observation ---

    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.lock().snapshot()
    }

    /// Watch committed snapshots.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.shared.snapshot_tx.subscribe()
    }

    /// Receive profile-changed / session-ended / lock notifications.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events_tx.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().state
    }

    pub fn current_user(&self) -> Option<User> {
        self.shared.lock().user.clone()
    }

    pub fn active_profile(&self) -> Option<SmartProfile> {
        self.shared.lock().profiles.active().cloned()
    }

    pub fn profiles(&self) -> Vec<SmartProfile> {
        self.shared.lock().profiles.all().to_vec()
    }

    pub fn is_switching_profile(&self) -> bool {
        self.shared.lock().switching_to.is_some()
    }

    pub fn profile_switch_progress(&self) -> u8 {
        self.shared.lock().switch_progress
    }

    pub fn needs_onboarding(&self) -> bool {
        self.snapshot().needs_onboarding()
    }

    pub fn is_loading(&self) -> bool {
        self.snapshot().is_loading()
    }

    pub fn can_proceed(&self) -> bool {
        self.snapshot().can_proceed()
    }

    pub fn is_locked(&self) -> bool {
        self.snapshot().is_locked()
    }

    pub fn error(&self) -> Option<IdentityError> {
        self.shared.lock().error.clone()
    }

    pub fn show_error(&self) -> bool {
        self.shared.lock().error.is_some()
    }

    pub fn dismiss_error(&self) {
        self.shared.update(|inner| inner.error = None);
    }

    /// The linked-account graph; mutate it through the coordinator.
    pub fn account_graph(&self) -> &AccountLinkGraph {
        &self.shared.accounts
    }

    /// Accounts linked to the active profile.
    pub fn linked_accounts(&self) -> Vec<LinkedAccount> {
        let active_id = self.shared.lock().profiles.active_id().map(str::to_string);
        match active_id {
            Some(id) => self.shared.accounts.accounts_for(&id),
            None => Vec::new(),
        }
    }

    // --- Error reporting ---

    /// Record `err` for the UI and return it. Authentication failures end
    /// the session first.
    fn fail<T>(&self, err: IdentityError) -> Result<T> {
        if err.invalidates_session() {
            self.shared.reject_credentials(&err);
        } else {
            self.shared.update(|inner| inner.error = Some(err.clone()));
        }
        Err(err)
    }

    // --- Authentication ---

    /// Store the tokens from an external sign-in flow and cache the user.
    ///
    /// Call [`Self::load_user_session`] afterwards to resolve the state.
    pub fn sign_in(&self, credentials: SessionCredentials, user: Option<User>) -> Result<()> {
        if self.state() == SessionState::Locked {
            return self.fail(IdentityError::SessionLocked);
        }

        let stored = self
            .shared
            .secrets
            .set(ACCESS_TOKEN_KEY, &credentials.access_token)
            .and_then(|_| match &credentials.refresh_token {
                Some(token) => self.shared.secrets.set(REFRESH_TOKEN_KEY, token),
                None => self.shared.secrets.delete(REFRESH_TOKEN_KEY),
            });
        if let Err(e) = stored {
            return self.fail(e.into());
        }

        self.shared.update(|inner| {
            inner.user = user;
            inner.error = None;
        });
        debug!("credentials stored");
        Ok(())
    }

    /// Resolve the session from the backend.
    ///
    /// Guests skip the network entirely. An auth failure silently ends in
    /// `Unauthenticated`; a transient failure restores the previous state and
    /// surfaces a recoverable error.
    pub async fn load_user_session(&self) -> Result<()> {
        let (previous, cached_user) = {
            let inner = self.shared.lock();
            (inner.state, inner.user.clone())
        };
        if previous == SessionState::Locked {
            return self.fail(IdentityError::SessionLocked);
        }

        if let Some(user) = cached_user.filter(|u| u.is_guest) {
            self.shared.accounts.clear();
            self.shared.update(|inner| {
                inner.profiles.clear();
                inner.state = SessionState::Authenticated;
                inner.error = None;
            });
            info!(user_id = %user.id, "guest session ready");
            return Ok(());
        }

        let has_token = match self.shared.secrets.get(ACCESS_TOKEN_KEY) {
            Ok(token) => token.is_some(),
            Err(e) => return self.fail(e.into()),
        };
        if !has_token {
            self.shared.update(|inner| {
                inner.state = SessionState::Unauthenticated;
                inner.user = None;
                inner.profiles.clear();
            });
            debug!("no stored credentials");
            return Ok(());
        }

        self.shared.update(|inner| inner.state = SessionState::Loading);

        match self.fetch_session().await {
            Ok((user, profiles, accounts)) => {
                match accounts {
                    Some(list) => self.shared.accounts.replace_all(list),
                    None => self.shared.accounts.clear(),
                }
                let previous_active = self.active_profile().map(|p| p.id);
                let (state, active) = self.shared.update(|inner| {
                    inner.user = Some(user.clone());
                    let active = inner.profiles.replace_all(profiles).cloned();
                    inner.state = if user.is_guest || active.is_some() {
                        SessionState::Authenticated
                    } else {
                        SessionState::NeedsProfile
                    };
                    inner.error = None;
                    (inner.state, active)
                });
                info!(user_id = %user.id, state = ?state, "session loaded");
                if let Some(profile) = active {
                    if previous_active.as_deref() != Some(profile.id.as_str()) {
                        self.shared.emit(SessionEvent::ProfileChanged(profile));
                    }
                }
                Ok(())
            }
            Err(e) if e.is_auth_failure() => {
                info!("stored credentials rejected, session ended");
                self.end_session()
            }
            Err(e) => {
                warn!(error = %e, "session load failed, keeping previous state");
                self.shared.update(|inner| inner.state = previous);
                self.fail(IdentityError::from_backend(e))
            }
        }
    }

    async fn fetch_session(
        &self,
    ) -> BackendResult<(User, Vec<SmartProfile>, Option<LinkedAccountList>)> {
        let user = self.backend.current_user().await?;
        if user.is_guest {
            return Ok((user, Vec::new(), None));
        }
        let (profiles, accounts) =
            tokio::try_join!(self.backend.list_profiles(), self.backend.list_accounts())?;
        Ok((user, profiles, Some(accounts)))
    }

    /// Best-effort backend logout followed by a full local reset.
    pub async fn logout(&self) -> Result<()> {
        self.cancel_background_timer();

        let has_token = matches!(self.shared.secrets.get(ACCESS_TOKEN_KEY), Ok(Some(_)));
        if has_token {
            if let Err(e) = self.backend.logout().await {
                warn!(error = %e, "backend logout failed, clearing local session anyway");
            }
        }
        self.end_session()
    }

    fn end_session(&self) -> Result<()> {
        self.shared.end_session()
    }

    // --- Profiles ---

    /// Create and activate the first profile: `NeedsProfile -> Authenticated`.
    ///
    /// Either both backend steps succeed or no profile is left active.
    pub async fn create_initial_profile(&self, name: &str) -> Result<SmartProfile> {
        let name = match validate_profile_name(name) {
            Ok(n) => n,
            Err(e) => return self.fail(e),
        };
        let state = self.shared.lock().state;
        match state {
            SessionState::NeedsProfile => {}
            SessionState::Locked => return self.fail(IdentityError::SessionLocked),
            other => {
                return self.fail(IdentityError::InvalidState(format!(
                    "initial profile can only be created during onboarding (state: {other:?})"
                )))
            }
        }
        let Ok(_gate) = self.profile_gate.try_lock() else {
            return self.fail(IdentityError::InvalidState(
                "profile creation already in progress".into(),
            ));
        };

        let created = match self.backend.create_profile(&name).await {
            Ok(p) => p,
            Err(e) => return self.fail(creation_error(e)),
        };
        let activated = match self.backend.activate_profile(&created.id).await {
            Ok(p) => p,
            Err(e) => {
                warn!(profile_id = %created.id, error = %e, "activation failed, rolling back");
                if let Err(cleanup) = self.backend.delete_profile(&created.id).await {
                    warn!(profile_id = %created.id, error = %cleanup, "rollback delete failed");
                }
                return self.fail(creation_error(e));
            }
        };

        let committed = self.shared.update(|inner| {
            if inner.state != SessionState::NeedsProfile {
                return None;
            }
            let active = inner.profiles.replace_all(vec![activated]).cloned();
            inner.state = SessionState::Authenticated;
            inner.error = None;
            active
        });
        let Some(profile) = committed else {
            return self.fail(IdentityError::InvalidState(
                "session changed while creating the profile".into(),
            ));
        };

        info!(profile_id = %profile.id, "initial profile created");
        self.shared
            .emit(SessionEvent::ProfileChanged(profile.clone()));
        Ok(profile)
    }

    /// Create an additional, inactive profile.
    pub async fn create_profile(&self, name: &str) -> Result<SmartProfile> {
        let name = match validate_profile_name(name) {
            Ok(n) => n,
            Err(e) => return self.fail(e),
        };
        let authorized = self.shared.lock().require_authenticated();
        if let Err(e) = authorized {
            return self.fail(e);
        }
        let _gate = match self.acquire_profile_gate() {
            Ok(g) => g,
            Err(e) => return self.fail(e),
        };

        let created = match self.backend.create_profile(&name).await {
            Ok(p) => p,
            Err(e) => return self.fail(creation_error(e)),
        };
        self.shared
            .update(|inner| inner.profiles.upsert(created.clone()));
        info!(profile_id = %created.id, "profile created");
        Ok(created)
    }

    /// Switch the active profile.
    ///
    /// The local pointer only moves after the backend confirms; a failed
    /// switch leaves the previous profile active. A concurrent switch to the
    /// same target waits and completes as a no-op; to a different target it
    /// is rejected.
    pub async fn switch_profile(&self, target_id: &str) -> Result<SmartProfile> {
        if let Some(active) = self.check_switch(target_id)? {
            return Ok(active);
        }

        // Taking the gate and recording the target happen under one state
        // lock, so a concurrent caller never sees the gate held without a
        // target.
        let claim = self.shared.update(|inner| match self.profile_gate.try_lock() {
            Ok(gate) => {
                inner.switching_to = Some(target_id.to_string());
                inner.switch_progress = 0;
                Ok(gate)
            }
            Err(_) => Err(inner.switching_to.as_deref() == Some(target_id)
                || inner.profiles.active_id() == Some(target_id)),
        });
        let _gate = match claim {
            Ok(gate) => gate,
            Err(false) => return self.fail(IdentityError::SwitchInProgress),
            Err(true) => {
                debug!(profile_id = target_id, "joining in-flight switch");
                let gate = self.profile_gate.lock().await;
                if let Some(active) = self.check_switch(target_id)? {
                    return Ok(active);
                }
                // The switch we joined failed; retry it as the owner.
                self.shared.update(|inner| {
                    inner.switching_to = Some(target_id.to_string());
                    inner.switch_progress = 0;
                });
                gate
            }
        };

        info!(profile_id = target_id, "switching profile");

        let confirmed = match self.backend.activate_profile(target_id).await {
            Ok(p) => p,
            Err(e) => {
                self.shared.update(|inner| {
                    inner.switching_to = None;
                    inner.switch_progress = 0;
                });
                warn!(profile_id = target_id, error = %e, "profile switch failed");
                let err = IdentityError::from_backend(e);
                let err = if err.invalidates_session() {
                    err
                } else {
                    IdentityError::ProfileSwitchFailed(err.to_string())
                };
                return self.fail(err);
            }
        };

        let committed = self.shared.update(|inner| {
            inner.switching_to = None;
            if matches!(
                inner.state,
                SessionState::Unauthenticated | SessionState::Loading
            ) {
                inner.switch_progress = 0;
                return None;
            }
            inner.switch_progress = 100;
            inner.profiles.upsert(confirmed);
            inner.profiles.set_active(target_id).ok().cloned()
        });
        let Some(profile) = committed else {
            return self.fail(IdentityError::ProfileSwitchFailed(
                "session ended during the switch".into(),
            ));
        };

        info!(profile_id = %profile.id, "profile switched");
        self.shared
            .emit(SessionEvent::ProfileChanged(profile.clone()));
        Ok(profile)
    }

    /// Validate a switch request. `Some(active)` means the target is already
    /// active and no call is needed.
    fn check_switch(&self, target_id: &str) -> Result<Option<SmartProfile>> {
        let checked = {
            let inner = self.shared.lock();
            if let Err(e) = inner.require_authenticated() {
                Err(e)
            } else if inner.profiles.active_id() == Some(target_id) {
                Ok(inner.profiles.active().cloned())
            } else if inner.profiles.get(target_id).is_none() {
                Err(IdentityError::NotFound(format!("profile {target_id}")))
            } else {
                Ok(None)
            }
        };
        checked.or_else(|e| self.fail(e))
    }

    fn acquire_profile_gate(&self) -> Result<tokio::sync::MutexGuard<'_, ()>> {
        self.profile_gate.try_lock().map_err(|_| {
            if self.is_switching_profile() {
                IdentityError::SwitchInProgress
            } else {
                IdentityError::InvalidState("another profile operation is in progress".into())
            }
        })
    }

    pub async fn rename_profile(&self, profile_id: &str, name: &str) -> Result<SmartProfile> {
        let name = match validate_profile_name(name) {
            Ok(n) => n,
            Err(e) => return self.fail(e),
        };
        let checked = {
            let inner = self.shared.lock();
            if let Err(e) = inner.require_authenticated() {
                Err(e)
            } else if inner.profiles.get(profile_id).is_none() {
                Err(IdentityError::NotFound(format!("profile {profile_id}")))
            } else {
                Ok(())
            }
        };
        if let Err(e) = checked {
            return self.fail(e);
        }
        let _gate = match self.acquire_profile_gate() {
            Ok(g) => g,
            Err(e) => return self.fail(e),
        };

        let renamed = match self.backend.rename_profile(profile_id, &name).await {
            Ok(p) => p,
            Err(e) => return self.fail(IdentityError::from_backend(e)),
        };
        let profile = self.shared.update(|inner| {
            inner.profiles.upsert(renamed.clone());
            inner.profiles.get(profile_id).cloned().unwrap_or(renamed)
        });
        info!(profile_id, "profile renamed");
        Ok(profile)
    }

    /// Delete an inactive profile. The only remaining profile and the active
    /// profile cannot be deleted.
    pub async fn delete_profile(&self, profile_id: &str) -> Result<()> {
        let checked = {
            let inner = self.shared.lock();
            if let Err(e) = inner.require_authenticated() {
                Err(e)
            } else if inner.profiles.get(profile_id).is_none() {
                Err(IdentityError::NotFound(format!("profile {profile_id}")))
            } else if inner.profiles.len() <= 1 {
                Err(IdentityError::InvalidState(
                    "cannot delete the only remaining profile".into(),
                ))
            } else if inner.profiles.active_id() == Some(profile_id) {
                Err(IdentityError::InvalidState(
                    "switch to another profile before deleting this one".into(),
                ))
            } else {
                Ok(())
            }
        };
        if let Err(e) = checked {
            return self.fail(e);
        }
        let _gate = match self.acquire_profile_gate() {
            Ok(g) => g,
            Err(e) => return self.fail(e),
        };

        if let Err(e) = self.backend.delete_profile(profile_id).await {
            return self.fail(IdentityError::from_backend(e));
        }
        let removed = self.shared.update(|inner| inner.profiles.remove(profile_id));
        if let Err(e) = removed {
            // Became active in the meantime; the backend copy is gone anyway.
            warn!(profile_id, error = %e, "deleted profile still referenced locally");
        }
        self.shared.accounts.forget_profile(profile_id);
        info!(profile_id, "profile deleted");
        Ok(())
    }

    /// Reorder a profile locally.
    pub fn move_profile(&self, profile_id: &str, index: usize) -> Result<()> {
        let moved = self.shared.update(|inner| {
            inner.require_authenticated()?;
            inner.profiles.move_to(profile_id, index)
        });
        moved.or_else(|e| self.fail(e))
    }

    // --- Linked accounts ---

    /// Link an account to the active profile.
    pub async fn link_account(&self, proof: LinkProof) -> Result<LinkedAccount> {
        let active = self.shared.lock().require_active_profile();
        let profile_id = match active {
            Ok(id) => id,
            Err(e) => return self.fail(e),
        };
        match self.shared.accounts.link_account(&profile_id, proof).await {
            Ok(account) => Ok(account),
            Err(e) => self.fail(e),
        }
    }

    pub async fn unlink_account(&self, account_id: &str) -> Result<()> {
        let authorized = self.shared.lock().require_authenticated();
        if let Err(e) = authorized {
            return self.fail(e);
        }
        self.shared.accounts
            .unlink_account(account_id)
            .await
            .or_else(|e| self.fail(e))
    }

    /// Make a wallet the primary wallet of the active profile.
    pub async fn set_primary_account(&self, account_id: &str) -> Result<()> {
        let active = self.shared.lock().require_active_profile();
        let profile_id = match active {
            Ok(id) => id,
            Err(e) => return self.fail(e),
        };
        self.shared.accounts
            .set_primary_account(&profile_id, account_id)
            .await
            .or_else(|e| self.fail(e))
    }

    // --- Lock ---

    /// Unlock a locked session after a successful biometric check.
    pub async fn verify_biometric_access(&self) -> Result<()> {
        if self.state() != SessionState::Locked {
            return self.fail(IdentityError::InvalidState("session is not locked".into()));
        }
        if !self.biometrics.verify().await {
            return self.fail(IdentityError::BiometricDenied);
        }

        let unlocked = self.shared.update(|inner| {
            if inner.state == SessionState::Locked {
                inner.state = SessionState::Authenticated;
                inner.error = None;
                true
            } else {
                false
            }
        });
        if !unlocked {
            return self.fail(IdentityError::InvalidState(
                "session changed during verification".into(),
            ));
        }
        info!("session unlocked");
        self.shared.emit(SessionEvent::Unlocked);
        Ok(())
    }

    /// App moved to the background: start the lock countdown.
    ///
    /// Outside a tokio runtime no timer is spawned and the lock is applied
    /// by [`Self::will_enter_foreground`] instead.
    pub fn did_enter_background(&self) {
        let cancel = CancellationToken::new();
        let previous = self.background_slot().replace(BackgroundTimer {
            entered_at: Instant::now(),
            cancel: cancel.clone(),
        });
        if let Some(timer) = previous {
            timer.cancel.cancel();
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("no runtime, lock deferred to foreground");
            return;
        };
        let shared = Arc::clone(&self.shared);
        let timeout = self.config.lock_timeout;
        handle.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    shared.lock_if_authenticated();
                }
                _ = cancel.cancelled() => {}
            }
        });
        debug!(timeout = ?timeout, "background lock timer started");
    }

    /// App returned to the foreground: cancel the countdown, locking now if
    /// the threshold already passed.
    pub fn will_enter_foreground(&self) {
        let Some(timer) = self.background_slot().take() else {
            return;
        };
        timer.cancel.cancel();
        if timer.entered_at.elapsed() >= self.config.lock_timeout {
            self.shared.lock_if_authenticated();
        } else {
            debug!("background lock timer cancelled");
        }
    }

    fn cancel_background_timer(&self) {
        if let Some(timer) = self.background_slot().take() {
            timer.cancel.cancel();
        }
    }

    fn background_slot(&self) -> MutexGuard<'_, Option<BackgroundTimer>> {
        self.background.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for SessionCoordinator {
    fn drop(&mut self) {
        self.cancel_background_timer();
    }
}

fn validate_profile_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(IdentityError::Validation("profile name is empty".into()));
    }
    if trimmed.chars().count() > MAX_PROFILE_NAME_LEN {
        return Err(IdentityError::Validation(format!(
            "profile name exceeds {MAX_PROFILE_NAME_LEN} characters"
        )));
    }
    Ok(trimmed.to_string())
}

fn creation_error(e: BackendError) -> IdentityError {
    match IdentityError::from_backend(e) {
        auth @ IdentityError::Authentication(_) => auth,
        other => IdentityError::ProfileCreationFailed(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(state: SessionState, with_profile: bool) -> SessionSnapshot {
        SessionSnapshot {
            state,
            user: None,
            active_profile: with_profile.then(|| SmartProfile {
                id: "p1".into(),
                name: "Main".into(),
                is_active: true,
                created_at: chrono::Utc::now(),
                client_share: None,
            }),
            profiles: Vec::new(),
            is_switching_profile: false,
            profile_switch_progress: 0,
            error_message: None,
        }
    }

    #[test]
    fn test_needs_onboarding_iff_needs_profile() {
        for state in SessionState::ALL {
            for with_profile in [false, true] {
                let snap = snapshot(state, with_profile);
                assert_eq!(snap.needs_onboarding(), state == SessionState::NeedsProfile);
                assert_eq!(snap.is_loading(), state == SessionState::Loading);
                assert_eq!(snap.is_locked(), state == SessionState::Locked);
                assert_eq!(
                    snap.can_proceed(),
                    state == SessionState::Authenticated && with_profile
                );
            }
        }
    }

    #[test]
    fn test_profile_name_validation() {
        assert_eq!(validate_profile_name("  Work  ").unwrap(), "Work");
        assert!(validate_profile_name("   ").is_err());
        assert!(validate_profile_name(&"x".repeat(65)).is_err());
        assert!(validate_profile_name(&"x".repeat(64)).is_ok());
    }

    #[test]
    fn test_creation_error_keeps_auth_kind() {
        assert!(matches!(
            creation_error(BackendError::Unauthorized("expired".into())),
            IdentityError::Authentication(_)
        ));
        assert!(matches!(
            creation_error(BackendError::Timeout),
            IdentityError::ProfileCreationFailed(_)
        ));
    }
}
