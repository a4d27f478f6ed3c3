//! Two-party MPC handshakes proxied through the backend.
//!
//! The device party produces P1 messages locally, the backend runs the server
//! party. A session moves `pending -> inProgress -> {completed | failed |
//! cancelled | timedOut}` and never leaves a terminal state. At most one
//! session per profile is in flight at a time.
//!
//! Every operation runs under the user session it started in: a locked
//! session admits none, an ending session cancels them all, and key material
//! is only written while that session is still current.

mod p1;

pub use p1::{Ed25519P1Generator, P1MessageGenerator};

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::BackendClient;
use crate::config::MpcConfig;
use crate::error::{BackendError, BackendResult, IdentityError, Result};
use crate::secrets::{key_share_key, SecretStore};
use crate::session::SessionLink;
use crate::types::*;

/// Finished sessions kept for inspection.
const SESSION_HISTORY: usize = 64;

pub struct MpcSessionCoordinator {
    backend: Arc<dyn BackendClient>,
    secrets: Arc<dyn SecretStore>,
    generator: Arc<dyn P1MessageGenerator>,
    session: SessionLink,
    config: MpcConfig,
    inner: Mutex<MpcInner>,
}

#[derive(Default)]
struct MpcInner {
    sessions: HashMap<String, MpcSession>,
    /// profile id -> running session
    in_flight: HashMap<String, InFlight>,
}

struct InFlight {
    session_id: String,
    cancel: CancellationToken,
}

/// Holds a profile's in-flight slot for the lifetime of one operation.
///
/// Dropping it frees the slot. A session still live at that point was
/// abandoned by its caller and is marked cancelled.
struct SlotGuard<'a> {
    coordinator: &'a MpcSessionCoordinator,
    profile_id: String,
    session_id: String,
    /// Cancelled by `cancel` or when the user session ends.
    cancel: CancellationToken,
    /// Token of the user session the operation started in.
    session: CancellationToken,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        let mut inner = self.coordinator.lock();
        if inner
            .in_flight
            .get(&self.profile_id)
            .is_some_and(|f| f.session_id == self.session_id)
        {
            inner.in_flight.remove(&self.profile_id);
        }
        if let Some(session) = inner.sessions.get_mut(&self.session_id) {
            if session.transition(MpcStatus::Cancelled) {
                debug!(session_id = %self.session_id, "abandoned MPC session cancelled");
            }
        }
    }
}

/// Completed keygen, before it is persisted.
struct KeygenOutcome {
    record: KeyShareRecord,
}

impl MpcSessionCoordinator {
    pub fn new(
        backend: Arc<dyn BackendClient>,
        secrets: Arc<dyn SecretStore>,
        generator: Arc<dyn P1MessageGenerator>,
        session: SessionLink,
        config: MpcConfig,
    ) -> Self {
        Self {
            backend,
            secrets,
            generator,
            session,
            config,
            inner: Mutex::new(MpcInner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MpcInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn config(&self) -> &MpcConfig {
        &self.config
    }

    /// Run distributed key generation for `profile_id` and persist the
    /// resulting key-share reference.
    pub async fn generate_wallet(&self, profile_id: &str) -> Result<WalletInfo> {
        let session = self.session.begin()?;
        let slot = self.reserve(profile_id, MpcOperation::Keygen, session)?;
        let session_id = slot.session_id.clone();
        info!(profile_id, session_id = %session_id, "MPC keygen started");

        let persist = |outcome: &KeygenOutcome| -> Result<()> {
            let encoded = serde_json::to_string(&outcome.record)
                .map_err(|e| IdentityError::Storage(e.to_string()))?;
            self.session.commit(&slot.session, || {
                self.secrets
                    .set(&key_share_key(profile_id), &encoded)
                    .map_err(IdentityError::from)
            })
        };
        let outcome = self
            .drive(&slot, self.run_keygen(profile_id, &session_id), persist)
            .await
            .map_err(|e| self.session.report(e))?;

        let wallet = WalletInfo::from_record(profile_id, &outcome.record);
        info!(
            profile_id,
            session_id = %session_id,
            address = %wallet.address,
            "MPC keygen completed"
        );
        drop(slot);
        Ok(wallet)
    }

    /// Produce a signature over `message` with the profile's key share.
    ///
    /// Fails with [`IdentityError::KeyShareNotFound`] before any network
    /// call when the profile never completed keygen.
    pub async fn sign_transaction(
        &self,
        profile_id: &str,
        message: &[u8],
    ) -> Result<SignatureResult> {
        let session = self.session.begin()?;
        let record = self
            .key_share(profile_id)?
            .ok_or(IdentityError::KeyShareNotFound)?;
        if message.is_empty() {
            return Err(IdentityError::Validation("message to sign is empty".into()));
        }

        let slot = self.reserve(profile_id, MpcOperation::Sign, session)?;
        let session_id = slot.session_id.clone();
        info!(profile_id, session_id = %session_id, bytes = message.len(), "MPC signing started");

        let signature = self
            .drive(
                &slot,
                self.run_sign(profile_id, &session_id, &record, message),
                |_: &String| self.session.commit(&slot.session, || Ok(())),
            )
            .await
            .map_err(|e| self.session.report(e))?;

        info!(profile_id, session_id = %session_id, "MPC signing completed");
        drop(slot);
        Ok(SignatureResult {
            profile_id: profile_id.to_string(),
            signature,
            session_id,
        })
    }

    /// Cancel a live session. Returns `false` when the session is unknown or
    /// already terminal.
    pub fn cancel(&self, session_id: &str) -> bool {
        let mut inner = self.lock();
        let cancelled = inner
            .sessions
            .get_mut(session_id)
            .is_some_and(|s| s.transition(MpcStatus::Cancelled));
        if cancelled {
            if let Some(flight) = inner.in_flight.values().find(|f| f.session_id == session_id) {
                flight.cancel.cancel();
            }
            info!(session_id, "MPC session cancelled");
        }
        cancelled
    }

    /// Cancel every live session. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let live: Vec<String> = self
            .lock()
            .in_flight
            .values()
            .map(|f| f.session_id.clone())
            .collect();
        live.iter().filter(|id| self.cancel(id)).count()
    }

    pub fn session(&self, session_id: &str) -> Option<MpcSession> {
        self.lock().sessions.get(session_id).cloned()
    }

    /// Sessions for `profile_id`, oldest first.
    pub fn sessions_for(&self, profile_id: &str) -> Vec<MpcSession> {
        let mut sessions: Vec<MpcSession> = self
            .lock()
            .sessions
            .values()
            .filter(|s| s.profile_id == profile_id)
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.created_at);
        sessions
    }

    pub fn is_busy(&self, profile_id: &str) -> bool {
        self.lock().in_flight.contains_key(profile_id)
    }

    /// The wallet produced by the profile's last completed keygen.
    pub fn wallet_info(&self, profile_id: &str) -> Result<Option<WalletInfo>> {
        Ok(self
            .key_share(profile_id)?
            .map(|record| WalletInfo::from_record(profile_id, &record)))
    }

    fn key_share(&self, profile_id: &str) -> Result<Option<KeyShareRecord>> {
        let Some(raw) = self.secrets.get(&key_share_key(profile_id))? else {
            return Ok(None);
        };
        let record = serde_json::from_str(&raw)
            .map_err(|e| IdentityError::Storage(format!("corrupt key share record: {e}")))?;
        Ok(Some(record))
    }

    fn reserve(
        &self,
        profile_id: &str,
        operation: MpcOperation,
        session: CancellationToken,
    ) -> Result<SlotGuard<'_>> {
        let mut inner = self.lock();
        if inner.in_flight.contains_key(profile_id) {
            return Err(IdentityError::OperationInProgress);
        }

        let session_id = format!("mpc-{}", hex::encode(rand::random::<[u8; 8]>()));
        let cancel = session.child_token();
        inner.in_flight.insert(
            profile_id.to_string(),
            InFlight {
                session_id: session_id.clone(),
                cancel: cancel.clone(),
            },
        );
        inner.sessions.insert(
            session_id.clone(),
            MpcSession::new(session_id.clone(), profile_id.to_string(), operation),
        );
        inner.prune();

        Ok(SlotGuard {
            coordinator: self,
            profile_id: profile_id.to_string(),
            session_id,
            cancel,
            session,
        })
    }

    /// Run `work` under the session deadline and the slot's cancellation
    /// token, then settle the session in the matching terminal state.
    /// `commit` runs on success before the session is marked completed.
    async fn drive<T>(
        &self,
        slot: &SlotGuard<'_>,
        work: impl Future<Output = Result<T>>,
        commit: impl FnOnce(&T) -> Result<()>,
    ) -> Result<T> {
        let session_id = slot.session_id.as_str();
        let outcome = tokio::select! {
            biased;
            _ = slot.cancel.cancelled() => Err(cancelled(slot)),
            res = tokio::time::timeout(self.config.session_timeout, work) => match res {
                Ok(res) => res,
                Err(_) => {
                    warn!(session_id, timeout = ?self.config.session_timeout, "MPC session timed out");
                    Err(IdentityError::RequestTimeout)
                }
            },
        };

        let (outcome, settled) = self.settle(session_id, outcome, commit);
        if let Err(e) = &outcome {
            warn!(session_id, status = %settled, error = %e, "MPC session ended");
        }
        outcome
    }

    async fn run_keygen(&self, profile_id: &str, session_id: &str) -> Result<KeygenOutcome> {
        let cloud = self.call(self.backend.mpc_generate(profile_id)).await?;
        let messages = self
            .generator
            .keygen_messages(profile_id, &cloud)
            .map_err(IdentityError::OperationFailed)?;
        self.record(session_id, MessageOrigin::Device, &messages);

        let request = KeygenStartRequest {
            profile_id: profile_id.to_string(),
            p1_messages: messages,
        };
        let started = self.call(self.backend.mpc_keygen_start(&request)).await?;
        self.mark_started(session_id, &started.session_id)?;

        let result = self.poll(session_id, &started.session_id).await?;
        let wallet_address = result
            .wallet_address
            .ok_or_else(|| IdentityError::OperationFailed("result has no wallet address".into()))?;
        let key_share_ref = result
            .key_share_ref
            .ok_or_else(|| IdentityError::OperationFailed("result has no key share".into()))?;

        Ok(KeygenOutcome {
            record: KeyShareRecord {
                session_id: session_id.to_string(),
                key_share_ref,
                wallet_address,
                public_key: result.public_key,
                created_at: Utc::now(),
            },
        })
    }

    async fn run_sign(
        &self,
        profile_id: &str,
        session_id: &str,
        record: &KeyShareRecord,
        message: &[u8],
    ) -> Result<String> {
        let messages = self
            .generator
            .sign_messages(profile_id, record, message)
            .map_err(IdentityError::OperationFailed)?;
        self.record(session_id, MessageOrigin::Device, &messages);

        let request = SignStartRequest {
            profile_id: profile_id.to_string(),
            message: hex::encode(message),
            p1_messages: messages,
        };
        let started = self.call(self.backend.mpc_sign_start(&request)).await?;
        self.mark_started(session_id, &started.session_id)?;

        let result = self.poll(session_id, &started.session_id).await?;
        result
            .signature
            .ok_or_else(|| IdentityError::OperationFailed("result has no signature".into()))
    }

    /// Poll the backend until the remote session settles.
    ///
    /// Transient failures are retried up to `max_poll_retries` times in a
    /// row; any other failure ends the session immediately.
    async fn poll(&self, session_id: &str, remote_id: &str) -> Result<MpcSessionResult> {
        let mut failures = 0u32;
        loop {
            let err = match self.call_raw(self.backend.mpc_session_status(remote_id)).await {
                Ok(status) => {
                    failures = 0;
                    self.record_server_messages(session_id, &status.messages);
                    match status.status {
                        MpcStatus::Completed => {
                            return status.result.ok_or_else(|| {
                                IdentityError::OperationFailed("completed without a result".into())
                            })
                        }
                        MpcStatus::Failed => {
                            return Err(IdentityError::OperationFailed(
                                status
                                    .error
                                    .unwrap_or_else(|| "backend reported failure".into()),
                            ))
                        }
                        MpcStatus::Cancelled => {
                            return Err(IdentityError::OperationCancelled(
                                "cancelled by backend".into(),
                            ))
                        }
                        MpcStatus::TimedOut => return Err(IdentityError::RequestTimeout),
                        MpcStatus::Pending | MpcStatus::InProgress => None,
                    }
                }
                Err(e) if e.is_transient() => Some(e),
                Err(e) => return Err(mpc_error(e)),
            };

            if let Some(e) = err {
                failures += 1;
                if failures > self.config.max_poll_retries {
                    return Err(IdentityError::OperationFailed(format!(
                        "status polling failed {failures} times: {e}"
                    )));
                }
                warn!(session_id, attempt = failures, error = %e, "MPC status poll failed, retrying");
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// One backend call under the per-request timeout.
    async fn call_raw<T>(&self, call: impl Future<Output = BackendResult<T>>) -> BackendResult<T> {
        match tokio::time::timeout(self.config.request_timeout, call).await {
            Ok(res) => res,
            Err(_) => Err(BackendError::Timeout),
        }
    }

    async fn call<T>(&self, call: impl Future<Output = BackendResult<T>>) -> Result<T> {
        match self.call_raw(call).await {
            Ok(v) => Ok(v),
            Err(BackendError::Timeout) => Err(IdentityError::RequestTimeout),
            Err(e) => Err(mpc_error(e)),
        }
    }

    /// Move a live session to the terminal state matching `outcome`,
    /// committing a successful outcome first. Returns the outcome the caller
    /// sees and the status the session ends up in.
    fn settle<T>(
        &self,
        session_id: &str,
        outcome: Result<T>,
        commit: impl FnOnce(&T) -> Result<()>,
    ) -> (Result<T>, MpcStatus) {
        let mut inner = self.lock();
        let Some(session) = inner.sessions.get_mut(session_id) else {
            let status = terminal_status(&outcome);
            return (outcome, status);
        };
        if session.status.is_terminal() {
            // A cancel that landed after the backend finished still wins.
            let outcome = outcome.and_then(|_| {
                Err(IdentityError::OperationCancelled("cancelled by caller".into()))
            });
            return (outcome, session.status);
        }
        let outcome = outcome.and_then(|value| commit(&value).map(|()| value));
        session.transition(terminal_status(&outcome));
        (outcome, session.status)
    }

    fn mark_started(&self, session_id: &str, remote_id: &str) -> Result<()> {
        let mut inner = self.lock();
        let session = inner
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| IdentityError::NotFound(format!("MPC session {session_id}")))?;
        if !session.transition(MpcStatus::InProgress) {
            return Err(IdentityError::OperationCancelled(format!(
                "session is already {}",
                session.status
            )));
        }
        session.remote_session_id = Some(remote_id.to_string());
        debug!(session_id, remote_id, "MPC session in progress");
        Ok(())
    }

    fn record(&self, session_id: &str, origin: MessageOrigin, messages: &[P1Message]) {
        let mut inner = self.lock();
        if let Some(session) = inner.sessions.get_mut(session_id) {
            session
                .messages
                .extend(messages.iter().cloned().map(|message| TranscriptEntry { origin, message }));
        }
    }

    /// Append server messages not yet in the transcript.
    fn record_server_messages(&self, session_id: &str, messages: &[P1Message]) {
        let mut inner = self.lock();
        let Some(session) = inner.sessions.get_mut(session_id) else {
            return;
        };
        for message in messages {
            let seen = session
                .messages
                .iter()
                .any(|e| e.origin == MessageOrigin::Server && e.message == *message);
            if !seen {
                session.messages.push(TranscriptEntry {
                    origin: MessageOrigin::Server,
                    message: message.clone(),
                });
            }
        }
    }
}

impl MpcInner {
    /// Drop the oldest finished sessions beyond the history limit.
    fn prune(&mut self) {
        let mut finished: Vec<(chrono::DateTime<Utc>, String)> = self
            .sessions
            .values()
            .filter(|s| s.status.is_terminal())
            .map(|s| (s.created_at, s.session_id.clone()))
            .collect();
        if finished.len() <= SESSION_HISTORY {
            return;
        }
        finished.sort();
        let excess = finished.len() - SESSION_HISTORY;
        for (_, id) in finished.into_iter().take(excess) {
            self.sessions.remove(&id);
        }
    }
}

fn terminal_status<T>(outcome: &Result<T>) -> MpcStatus {
    match outcome {
        Ok(_) => MpcStatus::Completed,
        Err(IdentityError::RequestTimeout) => MpcStatus::TimedOut,
        Err(IdentityError::OperationCancelled(_)) => MpcStatus::Cancelled,
        Err(_) => MpcStatus::Failed,
    }
}

fn cancelled(slot: &SlotGuard<'_>) -> IdentityError {
    let reason = if slot.session.is_cancelled() {
        "session ended"
    } else {
        "cancelled by caller"
    };
    IdentityError::OperationCancelled(reason.into())
}

/// Auth failures keep their kind so the session can be ended; everything
/// else is an MPC failure.
fn mpc_error(err: BackendError) -> IdentityError {
    match err {
        BackendError::Unauthorized(msg) => IdentityError::Authentication(msg),
        BackendError::Timeout => IdentityError::RequestTimeout,
        other => IdentityError::OperationFailed(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finished(id: &str, secs: i64) -> MpcSession {
        let mut s = MpcSession::new(id.into(), "p".into(), MpcOperation::Sign);
        s.created_at = Utc::now() - chrono::Duration::seconds(secs);
        s.transition(MpcStatus::Failed);
        s
    }

    #[test]
    fn test_prune_keeps_recent_and_live_sessions() {
        let mut inner = MpcInner::default();
        for i in 0..(SESSION_HISTORY + 5) {
            let id = format!("s{i}");
            inner.sessions.insert(id.clone(), finished(&id, i as i64));
        }
        inner.sessions.insert(
            "live".into(),
            MpcSession::new("live".into(), "p".into(), MpcOperation::Keygen),
        );
        inner.prune();

        assert_eq!(inner.sessions.len(), SESSION_HISTORY + 1);
        assert!(inner.sessions.contains_key("live"));
        assert!(inner.sessions.contains_key("s0"));
        // oldest are the ones with the largest offsets
        assert!(!inner.sessions.contains_key(&format!("s{}", SESSION_HISTORY + 4)));
    }

    #[test]
    fn test_backend_errors_map_into_mpc_kinds() {
        assert_eq!(
            mpc_error(BackendError::Unauthorized("expired".into())),
            IdentityError::Authentication("expired".into())
        );
        assert_eq!(mpc_error(BackendError::Timeout), IdentityError::RequestTimeout);
        assert!(matches!(
            mpc_error(BackendError::Http {
                status: 400,
                message: "bad p1".into()
            }),
            IdentityError::OperationFailed(_)
        ));
    }
}
