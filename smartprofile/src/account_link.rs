//! Linked accounts and their profile associations.
//!
//! Under [`PrivacyMode::Isolated`] every account belongs to exactly one
//! profile; under [`PrivacyMode::Linked`] it may be shared. Each profile that
//! has wallet accounts has exactly one primary wallet.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info};

use crate::backend::BackendClient;
use crate::error::{IdentityError, Result};
use crate::types::*;

pub struct AccountLinkGraph {
    backend: Arc<dyn BackendClient>,
    inner: Mutex<GraphInner>,
}

#[derive(Debug, Default)]
struct GraphInner {
    mode: PrivacyMode,
    accounts: Vec<LinkedAccount>,
    /// profile id -> primary wallet account id
    primary: HashMap<String, String>,
}

impl AccountLinkGraph {
    pub fn new(backend: Arc<dyn BackendClient>, mode: PrivacyMode) -> Self {
        Self {
            backend,
            inner: Mutex::new(GraphInner {
                mode,
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GraphInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn privacy_mode(&self) -> PrivacyMode {
        self.lock().mode
    }

    /// All linked accounts of the user.
    pub fn accounts(&self) -> Vec<LinkedAccount> {
        self.lock().accounts.clone()
    }

    /// Accounts associated with `profile_id`, with `is_primary` resolved for
    /// that profile.
    pub fn accounts_for(&self, profile_id: &str) -> Vec<LinkedAccount> {
        let inner = self.lock();
        let primary = inner.primary.get(profile_id);
        inner
            .accounts
            .iter()
            .filter(|a| a.belongs_to(profile_id))
            .map(|a| {
                let mut a = a.clone();
                a.is_primary = primary == Some(&a.id);
                a
            })
            .collect()
    }

    pub fn primary_account(&self, profile_id: &str) -> Option<LinkedAccount> {
        let inner = self.lock();
        let id = inner.primary.get(profile_id)?;
        inner.accounts.iter().find(|a| &a.id == id).cloned()
    }

    /// Replace the graph with a server listing.
    pub fn replace_all(&self, list: LinkedAccountList) {
        let mut inner = self.lock();
        inner.mode = list.privacy_mode;
        inner.accounts = list.accounts;
        inner.primary.clear();

        let flagged: Vec<(String, Vec<String>)> = inner
            .accounts
            .iter()
            .filter(|a| a.account_type.is_wallet() && a.is_primary)
            .map(|a| (a.id.clone(), a.profile_ids.clone()))
            .collect();
        for (account_id, profiles) in flagged {
            for profile_id in profiles {
                inner.primary.entry(profile_id).or_insert_with(|| account_id.clone());
            }
        }
        inner.fill_missing_primaries();
        debug!(
            accounts = inner.accounts.len(),
            mode = ?inner.mode,
            "account graph loaded"
        );
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.accounts.clear();
        inner.primary.clear();
    }

    /// Drop every association with a deleted profile. Accounts left without
    /// a profile are removed.
    pub fn forget_profile(&self, profile_id: &str) {
        let mut inner = self.lock();
        for account in &mut inner.accounts {
            account.profile_ids.retain(|p| p != profile_id);
        }
        inner.accounts.retain(|a| !a.profile_ids.is_empty());
        inner.primary.remove(profile_id);
    }

    /// Link an account to `profile_id` using a provider proof.
    ///
    /// A server-detected conflict (identifier owned by another user) comes
    /// back as [`IdentityError::AccountConflict`].
    pub async fn link_account(&self, profile_id: &str, proof: LinkProof) -> Result<LinkedAccount> {
        proof.validate().map_err(IdentityError::InvalidProof)?;
        let account_type = proof.account_type();

        let mode = {
            let inner = self.lock();
            if inner.mode == PrivacyMode::Isolated {
                if let Some(identifier) = proof.identifier() {
                    let bound_elsewhere = inner.accounts.iter().any(|a| {
                        a.account_type == account_type
                            && a.identifier.eq_ignore_ascii_case(identifier)
                            && !a.belongs_to(profile_id)
                    });
                    if bound_elsewhere {
                        return Err(IdentityError::InvalidState(format!(
                            "{identifier} is bound to another profile"
                        )));
                    }
                }
            }
            inner.mode
        };

        let request = LinkAccountRequest {
            account_type,
            proof,
            profile_id: profile_id.to_string(),
            privacy_mode: mode,
        };
        let account = self
            .backend
            .link_account(&request)
            .await
            .map_err(IdentityError::from_backend)?;

        let mut inner = self.lock();
        let stored = inner.insert(account, profile_id);
        info!(
            account_id = %stored.id,
            account_type = %stored.account_type,
            profile_id,
            "account linked"
        );
        Ok(stored)
    }

    /// Unlink an account. Removing the last credential of a profile is
    /// allowed.
    pub async fn unlink_account(&self, account_id: &str) -> Result<()> {
        if !self.lock().accounts.iter().any(|a| a.id == account_id) {
            return Err(IdentityError::NotFound(format!("account {account_id}")));
        }

        self.backend
            .unlink_account(account_id)
            .await
            .map_err(IdentityError::from_backend)?;

        let mut inner = self.lock();
        inner.accounts.retain(|a| a.id != account_id);
        inner.primary.retain(|_, primary| primary != account_id);
        inner.fill_missing_primaries();
        info!(account_id, "account unlinked");
        Ok(())
    }

    /// Make a wallet account the primary wallet of `profile_id`.
    pub async fn set_primary_account(&self, profile_id: &str, account_id: &str) -> Result<()> {
        {
            let inner = self.lock();
            let account = inner
                .accounts
                .iter()
                .find(|a| a.id == account_id)
                .ok_or_else(|| IdentityError::NotFound(format!("account {account_id}")))?;
            if !account.account_type.is_wallet() {
                return Err(IdentityError::InvalidState(
                    "only wallet accounts can be primary".into(),
                ));
            }
            if !account.belongs_to(profile_id) {
                return Err(IdentityError::InvalidState(format!(
                    "account {account_id} is not linked to profile {profile_id}"
                )));
            }
            if inner.primary.get(profile_id).map(String::as_str) == Some(account_id) {
                return Ok(());
            }
        }

        self.backend
            .set_primary_account(account_id)
            .await
            .map_err(IdentityError::from_backend)?;

        let mut inner = self.lock();
        // The account may have been unlinked while the call was in flight.
        if inner.accounts.iter().any(|a| a.id == account_id) {
            inner
                .primary
                .insert(profile_id.to_string(), account_id.to_string());
        }
        info!(account_id, profile_id, "primary wallet set");
        Ok(())
    }
}

impl GraphInner {
    fn insert(&mut self, mut account: LinkedAccount, profile_id: &str) -> LinkedAccount {
        match self.mode {
            PrivacyMode::Isolated => account.profile_ids = vec![profile_id.to_string()],
            PrivacyMode::Linked => {
                if let Some(existing) = self.accounts.iter().find(|a| a.id == account.id) {
                    for p in &existing.profile_ids {
                        if !account.profile_ids.contains(p) {
                            account.profile_ids.push(p.clone());
                        }
                    }
                }
                if !account.belongs_to(profile_id) {
                    account.profile_ids.push(profile_id.to_string());
                }
            }
        }

        if account.account_type.is_wallet() && account.is_primary {
            self.primary
                .insert(profile_id.to_string(), account.id.clone());
        }

        match self.accounts.iter_mut().find(|a| a.id == account.id) {
            Some(existing) => *existing = account.clone(),
            None => self.accounts.push(account.clone()),
        }
        self.fill_missing_primaries();

        account.is_primary = self.primary.get(profile_id) == Some(&account.id);
        account
    }

    /// Give every profile that owns a wallet but has no primary its first
    /// wallet as primary.
    fn fill_missing_primaries(&mut self) {
        for account in self.accounts.iter().filter(|a| a.account_type.is_wallet()) {
            for profile_id in &account.profile_ids {
                self.primary
                    .entry(profile_id.clone())
                    .or_insert_with(|| account.id.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(id: &str, account_type: AccountType, profiles: &[&str]) -> LinkedAccount {
        LinkedAccount {
            id: id.into(),
            account_type,
            identifier: format!("{id}-identifier"),
            verified: true,
            metadata: HashMap::new(),
            profile_ids: profiles.iter().map(|p| p.to_string()).collect(),
            is_primary: false,
        }
    }

    fn graph_inner(mode: PrivacyMode) -> GraphInner {
        GraphInner {
            mode,
            ..Default::default()
        }
    }

    #[test]
    fn test_isolated_insert_binds_single_profile() {
        let mut inner = graph_inner(PrivacyMode::Isolated);
        let stored = inner.insert(account("w1", AccountType::Wallet, &["p1", "p2"]), "p1");
        assert_eq!(stored.profile_ids, vec!["p1".to_string()]);
    }

    #[test]
    fn test_linked_insert_merges_profiles() {
        let mut inner = graph_inner(PrivacyMode::Linked);
        inner.insert(account("e1", AccountType::Email, &["p1"]), "p1");
        let stored = inner.insert(account("e1", AccountType::Email, &[]), "p2");
        assert!(stored.belongs_to("p1"));
        assert!(stored.belongs_to("p2"));
        assert_eq!(inner.accounts.len(), 1);
    }

    #[test]
    fn test_first_wallet_becomes_primary() {
        let mut inner = graph_inner(PrivacyMode::Linked);
        let first = inner.insert(account("w1", AccountType::Wallet, &[]), "p1");
        let second = inner.insert(account("w2", AccountType::Wallet, &[]), "p1");
        let email = inner.insert(account("e1", AccountType::Email, &[]), "p1");
        assert!(first.is_primary);
        assert!(!second.is_primary);
        assert!(!email.is_primary);
        assert_eq!(inner.primary.get("p1").map(String::as_str), Some("w1"));
    }

    #[test]
    fn test_missing_primary_promotes_next_wallet() {
        let mut inner = graph_inner(PrivacyMode::Linked);
        inner.insert(account("w1", AccountType::Wallet, &[]), "p1");
        inner.insert(account("w2", AccountType::Wallet, &[]), "p1");
        inner.accounts.retain(|a| a.id != "w1");
        inner.primary.retain(|_, id| id != "w1");
        inner.fill_missing_primaries();
        assert_eq!(inner.primary.get("p1").map(String::as_str), Some("w2"));
    }
}
