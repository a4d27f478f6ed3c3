//! Ordered cache of the current user's profiles.
//!
//! The backend is the system of record; this store only mirrors what it
//! confirmed. At most one profile is active, and `is_active` flags are kept
//! consistent with that.

use crate::error::{IdentityError, Result};
use crate::types::SmartProfile;

#[derive(Debug, Clone, Default)]
pub struct ProfileStore {
    profiles: Vec<SmartProfile>,
    active_id: Option<String>,
}

impl ProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the collection with a fresh server listing.
    ///
    /// The profile flagged active wins; when none is flagged the first one
    /// becomes active. Returns the active profile.
    pub fn replace_all(&mut self, profiles: Vec<SmartProfile>) -> Option<&SmartProfile> {
        let active_id = profiles
            .iter()
            .find(|p| p.is_active)
            .or_else(|| profiles.first())
            .map(|p| p.id.clone());
        self.profiles = profiles;
        self.active_id = None;
        if let Some(id) = active_id {
            self.mark_active(&id);
        }
        self.active()
    }

    pub fn clear(&mut self) {
        self.profiles.clear();
        self.active_id = None;
    }

    pub fn all(&self) -> &[SmartProfile] {
        &self.profiles
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn get(&self, profile_id: &str) -> Option<&SmartProfile> {
        self.profiles.iter().find(|p| p.id == profile_id)
    }

    pub fn active(&self) -> Option<&SmartProfile> {
        self.active_id.as_deref().and_then(|id| self.get(id))
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active_id.as_deref()
    }

    /// Insert or update a profile, keeping its position if already present.
    pub fn upsert(&mut self, mut profile: SmartProfile) {
        profile.is_active = self.active_id.as_deref() == Some(profile.id.as_str());
        match self.profiles.iter_mut().find(|p| p.id == profile.id) {
            Some(existing) => *existing = profile,
            None => self.profiles.push(profile),
        }
    }

    /// Make `profile_id` the single active profile.
    pub fn set_active(&mut self, profile_id: &str) -> Result<&SmartProfile> {
        if self.get(profile_id).is_none() {
            return Err(IdentityError::NotFound(format!("profile {profile_id}")));
        }
        self.mark_active(profile_id);
        self.active()
            .ok_or_else(|| IdentityError::NotFound(format!("profile {profile_id}")))
    }

    /// Remove a profile. The active profile cannot be removed.
    pub fn remove(&mut self, profile_id: &str) -> Result<SmartProfile> {
        if self.active_id.as_deref() == Some(profile_id) {
            return Err(IdentityError::InvalidState(
                "cannot delete the active profile".into(),
            ));
        }
        let idx = self.index_of(profile_id)?;
        Ok(self.profiles.remove(idx))
    }

    /// Move a profile to `index` (clamped to the end of the list).
    pub fn move_to(&mut self, profile_id: &str, index: usize) -> Result<()> {
        let from = self.index_of(profile_id)?;
        let profile = self.profiles.remove(from);
        let to = index.min(self.profiles.len());
        self.profiles.insert(to, profile);
        Ok(())
    }

    fn index_of(&self, profile_id: &str) -> Result<usize> {
        self.profiles
            .iter()
            .position(|p| p.id == profile_id)
            .ok_or_else(|| IdentityError::NotFound(format!("profile {profile_id}")))
    }

    fn mark_active(&mut self, profile_id: &str) {
        for p in &mut self.profiles {
            p.is_active = p.id == profile_id;
        }
        self.active_id = Some(profile_id.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn profile(id: &str, active: bool) -> SmartProfile {
        SmartProfile {
            id: id.into(),
            name: format!("Profile {id}"),
            is_active: active,
            created_at: Utc::now(),
            client_share: None,
        }
    }

    fn active_count(store: &ProfileStore) -> usize {
        store.all().iter().filter(|p| p.is_active).count()
    }

    #[test]
    fn test_replace_all_prefers_server_active_flag() {
        let mut store = ProfileStore::new();
        let active = store
            .replace_all(vec![profile("a", false), profile("b", true)])
            .cloned();
        assert_eq!(active.unwrap().id, "b");
        assert_eq!(active_count(&store), 1);
    }

    #[test]
    fn test_replace_all_falls_back_to_first() {
        let mut store = ProfileStore::new();
        store.replace_all(vec![profile("a", false), profile("b", false)]);
        assert_eq!(store.active_id(), Some("a"));
        assert!(store.get("a").unwrap().is_active);
    }

    #[test]
    fn test_replace_all_empty_has_no_active() {
        let mut store = ProfileStore::new();
        assert!(store.replace_all(Vec::new()).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_set_active_keeps_single_active() {
        let mut store = ProfileStore::new();
        store.replace_all(vec![profile("a", true), profile("b", false), profile("c", false)]);
        store.set_active("c").unwrap();
        assert_eq!(store.active().unwrap().id, "c");
        assert_eq!(active_count(&store), 1);
        assert!(store.set_active("zzz").is_err());
        assert_eq!(store.active_id(), Some("c"));
    }

    #[test]
    fn test_remove_active_rejected() {
        let mut store = ProfileStore::new();
        store.replace_all(vec![profile("a", true), profile("b", false)]);
        assert!(matches!(
            store.remove("a"),
            Err(IdentityError::InvalidState(_))
        ));
        assert_eq!(store.remove("b").unwrap().id, "b");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_move_to_reorders() {
        let mut store = ProfileStore::new();
        store.replace_all(vec![profile("a", true), profile("b", false), profile("c", false)]);
        store.move_to("c", 0).unwrap();
        let ids: Vec<_> = store.all().iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        store.move_to("c", 99).unwrap();
        let ids: Vec<_> = store.all().iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_upsert_preserves_active_flag() {
        let mut store = ProfileStore::new();
        store.replace_all(vec![profile("a", true)]);
        let mut renamed = profile("a", false);
        renamed.name = "Work".into();
        store.upsert(renamed);
        assert!(store.active().unwrap().is_active);
        assert_eq!(store.active().unwrap().name, "Work");
        store.upsert(profile("b", true));
        assert!(!store.get("b").unwrap().is_active);
    }
}
