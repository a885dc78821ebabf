//! In-process storage backends built on `DashMap`.
//!
//! Every compare-and-swap (refresh redemption, OAuth state consumption,
//! session touch) runs while holding the shard lock of its key, so these
//! stores are safe to share across any number of tasks. State is lost on
//! restart; multi-instance deployments need a shared backend implementing
//! the same traits.

use std::collections::VecDeque;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::storage::{
    CredentialStore, CsrfRecord, CsrfStore, OAuthStateStore, Redemption, RefreshTokenStore,
    RevocationStore, SessionStore, StoredCredential,
};
use crate::types::{
    Identity, OAuthFlowState, RefreshTokenRecord, RefreshTokenStatus, RevocationEntry,
    RevocationTarget, Session,
};
use crate::{AuthError, AuthResult};

// ============================================================================
// Refresh Tokens
// ============================================================================

/// In-memory refresh token store.
#[derive(Debug, Default)]
pub struct InMemoryRefreshTokenStore {
    /// Records keyed by token hash.
    tokens: DashMap<String, RefreshTokenRecord>,
    /// Revoked families and how long to remember them.
    revoked_families: DashMap<Uuid, OffsetDateTime>,
}

impl InMemoryRefreshTokenStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Returns `true` if the store holds no tokens.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl RefreshTokenStore for InMemoryRefreshTokenStore {
    async fn insert(&self, record: RefreshTokenRecord) -> AuthResult<()> {
        let token_hash = record.token_hash.clone();
        let family_id = record.family_id;

        match self.tokens.entry(token_hash.clone()) {
            Entry::Occupied(_) => {
                return Err(AuthError::storage("duplicate refresh token hash"));
            }
            Entry::Vacant(slot) => {
                slot.insert(record);
            }
        }

        // Checked after the insert: a concurrent revoke_family either sees
        // the record while iterating or has already left its tombstone.
        if self.revoked_families.contains_key(&family_id)
            && let Some(mut stored) = self.tokens.get_mut(&token_hash)
            && stored.status == RefreshTokenStatus::Active
        {
            stored.status = RefreshTokenStatus::Revoked;
        }

        Ok(())
    }

    async fn find_by_hash(&self, token_hash: &str) -> AuthResult<Option<RefreshTokenRecord>> {
        Ok(self.tokens.get(token_hash).map(|r| r.value().clone()))
    }

    async fn redeem(
        &self,
        token_hash: &str,
        successor: Uuid,
        now: OffsetDateTime,
    ) -> AuthResult<Redemption> {
        let Some(mut record) = self.tokens.get_mut(token_hash) else {
            return Ok(Redemption::NotFound);
        };

        let outcome = match record.status {
            RefreshTokenStatus::Used => Redemption::AlreadyUsed(record.value().clone()),
            RefreshTokenStatus::Revoked => Redemption::Revoked(record.value().clone()),
            RefreshTokenStatus::Active if record.is_expired_at(now) => {
                Redemption::Expired(record.value().clone())
            }
            RefreshTokenStatus::Active => {
                let before = record.value().clone();
                record.status = RefreshTokenStatus::Used;
                record.replaced_by = Some(successor);
                Redemption::Redeemed(before)
            }
        };

        Ok(outcome)
    }

    async fn revoke_family(&self, family_id: Uuid, until: OffsetDateTime) -> AuthResult<u64> {
        self.revoked_families
            .entry(family_id)
            .and_modify(|existing| *existing = (*existing).max(until))
            .or_insert(until);

        let mut revoked = 0;
        for mut record in self.tokens.iter_mut() {
            if record.family_id == family_id && record.status == RefreshTokenStatus::Active {
                record.status = RefreshTokenStatus::Revoked;
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn revoke_subject(&self, subject: &str, until: OffsetDateTime) -> AuthResult<u64> {
        let mut families = Vec::new();
        let mut revoked = 0;
        for mut record in self.tokens.iter_mut() {
            if record.subject() != subject {
                continue;
            }
            families.push(record.family_id);
            if record.status == RefreshTokenStatus::Active {
                record.status = RefreshTokenStatus::Revoked;
                revoked += 1;
            }
        }

        // Tombstone every family seen, used members included: a rotation
        // that redeemed before the sweep inserts its successor afterwards,
        // and `insert` revokes it against these entries.
        for family_id in families {
            self.revoked_families
                .entry(family_id)
                .and_modify(|existing| *existing = (*existing).max(until))
                .or_insert(until);
        }
        Ok(revoked)
    }

    async fn prune(&self, now: OffsetDateTime) -> AuthResult<u64> {
        let mut removed = 0;
        self.tokens.retain(|_, record| {
            let keep = !record.is_expired_at(now);
            if !keep {
                removed += 1;
            }
            keep
        });
        self.revoked_families.retain(|_, until| *until > now);
        Ok(removed)
    }
}

// ============================================================================
// Revocation Entries
// ============================================================================

/// In-memory revocation store.
#[derive(Debug, Default)]
pub struct InMemoryRevocationStore {
    entries: DashMap<RevocationTarget, RevocationEntry>,
}

impl InMemoryRevocationStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored entries, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the store holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl RevocationStore for InMemoryRevocationStore {
    async fn insert(&self, entry: RevocationEntry) -> AuthResult<()> {
        match self.entries.entry(entry.target.clone()) {
            Entry::Occupied(mut existing) => {
                let merged = existing.get().clone().merge(entry);
                existing.insert(merged);
            }
            Entry::Vacant(slot) => {
                slot.insert(entry);
            }
        }
        Ok(())
    }

    async fn get(&self, target: &RevocationTarget) -> AuthResult<Option<RevocationEntry>> {
        Ok(self.entries.get(target).map(|e| e.value().clone()))
    }

    async fn remove_expired(
        &self,
        target: &RevocationTarget,
        now: OffsetDateTime,
    ) -> AuthResult<bool> {
        Ok(self
            .entries
            .remove_if(target, |_, entry| entry.is_expired_at(now))
            .is_some())
    }

    async fn prune(&self, now: OffsetDateTime) -> AuthResult<u64> {
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let keep = !entry.is_expired_at(now);
            if !keep {
                removed += 1;
            }
            keep
        });
        Ok(removed)
    }
}

// ============================================================================
// Sessions
// ============================================================================

/// In-memory session store.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<String, Session>,
}

impl InMemorySessionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns `true` if the store holds no sessions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn insert(&self, session: Session) -> AuthResult<()> {
        match self.sessions.entry(session.id_hash.clone()) {
            Entry::Occupied(_) => Err(AuthError::storage("duplicate session id")),
            Entry::Vacant(slot) => {
                slot.insert(session);
                Ok(())
            }
        }
    }

    async fn get(&self, id_hash: &str) -> AuthResult<Option<Session>> {
        Ok(self.sessions.get(id_hash).map(|s| s.value().clone()))
    }

    async fn touch(&self, id_hash: &str, at: OffsetDateTime) -> AuthResult<Option<Session>> {
        Ok(self.sessions.get_mut(id_hash).map(|mut session| {
            session.last_activity = session.last_activity.max(at);
            session.value().clone()
        }))
    }

    async fn remove(&self, id_hash: &str) -> AuthResult<Option<Session>> {
        Ok(self.sessions.remove(id_hash).map(|(_, session)| session))
    }

    async fn remove_by_subject(&self, subject: &str) -> AuthResult<Vec<String>> {
        let mut removed = Vec::new();
        self.sessions.retain(|id_hash, session| {
            let keep = session.subject() != subject;
            if !keep {
                removed.push(id_hash.clone());
            }
            keep
        });
        Ok(removed)
    }

    async fn prune(
        &self,
        idle_cutoff: OffsetDateTime,
        absolute_cutoff: OffsetDateTime,
    ) -> AuthResult<Vec<String>> {
        let mut removed = Vec::new();
        self.sessions.retain(|id_hash, session| {
            let keep =
                session.last_activity >= idle_cutoff && session.created_at >= absolute_cutoff;
            if !keep {
                removed.push(id_hash.clone());
            }
            keep
        });
        Ok(removed)
    }
}

// ============================================================================
// CSRF Tokens
// ============================================================================

/// In-memory CSRF token store.
#[derive(Debug, Default)]
pub struct InMemoryCsrfStore {
    windows: DashMap<String, VecDeque<CsrfRecord>>,
}

impl InMemoryCsrfStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CsrfStore for InMemoryCsrfStore {
    async fn push(
        &self,
        session_key: &str,
        record: CsrfRecord,
        max_tokens: usize,
    ) -> AuthResult<()> {
        let mut window = self.windows.entry(session_key.to_string()).or_default();
        window.push_back(record);
        while window.len() > max_tokens.max(1) {
            window.pop_front();
        }
        Ok(())
    }

    async fn list(&self, session_key: &str) -> AuthResult<Vec<CsrfRecord>> {
        Ok(self
            .windows
            .get(session_key)
            .map(|window| window.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn remove_session(&self, session_key: &str) -> AuthResult<()> {
        self.windows.remove(session_key);
        Ok(())
    }

    async fn prune(&self, cutoff: OffsetDateTime) -> AuthResult<u64> {
        let mut removed = 0;
        self.windows.retain(|_, window| {
            let before = window.len();
            window.retain(|record| record.created_at >= cutoff);
            removed += (before - window.len()) as u64;
            !window.is_empty()
        });
        Ok(removed)
    }
}

// ============================================================================
// OAuth Flow State
// ============================================================================

/// In-memory OAuth flow state store.
#[derive(Debug, Default)]
pub struct InMemoryOAuthStateStore {
    states: DashMap<String, OAuthFlowState>,
}

impl InMemoryOAuthStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of pending flows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Returns `true` if no flows are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[async_trait]
impl OAuthStateStore for InMemoryOAuthStateStore {
    async fn insert(&self, state: OAuthFlowState) -> AuthResult<()> {
        match self.states.entry(state.state_hash.clone()) {
            Entry::Occupied(_) => Err(AuthError::storage("duplicate OAuth state")),
            Entry::Vacant(slot) => {
                slot.insert(state);
                Ok(())
            }
        }
    }

    async fn take(&self, state_hash: &str) -> AuthResult<Option<OAuthFlowState>> {
        Ok(self.states.remove(state_hash).map(|(_, state)| state))
    }

    async fn prune(&self, cutoff: OffsetDateTime) -> AuthResult<u64> {
        let mut removed = 0;
        self.states.retain(|_, state| {
            let keep = state.created_at >= cutoff;
            if !keep {
                removed += 1;
            }
            keep
        });
        Ok(removed)
    }
}

// ============================================================================
// Credentials
// ============================================================================

/// In-memory credential directory.
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    users: DashMap<String, StoredCredential>,
}

impl InMemoryCredentialStore {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a user.
    pub fn insert(
        &self,
        username: impl Into<String>,
        identity: Identity,
        password_hash: impl Into<String>,
    ) {
        self.users.insert(
            username.into(),
            StoredCredential {
                identity,
                password_hash: password_hash.into(),
            },
        );
    }

    /// Returns the number of users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Returns `true` if the directory is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn find_credential(&self, username: &str) -> AuthResult<Option<StoredCredential>> {
        Ok(self.users.get(username).map(|c| c.value().clone()))
    }
}

// ============================================================================
// Tests
// ============================================================================
