//! Mock objects and fake implementations for testing
//!
//! These stand in for the provider and the candidate store so the login
//! flow can be exercised without network access.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::candidates::{
    CandidateRecord, CandidateStore, CandidateStoreError, CandidateUpdate, MemoryCandidateStore,
    NewCandidate, ProfileContact, ProfileSummaryRecord,
};
use crate::models::{IdentityToken, ProviderProfile, TokenSet};
use crate::oauth::jwt_validation::{JsonWebKey, JsonWebKeySet, JwtValidationError, KeySetSource};
use crate::oauth::{OAuthError, ProviderClient};

use super::fixtures::{TEST_CLIENT_ID, TEST_ISSUER};

/// Key set source serving a fixed, swappable key list
pub struct StaticKeySource {
    keys: Mutex<Vec<JsonWebKey>>,
    delay: Duration,
    failing: AtomicBool,
    fetches: AtomicUsize,
}

impl StaticKeySource {
    #[must_use]
    pub fn new(keys: Vec<JsonWebKey>) -> Self {
        Self {
            keys: Mutex::new(keys),
            delay: Duration::ZERO,
            failing: AtomicBool::new(false),
            fetches: AtomicUsize::new(0),
        }
    }

    /// Make every fetch take `delay`
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of fetch attempts, failed ones included
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Replace the published keys, as after a rotation
    ///
    /// # Panics
    ///
    /// Panics if the key list lock is poisoned
    pub fn set_keys(&self, keys: Vec<JsonWebKey>) {
        *self.keys.lock().unwrap() = keys;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl KeySetSource for StaticKeySource {
    async fn fetch_key_set(&self) -> Result<JsonWebKeySet, JwtValidationError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(JwtValidationError::JwksFetchFailed(
                "key set endpoint unavailable".to_string(),
            ));
        }
        let keys = self.keys.lock().unwrap().clone();
        Ok(JsonWebKeySet { keys })
    }
}

/// Candidate store that counts calls and fails on demand
///
/// Data lives in a [`MemoryCandidateStore`].
pub struct FlakyCandidateStore {
    inner: MemoryCandidateStore,
    calls: AtomicUsize,
    fail_lookups: AtomicBool,
    fail_inserts: AtomicBool,
    fail_updates: AtomicBool,
}

impl FlakyCandidateStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: MemoryCandidateStore::new(),
            calls: AtomicUsize::new(0),
            fail_lookups: AtomicBool::new(false),
            fail_inserts: AtomicBool::new(false),
            fail_updates: AtomicBool::new(false),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Fail `find_by_subject` and `find_by_email`
    pub fn fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }

    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    /// Fail `update_candidate` and `sync_profile_contact`
    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    fn enter(&self, failing: &AtomicBool, operation: &str) -> Result<(), CandidateStoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if failing.load(Ordering::SeqCst) {
            return Err(CandidateStoreError::Unavailable(format!(
                "{operation}: connection reset"
            )));
        }
        Ok(())
    }
}

impl Default for FlakyCandidateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CandidateStore for FlakyCandidateStore {
    async fn find_by_subject(
        &self,
        provider_subject: &str,
    ) -> Result<Option<CandidateRecord>, CandidateStoreError> {
        self.enter(&self.fail_lookups, "find_by_subject")?;
        self.inner.find_by_subject(provider_subject).await
    }

    async fn find_by_email(
        &self,
        email: &str,
    ) -> Result<Option<CandidateRecord>, CandidateStoreError> {
        self.enter(&self.fail_lookups, "find_by_email")?;
        self.inner.find_by_email(email).await
    }

    async fn insert_candidate(
        &self,
        candidate: &NewCandidate,
    ) -> Result<CandidateRecord, CandidateStoreError> {
        self.enter(&self.fail_inserts, "insert_candidate")?;
        self.inner.insert_candidate(candidate).await
    }

    async fn update_candidate(
        &self,
        candidate_id: &str,
        update: &CandidateUpdate,
    ) -> Result<CandidateRecord, CandidateStoreError> {
        self.enter(&self.fail_updates, "update_candidate")?;
        self.inner.update_candidate(candidate_id, update).await
    }

    async fn find_profile_summary(
        &self,
        candidate_id: &str,
    ) -> Result<Option<ProfileSummaryRecord>, CandidateStoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.find_profile_summary(candidate_id).await
    }

    async fn insert_profile_summary(
        &self,
        record: &ProfileSummaryRecord,
    ) -> Result<ProfileSummaryRecord, CandidateStoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.insert_profile_summary(record).await
    }

    async fn sync_profile_contact(
        &self,
        candidate_id: &str,
        contact: &ProfileContact,
    ) -> Result<(), CandidateStoreError> {
        self.enter(&self.fail_updates, "sync_profile_contact")?;
        self.inner.sync_profile_contact(candidate_id, contact).await
    }
}

/// Scripted provider: returns fixed tokens and a fixed profile, and records
/// how often each call was made
pub struct MockProviderClient {
    profile: Mutex<ProviderProfile>,
    identity_subject: Mutex<String>,
    exchange_error: Mutex<Option<OAuthError>>,
    verify_error: Mutex<Option<JwtValidationError>>,
    profile_error: Mutex<Option<OAuthError>>,
    exchanges: AtomicUsize,
    verifications: AtomicUsize,
    profile_fetches: AtomicUsize,
    last_nonce: Mutex<Option<String>>,
}

impl MockProviderClient {
    /// A provider that authenticates `profile`; the identity token carries the
    /// same subject
    #[must_use]
    pub fn new(profile: ProviderProfile) -> Self {
        let subject = profile.subject.clone();
        Self {
            profile: Mutex::new(profile),
            identity_subject: Mutex::new(subject),
            exchange_error: Mutex::new(None),
            verify_error: Mutex::new(None),
            profile_error: Mutex::new(None),
            exchanges: AtomicUsize::new(0),
            verifications: AtomicUsize::new(0),
            profile_fetches: AtomicUsize::new(0),
            last_nonce: Mutex::new(None),
        }
    }

    /// # Panics
    ///
    /// Panics if the lock is poisoned
    pub fn set_profile(&self, profile: ProviderProfile) {
        *self.profile.lock().unwrap() = profile;
    }

    /// Make the identity token name a different subject than the profile
    ///
    /// # Panics
    ///
    /// Panics if the lock is poisoned
    pub fn set_identity_subject(&self, subject: &str) {
        *self.identity_subject.lock().unwrap() = subject.to_string();
    }

    /// # Panics
    ///
    /// Panics if the lock is poisoned
    pub fn fail_exchange(&self, error: OAuthError) {
        *self.exchange_error.lock().unwrap() = Some(error);
    }

    /// # Panics
    ///
    /// Panics if the lock is poisoned
    pub fn fail_verification(&self, error: JwtValidationError) {
        *self.verify_error.lock().unwrap() = Some(error);
    }

    /// # Panics
    ///
    /// Panics if the lock is poisoned
    pub fn fail_profile(&self, error: OAuthError) {
        *self.profile_error.lock().unwrap() = Some(error);
    }

    pub fn exchange_count(&self) -> usize {
        self.exchanges.load(Ordering::SeqCst)
    }

    pub fn verification_count(&self) -> usize {
        self.verifications.load(Ordering::SeqCst)
    }

    pub fn profile_fetch_count(&self) -> usize {
        self.profile_fetches.load(Ordering::SeqCst)
    }

    /// Nonce the last verification was asked to enforce
    ///
    /// # Panics
    ///
    /// Panics if the lock is poisoned
    pub fn last_nonce(&self) -> Option<String> {
        self.last_nonce.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProviderClient for MockProviderClient {
    async fn exchange_code(&self, code: &str) -> Result<TokenSet, OAuthError> {
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.exchange_error.lock().unwrap().take() {
            return Err(error);
        }
        Ok(TokenSet {
            access_token: format!("access-for-{code}"),
            id_token: format!("id-token-for-{code}"),
            expires_in: Some(3600),
            scope: Some("openid name email phoneNumber".to_string()),
        })
    }

    async fn verify_identity_token(
        &self,
        _id_token: &str,
        expected_nonce: Option<&str>,
    ) -> Result<IdentityToken, JwtValidationError> {
        self.verifications.fetch_add(1, Ordering::SeqCst);
        *self.last_nonce.lock().unwrap() = expected_nonce.map(ToString::to_string);
        if let Some(error) = self.verify_error.lock().unwrap().take() {
            return Err(error);
        }
        let now = chrono::Utc::now().timestamp();
        Ok(IdentityToken {
            subject: self.identity_subject.lock().unwrap().clone(),
            issuer: TEST_ISSUER.to_string(),
            audience: vec![TEST_CLIENT_ID.to_string()],
            issued_at: Some(now),
            expires_at: now + 300,
            nonce: expected_nonce.map(ToString::to_string),
        })
    }

    async fn fetch_profile(&self, _access_token: &str) -> Result<ProviderProfile, OAuthError> {
        self.profile_fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.profile_error.lock().unwrap().take() {
            return Err(error);
        }
        Ok(self.profile.lock().unwrap().clone())
    }
}
