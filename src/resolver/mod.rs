//! Identity resolution
//!
//! Reconciles a verified provider identity with the candidate store. Existing
//! records are found by an ordered list of matchers (subject first, then
//! email); when none matches, a candidate is created through the store's
//! insert-or-update primitive so concurrent first logins converge on one
//! record.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, warn};

use crate::candidates::{
    CandidateRecord, CandidateStore, CandidateStoreError, CandidateUpdate, NewCandidate,
    ProfileContact, ProfileSummary, ProfileSummaryRecord,
};
use crate::models::{normalize_email, ProviderProfile};
use crate::utils::logging::LoggingHelper;

/// How the candidate for a login was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Subject,
    Email,
    Created,
}

impl std::fmt::Display for MatchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Subject => write!(f, "matched by subject"),
            Self::Email => write!(f, "matched by email"),
            Self::Created => write!(f, "created"),
        }
    }
}

/// A lookup strategy for an existing candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Matcher {
    Subject,
    Email,
}

/// Strongest signal first: the subject is unique per external identity
pub const DEFAULT_MATCHERS: [Matcher; 2] = [Matcher::Subject, Matcher::Email];

impl Matcher {
    async fn find(
        self,
        store: &dyn CandidateStore,
        subject: &str,
        email: &str,
    ) -> Result<Option<CandidateRecord>, CandidateStoreError> {
        match self {
            Self::Subject => store.find_by_subject(subject).await,
            Self::Email => store.find_by_email(email).await,
        }
    }

    fn kind(self) -> MatchKind {
        match self {
            Self::Subject => MatchKind::Subject,
            Self::Email => MatchKind::Email,
        }
    }
}

/// Outcome of a successful resolution
#[derive(Debug, Clone)]
pub struct Resolution {
    pub candidate: CandidateRecord,
    pub match_kind: MatchKind,
    pub summary: ProfileSummary,
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("provider email is missing or unverified")]
    EmailNotVerified,
    #[error("candidate {candidate_id} is linked to a different provider identity")]
    AccountConflict { candidate_id: String },
    #[error("candidate store failure: {0}")]
    Store(#[source] CandidateStoreError),
}

/// Facts from the provider that resolution works with
struct VerifiedIdentity<'a> {
    subject: &'a str,
    email: String,
    profile: &'a ProviderProfile,
    verified_at: DateTime<Utc>,
}

impl VerifiedIdentity<'_> {
    fn new_candidate(&self) -> NewCandidate {
        NewCandidate {
            email: self.email.clone(),
            provider_subject: self.subject.to_string(),
            name: self.profile.display_name(),
            first_name: non_blank(self.profile.given_name.as_deref()),
            last_name: non_blank(self.profile.family_name.as_deref()),
            phone: non_blank(self.profile.phone_number.as_deref()),
            provider_verified_at: self.verified_at,
        }
    }

    /// Contact refresh from the profile; absent attributes stay untouched
    fn contact_update(&self) -> CandidateUpdate {
        CandidateUpdate {
            email: None,
            provider_subject: Some(self.subject.to_string()),
            name: self.profile.display_name(),
            first_name: non_blank(self.profile.given_name.as_deref()),
            last_name: non_blank(self.profile.family_name.as_deref()),
            phone: non_blank(self.profile.phone_number.as_deref()),
            provider_verified_at: Some(self.verified_at),
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}

pub struct IdentityResolver {
    store: Arc<dyn CandidateStore>,
    matchers: Vec<Matcher>,
}

impl IdentityResolver {
    #[must_use]
    pub fn new(store: Arc<dyn CandidateStore>) -> Self {
        Self::with_matchers(store, DEFAULT_MATCHERS.to_vec())
    }

    #[must_use]
    pub fn with_matchers(store: Arc<dyn CandidateStore>, matchers: Vec<Matcher>) -> Self {
        Self { store, matchers }
    }

    /// Find or create the candidate for a verified identity and compute
    /// its profile completeness.
    ///
    /// Lookup and create failures are fatal. Failures of the best-effort
    /// writes that follow (contact refresh, profile summary) are logged and
    /// the login proceeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the email is unverified, the identity conflicts
    /// with an existing link, or the candidate cannot be looked up or created
    pub async fn resolve(
        &self,
        subject: &str,
        profile: &ProviderProfile,
    ) -> Result<Resolution, ResolveError> {
        // Nothing touches the store before this check
        let email = profile
            .verified_email()
            .map(normalize_email)
            .ok_or(ResolveError::EmailNotVerified)?;

        let identity = VerifiedIdentity {
            subject,
            email,
            profile,
            verified_at: Utc::now(),
        };

        let (candidate, match_kind) = self.find_or_create(&identity).await?;
        let summary = self.ensure_profile_summary(&candidate).await;

        LoggingHelper::log_candidate_resolved(&candidate.id, match_kind);
        Ok(Resolution {
            candidate,
            match_kind,
            summary,
        })
    }

    async fn find_or_create(
        &self,
        identity: &VerifiedIdentity<'_>,
    ) -> Result<(CandidateRecord, MatchKind), ResolveError> {
        for matcher in &self.matchers {
            let found = matcher
                .find(self.store.as_ref(), identity.subject, &identity.email)
                .await
                .map_err(ResolveError::Store)?;
            if let Some(candidate) = found {
                debug!("Candidate {} {}", candidate.id, matcher.kind());
                let candidate = self.reconcile(candidate, matcher.kind(), identity).await?;
                return Ok((candidate, matcher.kind()));
            }
        }

        match self
            .store
            .upsert_candidate_by_email(&identity.new_candidate(), &identity.contact_update())
            .await
        {
            Ok(candidate) => Ok((candidate, MatchKind::Created)),
            Err(CandidateStoreError::SubjectConflict { candidate_id }) => {
                Err(ResolveError::AccountConflict { candidate_id })
            }
            // A concurrent login for the same subject created it first
            Err(CandidateStoreError::SubjectTaken(_)) => {
                let candidate = self
                    .store
                    .find_by_subject(identity.subject)
                    .await
                    .map_err(ResolveError::Store)?
                    .ok_or_else(|| {
                        ResolveError::Store(CandidateStoreError::Unavailable(
                            "candidate for subject disappeared during create".to_string(),
                        ))
                    })?;
                let candidate = self.reconcile(candidate, MatchKind::Subject, identity).await?;
                Ok((candidate, MatchKind::Subject))
            }
            Err(e) => Err(ResolveError::Store(e)),
        }
    }

    /// Refresh an existing record from the fresh profile
    async fn reconcile(
        &self,
        candidate: CandidateRecord,
        match_kind: MatchKind,
        identity: &VerifiedIdentity<'_>,
    ) -> Result<CandidateRecord, ResolveError> {
        if let Some(linked) = candidate.provider_subject.as_deref() {
            if linked != identity.subject {
                // Only reachable through an email match; never relink
                warn!(
                    "Refusing login: candidate {} {match_kind} but is linked to another provider subject",
                    candidate.id
                );
                return Err(ResolveError::AccountConflict {
                    candidate_id: candidate.id,
                });
            }
        }

        let mut update = identity.contact_update();
        if match_kind == MatchKind::Subject
            && candidate.email.as_deref() != Some(identity.email.as_str())
        {
            update.email = self.claimable_email(&candidate, &identity.email).await;
        }

        match self.store.update_candidate(&candidate.id, &update).await {
            Ok(updated) => Ok(updated),
            Err(e) => {
                LoggingHelper::log_reconciliation_failure(
                    "candidate update",
                    &candidate.id,
                    &e.to_string(),
                );
                Ok(candidate)
            }
        }
    }

    /// The new email, unless another record already owns it
    async fn claimable_email(&self, candidate: &CandidateRecord, email: &str) -> Option<String> {
        match self.store.find_by_email(email).await {
            Ok(Some(owner)) if owner.id != candidate.id => {
                warn!(
                    "Keeping stored email for candidate {}: new email belongs to candidate {}",
                    candidate.id, owner.id
                );
                None
            }
            Ok(_) => Some(email.to_string()),
            Err(e) => {
                LoggingHelper::log_reconciliation_failure(
                    "email ownership check",
                    &candidate.id,
                    &e.to_string(),
                );
                None
            }
        }
    }

    /// Make sure the companion summary exists and reflects current contact data.
    /// A summary that cannot be read counts as incomplete.
    async fn ensure_profile_summary(&self, candidate: &CandidateRecord) -> ProfileSummary {
        match self.store.find_profile_summary(&candidate.id).await {
            Ok(Some(record)) => {
                if let Err(e) = self
                    .store
                    .sync_profile_contact(&candidate.id, &ProfileContact::from(candidate))
                    .await
                {
                    LoggingHelper::log_reconciliation_failure(
                        "profile contact sync",
                        &candidate.id,
                        &e.to_string(),
                    );
                }
                record.summary()
            }
            Ok(None) => {
                match self
                    .store
                    .insert_profile_summary(&ProfileSummaryRecord::pending(candidate))
                    .await
                {
                    Ok(record) => record.summary(),
                    Err(e) => {
                        LoggingHelper::log_reconciliation_failure(
                            "profile summary create",
                            &candidate.id,
                            &e.to_string(),
                        );
                        ProfileSummary::default()
                    }
                }
            }
            Err(e) => {
                LoggingHelper::log_reconciliation_failure(
                    "profile summary lookup",
                    &candidate.id,
                    &e.to_string(),
                );
                ProfileSummary::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidates::{MemoryCandidateStore, ProfileStatus};
    use crate::testing::fixtures::verified_profile;
    use crate::testing::mock::FlakyCandidateStore;

    fn resolver(store: &Arc<MemoryCandidateStore>) -> IdentityResolver {
        IdentityResolver::new(Arc::clone(store) as Arc<dyn CandidateStore>)
    }

    #[tokio::test]
    async fn test_new_user_is_created_with_pending_summary() {
        let store = Arc::new(MemoryCandidateStore::new());
        let profile = verified_profile("sub-1", "Kari@Example.no");

        let resolution = resolver(&store).resolve("sub-1", &profile).await.unwrap();

        assert_eq!(resolution.match_kind, MatchKind::Created);
        assert!(!resolution.summary.is_complete());
        assert_eq!(resolution.candidate.email.as_deref(), Some("kari@example.no"));
        assert!(resolution.candidate.provider_verified);
        let summary = store
            .find_profile_summary(&resolution.candidate.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(summary.status, ProfileStatus::Pending);
    }

    #[tokio::test]
    async fn test_relogin_is_idempotent() {
        let store = Arc::new(MemoryCandidateStore::new());
        let profile = verified_profile("sub-1", "kari@example.no");
        let resolver = resolver(&store);

        let first = resolver.resolve("sub-1", &profile).await.unwrap();
        let second = resolver.resolve("sub-1", &profile).await.unwrap();

        assert_eq!(first.candidate.id, second.candidate.id);
        assert_eq!(second.match_kind, MatchKind::Subject);
        assert_eq!(store.candidate_count().await, 1);
    }

    #[tokio::test]
    async fn test_complete_profile_is_reported() {
        let store = Arc::new(MemoryCandidateStore::new());
        let profile = verified_profile("sub-1", "kari@example.no");
        let resolver = resolver(&store);
        let first = resolver.resolve("sub-1", &profile).await.unwrap();
        store.set_role(&first.candidate.id, "nurse").await.unwrap();
        store.attach_document(&first.candidate.id).await.unwrap();

        let second = resolver.resolve("sub-1", &profile).await.unwrap();
        assert!(second.summary.is_complete());
    }

    #[tokio::test]
    async fn test_unverified_email_is_rejected_before_store_access() {
        let store = Arc::new(FlakyCandidateStore::new());
        let resolver = IdentityResolver::new(Arc::clone(&store) as Arc<dyn CandidateStore>);
        let mut profile = verified_profile("sub-1", "kari@example.no");
        profile.email_verified = false;

        let result = resolver.resolve("sub-1", &profile).await;
        assert!(matches!(result, Err(ResolveError::EmailNotVerified)));
        assert_eq!(store.call_count(), 0);
    }

    #[tokio::test]
    async fn test_email_match_links_subject() {
        let store = Arc::new(MemoryCandidateStore::new());
        store
            .seed(crate::testing::fixtures::legacy_candidate("legacy-1", "kari@example.no"))
            .await
            .unwrap();

        let resolution = resolver(&store)
            .resolve("sub-1", &verified_profile("sub-1", "KARI@example.no"))
            .await
            .unwrap();

        assert_eq!(resolution.match_kind, MatchKind::Email);
        assert_eq!(resolution.candidate.id, "legacy-1");
        assert_eq!(resolution.candidate.provider_subject.as_deref(), Some("sub-1"));
        assert!(resolution.candidate.provider_verified_at.is_some());
    }

    #[tokio::test]
    async fn test_missing_phone_does_not_erase_stored_phone() {
        let store = Arc::new(MemoryCandidateStore::new());
        let mut legacy = crate::testing::fixtures::legacy_candidate("legacy-1", "kari@example.no");
        legacy.phone = Some("4712345678".to_string());
        store.seed(legacy).await.unwrap();

        let mut profile = verified_profile("sub-1", "kari@example.no");
        profile.phone_number = None;
        let resolution = resolver(&store).resolve("sub-1", &profile).await.unwrap();

        assert_eq!(resolution.candidate.phone.as_deref(), Some("4712345678"));
    }

    #[tokio::test]
    async fn test_email_match_linked_to_other_subject_is_a_conflict() {
        let store = Arc::new(MemoryCandidateStore::new());
        let resolver = resolver(&store);
        resolver
            .resolve("sub-1", &verified_profile("sub-1", "kari@example.no"))
            .await
            .unwrap();

        let result = resolver
            .resolve("sub-2", &verified_profile("sub-2", "kari@example.no"))
            .await;
        assert!(matches!(result, Err(ResolveError::AccountConflict { .. })));
        assert_eq!(store.candidate_count().await, 1);
    }

    #[tokio::test]
    async fn test_subject_match_updates_email_when_free() {
        let store = Arc::new(MemoryCandidateStore::new());
        let resolver = resolver(&store);
        resolver
            .resolve("sub-1", &verified_profile("sub-1", "old@example.no"))
            .await
            .unwrap();

        let resolution = resolver
            .resolve("sub-1", &verified_profile("sub-1", "new@example.no"))
            .await
            .unwrap();
        assert_eq!(resolution.candidate.email.as_deref(), Some("new@example.no"));
    }

    #[tokio::test]
    async fn test_subject_match_keeps_email_owned_by_another_record() {
        let store = Arc::new(MemoryCandidateStore::new());
        store
            .seed(crate::testing::fixtures::legacy_candidate("legacy-1", "taken@example.no"))
            .await
            .unwrap();
        let resolver = resolver(&store);
        resolver
            .resolve("sub-1", &verified_profile("sub-1", "mine@example.no"))
            .await
            .unwrap();

        let resolution = resolver
            .resolve("sub-1", &verified_profile("sub-1", "taken@example.no"))
            .await
            .unwrap();
        assert_eq!(resolution.match_kind, MatchKind::Subject);
        assert_eq!(resolution.candidate.email.as_deref(), Some("mine@example.no"));
    }

    #[tokio::test]
    async fn test_update_failure_is_not_fatal() {
        let store = Arc::new(FlakyCandidateStore::new());
        let resolver = IdentityResolver::new(Arc::clone(&store) as Arc<dyn CandidateStore>);
        let profile = verified_profile("sub-1", "kari@example.no");
        let created = resolver.resolve("sub-1", &profile).await.unwrap();

        store.fail_updates(true);
        let again = resolver.resolve("sub-1", &profile).await.unwrap();
        assert_eq!(again.candidate.id, created.candidate.id);
    }

    #[tokio::test]
    async fn test_lookup_failure_is_fatal() {
        let store = Arc::new(FlakyCandidateStore::new());
        store.fail_lookups(true);
        let resolver = IdentityResolver::new(Arc::clone(&store) as Arc<dyn CandidateStore>);

        let result = resolver
            .resolve("sub-1", &verified_profile("sub-1", "kari@example.no"))
            .await;
        assert!(matches!(result, Err(ResolveError::Store(_))));
    }

    #[tokio::test]
    async fn test_create_failure_is_fatal() {
        let store = Arc::new(FlakyCandidateStore::new());
        store.fail_inserts(true);
        let resolver = IdentityResolver::new(Arc::clone(&store) as Arc<dyn CandidateStore>);

        let result = resolver
            .resolve("sub-1", &verified_profile("sub-1", "kari@example.no"))
            .await;
        assert!(matches!(result, Err(ResolveError::Store(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_logins_create_one_record() {
        let store = Arc::new(MemoryCandidateStore::new());
        let resolver = Arc::new(resolver(&store));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let resolver = Arc::clone(&resolver);
                tokio::spawn(async move {
                    resolver
                        .resolve("sub-race", &verified_profile("sub-race", "race@example.no"))
                        .await
                        .unwrap()
                        .candidate
                        .id
                })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(store.candidate_count().await, 1);
    }

    #[tokio::test]
    async fn test_email_only_matcher_order() {
        let store = Arc::new(MemoryCandidateStore::new());
        store
            .seed(crate::testing::fixtures::legacy_candidate("legacy-1", "kari@example.no"))
            .await
            .unwrap();
        let resolver = IdentityResolver::with_matchers(
            Arc::clone(&store) as Arc<dyn CandidateStore>,
            vec![Matcher::Email],
        );

        let resolution = resolver
            .resolve("sub-1", &verified_profile("sub-1", "kari@example.no"))
            .await
            .unwrap();
        assert_eq!(resolution.match_kind, MatchKind::Email);
    }
}
