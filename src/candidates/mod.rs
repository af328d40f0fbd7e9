//! Candidate records and their companion profile summaries
//!
//! The store is an external collaborator; this module fixes the operations
//! the login flow needs from it. Emails are stored normalized (trimmed,
//! lowercase) and are unique. A provider subject, once set, is unique too.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use memory::MemoryCandidateStore;

/// The durable identity of a person
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateRecord {
    pub id: String,
    pub email: Option<String>,
    pub provider_subject: Option<String>,
    pub name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub provider_verified: bool,
    pub provider_verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for a candidate created on first login
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCandidate {
    pub email: String,
    pub provider_subject: String,
    pub name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub provider_verified_at: DateTime<Utc>,
}

/// A partial update; `None` leaves the stored value unchanged
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateUpdate {
    pub email: Option<String>,
    pub provider_subject: Option<String>,
    pub name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    /// Marks the record provider-verified at this instant
    pub provider_verified_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileStatus {
    Pending,
    Active,
}

/// Companion record holding registration progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSummaryRecord {
    pub candidate_id: String,
    pub status: ProfileStatus,
    pub email: Option<String>,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub role: Option<String>,
    pub document_count: u32,
}

impl ProfileSummaryRecord {
    /// A fresh pending summary for a candidate
    #[must_use]
    pub fn pending(candidate: &CandidateRecord) -> Self {
        Self {
            candidate_id: candidate.id.clone(),
            status: ProfileStatus::Pending,
            email: candidate.email.clone(),
            name: candidate.name.clone(),
            phone: candidate.phone.clone(),
            role: None,
            document_count: 0,
        }
    }

    #[must_use]
    pub fn summary(&self) -> ProfileSummary {
        ProfileSummary {
            has_role: self
                .role
                .as_deref()
                .is_some_and(|role| !role.trim().is_empty()),
            has_document: self.document_count > 0,
        }
    }
}

/// Contact fields mirrored onto the profile summary
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileContact {
    pub email: Option<String>,
    pub name: Option<String>,
    pub phone: Option<String>,
}

impl From<&CandidateRecord> for ProfileContact {
    fn from(candidate: &CandidateRecord) -> Self {
        Self {
            email: candidate.email.clone(),
            name: candidate.name.clone(),
            phone: candidate.phone.clone(),
        }
    }
}

/// Completeness flags that drive the post-login redirect
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProfileSummary {
    pub has_role: bool,
    pub has_document: bool,
}

impl ProfileSummary {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.has_role && self.has_document
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CandidateStoreError {
    #[error("email {0} already belongs to another candidate")]
    EmailTaken(String),
    #[error("provider subject already belongs to another candidate")]
    SubjectTaken(String),
    #[error("candidate {candidate_id} is linked to a different provider subject")]
    SubjectConflict { candidate_id: String },
    #[error("candidate {0} not found")]
    NotFound(String),
    #[error("candidate store unavailable: {0}")]
    Unavailable(String),
}

/// Operations on the candidate entity and its profile summary
#[async_trait]
pub trait CandidateStore: Send + Sync {
    async fn find_by_subject(
        &self,
        provider_subject: &str,
    ) -> Result<Option<CandidateRecord>, CandidateStoreError>;

    /// Look up by normalized email
    async fn find_by_email(
        &self,
        email: &str,
    ) -> Result<Option<CandidateRecord>, CandidateStoreError>;

    /// Insert a new candidate, failing with `EmailTaken` or `SubjectTaken` on
    /// a unique-key violation
    async fn insert_candidate(
        &self,
        candidate: &NewCandidate,
    ) -> Result<CandidateRecord, CandidateStoreError>;

    async fn update_candidate(
        &self,
        candidate_id: &str,
        update: &CandidateUpdate,
    ) -> Result<CandidateRecord, CandidateStoreError>;

    async fn find_profile_summary(
        &self,
        candidate_id: &str,
    ) -> Result<Option<ProfileSummaryRecord>, CandidateStoreError>;

    /// Insert a summary unless one exists; returns whichever record is stored
    async fn insert_profile_summary(
        &self,
        record: &ProfileSummaryRecord,
    ) -> Result<ProfileSummaryRecord, CandidateStoreError>;

    /// Copy contact fields onto an existing summary, leaving progress untouched
    async fn sync_profile_contact(
        &self,
        candidate_id: &str,
        contact: &ProfileContact,
    ) -> Result<(), CandidateStoreError>;

    /// Insert; on an email unique violation, update the record that owns the email.
    ///
    /// Two concurrent first logins for the same email therefore converge on
    /// one record. The fallback refuses to relink a record already bound to a
    /// different provider subject.
    async fn upsert_candidate_by_email(
        &self,
        candidate: &NewCandidate,
        update: &CandidateUpdate,
    ) -> Result<CandidateRecord, CandidateStoreError> {
        match self.insert_candidate(candidate).await {
            Err(CandidateStoreError::EmailTaken(email)) => {
                let existing = self.find_by_email(&email).await?.ok_or_else(|| {
                    CandidateStoreError::Unavailable(format!(
                        "candidate owning {email} disappeared during upsert"
                    ))
                })?;
                if existing
                    .provider_subject
                    .as_deref()
                    .is_some_and(|subject| subject != candidate.provider_subject)
                {
                    return Err(CandidateStoreError::SubjectConflict {
                        candidate_id: existing.id,
                    });
                }
                self.update_candidate(&existing.id, update).await
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary_record(role: Option<&str>, documents: u32) -> ProfileSummaryRecord {
        ProfileSummaryRecord {
            candidate_id: "c1".to_string(),
            status: ProfileStatus::Pending,
            email: None,
            name: None,
            phone: None,
            role: role.map(ToString::to_string),
            document_count: documents,
        }
    }

    #[test]
    fn test_completeness_needs_role_and_document() {
        assert!(!summary_record(None, 0).summary().is_complete());
        assert!(!summary_record(Some("nurse"), 0).summary().is_complete());
        assert!(!summary_record(None, 2).summary().is_complete());
        assert!(!summary_record(Some("  "), 1).summary().is_complete());
        assert!(summary_record(Some("nurse"), 1).summary().is_complete());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_value(summary_record(None, 0)).unwrap();
        assert_eq!(json["status"], "pending");
        assert_eq!(json["documentCount"], 0);
    }
}
