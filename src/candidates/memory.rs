use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    CandidateRecord, CandidateStore, CandidateStoreError, CandidateUpdate, NewCandidate,
    ProfileContact, ProfileSummaryRecord,
};
use crate::models::normalize_email;

#[derive(Default)]
struct Tables {
    candidates: HashMap<String, CandidateRecord>,
    by_email: HashMap<String, String>,
    by_subject: HashMap<String, String>,
    summaries: HashMap<String, ProfileSummaryRecord>,
}

impl Tables {
    fn check_email_free(&self, email: &str, owner: Option<&str>) -> Result<(), CandidateStoreError> {
        match self.by_email.get(email) {
            Some(id) if Some(id.as_str()) != owner => {
                Err(CandidateStoreError::EmailTaken(email.to_string()))
            }
            _ => Ok(()),
        }
    }

    fn check_subject_free(
        &self,
        subject: &str,
        owner: Option<&str>,
    ) -> Result<(), CandidateStoreError> {
        match self.by_subject.get(subject) {
            Some(id) if Some(id.as_str()) != owner => {
                Err(CandidateStoreError::SubjectTaken(subject.to_string()))
            }
            _ => Ok(()),
        }
    }
}

/// In-process candidate store with unique email and subject indexes
///
/// All checks and writes happen under one lock, so the unique constraints
/// hold under concurrent logins the way a database's would.
#[derive(Default)]
pub struct MemoryCandidateStore {
    tables: Mutex<Tables>,
}

impl MemoryCandidateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn candidate_count(&self) -> usize {
        self.tables.lock().await.candidates.len()
    }

    pub async fn get(&self, candidate_id: &str) -> Option<CandidateRecord> {
        self.tables.lock().await.candidates.get(candidate_id).cloned()
    }

    /// Seed a candidate as-is (imports, fixtures)
    ///
    /// # Errors
    ///
    /// Returns an error if the email or subject is already owned
    pub async fn seed(&self, candidate: CandidateRecord) -> Result<(), CandidateStoreError> {
        let mut tables = self.tables.lock().await;
        if let Some(email) = &candidate.email {
            tables.check_email_free(email, Some(&candidate.id))?;
            tables.by_email.insert(email.clone(), candidate.id.clone());
        }
        if let Some(subject) = &candidate.provider_subject {
            tables.check_subject_free(subject, Some(&candidate.id))?;
            tables.by_subject.insert(subject.clone(), candidate.id.clone());
        }
        tables.candidates.insert(candidate.id.clone(), candidate);
        Ok(())
    }

    /// Record the role chosen during registration
    ///
    /// # Errors
    ///
    /// Returns an error if the candidate has no profile summary
    pub async fn set_role(&self, candidate_id: &str, role: &str) -> Result<(), CandidateStoreError> {
        let mut tables = self.tables.lock().await;
        let summary = tables
            .summaries
            .get_mut(candidate_id)
            .ok_or_else(|| CandidateStoreError::NotFound(candidate_id.to_string()))?;
        summary.role = Some(role.to_string());
        Ok(())
    }

    /// Count one more uploaded document
    ///
    /// # Errors
    ///
    /// Returns an error if the candidate has no profile summary
    pub async fn attach_document(&self, candidate_id: &str) -> Result<(), CandidateStoreError> {
        let mut tables = self.tables.lock().await;
        let summary = tables
            .summaries
            .get_mut(candidate_id)
            .ok_or_else(|| CandidateStoreError::NotFound(candidate_id.to_string()))?;
        summary.document_count += 1;
        Ok(())
    }
}

#[async_trait]
impl CandidateStore for MemoryCandidateStore {
    async fn find_by_subject(
        &self,
        provider_subject: &str,
    ) -> Result<Option<CandidateRecord>, CandidateStoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .by_subject
            .get(provider_subject)
            .and_then(|id| tables.candidates.get(id))
            .cloned())
    }

    async fn find_by_email(
        &self,
        email: &str,
    ) -> Result<Option<CandidateRecord>, CandidateStoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .by_email
            .get(&normalize_email(email))
            .and_then(|id| tables.candidates.get(id))
            .cloned())
    }

    async fn insert_candidate(
        &self,
        candidate: &NewCandidate,
    ) -> Result<CandidateRecord, CandidateStoreError> {
        let email = normalize_email(&candidate.email);
        let mut tables = self.tables.lock().await;
        tables.check_email_free(&email, None)?;
        tables.check_subject_free(&candidate.provider_subject, None)?;

        let now = Utc::now();
        let record = CandidateRecord {
            id: Uuid::new_v4().to_string(),
            email: Some(email.clone()),
            provider_subject: Some(candidate.provider_subject.clone()),
            name: candidate.name.clone(),
            first_name: candidate.first_name.clone(),
            last_name: candidate.last_name.clone(),
            phone: candidate.phone.clone(),
            provider_verified: true,
            provider_verified_at: Some(candidate.provider_verified_at),
            created_at: now,
            updated_at: now,
        };

        tables.by_email.insert(email, record.id.clone());
        tables
            .by_subject
            .insert(candidate.provider_subject.clone(), record.id.clone());
        tables.candidates.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn update_candidate(
        &self,
        candidate_id: &str,
        update: &CandidateUpdate,
    ) -> Result<CandidateRecord, CandidateStoreError> {
        let mut tables = self.tables.lock().await;
        let current = tables
            .candidates
            .get(candidate_id)
            .cloned()
            .ok_or_else(|| CandidateStoreError::NotFound(candidate_id.to_string()))?;

        let new_email = update.email.as_deref().map(normalize_email);
        if let Some(email) = &new_email {
            tables.check_email_free(email, Some(candidate_id))?;
        }
        if let Some(subject) = &update.provider_subject {
            tables.check_subject_free(subject, Some(candidate_id))?;
        }

        let mut record = current.clone();
        if let Some(email) = new_email {
            if let Some(old) = &current.email {
                tables.by_email.remove(old);
            }
            tables.by_email.insert(email.clone(), candidate_id.to_string());
            record.email = Some(email);
        }
        if let Some(subject) = &update.provider_subject {
            if let Some(old) = &current.provider_subject {
                tables.by_subject.remove(old);
            }
            tables
                .by_subject
                .insert(subject.clone(), candidate_id.to_string());
            record.provider_subject = Some(subject.clone());
        }
        if let Some(name) = &update.name {
            record.name = Some(name.clone());
        }
        if let Some(first_name) = &update.first_name {
            record.first_name = Some(first_name.clone());
        }
        if let Some(last_name) = &update.last_name {
            record.last_name = Some(last_name.clone());
        }
        if let Some(phone) = &update.phone {
            record.phone = Some(phone.clone());
        }
        if let Some(verified_at) = update.provider_verified_at {
            record.provider_verified = true;
            record.provider_verified_at = Some(verified_at);
        }
        record.updated_at = Utc::now();

        tables
            .candidates
            .insert(candidate_id.to_string(), record.clone());
        Ok(record)
    }

    async fn find_profile_summary(
        &self,
        candidate_id: &str,
    ) -> Result<Option<ProfileSummaryRecord>, CandidateStoreError> {
        Ok(self.tables.lock().await.summaries.get(candidate_id).cloned())
    }

    async fn insert_profile_summary(
        &self,
        record: &ProfileSummaryRecord,
    ) -> Result<ProfileSummaryRecord, CandidateStoreError> {
        let mut tables = self.tables.lock().await;
        Ok(tables
            .summaries
            .entry(record.candidate_id.clone())
            .or_insert_with(|| record.clone())
            .clone())
    }

    async fn sync_profile_contact(
        &self,
        candidate_id: &str,
        contact: &ProfileContact,
    ) -> Result<(), CandidateStoreError> {
        let mut tables = self.tables.lock().await;
        let summary = tables
            .summaries
            .get_mut(candidate_id)
            .ok_or_else(|| CandidateStoreError::NotFound(candidate_id.to_string()))?;
        if contact.email.is_some() {
            summary.email.clone_from(&contact.email);
        }
        if contact.name.is_some() {
            summary.name.clone_from(&contact.name);
        }
        if contact.phone.is_some() {
            summary.phone.clone_from(&contact.phone);
        }
        Ok(())
    }
}
