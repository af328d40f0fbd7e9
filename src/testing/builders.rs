//! Fluent builders for assembling a login service around test doubles

use std::sync::Arc;
use std::time::Duration;

use actix_web::web;

use crate::candidates::{CandidateStore, MemoryCandidateStore};
use crate::login::{LoginService, RedirectPolicy};
use crate::models::ProviderProfile;
use crate::oauth::{AuthorizationInitiator, ProviderClient};
use crate::resolver::IdentityResolver;
use crate::session::{SessionCookieFactory, SessionIssuer};
use crate::settings::TalentgateSettings;
use crate::state::{MemoryStateStore, PendingStateStore};

use super::fixtures::{test_settings, verified_profile};
use super::mock::MockProviderClient;

/// A wired login service plus handles on every double behind it
pub struct TestLogin {
    pub service: web::Data<LoginService>,
    pub cookies: web::Data<SessionCookieFactory>,
    pub provider: Arc<MockProviderClient>,
    pub state_store: Arc<MemoryStateStore>,
    pub candidates: Arc<MemoryCandidateStore>,
    pub settings: TalentgateSettings,
}

pub struct TestLoginBuilder {
    settings: TalentgateSettings,
    profile: ProviderProfile,
    candidates: Arc<MemoryCandidateStore>,
}

impl TestLoginBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            settings: test_settings(),
            profile: verified_profile("provider-subject-1", "kari@example.no"),
            candidates: Arc::new(MemoryCandidateStore::new()),
        }
    }

    /// The profile the mock provider authenticates
    #[must_use]
    pub fn with_profile(mut self, profile: ProviderProfile) -> Self {
        self.profile = profile;
        self
    }

    #[must_use]
    pub fn with_settings(mut self, settings: TalentgateSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Share a pre-seeded candidate store
    #[must_use]
    pub fn with_candidates(mut self, candidates: Arc<MemoryCandidateStore>) -> Self {
        self.candidates = candidates;
        self
    }

    #[must_use]
    pub fn build(self) -> TestLogin {
        let settings = self.settings;
        let provider = Arc::new(MockProviderClient::new(self.profile));
        let state_store = Arc::new(MemoryStateStore::new());

        let initiator = AuthorizationInitiator::new(
            settings
                .provider
                .authorization_endpoint
                .clone()
                .unwrap_or_default(),
            settings.provider.get_client_id().unwrap_or_default(),
            settings.callback_url(),
            settings.provider.scopes.clone(),
            settings.provider.extra_auth_params.clone(),
            settings.login.fallback_path.clone(),
            Duration::from_secs(settings.state_store.ttl_seconds),
            Arc::clone(&state_store) as Arc<dyn PendingStateStore>,
        );
        let sessions = SessionIssuer::new(
            settings.session.session_secret.as_bytes(),
            settings.session.issuer.clone(),
            settings.session.session_duration_hours,
        );
        let cookies = SessionCookieFactory::new(&settings.cookies, sessions.lifetime());
        let resolver =
            IdentityResolver::new(Arc::clone(&self.candidates) as Arc<dyn CandidateStore>);

        let service = LoginService::new(
            initiator,
            Arc::clone(&state_store) as Arc<dyn PendingStateStore>,
            Arc::clone(&provider) as Arc<dyn ProviderClient>,
            resolver,
            sessions,
            RedirectPolicy::from_settings(&settings.login),
        );

        TestLogin {
            service: web::Data::new(service),
            cookies: web::Data::new(cookies),
            provider,
            state_store,
            candidates: self.candidates,
            settings,
        }
    }
}

impl Default for TestLoginBuilder {
    fn default() -> Self {
        Self::new()
    }
}
