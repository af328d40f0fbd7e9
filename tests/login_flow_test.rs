// End-to-end login flow through the HTTP handlers with a scripted provider
use actix_web::dev::ServiceResponse;
use actix_web::{http::StatusCode, test, App};
use talentgate::candidates::{CandidateStore, CandidateUpdate};
use talentgate::handlers;
use talentgate::oauth::{JwtValidationError, OAuthError};
use talentgate::testing::builders::{TestLogin, TestLoginBuilder};
use talentgate::testing::fixtures::{legacy_candidate, verified_profile};
use url::Url;

macro_rules! init_app {
    ($login:expr) => {
        test::init_service(
            App::new()
                .app_data($login.service.clone())
                .app_data($login.cookies.clone())
                .configure(|cfg| handlers::configure(cfg, "/auth/callback")),
        )
        .await
    };
}

fn location<B>(resp: &ServiceResponse<B>) -> String {
    resp.headers()
        .get("Location")
        .expect("redirect has a Location header")
        .to_str()
        .unwrap()
        .to_string()
}

fn query_param(url: &str, name: &str) -> Option<String> {
    let parsed = Url::parse(url)
        .or_else(|_| Url::parse("http://localhost").and_then(|base| base.join(url)))
        .unwrap();
    parsed
        .query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

fn session_cookie_value<B>(resp: &ServiceResponse<B>) -> Option<String> {
    resp.response()
        .cookies()
        .find(|cookie| cookie.name() == "talentgate_session")
        .map(|cookie| cookie.value().to_string())
}

/// Start a login and return the authorization URL the browser was sent to
macro_rules! start_login {
    ($app:expr, $return_to:expr) => {{
        let req = test::TestRequest::get()
            .uri(&format!(
                "/auth/login?returnTo={}",
                urlencoding::encode($return_to)
            ))
            .to_request();
        let resp = test::call_service(&$app, req).await;
        assert_eq!(resp.status(), StatusCode::FOUND);
        location(&resp)
    }};
}

async fn make_profile_complete(login: &TestLogin, subject: &str) {
    let candidate = login
        .candidates
        .find_by_subject(subject)
        .await
        .unwrap()
        .expect("candidate exists");
    login.candidates.set_role(&candidate.id, "nurse").await.unwrap();
    login.candidates.attach_document(&candidate.id).await.unwrap();
}

#[actix_web::test]
async fn test_login_redirects_to_provider_with_state_and_nonce() {
    let login = TestLoginBuilder::new().build();
    let app = init_app!(login);

    let authorization_url = start_login!(app, "/jobs/42");

    assert!(authorization_url.starts_with(
        login
            .settings
            .provider
            .authorization_endpoint
            .as_deref()
            .unwrap()
    ));
    assert_eq!(query_param(&authorization_url, "response_type").as_deref(), Some("code"));
    assert_eq!(
        query_param(&authorization_url, "redirect_uri"),
        Some(login.settings.callback_url())
    );
    assert!(query_param(&authorization_url, "state").is_some());
    assert!(query_param(&authorization_url, "nonce").is_some());
    assert_eq!(login.state_store.len().await, 1);
}

#[actix_web::test]
async fn test_new_user_lands_on_registration_with_return_to() {
    let login = TestLoginBuilder::new().build();
    let app = init_app!(login);

    let authorization_url = start_login!(app, "/jobs/42?ref=mail");
    let state = query_param(&authorization_url, "state").unwrap();
    let nonce = query_param(&authorization_url, "nonce").unwrap();

    let req = test::TestRequest::get()
        .uri(&format!("/auth/callback?code=auth-code-1&state={state}"))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::FOUND);
    assert_eq!(
        location(&resp),
        "/register/complete?returnTo=%2Fjobs%2F42%3Fref%3Dmail"
    );
    let token = session_cookie_value(&resp).expect("session cookie is set");
    let claims = login.service.sessions().verify(&token).unwrap();
    assert_eq!(claims.provider_subject, "provider-subject-1");
    assert_eq!(claims.email, "kari@example.no");
    assert!(claims.provider_verified);

    assert_eq!(login.provider.last_nonce(), Some(nonce));
    assert_eq!(login.candidates.candidate_count().await, 1);
    assert!(login.state_store.is_empty().await);
}

#[actix_web::test]
async fn test_returning_complete_user_goes_straight_to_destination() {
    let login = TestLoginBuilder::new().build();
    let app = init_app!(login);

    let first = start_login!(app, "/jobs");
    let state = query_param(&first, "state").unwrap();
    let req = test::TestRequest::get()
        .uri(&format!("/auth/callback?code=c1&state={state}"))
        .to_request();
    test::call_service(&app, req).await;
    make_profile_complete(&login, "provider-subject-1").await;

    let second = start_login!(app, "/jobs/42");
    let state = query_param(&second, "state").unwrap();
    let req = test::TestRequest::get()
        .uri(&format!("/auth/callback?code=c2&state={state}"))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(location(&resp), "/jobs/42");
    assert!(session_cookie_value(&resp).is_some());
    assert_eq!(login.candidates.candidate_count().await, 1);
}

#[actix_web::test]
async fn test_legacy_candidate_is_linked_by_email() {
    let login = TestLoginBuilder::new().build();
    login
        .candidates
        .seed(legacy_candidate("legacy-7", "kari@example.no"))
        .await
        .unwrap();
    let app = init_app!(login);

    let url = start_login!(app, "/profile");
    let state = query_param(&url, "state").unwrap();
    let req = test::TestRequest::get()
        .uri(&format!("/auth/callback?code=c1&state={state}"))
        .to_request();
    let resp = test::call_service(&app, req).await;

    let token = session_cookie_value(&resp).unwrap();
    let claims = login.service.sessions().verify(&token).unwrap();
    assert_eq!(claims.candidate_id(), "legacy-7");
    let linked = login.candidates.get("legacy-7").await.unwrap();
    assert_eq!(linked.provider_subject.as_deref(), Some("provider-subject-1"));
    assert!(linked.provider_verified);
}

#[actix_web::test]
async fn test_unverified_email_is_rejected() {
    let mut profile = verified_profile("provider-subject-1", "kari@example.no");
    profile.email_verified = false;
    let login = TestLoginBuilder::new().with_profile(profile).build();
    let app = init_app!(login);

    let url = start_login!(app, "/jobs");
    let state = query_param(&url, "state").unwrap();
    let req = test::TestRequest::get()
        .uri(&format!("/auth/callback?code=c1&state={state}"))
        .to_request();
    let resp = test::call_service(&app, req).await;

    let target = location(&resp);
    assert!(target.starts_with("/login?"));
    assert_eq!(query_param(&target, "error").as_deref(), Some("email_not_verified"));
    assert_eq!(session_cookie_value(&resp).as_deref(), Some(""));
    assert_eq!(login.candidates.candidate_count().await, 0);
}

#[actix_web::test]
async fn test_forged_state_makes_no_provider_calls() {
    let login = TestLoginBuilder::new().build();
    let app = init_app!(login);

    let req = test::TestRequest::get()
        .uri("/auth/callback?code=c1&state=forged-state")
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(
        query_param(&location(&resp), "error").as_deref(),
        Some("session_expired")
    );
    assert_eq!(login.provider.exchange_count(), 0);
}

#[actix_web::test]
async fn test_replayed_state_is_rejected() {
    let login = TestLoginBuilder::new().build();
    let app = init_app!(login);

    let url = start_login!(app, "/jobs");
    let state = query_param(&url, "state").unwrap();
    let callback = format!("/auth/callback?code=c1&state={state}");

    let first = test::call_service(&app, test::TestRequest::get().uri(&callback).to_request()).await;
    assert!(session_cookie_value(&first).is_some_and(|v| !v.is_empty()));

    let replay = test::call_service(&app, test::TestRequest::get().uri(&callback).to_request()).await;
    assert_eq!(
        query_param(&location(&replay), "error").as_deref(),
        Some("session_expired")
    );
    assert_eq!(login.provider.exchange_count(), 1);
}

#[actix_web::test]
async fn test_missing_state_is_rejected() {
    let login = TestLoginBuilder::new().build();
    let app = init_app!(login);

    let req = test::TestRequest::get()
        .uri("/auth/callback?code=c1")
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(
        query_param(&location(&resp), "error").as_deref(),
        Some("missing_parameter")
    );
    assert_eq!(login.provider.exchange_count(), 0);
}

#[actix_web::test]
async fn test_duplicated_callback_parameter_redirects_to_login() {
    let login = TestLoginBuilder::new().build();
    let app = init_app!(login);

    let req = test::TestRequest::get()
        .uri("/auth/callback?code=a&state=x&state=y")
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::FOUND);
    let target = location(&resp);
    assert!(target.starts_with(&login.settings.login.login_path));
    assert_eq!(query_param(&target, "error").as_deref(), Some("invalid_parameter"));
    assert_eq!(session_cookie_value(&resp).as_deref(), Some(""));
    assert_eq!(login.provider.exchange_count(), 0);
}

#[actix_web::test]
async fn test_duplicated_return_to_falls_back() {
    let login = TestLoginBuilder::new().build();
    let app = init_app!(login);

    let req = test::TestRequest::get()
        .uri("/auth/login?returnTo=%2Fa&returnTo=%2Fb")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FOUND);
    let state = query_param(&location(&resp), "state").unwrap();

    let req = test::TestRequest::get()
        .uri(&format!("/auth/callback?code=c1&state={state}"))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(location(&resp), "/register/complete?returnTo=%2Fprofile");
}

#[actix_web::test]
async fn test_missing_code_consumes_state() {
    let login = TestLoginBuilder::new().build();
    let app = init_app!(login);

    let url = start_login!(app, "/jobs");
    let state = query_param(&url, "state").unwrap();
    let req = test::TestRequest::get()
        .uri(&format!("/auth/callback?state={state}"))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(
        query_param(&location(&resp), "error").as_deref(),
        Some("missing_parameter")
    );
    assert!(login.state_store.is_empty().await);
}

#[actix_web::test]
async fn test_provider_error_is_mapped_and_state_discarded() {
    let login = TestLoginBuilder::new().build();
    let app = init_app!(login);

    let url = start_login!(app, "/jobs");
    let state = query_param(&url, "state").unwrap();
    let req = test::TestRequest::get()
        .uri(&format!(
            "/auth/callback?error=access_denied&error_description=User+cancelled&state={state}"
        ))
        .to_request();
    let resp = test::call_service(&app, req).await;

    let target = location(&resp);
    assert_eq!(query_param(&target, "error").as_deref(), Some("access_denied"));
    assert!(!target.contains("User"));
    assert!(login.state_store.is_empty().await);
    assert_eq!(login.provider.exchange_count(), 0);
}

#[actix_web::test]
async fn test_unknown_provider_error_uses_generic_code() {
    let login = TestLoginBuilder::new().build();
    let app = init_app!(login);

    let req = test::TestRequest::get()
        .uri("/auth/callback?error=something_new")
        .to_request();
    let resp = test::call_service(&app, req).await;

    let target = location(&resp);
    assert_eq!(query_param(&target, "error").as_deref(), Some("provider_error"));
    assert_eq!(
        query_param(&target, "message").as_deref(),
        Some("Login failed. Please try again.")
    );
}

#[actix_web::test]
async fn test_open_redirect_is_neutralized() {
    let login = TestLoginBuilder::new().build();
    let app = init_app!(login);

    let url = start_login!(app, "//evil.example.com/phish");
    let state = query_param(&url, "state").unwrap();
    let req = test::TestRequest::get()
        .uri(&format!("/auth/callback?code=c1&state={state}"))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(location(&resp), "/register/complete?returnTo=%2Fprofile");
}

#[actix_web::test]
async fn test_subject_mismatch_between_token_and_profile() {
    let login = TestLoginBuilder::new().build();
    login.provider.set_identity_subject("someone-else");
    let app = init_app!(login);

    let url = start_login!(app, "/jobs");
    let state = query_param(&url, "state").unwrap();
    let req = test::TestRequest::get()
        .uri(&format!("/auth/callback?code=c1&state={state}"))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(
        query_param(&location(&resp), "error").as_deref(),
        Some("verification_failed")
    );
    assert_eq!(login.candidates.candidate_count().await, 0);
}

#[actix_web::test]
async fn test_invalid_identity_token_stops_before_profile_fetch() {
    let login = TestLoginBuilder::new().build();
    login
        .provider
        .fail_verification(JwtValidationError::SignatureInvalid);
    let app = init_app!(login);

    let url = start_login!(app, "/jobs");
    let state = query_param(&url, "state").unwrap();
    let req = test::TestRequest::get()
        .uri(&format!("/auth/callback?code=c1&state={state}"))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(
        query_param(&location(&resp), "error").as_deref(),
        Some("verification_failed")
    );
    assert_eq!(login.provider.profile_fetch_count(), 0);
}

#[actix_web::test]
async fn test_exchange_timeout_reports_provider_unavailable() {
    let login = TestLoginBuilder::new().build();
    login
        .provider
        .fail_exchange(OAuthError::Timeout("token exchange".to_string()));
    let app = init_app!(login);

    let url = start_login!(app, "/jobs");
    let state = query_param(&url, "state").unwrap();
    let req = test::TestRequest::get()
        .uri(&format!("/auth/callback?code=c1&state={state}"))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(
        query_param(&location(&resp), "error").as_deref(),
        Some("provider_unavailable")
    );
    assert_eq!(login.provider.exchange_count(), 1);
    assert_eq!(login.provider.verification_count(), 0);
}

#[actix_web::test]
async fn test_email_owned_by_other_identity_is_a_conflict() {
    let login = TestLoginBuilder::new().build();
    let mut other = legacy_candidate("cand-other", "kari@example.no");
    other.provider_subject = Some("another-subject".to_string());
    login.candidates.seed(other).await.unwrap();
    let app = init_app!(login);

    let url = start_login!(app, "/jobs");
    let state = query_param(&url, "state").unwrap();
    let req = test::TestRequest::get()
        .uri(&format!("/auth/callback?code=c1&state={state}"))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(
        query_param(&location(&resp), "error").as_deref(),
        Some("account_conflict")
    );
    let untouched = login.candidates.get("cand-other").await.unwrap();
    assert_eq!(untouched.provider_subject.as_deref(), Some("another-subject"));
}

#[actix_web::test]
async fn test_profile_contact_is_refreshed_on_relogin() {
    let login = TestLoginBuilder::new().build();
    let app = init_app!(login);

    let url = start_login!(app, "/jobs");
    let state = query_param(&url, "state").unwrap();
    let req = test::TestRequest::get()
        .uri(&format!("/auth/callback?code=c1&state={state}"))
        .to_request();
    test::call_service(&app, req).await;

    let candidate = login
        .candidates
        .find_by_subject("provider-subject-1")
        .await
        .unwrap()
        .unwrap();
    login
        .candidates
        .update_candidate(
            &candidate.id,
            &CandidateUpdate {
                phone: Some("4700000000".to_string()),
                ..CandidateUpdate::default()
            },
        )
        .await
        .unwrap();

    let url = start_login!(app, "/jobs");
    let state = query_param(&url, "state").unwrap();
    let req = test::TestRequest::get()
        .uri(&format!("/auth/callback?code=c2&state={state}"))
        .to_request();
    test::call_service(&app, req).await;

    let refreshed = login.candidates.get(&candidate.id).await.unwrap();
    assert_eq!(refreshed.phone.as_deref(), Some("4712345678"));
}
