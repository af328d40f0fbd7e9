#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![deny(warnings)]
#![allow(clippy::multiple_crate_versions)]

use std::sync::Arc;
use std::time::Duration;

use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::{anyhow, Context, Result};
use log::{info, warn};
use talentgate::{
    candidates::{CandidateStore, MemoryCandidateStore},
    handlers,
    login::{LoginService, RedirectPolicy},
    oauth::{
        build_http_client, AuthorizationInitiator, HttpKeySetSource, HttpProviderClient,
        JwksCache, JwtValidator, ProviderClient, ProviderEndpoints, TokenExchanger,
        UserInfoClient,
    },
    resolver::IdentityResolver,
    session::{SessionCookieFactory, SessionIssuer},
    settings::{StateStoreBackend, StateStoreSettings, TalentgateSettings},
    state::{MemoryStateStore, PendingStateStore, RedisStateStore},
    utils::logging::LoggingHelper,
};

#[actix_web::main]
async fn main() -> Result<()> {
    // Loads .env, Settings.toml and environment overrides; also initializes the logger
    let settings = TalentgateSettings::load().map_err(|e| anyhow!("Failed to load settings: {e}"))?;

    let login_service = build_login_service(&settings).await?;
    start_server(login_service, settings).await
}

/// Wire the provider client, pending-state store, candidate store and session
/// issuer into a login service
async fn build_login_service(settings: &TalentgateSettings) -> Result<LoginService> {
    let provider = &settings.provider;
    let http = build_http_client(Duration::from_secs(provider.http_timeout_seconds))?;
    let endpoints = ProviderEndpoints::resolve(provider, &http)
        .await
        .context("Failed to resolve provider endpoints")?;
    LoggingHelper::log_provider_configured(provider.display_name(), &endpoints.authorization_endpoint);

    let client_id = provider
        .get_client_id()
        .ok_or_else(|| anyhow!("Provider client_id is not configured"))?;
    let client_secret = provider
        .get_client_secret()
        .ok_or_else(|| anyhow!("Provider client_secret is not configured"))?;
    let callback_url = settings.callback_url();

    let state_store = build_state_store(&settings.state_store).await?;

    let key_cache = Arc::new(JwksCache::from_config(
        Arc::new(HttpKeySetSource::new(http.clone(), endpoints.jwks_uri.clone())),
        &provider.jwt_validation,
    ));
    match key_cache.warm_up().await {
        Ok(count) => info!("🔑 Loaded {count} provider signing keys"),
        Err(e) => warn!("Could not prefetch provider signing keys, will retry on first login: {e}"),
    }
    let validator = JwtValidator::from_config(
        key_cache,
        &provider.jwt_validation,
        &endpoints.issuer,
        &client_id,
    );
    let exchanger = TokenExchanger::new(
        http.clone(),
        provider.display_name().to_string(),
        endpoints.token_endpoint.clone(),
        client_id.clone(),
        client_secret,
        callback_url.clone(),
    );
    let userinfo = UserInfoClient::new(http, endpoints.userinfo_endpoint.clone());
    let provider_client: Arc<dyn ProviderClient> =
        Arc::new(HttpProviderClient::new(exchanger, validator, userinfo));

    let initiator = AuthorizationInitiator::new(
        endpoints.authorization_endpoint,
        client_id,
        callback_url,
        provider.scopes.clone(),
        provider.extra_auth_params.clone(),
        settings.login.fallback_path.clone(),
        Duration::from_secs(settings.state_store.ttl_seconds),
        Arc::clone(&state_store),
    );

    let candidates: Arc<dyn CandidateStore> = Arc::new(MemoryCandidateStore::new());
    warn!("Using in-memory candidate store; candidates are lost on restart");

    let sessions = SessionIssuer::new(
        settings.session.session_secret.as_bytes(),
        settings.session.issuer.clone(),
        settings.session.session_duration_hours,
    );

    Ok(LoginService::new(
        initiator,
        state_store,
        provider_client,
        IdentityResolver::new(candidates),
        sessions,
        RedirectPolicy::from_settings(&settings.login),
    ))
}

async fn build_state_store(
    store_settings: &StateStoreSettings,
) -> Result<Arc<dyn PendingStateStore>> {
    match store_settings.backend {
        StateStoreBackend::Memory => {
            info!("✓ Using in-memory pending-state store (single instance only)");
            Ok(Arc::new(MemoryStateStore::new()))
        }
        StateStoreBackend::Redis => {
            let url = store_settings
                .redis_url
                .as_deref()
                .ok_or_else(|| anyhow!("state_store.redis_url is required for the redis backend"))?;
            let store = RedisStateStore::connect(
                url,
                Duration::from_secs(store_settings.connection_timeout_seconds),
                Duration::from_secs(store_settings.response_timeout_seconds),
            )
            .await
            .context("Failed to connect pending-state store")?;
            info!("✓ Using Redis pending-state store");
            Ok(Arc::new(store))
        }
    }
}

/// Start the HTTP server
///
/// # Errors
///
/// Returns an error if binding or running the server fails
async fn start_server(login_service: LoginService, settings: TalentgateSettings) -> Result<()> {
    let bind_address = settings.get_bind_address();
    print_startup_info(&bind_address, &settings);

    let cookies = web::Data::new(SessionCookieFactory::new(
        &settings.cookies,
        login_service.sessions().lifetime(),
    ));
    let login_service = web::Data::new(login_service);
    let callback_path = settings.provider.callback_path.clone();

    HttpServer::new(move || {
        let callback_path = callback_path.clone();
        App::new()
            .app_data(login_service.clone())
            .app_data(cookies.clone())
            .wrap(Logger::default())
            .configure(move |cfg| handlers::configure(cfg, &callback_path))
    })
    .bind(&bind_address)
    .with_context(|| format!("Failed to bind {bind_address}"))?
    .run()
    .await?;
    Ok(())
}

fn print_startup_info(bind_address: &str, settings: &TalentgateSettings) {
    println!(
        "Starting Talentgate login gateway v{} on http://{bind_address}",
        talentgate::VERSION
    );
    println!("Identity provider: {}", settings.provider.display_name());
    println!();
    println!("Endpoints:");
    println!("  GET      /auth/login     - Start login (?returnTo=/path)");
    println!(
        "  GET      {:<15} - Provider callback",
        settings.provider.callback_path
    );
    println!("  GET|POST /auth/logout    - Clear session");
    println!("  GET      /auth/session   - Current session claims");
    println!("  GET      /ping           - Health check");
    println!();
    println!("Callback URL to register with the provider:");
    println!("  {}", settings.callback_url());
}
