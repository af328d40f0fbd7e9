use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TalentgateSettings {
    pub application: ApplicationSettings,
    pub provider: ProviderSettings,
    pub session: SessionSettings,
    pub cookies: CookieSettings,
    pub state_store: StateStoreSettings,
    pub login: LoginSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationSettings {
    pub host: String,
    pub port: u16,
    /// Externally visible base URL; the provider callback is built from it
    pub public_base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub name: String,
    pub display_name: Option<String>,
    pub discovery_url: Option<String>,
    pub authorization_endpoint: Option<String>,
    pub token_endpoint: Option<String>,
    pub userinfo_endpoint: Option<String>,
    pub jwks_uri: Option<String>,
    pub issuer: Option<String>,
    pub scopes: Vec<String>,
    pub callback_path: String,

    /// Timeout applied to every outbound call to the provider
    pub http_timeout_seconds: u64,

    // Direct values (can be overridden by environment variables)
    pub client_id: Option<String>,
    pub client_secret: Option<String>,

    // Environment variable names for overrides
    pub client_id_env: Option<String>,
    pub client_secret_env: Option<String>,

    pub extra_auth_params: HashMap<String, String>,
    pub jwt_validation: JwtValidationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtValidationConfig {
    /// Override expected audience (defaults to `client_id`)
    pub expected_audience: Option<String>,

    /// Override expected issuer (defaults to configured or discovered issuer)
    pub expected_issuer: Option<String>,

    /// Clock skew tolerance in seconds
    pub clock_skew_seconds: u64,

    /// JWKS cache duration in seconds
    pub cache_duration_seconds: u64,

    /// How long an expired key set may still be used when a refresh fails
    pub stale_grace_seconds: u64,

    /// Minimum spacing between forced refreshes caused by an unknown key id
    pub min_refresh_interval_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub session_secret: String,
    /// Absolute session lifetime; there is no refresh, users log in again
    pub session_duration_hours: u64,
    pub issuer: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieSettings {
    pub name: String,
    pub secure: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateStoreBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateStoreSettings {
    pub backend: StateStoreBackend,
    pub redis_url: Option<String>,
    pub ttl_seconds: u64,
    /// Redis connect and per-command limits; a hung Redis fails the login
    pub connection_timeout_seconds: u64,
    pub response_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginSettings {
    pub login_path: String,
    pub registration_path: String,
    pub fallback_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            public_base_url: "http://localhost:8080".to_string(),
        }
    }
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            name: "vipps".to_string(),
            display_name: None,
            discovery_url: None,
            authorization_endpoint: None,
            token_endpoint: None,
            userinfo_endpoint: None,
            jwks_uri: None,
            issuer: None,
            scopes: vec![
                "openid".to_string(),
                "name".to_string(),
                "email".to_string(),
                "phoneNumber".to_string(),
            ],
            callback_path: "/auth/callback".to_string(),
            http_timeout_seconds: 5,
            client_id: None,
            client_secret: None,
            client_id_env: None,
            client_secret_env: None,
            extra_auth_params: HashMap::new(),
            jwt_validation: JwtValidationConfig::default(),
        }
    }
}

impl Default for JwtValidationConfig {
    fn default() -> Self {
        Self {
            expected_audience: None,
            expected_issuer: None,
            clock_skew_seconds: 60,
            cache_duration_seconds: 3600,
            stale_grace_seconds: 300,
            min_refresh_interval_seconds: 30,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            session_secret: String::new(), // Will be generated if empty
            session_duration_hours: 8,
            issuer: "talentgate".to_string(),
        }
    }
}

impl Default for CookieSettings {
    fn default() -> Self {
        Self {
            name: "talentgate_session".to_string(),
            secure: true,
        }
    }
}

impl Default for StateStoreSettings {
    fn default() -> Self {
        Self {
            backend: StateStoreBackend::Memory,
            redis_url: None,
            ttl_seconds: 600,
            connection_timeout_seconds: 5,
            response_timeout_seconds: 3,
        }
    }
}

impl Default for LoginSettings {
    fn default() -> Self {
        Self {
            login_path: "/login".to_string(),
            registration_path: "/register/complete".to_string(),
            fallback_path: "/profile".to_string(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl TalentgateSettings {
    /// Load settings from configuration files and environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Logger initialization fails
    /// - Settings file cannot be read or parsed
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        Self::load_env_file();
        env_logger::try_init()?;

        let mut settings = Self::load_base_settings()?;
        Self::apply_env_overrides(&mut settings);

        Ok(settings)
    }

    /// Load base settings from TOML file(s) or use defaults
    /// Settings are loaded with the following priority (highest to lowest):
    /// 1. Environment variables (applied separately after loading base settings)
    /// 2. Settings.toml in `TALENTGATE_SECRETS_DIR` (if specified and exists)
    /// 3. Settings.toml in current directory (if exists)
    /// 4. Default settings
    ///
    /// # Errors
    ///
    /// Returns an error if a settings file cannot be read or parsed
    pub fn load_base_settings() -> Result<Self, Box<dyn std::error::Error>> {
        let mut settings = Self::default();

        let default_config_path = std::path::PathBuf::from("Settings.toml");
        if default_config_path.exists() {
            settings = Self::from_file(&default_config_path)?;
            log::info!(
                "Loaded base settings from {}",
                default_config_path.display()
            );
        }

        if let Ok(secrets_dir) = std::env::var("TALENTGATE_SECRETS_DIR") {
            let secrets_path = std::path::Path::new(&secrets_dir).join("Settings.toml");
            if secrets_path.exists() {
                settings = Self::from_file(&secrets_path)?;
                log::info!("Overriding settings from {}", secrets_path.display());
            } else {
                log::info!(
                    "TALENTGATE_SECRETS_DIR set but no Settings.toml found at: {}",
                    secrets_path.display()
                );
            }
        }

        Ok(settings)
    }

    /// Parse a single TOML settings file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid TOML
    pub fn from_file(path: &std::path::Path) -> Result<Self, Box<dyn std::error::Error>> {
        let toml_content = fs::read_to_string(path)?;
        Ok(basic_toml::from_str(&toml_content)?)
    }

    /// Apply environment variable overrides to settings
    pub fn apply_env_overrides(settings: &mut Self) {
        if let Ok(host) = std::env::var("HOST") {
            settings.application.host = host;
        }
        if let Ok(port_str) = std::env::var("PORT") {
            if let Ok(port) = port_str.parse::<u16>() {
                settings.application.port = port;
            }
        }
        if let Ok(base_url) = std::env::var("PUBLIC_BASE_URL") {
            settings.application.public_base_url = base_url;
        }

        Self::apply_numeric_env_override(
            "SESSION_DURATION_HOURS",
            &mut settings.session.session_duration_hours,
        );
        Self::handle_session_secret_override(&mut settings.session);

        if let Ok(cookie_secure_str) = std::env::var("COOKIE_SECURE") {
            if let Ok(cookie_secure) = cookie_secure_str.parse::<bool>() {
                settings.cookies.secure = cookie_secure;
            }
        }

        Self::apply_state_store_env_overrides(&mut settings.state_store);

        if let Ok(log_level) = std::env::var("RUST_LOG") {
            settings.logging.level = log_level;
        }
    }

    fn apply_state_store_env_overrides(store_settings: &mut StateStoreSettings) {
        if let Ok(backend) = std::env::var("STATE_STORE_BACKEND") {
            match backend.to_lowercase().as_str() {
                "memory" => store_settings.backend = StateStoreBackend::Memory,
                "redis" => store_settings.backend = StateStoreBackend::Redis,
                other => log::warn!("Ignoring unknown STATE_STORE_BACKEND '{other}'"),
            }
        }
        if let Ok(redis_url) = std::env::var("REDIS_URL") {
            store_settings.redis_url = Some(redis_url);
        }
        Self::apply_numeric_env_override("STATE_TTL_SECONDS", &mut store_settings.ttl_seconds);
    }

    fn apply_numeric_env_override(env_var: &str, target: &mut u64) {
        if let Ok(value_str) = std::env::var(env_var) {
            if let Ok(value) = value_str.parse::<u64>() {
                *target = value;
            }
        }
    }

    fn handle_session_secret_override(session_settings: &mut SessionSettings) {
        let env_secret_set = std::env::var("SESSION_SECRET").is_ok_and(|secret| {
            if secret.is_empty() {
                false
            } else {
                session_settings.session_secret = secret;
                true
            }
        });

        if !env_secret_set && session_settings.session_secret.is_empty() {
            session_settings.session_secret = Self::generate_random_session_secret();
            log::warn!("Using auto-generated session secret; sessions will not survive a restart");
            log::warn!("Set SESSION_SECRET or configure session_secret in Settings.toml");
        }
    }

    /// 32 bytes of entropy for the HS256 session key
    fn generate_random_session_secret() -> String {
        use rand::RngCore;
        let mut secret = [0u8; 32];
        rand::rng().fill_bytes(&mut secret);
        general_purpose::STANDARD.encode(secret)
    }

    /// Load environment variables from .env file
    fn load_env_file() {
        if let Ok(contents) = std::fs::read_to_string(".env") {
            for line in contents.lines() {
                if let Some((key, value)) = line.split_once('=') {
                    std::env::set_var(key.trim(), value.trim());
                }
            }
        }
    }

    /// Get the bind address for the server
    #[must_use]
    pub fn get_bind_address(&self) -> String {
        format!("{}:{}", self.application.host, self.application.port)
    }

    /// The callback URL registered with the provider. Must be identical in the
    /// authorization request and the token exchange.
    #[must_use]
    pub fn callback_url(&self) -> String {
        format!(
            "{}{}",
            self.application.public_base_url.trim_end_matches('/'),
            self.provider.callback_path
        )
    }
}

impl ProviderSettings {
    /// Get the client ID, checking environment variable first, then falling back to direct value
    #[must_use]
    pub fn get_client_id(&self) -> Option<String> {
        if let Some(env_var) = &self.client_id_env {
            if let Ok(value) = std::env::var(env_var) {
                return Some(value);
            }
        }
        self.client_id.clone()
    }

    /// Get the client secret, checking environment variable first, then falling back to direct value
    #[must_use]
    pub fn get_client_secret(&self) -> Option<String> {
        if let Some(env_var) = &self.client_secret_env {
            if let Ok(value) = std::env::var(env_var) {
                return Some(value);
            }
        }
        self.client_secret.clone()
    }

    #[must_use]
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }
}
