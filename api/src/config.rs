use std::time::Duration;

use steward_core::coach::Provider;

use crate::rate_limit::RateLimitConfig;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_CORS_ORIGINS: &str = "http://localhost:3000";

const DEFAULT_RATE_LIMIT_INTERVAL_SECS: u64 = 60;
const DEFAULT_RATE_LIMIT_PER_INTERVAL: u32 = 10;
const DEFAULT_RATE_LIMIT_UNIQUE_KEYS: usize = 500;

const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_PERPLEXITY_MODEL: &str = "sonar";
const DEFAULT_PERPLEXITY_BASE_URL: &str = "https://api.perplexity.ai";

fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Listener and middleware settings, read once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    /// Redirect plain-HTTP requests (per `X-Forwarded-Proto`) and send HSTS.
    pub require_https: bool,
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            require_https: false,
            cors_origins: parse_origins(DEFAULT_CORS_ORIGINS),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            port: env_parse("PORT", DEFAULT_PORT),
            require_https: env_non_empty("STEWARD_REQUIRE_HTTPS").is_some_and(|v| v == "true"),
            cors_origins: parse_origins(
                &env_non_empty("STEWARD_CORS_ORIGINS")
                    .unwrap_or_else(|| DEFAULT_CORS_ORIGINS.to_string()),
            ),
        }
    }
}

/// Comma-separated origin list; blanks and case-insensitive duplicates dropped.
pub fn parse_origins(raw: &str) -> Vec<String> {
    let mut origins: Vec<String> = Vec::new();
    for origin in raw.split(',').map(str::trim).filter(|o| !o.is_empty()) {
        if !origins.iter().any(|seen| seen.eq_ignore_ascii_case(origin)) {
            origins.push(origin.to_string());
        }
    }
    origins
}

impl RateLimitConfig {
    /// Limiter settings for the coach endpoint. Read once at startup.
    pub fn from_env() -> Self {
        let interval_secs = env_parse(
            "COACH_RATE_LIMIT_INTERVAL_SECS",
            DEFAULT_RATE_LIMIT_INTERVAL_SECS,
        )
        .max(1);

        Self {
            interval: Duration::from_secs(interval_secs),
            tokens_per_interval: env_parse(
                "COACH_RATE_LIMIT_PER_INTERVAL",
                DEFAULT_RATE_LIMIT_PER_INTERVAL,
            ),
            unique_token_per_interval: env_parse(
                "COACH_RATE_LIMIT_UNIQUE_KEYS",
                DEFAULT_RATE_LIMIT_UNIQUE_KEYS,
            ),
        }
    }
}

/// Connection details for one upstream chat-completion API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCredentials {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
}

impl ProviderCredentials {
    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

/// Credentials for every provider. A missing key disables that provider only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSettings {
    pub openai: ProviderCredentials,
    pub perplexity: ProviderCredentials,
}

impl ProviderSettings {
    pub fn from_env() -> Self {
        Self {
            openai: ProviderCredentials {
                api_key: env_non_empty("OPENAI_API_KEY"),
                model: env_non_empty("OPENAI_MODEL")
                    .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
                base_url: env_non_empty("OPENAI_BASE_URL")
                    .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
            },
            perplexity: ProviderCredentials {
                api_key: env_non_empty("PERPLEXITY_API_KEY"),
                model: env_non_empty("PERPLEXITY_MODEL")
                    .unwrap_or_else(|| DEFAULT_PERPLEXITY_MODEL.to_string()),
                base_url: env_non_empty("PERPLEXITY_BASE_URL")
                    .unwrap_or_else(|| DEFAULT_PERPLEXITY_BASE_URL.to_string()),
            },
        }
    }

    pub fn get(&self, provider: Provider) -> &ProviderCredentials {
        match provider {
            Provider::Openai => &self.openai,
            Provider::Perplexity => &self.perplexity,
        }
    }

    pub fn is_configured(&self, provider: Provider) -> bool {
        self.get(provider).is_configured()
    }
}

/// Where request handlers get provider settings from.
///
/// Production reads the environment on every request so keys can be rotated
/// without a restart; tests pin a fixed snapshot.
#[derive(Debug, Clone)]
pub enum SettingsSource {
    Env,
    Fixed(ProviderSettings),
}

impl SettingsSource {
    pub fn load(&self) -> ProviderSettings {
        match self {
            Self::Env => ProviderSettings::from_env(),
            Self::Fixed(settings) => settings.clone(),
        }
    }
}
