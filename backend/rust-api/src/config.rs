use serde::Deserialize;
use std::env;

pub const DEFAULT_TUTOR_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_TUTOR_MODEL: &str = "gpt-4-turbo-preview";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub bind_addr: String,
    /// Progress is kept in memory when unset.
    pub redis_uri: Option<String>,
    pub tutor: TutorSettings,
    pub google_vision_api_key: Option<String>,
    /// `username:password` guarding `/metrics`.
    pub metrics_auth: String,
    pub allowed_origins: Vec<String>,
    /// Idle time after which a session is dropped.
    pub session_ttl_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TutorSettings {
    /// Missing credential makes every tutor request a configuration error.
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_seconds: u64,
}

impl Default for TutorSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_TUTOR_BASE_URL.to_string(),
            model: DEFAULT_TUTOR_MODEL.to_string(),
            temperature: 0.7,
            max_tokens: 500,
            timeout_seconds: 30,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8081".to_string(),
            redis_uri: None,
            tutor: TutorSettings::default(),
            google_vision_api_key: None,
            metrics_auth: "admin:changeme".to_string(),
            allowed_origins: Vec::new(),
            session_ttl_seconds: 3600,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Root .env first (two levels up), then a local one
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // config/<env>.toml, overridden by APP__SECTION__KEY variables
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", app_env)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let defaults = Config::default();
        let tutor_defaults = TutorSettings::default();

        let bind_addr = settings
            .get_string("server.bind_addr")
            .or_else(|_| env::var("BIND_ADDR"))
            .unwrap_or(defaults.bind_addr);

        let redis_uri = non_empty(
            settings
                .get_string("redis.uri")
                .or_else(|_| env::var("REDIS_URI"))
                .ok(),
        );

        let api_key = non_empty(
            settings
                .get_string("tutor.api_key")
                .or_else(|_| env::var("OPENAI_API_KEY"))
                .ok(),
        );
        if api_key.is_none() {
            tracing::warn!("OPENAI_API_KEY is not set; tutor requests will fail with a configuration error");
        }

        let base_url = settings
            .get_string("tutor.base_url")
            .or_else(|_| env::var("OPENAI_BASE_URL"))
            .unwrap_or(tutor_defaults.base_url);

        let model = settings
            .get_string("tutor.model")
            .or_else(|_| env::var("TUTOR_MODEL"))
            .unwrap_or(tutor_defaults.model);

        let temperature = settings
            .get_float("tutor.temperature")
            .ok()
            .or_else(|| parse_env("TUTOR_TEMPERATURE"))
            .map(|t| t as f32)
            .unwrap_or(tutor_defaults.temperature);

        let max_tokens = settings
            .get_int("tutor.max_tokens")
            .ok()
            .or_else(|| parse_env("TUTOR_MAX_TOKENS"))
            .filter(|v| *v > 0)
            .map(|v| v as u32)
            .unwrap_or(tutor_defaults.max_tokens);

        let timeout_seconds = settings
            .get_int("tutor.timeout_seconds")
            .ok()
            .or_else(|| parse_env("TUTOR_TIMEOUT_SECONDS"))
            .filter(|v| *v > 0)
            .map(|v| v as u64)
            .unwrap_or(tutor_defaults.timeout_seconds);

        let google_vision_api_key = non_empty(
            settings
                .get_string("ocr.google_vision_api_key")
                .or_else(|_| env::var("GOOGLE_VISION_API_KEY"))
                .ok(),
        );

        let metrics_auth = settings
            .get_string("metrics.auth")
            .or_else(|_| env::var("METRICS_AUTH"))
            .unwrap_or_else(|_| {
                if app_env == "prod" {
                    eprintln!("WARNING: METRICS_AUTH not set in production, using default credentials");
                }
                defaults.metrics_auth
            });

        let allowed_origins = settings
            .get_string("server.allowed_origins")
            .or_else(|_| env::var("ALLOWED_ORIGINS"))
            .map(|raw| {
                raw.split(',')
                    .map(|origin| origin.trim().to_string())
                    .filter(|origin| !origin.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let session_ttl_seconds = settings
            .get_int("session.ttl_seconds")
            .ok()
            .or_else(|| parse_env("SESSION_DURATION_SECONDS"))
            .filter(|v| *v > 0)
            .map(|v| v as u64)
            .unwrap_or(defaults.session_ttl_seconds);

        Ok(Config {
            bind_addr,
            redis_uri,
            tutor: TutorSettings {
                api_key,
                base_url,
                model,
                temperature,
                max_tokens,
                timeout_seconds,
            },
            google_vision_api_key,
            metrics_auth,
            allowed_origins,
            session_ttl_seconds,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_tutor_env() {
        for key in [
            "OPENAI_API_KEY",
            "OPENAI_BASE_URL",
            "TUTOR_MODEL",
            "TUTOR_TEMPERATURE",
            "TUTOR_MAX_TOKENS",
            "TUTOR_TIMEOUT_SECONDS",
            "SESSION_DURATION_SECONDS",
        ] {
            env::remove_var(key);
        }
        env::set_var("SKIP_ROOT_ENV", "1");
    }

    #[test]
    #[serial]
    fn defaults_apply_without_environment() {
        clear_tutor_env();
        let config = Config::load().unwrap();
        assert!(config.tutor.api_key.is_none());
        assert_eq!(config.tutor.model, DEFAULT_TUTOR_MODEL);
        assert_eq!(config.tutor.max_tokens, 500);
        assert_eq!(config.tutor.temperature, 0.7);
        assert_eq!(config.session_ttl_seconds, 3600);
    }

    #[test]
    #[serial]
    fn env_fallbacks_are_read() {
        clear_tutor_env();
        env::set_var("OPENAI_API_KEY", "sk-test");
        env::set_var("TUTOR_MAX_TOKENS", "800");
        env::set_var("TUTOR_TEMPERATURE", "0.2");
        env::set_var("SESSION_DURATION_SECONDS", "900");

        let config = Config::load().unwrap();
        assert_eq!(config.tutor.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.tutor.max_tokens, 800);
        assert!((config.tutor.temperature - 0.2).abs() < f32::EPSILON);
        assert_eq!(config.session_ttl_seconds, 900);

        clear_tutor_env();
    }

    #[test]
    #[serial]
    fn blank_credential_counts_as_missing() {
        clear_tutor_env();
        env::set_var("OPENAI_API_KEY", "   ");
        let config = Config::load().unwrap();
        assert!(config.tutor.api_key.is_none());
        clear_tutor_env();
    }
}
