pub mod server;
pub mod tracing;

use std::env;
use std::str::FromStr;
use thiserror::Error;

/// Configuration error type
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Environment variable '{0}' is required but not set")]
    MissingEnvVar(String),

    #[error("Failed to parse environment variable '{key}': {details}")]
    ParseError { key: String, details: String },
}

/// Application environment
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Environment {
    Development, // Local dev (permissive TLS, small pools)
    Testing,     // CI and test runs
    Production,  // Deployed
}

impl Environment {
    pub fn from_env() -> Self {
        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        if app_env.eq_ignore_ascii_case("production") {
            Environment::Production
        } else if app_env.eq_ignore_ascii_case("testing") || app_env.eq_ignore_ascii_case("test") {
            Environment::Testing
        } else {
            Environment::Development
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }

    pub fn is_development(&self) -> bool {
        matches!(self, Environment::Development)
    }

    pub fn is_testing(&self) -> bool {
        matches!(self, Environment::Testing)
    }
}

/// Trait for configuration that can be loaded from environment variables
pub trait FromEnv: Sized {
    fn from_env() -> Result<Self, ConfigError>;
}

/// Helper to load and parse environment variable with a default value
pub fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Helper to load and parse environment variable or return error
pub fn env_required(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Read `key` (or `default` when unset) and parse it with `FromStr`.
pub fn env_parse<T>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_or_default(key, default)
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::ParseError {
            key: key.to_string(),
            details: e.to_string(),
        })
}

/// Read a boolean flag. Accepts true/false, 1/0, yes/no, on/off (case-insensitive).
pub fn env_bool(key: &str, default: bool) -> Result<bool, ConfigError> {
    let Ok(raw) = env::var(key) else {
        return Ok(default);
    };

    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(ConfigError::ParseError {
            key: key.to_string(),
            details: format!("expected a boolean, got '{}'", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_defaults_to_development() {
        temp_env::with_var_unset("APP_ENV", || {
            let env = Environment::from_env();
            assert_eq!(env, Environment::Development);
            assert!(env.is_development());
            assert!(!env.is_production());
        });
    }

    #[test]
    fn test_environment_production_case_insensitive() {
        temp_env::with_var("APP_ENV", Some("PRODUCTION"), || {
            assert_eq!(Environment::from_env(), Environment::Production);
        });

        temp_env::with_var("APP_ENV", Some("Production"), || {
            assert_eq!(Environment::from_env(), Environment::Production);
        });
    }

    #[test]
    fn test_environment_testing() {
        temp_env::with_var("APP_ENV", Some("testing"), || {
            let env = Environment::from_env();
            assert!(env.is_testing());
            assert!(!env.is_development());
            assert!(!env.is_production());
        });
    }

    #[test]
    fn test_environment_unknown_defaults_to_development() {
        temp_env::with_var("APP_ENV", Some("staging"), || {
            assert_eq!(Environment::from_env(), Environment::Development);
        });
    }

    #[test]
    fn test_env_or_default_without_value() {
        temp_env::with_var_unset("MISSING_VAR", || {
            let result = env_or_default("MISSING_VAR", "default_value");
            assert_eq!(result, "default_value");
        });
    }

    #[test]
    fn test_env_required_missing() {
        temp_env::with_var_unset("MISSING_REQUIRED", || {
            let err = env_required("MISSING_REQUIRED").unwrap_err();
            assert!(err.to_string().contains("MISSING_REQUIRED"));
            assert!(err.to_string().contains("required"));
        });
    }

    #[test]
    fn test_env_parse_number() {
        temp_env::with_var("POOL_SIZE", Some(" 42 "), || {
            let value: u32 = env_parse("POOL_SIZE", "5").unwrap();
            assert_eq!(value, 42);
        });

        temp_env::with_var_unset("POOL_SIZE", || {
            let value: u32 = env_parse("POOL_SIZE", "5").unwrap();
            assert_eq!(value, 5);
        });
    }

    #[test]
    fn test_env_parse_invalid_reports_key() {
        temp_env::with_var("POOL_SIZE", Some("many"), || {
            let err = env_parse::<u32>("POOL_SIZE", "5").unwrap_err();
            match err {
                ConfigError::ParseError { key, .. } => assert_eq!(key, "POOL_SIZE"),
                other => panic!("unexpected error: {other}"),
            }
        });
    }

    #[test]
    fn test_env_bool_variants() {
        temp_env::with_var("FLAG", Some("TRUE"), || {
            assert!(env_bool("FLAG", false).unwrap());
        });
        temp_env::with_var("FLAG", Some("off"), || {
            assert!(!env_bool("FLAG", true).unwrap());
        });
        temp_env::with_var_unset("FLAG", || {
            assert!(env_bool("FLAG", true).unwrap());
        });
        temp_env::with_var("FLAG", Some("maybe"), || {
            assert!(env_bool("FLAG", true).is_err());
        });
    }
}
