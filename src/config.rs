//! Runtime configuration loaded from environment variables (and `.env`)

use std::path::PathBuf;
use std::time::Duration;

/// Minimum accepted length for the token signing secret (256 bits)
pub const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("environment validation failed:\n{}", bullet_list(.0))]
    Invalid(Vec<String>),
}

fn bullet_list(errors: &[String]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Clone)]
pub struct Config {
    /// HS256 secret shared with the login service
    pub jwt_secret: String,
    pub port: u16,
    /// Messages replayed to a connection when it joins a room
    pub history_limit: usize,
    /// Upper bound on any single verifier or store call
    pub store_timeout: Duration,
    /// Optional JSON array of users seeding the in-memory directory
    pub users_file: Option<PathBuf>,
}

/// Per-connection tunables handed to every session
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub history_limit: usize,
    pub store_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            history_limit: 50,
            store_timeout: Duration::from_secs(5),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Every problem is collected
    /// and reported at once.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut errors = Vec::new();
        let defaults = SessionSettings::default();

        let jwt_secret = lookup("JWT_SECRET")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        let jwt_secret = match jwt_secret {
            Some(s) if s.len() >= MIN_SECRET_LEN => s,
            Some(_) => {
                errors.push(format!(
                    "JWT_SECRET must be at least {} characters long",
                    MIN_SECRET_LEN
                ));
                String::new()
            }
            None => {
                errors.push("Missing required environment variable: JWT_SECRET".to_string());
                String::new()
            }
        };

        let port = parse_or(&lookup, "PORT", 3001u16, &mut errors);
        let history_limit = parse_or(&lookup, "HISTORY_LIMIT", defaults.history_limit, &mut errors);
        let timeout_ms = parse_or(
            &lookup,
            "STORE_TIMEOUT_MS",
            defaults.store_timeout.as_millis() as u64,
            &mut errors,
        );
        if timeout_ms == 0 {
            errors.push("STORE_TIMEOUT_MS must be greater than zero".to_string());
        }

        let users_file = lookup("USERS_FILE")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        if !errors.is_empty() {
            return Err(ConfigError::Invalid(errors));
        }

        Ok(Self {
            jwt_secret,
            port,
            history_limit,
            store_timeout: Duration::from_millis(timeout_ms),
            users_file,
        })
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            history_limit: self.history_limit,
            store_timeout: self.store_timeout,
        }
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
    errors: &mut Vec<String>,
) -> T {
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                errors.push(format!("{} must be a valid number, got {:?}", key, raw));
                default
            }
        },
        _ => default,
    }
}
