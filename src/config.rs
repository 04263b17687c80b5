//! Environment configuration

use sha2::{Digest, Sha256};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

use crate::error::ChatError;
use crate::models::UserContext;
use crate::Result;

const DEFAULT_BASE_URL: &str = "http://localhost:8000";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub parser_base_url: String,
    pub gateway_timeout: Duration,
    pub database_url: Option<String>,
    pub data_dir: PathBuf,
    /// `STORAGE=memory`: nothing outlives the process
    pub in_memory: bool,
    pub port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            parser_base_url: DEFAULT_BASE_URL.to_string(),
            gateway_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            database_url: None,
            data_dir: PathBuf::from(".ledger-chat"),
            in_memory: false,
            port: DEFAULT_PORT,
        }
    }
}

impl AppConfig {
    /// Read settings from the process environment. Call `dotenv` first.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let first = |keys: &[&str]| keys.iter().find_map(|k| lookup(k)).filter(|v| !v.trim().is_empty());

        let gateway_timeout = match first(&["GATEWAY_TIMEOUT_SECS"]) {
            Some(raw) => Duration::from_secs(raw.trim().parse().map_err(|_| {
                ChatError::ConfigError(format!("GATEWAY_TIMEOUT_SECS is not a number: {}", raw))
            })?),
            None => defaults.gateway_timeout,
        };

        let port = match first(&["PORT", "API_PORT"]) {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| ChatError::ConfigError(format!("PORT is not a valid port: {}", raw)))?,
            None => defaults.port,
        };

        let in_memory = match first(&["STORAGE"]) {
            Some(raw) => match raw.trim().to_lowercase().as_str() {
                "memory" => true,
                "persistent" | "file" | "files" | "postgres" => false,
                other => {
                    return Err(ChatError::ConfigError(format!("Unknown STORAGE mode: {}", other)))
                }
            },
            None => defaults.in_memory,
        };

        Ok(Self {
            parser_base_url: first(&["PARSER_BASE_URL", "API_BASE_URL"])
                .unwrap_or(defaults.parser_base_url),
            gateway_timeout,
            database_url: first(&["POSTGRES_URL", "DATABASE_URL"]),
            data_dir: first(&["TIMELINE_DIR"]).map(PathBuf::from).unwrap_or(defaults.data_dir),
            in_memory,
            port,
        })
    }

    /// User for the terminal client, from `CHAT_USER_NAME` / `CHAT_USER_EMAIL`.
    pub fn local_user() -> UserContext {
        let name = env::var("CHAT_USER_NAME").ok().filter(|v| !v.trim().is_empty());
        let email = env::var("CHAT_USER_EMAIL").ok().filter(|v| !v.trim().is_empty());
        let seed = email.clone().or_else(|| name.clone()).unwrap_or_else(|| "local-user".to_string());

        UserContext {
            user_id: stable_uuid_from_string(&seed),
            email,
            name,
            group: None,
        }
    }
}

/// Deterministic v4-shaped UUID derived from any string.
pub fn stable_uuid_from_string(input: &str) -> Uuid {
    let hash = Sha256::digest(input.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash[..16]);

    // Set UUID version (4) and variant (RFC4122) bits.
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    Uuid::from_bytes(bytes)
}
