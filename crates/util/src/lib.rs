pub mod config;

use std::{env, net::SocketAddr};

pub use config::{AppConfig, AuthConfig, ConfigError, Environment};

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";

/// Loads environment variables from `.env` when available.
///
/// A missing file is not an error; deployed builds read the real environment.
pub fn load_env_file() {
    let _ = dotenvy::dotenv();
}

/// Resolves `APP_BIND_ADDR`, falling back to [`DEFAULT_BIND_ADDR`].
pub fn server_bind_address() -> Result<SocketAddr, std::net::AddrParseError> {
    let value = env::var("APP_BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());
    value.parse()
}

/// Serializes tests that mutate process environment variables.
#[cfg(test)]
pub(crate) static ENV_GUARD: std::sync::LazyLock<std::sync::Mutex<()>> =
    std::sync::LazyLock::new(|| std::sync::Mutex::new(()));
