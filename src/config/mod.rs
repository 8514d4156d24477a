//! Application configuration.
//!
//! Type-safe configuration loading from environment variables using the
//! `config` and `dotenvy` crates. Values are read with the `COLLOQUY` prefix
//! and `__` (double underscore) separating nested sections, e.g.
//! `COLLOQUY__SERVER__PORT=9000`.
//!
//! # Example
//!
//! ```no_run
//! use colloquy::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//! println!("Listening on {}", config.server.socket_addr());
//! ```

mod ai;
mod auth;
mod chat;
mod database;
mod error;
mod redis;
mod server;

pub use ai::AiConfig;
pub use auth::AuthConfig;
pub use chat::ChatConfig;
pub use database::DatabaseConfig;
pub use error::{ConfigError, ValidationError};
pub use redis::RedisConfig;
pub use server::{Environment, ServerConfig};

use serde::Deserialize;

/// Root application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server configuration (host, port, environment).
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration (PostgreSQL).
    pub database: DatabaseConfig,

    /// Redis configuration (shared rate-limit counters), optional.
    #[serde(default)]
    pub redis: RedisConfig,

    /// Authentication configuration (JWT).
    pub auth: AuthConfig,

    /// AI provider configuration.
    #[serde(default)]
    pub ai: AiConfig,

    /// Chat core tuning.
    #[serde(default)]
    pub chat: ChatConfig,
}

impl AppConfig {
    /// Loads configuration from the environment.
    ///
    /// Reads a `.env` file when present (development), then environment
    /// variables with the `COLLOQUY` prefix.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::with_prefix("COLLOQUY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Validates every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.database.validate()?;
        self.auth.validate()?;
        self.ai.validate()?;
        self.chat.validate()?;
        Ok(())
    }
}
