use fitline_core::env_config;
use fitline_core::error::CoreError;

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS`.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds. `POST /jobs/{id}/advance` runs a
    /// stage inline, so this bounds the slowest collaborator call too.
    pub request_timeout_secs: u64,
    pub shutdown_timeout_secs: u64,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                    |
    /// |------------------------|----------------------------|
    /// | `HOST`                 | `0.0.0.0`                  |
    /// | `PORT`                 | `3000`                     |
    /// | `CORS_ORIGINS`         | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS` | `300`                      |
    /// | `SHUTDOWN_TIMEOUT_SECS`| `30`                       |
    pub fn from_env() -> Result<Self, CoreError> {
        let config = Self {
            host: env_config::optional("HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: env_config::var_or("PORT", 3000)?,
            cors_origins: env_config::list_or("CORS_ORIGINS", &["http://localhost:5173"]),
            request_timeout_secs: env_config::var_or("REQUEST_TIMEOUT_SECS", 300)?,
            shutdown_timeout_secs: env_config::var_or("SHUTDOWN_TIMEOUT_SECS", 30)?,
        };
        if config.request_timeout_secs == 0 {
            return Err(CoreError::Validation(
                "REQUEST_TIMEOUT_SECS must be positive".to_string(),
            ));
        }
        Ok(config)
    }
}
