use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub local_db: LocalDbConfig,
    pub gateway: GatewayConfig,
    pub redis: RedisConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
    pub warmup: WarmupConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Sidecar-local SQLite store (cache mirror, config, audit trails).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LocalDbConfig {
    pub path: String,
}

/// The gateway's own relational database. Read-mostly; the sidecar only
/// writes the narrow moderation mutations.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// "mysql" or "postgresql"
    pub engine: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    /// Upper bound for the connection pool. The gateway serves production
    /// traffic from the same database; keep this small.
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RedisConfig {
    /// Optional. When unset, the cache tier runs on the SQLite mirror alone.
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Static service key accepted via the `X-API-Key` header. Empty means
    /// API-key auth is disabled and only JWT sessions are accepted.
    pub api_key: String,
    /// Password for `POST /api/auth/login`.
    pub admin_password: String,
    pub jwt_secret: String,
    pub jwt_expire_hours: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WarmupConfig {
    /// Pre-compute heavy dashboard/risk caches at startup.
    pub enabled: bool,
}

/// Command line arguments for configuration overrides
#[derive(Parser, Debug, Clone)]
#[command(name = "vigil")]
#[command(version, about = "Vigil - gateway moderation & analytics sidecar")]
pub struct CommandLineArgs {
    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Server host (overrides config file)
    #[arg(long, value_name = "HOST")]
    pub server_host: Option<String>,

    /// Server port (overrides config file)
    #[arg(long, value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Local SQLite path (overrides config file)
    #[arg(long, value_name = "PATH")]
    pub local_db_path: Option<String>,

    /// Gateway database engine: mysql | postgresql
    #[arg(long, value_name = "ENGINE")]
    pub gateway_engine: Option<String>,

    /// Gateway database host
    #[arg(long, value_name = "HOST")]
    pub gateway_host: Option<String>,

    /// Gateway database port
    #[arg(long, value_name = "PORT")]
    pub gateway_port: Option<u16>,

    /// Redis URL for the primary cache (overrides config file)
    #[arg(long, value_name = "URL")]
    pub redis_url: Option<String>,

    /// Logging level (overrides config file, e.g. "info,vigil=debug")
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Disable the startup cache warmup
    #[arg(long)]
    pub no_warmup: bool,
}

impl Config {
    /// Load configuration with command line, environment variable, and file
    /// support.
    ///
    /// Loading order (priority from highest to lowest):
    /// 1. Command line arguments
    /// 2. Environment variables (prefixed with APP_)
    /// 3. Configuration file (config.toml)
    /// 4. Default values
    pub fn load() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        let cli_args = CommandLineArgs::parse();

        let config_path = cli_args.config.clone().or_else(Self::find_config_file);
        let mut config = if let Some(config_path) = config_path {
            Self::from_toml(&config_path)?
        } else {
            tracing::warn!("Configuration file not found, using defaults");
            Config::default()
        };

        config.apply_env_overrides();
        config.apply_cli_overrides(&cli_args);
        config.validate()?;

        Ok(config)
    }

    /// Supported environment variables:
    /// - APP_SERVER_HOST / APP_SERVER_PORT
    /// - APP_LOCAL_DB_PATH
    /// - APP_DB_ENGINE, APP_DB_HOST, APP_DB_PORT, APP_DB_USER,
    ///   APP_DB_PASSWORD, APP_DB_NAME
    /// - APP_REDIS_URL
    /// - APP_API_KEY, APP_ADMIN_PASSWORD, APP_JWT_SECRET, APP_JWT_EXPIRE_HOURS
    /// - APP_LOG_LEVEL
    /// - APP_WARMUP_ENABLED
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("APP_SERVER_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("APP_SERVER_PORT")
            && let Ok(port) = port.parse()
        {
            self.server.port = port;
        }
        if let Ok(path) = std::env::var("APP_LOCAL_DB_PATH") {
            self.local_db.path = path;
        }
        if let Ok(engine) = std::env::var("APP_DB_ENGINE") {
            self.gateway.engine = engine;
        }
        if let Ok(host) = std::env::var("APP_DB_HOST") {
            self.gateway.host = host;
        }
        if let Ok(port) = std::env::var("APP_DB_PORT")
            && let Ok(port) = port.parse()
        {
            self.gateway.port = port;
        }
        if let Ok(user) = std::env::var("APP_DB_USER") {
            self.gateway.user = user;
        }
        if let Ok(password) = std::env::var("APP_DB_PASSWORD") {
            self.gateway.password = password;
        }
        if let Ok(database) = std::env::var("APP_DB_NAME") {
            self.gateway.database = database;
        }
        if let Ok(url) = std::env::var("APP_REDIS_URL") {
            self.redis.url = Some(url).filter(|u| !u.is_empty());
        }
        if let Ok(key) = std::env::var("APP_API_KEY") {
            self.auth.api_key = key;
        }
        if let Ok(password) = std::env::var("APP_ADMIN_PASSWORD") {
            self.auth.admin_password = password;
        }
        if let Ok(secret) = std::env::var("APP_JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }
        if let Ok(hours) = std::env::var("APP_JWT_EXPIRE_HOURS")
            && let Ok(hours) = hours.parse()
        {
            self.auth.jwt_expire_hours = hours;
        }
        if let Ok(level) = std::env::var("APP_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(enabled) = std::env::var("APP_WARMUP_ENABLED")
            && let Ok(enabled) = enabled.parse()
        {
            self.warmup.enabled = enabled;
        }
    }

    fn apply_cli_overrides(&mut self, args: &CommandLineArgs) {
        if let Some(host) = &args.server_host {
            self.server.host = host.clone();
        }
        if let Some(port) = args.server_port {
            self.server.port = port;
        }
        if let Some(path) = &args.local_db_path {
            self.local_db.path = path.clone();
        }
        if let Some(engine) = &args.gateway_engine {
            self.gateway.engine = engine.clone();
        }
        if let Some(host) = &args.gateway_host {
            self.gateway.host = host.clone();
        }
        if let Some(port) = args.gateway_port {
            self.gateway.port = port;
        }
        if let Some(url) = &args.redis_url {
            self.redis.url = Some(url.clone()).filter(|u| !u.is_empty());
        }
        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
        }
        if args.no_warmup {
            self.warmup.enabled = false;
        }
    }

    fn validate(&self) -> Result<(), anyhow::Error> {
        if self.auth.jwt_secret == "dev-secret-key-change-in-production" {
            tracing::warn!("Using the default JWT secret; set APP_JWT_SECRET for production");
        }
        if self.auth.api_key.is_empty() && self.auth.admin_password.is_empty() {
            tracing::warn!(
                "Neither APP_API_KEY nor APP_ADMIN_PASSWORD is configured; the API is unreachable"
            );
        }

        if self.server.port == 0 {
            anyhow::bail!("Server port cannot be 0");
        }
        match self.gateway.engine.as_str() {
            "mysql" | "postgresql" | "postgres" | "pgsql" => {}
            other => anyhow::bail!("Unsupported gateway engine: {}", other),
        }
        if self.gateway.database.is_empty() {
            anyhow::bail!("Gateway database name cannot be empty");
        }
        if self.gateway.max_connections == 0 {
            anyhow::bail!("gateway.max_connections must be > 0");
        }
        if self.auth.jwt_expire_hours <= 0 || self.auth.jwt_expire_hours > 24 {
            anyhow::bail!("auth.jwt_expire_hours must be within 1..=24");
        }
        Ok(())
    }

    fn find_config_file() -> Option<String> {
        let possible_paths =
            ["conf/config.toml", "config.toml", "./conf/config.toml", "./config.toml"];

        for path in &possible_paths {
            if Path::new(path).exists() {
                return Some(path.to_string());
            }
        }
        None
    }

    fn from_toml(path: &str) -> Result<Self, anyhow::Error> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 8080 }
    }
}

impl Default for LocalDbConfig {
    fn default() -> Self {
        Self { path: "data/vigil.db".to_string() }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            engine: "mysql".to_string(),
            host: "localhost".to_string(),
            port: 3306,
            user: "root".to_string(),
            password: String::new(),
            database: "newapi".to_string(),
            max_connections: 10,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            admin_password: String::new(),
            jwt_secret: "dev-secret-key-change-in-production".to_string(),
            jwt_expire_hours: 24,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info,vigil=debug".to_string(), file: Some("logs/vigil.log".to_string()) }
    }
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn rejects_unknown_engine() {
        let mut config = Config::default();
        config.gateway.engine = "oracle".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_oversized_jwt_expiry() {
        let mut config = Config::default();
        config.auth.jwt_expire_hours = 48;
        assert!(config.validate().is_err());
    }

    #[test]
    fn toml_sections_deserialize() {
        let config: Config = toml::from_str(
            r#"
            [server]
            port = 9000

            [gateway]
            engine = "postgresql"
            port = 5432

            [redis]
            url = "redis://localhost:6379/0"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.gateway.engine, "postgresql");
        assert!(config.redis.url.is_some());
    }
}
