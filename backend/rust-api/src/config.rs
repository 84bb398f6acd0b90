use serde::Deserialize;
use std::env;

pub const DEFAULT_ATTEMPT_CACHE_TTL_SECONDS: u64 = 7 * 24 * 3600;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub mongo_uri: String,
    pub mongo_database: String,
    pub redis_uri: String,
    pub listen_addr: String,
    /// TTL of a lesson attempt's answer hash, refreshed on every write.
    pub attempt_cache_ttl_seconds: u64,
    /// Deadline applied to every attempt operation served over HTTP.
    pub request_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mongo_uri: "mongodb://localhost:27017/?replicaSet=rs0".to_string(),
            mongo_database: "learning_platform".to_string(),
            redis_uri: "redis://127.0.0.1:6379/0".to_string(),
            listen_addr: "0.0.0.0:8081".to_string(),
            attempt_cache_ttl_seconds: DEFAULT_ATTEMPT_CACHE_TTL_SECONDS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Root .env first, then the local one
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        let env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // config/*.toml + ENV overrides (prefix: APP_)
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let defaults = Config::default();

        let mongo_uri = settings
            .get_string("database.mongo_uri")
            .or_else(|_| env::var("MONGO_URI"))
            .unwrap_or(defaults.mongo_uri);

        let mongo_database = settings
            .get_string("database.mongo_database")
            .or_else(|_| env::var("MONGO_DATABASE"))
            .unwrap_or(defaults.mongo_database);

        let redis_uri = settings
            .get_string("redis.uri")
            .or_else(|_| env::var("REDIS_URI"))
            .unwrap_or_else(|_| redis_uri_from_parts());

        let listen_addr = settings
            .get_string("server.listen_addr")
            .or_else(|_| env::var("LISTEN_ADDR"))
            .unwrap_or(defaults.listen_addr);

        let attempt_cache_ttl_seconds = read_u64(
            &settings,
            "redis.attempt_cache_ttl_seconds",
            "ATTEMPT_CACHE_TTL_SECONDS",
        )?
        .unwrap_or(defaults.attempt_cache_ttl_seconds);

        let request_timeout_ms =
            read_u64(&settings, "server.request_timeout_ms", "REQUEST_TIMEOUT_MS")?
                .unwrap_or(defaults.request_timeout_ms);

        Ok(Config {
            mongo_uri,
            mongo_database,
            redis_uri,
            listen_addr,
            attempt_cache_ttl_seconds,
            request_timeout_ms,
        })
    }
}

fn redis_uri_from_parts() -> String {
    let host = env::var("REDIS_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port = env::var("REDIS_PORT").unwrap_or_else(|_| "6379".to_string());
    let db = env::var("REDIS_ATTEMPTS_DB").unwrap_or_else(|_| "0".to_string());
    match env::var("REDIS_PASSWORD") {
        Ok(password) if !password.is_empty() => {
            format!("redis://:{}@{}:{}/{}", password, host, port, db)
        }
        _ => format!("redis://{}:{}/{}", host, port, db),
    }
}

fn read_u64(
    settings: &config::Config,
    key: &str,
    env_var: &str,
) -> Result<Option<u64>, config::ConfigError> {
    if let Ok(value) = settings.get_int(key) {
        return u64::try_from(value)
            .map(Some)
            .map_err(|_| config::ConfigError::Message(format!("{} must not be negative", key)));
    }
    match env::var(env_var) {
        Ok(raw) => raw
            .parse::<u64>()
            .map(Some)
            .map_err(|e| config::ConfigError::Message(format!("{}: {}", env_var, e))),
        Err(_) => Ok(None),
    }
}
