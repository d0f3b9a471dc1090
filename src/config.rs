use std::env;
use std::time::Duration;

/// Runtime configuration, read from the environment once at startup.
///
/// Nothing in the pipeline depends on these values beyond presence/absence:
/// a `rediss://` URL turns on broker TLS, a missing classifier key means
/// every classification fails closed.
#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub redis_url: String,
    pub database_url: Option<String>,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub worker_concurrency: usize,
    pub classify_timeout: Duration,
    pub persist_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: parse_var("PORT", 3001),
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            database_url: env::var("DATABASE_URL").ok(),
            gemini_api_key: env::var("GEMINI_API_KEY").ok().filter(|k| !k.is_empty()),
            gemini_model: env::var("GEMINI_MODEL")
                .unwrap_or_else(|_| "gemini-2.5-flash".to_string()),
            worker_concurrency: parse_var("WORKER_CONCURRENCY", 2),
            classify_timeout: Duration::from_secs(parse_var("CLASSIFY_TIMEOUT_SECS", 10)),
            persist_timeout: Duration::from_secs(parse_var("PERSIST_TIMEOUT_SECS", 5)),
        }
    }
}

fn parse_var<T: std::str::FromStr + Copy>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_unset() {
        // Scope to variables the test suite does not set elsewhere.
        let config = Config::from_env();
        assert!(config.worker_concurrency >= 1);
        assert!(config.classify_timeout >= Duration::from_secs(1));
    }
}
