use anyhow::{Context, Result};

const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_SETTLEMENT_TICK_SECONDS: u64 = 3600;

/// Environment-driven configuration shared by the gateway and the
/// settlement scheduler.
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub database_url: String,
    pub redis_url: String,
    pub http_addr: String,
    pub database_max_connections: u32,
    /// Interval between scheduler passes over the open baseline.
    pub settlement_tick_seconds: u64,
}

impl ServiceConfig {
    pub fn from_env(default_http_addr: &str) -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is required")?;
        let redis_url = std::env::var("REDIS_URL").context("REDIS_URL is required")?;
        let http_addr =
            std::env::var("HTTP_ADDR").unwrap_or_else(|_| default_http_addr.to_string());

        Ok(Self {
            database_url,
            redis_url,
            http_addr,
            database_max_connections: max_connections_from(
                std::env::var("DATABASE_MAX_CONNECTIONS").ok(),
            )?,
            settlement_tick_seconds: DEFAULT_SETTLEMENT_TICK_SECONDS,
        })
    }

    pub fn worker_from_env() -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is required")?;
        let redis_url = std::env::var("REDIS_URL").context("REDIS_URL is required")?;

        Ok(Self {
            database_url,
            redis_url,
            http_addr: String::new(),
            database_max_connections: max_connections_from(
                std::env::var("DATABASE_MAX_CONNECTIONS").ok(),
            )?,
            settlement_tick_seconds: tick_seconds_from(
                std::env::var("SETTLEMENT_TICK_SECONDS").ok(),
            )?,
        })
    }
}

fn max_connections_from(raw: Option<String>) -> Result<u32> {
    let Some(raw) = raw else {
        return Ok(DEFAULT_MAX_CONNECTIONS);
    };
    let connections: u32 = raw
        .trim()
        .parse()
        .context("DATABASE_MAX_CONNECTIONS must be an integer")?;
    if connections == 0 {
        anyhow::bail!("DATABASE_MAX_CONNECTIONS must be positive");
    }

    Ok(connections)
}

fn tick_seconds_from(raw: Option<String>) -> Result<u64> {
    let Some(raw) = raw else {
        return Ok(DEFAULT_SETTLEMENT_TICK_SECONDS);
    };
    let seconds: u64 = raw
        .trim()
        .parse()
        .context("SETTLEMENT_TICK_SECONDS must be an integer number of seconds")?;
    if seconds == 0 {
        anyhow::bail!("SETTLEMENT_TICK_SECONDS must be positive");
    }

    Ok(seconds)
}
