use std::env;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::api::{Platform, Region, RetryPolicy, WindowLimit};

/// Pipeline configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Riot developer or production key, sent as `X-Riot-Token`
    pub riot_api_key: String,

    /// Regional routing value for account and match lookups
    pub region: Region,

    /// Platform routing value for league and mastery lookups
    pub platform: Platform,

    /// Per-request HTTP timeout
    pub request_timeout: Duration,

    /// Sliding windows enforced on every routing host
    pub rate_limits: Vec<WindowLimit>,

    /// Total attempts per request, including the first
    pub retry_max_attempts: u32,

    pub retry_base_delay: Duration,

    pub retry_max_delay: Duration,

    pub retry_jitter: f64,

    /// Upper bound on concurrent match-detail fetches
    pub max_in_flight: usize,

    /// Queue the pipeline is scoped to (420 = ranked solo/duo)
    pub queue_id: i64,

    /// Groups with fewer games are hidden from the default aggregate output
    pub min_sample_size: u64,

    /// SQLite database for the response cache and aggregate snapshots
    pub database_url: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let riot_api_key = env::var("RIOT_API_KEY").context("RIOT_API_KEY must be set")?;
        if riot_api_key.trim().is_empty() {
            bail!("RIOT_API_KEY must not be empty");
        }

        Ok(Config {
            riot_api_key,

            region: Region::new(env::var("RIOT_REGION").unwrap_or_else(|_| "americas".to_string())),

            platform: Platform::new(env::var("RIOT_PLATFORM").unwrap_or_else(|_| "la1".to_string())),

            request_timeout: Duration::from_secs(
                env::var("RIOT_API_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .context("RIOT_API_TIMEOUT_SECS must be a valid number")?,
            ),

            rate_limits: parse_rate_limits(
                &env::var("RATE_LIMIT_WINDOWS").unwrap_or_else(|_| "20:1,100:120".to_string()),
            )
            .context("RATE_LIMIT_WINDOWS must look like `20:1,100:120`")?,

            retry_max_attempts: env::var("RETRY_MAX_ATTEMPTS")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .context("RETRY_MAX_ATTEMPTS must be a valid number")?,

            retry_base_delay: Duration::from_millis(
                env::var("RETRY_BASE_DELAY_MS")
                    .unwrap_or_else(|_| "1000".to_string())
                    .parse()
                    .context("RETRY_BASE_DELAY_MS must be a valid number")?,
            ),

            retry_max_delay: Duration::from_millis(
                env::var("RETRY_MAX_DELAY_MS")
                    .unwrap_or_else(|_| "30000".to_string())
                    .parse()
                    .context("RETRY_MAX_DELAY_MS must be a valid number")?,
            ),

            retry_jitter: env::var("RETRY_JITTER")
                .unwrap_or_else(|_| "0.0".to_string())
                .parse()
                .context("RETRY_JITTER must be a valid number")?,

            max_in_flight: env::var("COLLECT_MAX_IN_FLIGHT")
                .unwrap_or_else(|_| "4".to_string())
                .parse()
                .context("COLLECT_MAX_IN_FLIGHT must be a valid number")?,

            queue_id: env::var("QUEUE_ID")
                .unwrap_or_else(|_| "420".to_string())
                .parse()
                .context("QUEUE_ID must be a valid number")?,

            min_sample_size: env::var("MIN_SAMPLE_SIZE")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .context("MIN_SAMPLE_SIZE must be a valid number")?,

            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:data/processed/champion_trends.db".to_string()),
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts.max(1),
            base_delay: self.retry_base_delay,
            max_delay: self.retry_max_delay,
            jitter: self.retry_jitter.clamp(0.0, 1.0),
        }
    }
}

/// Parse `capacity:seconds` pairs separated by commas
pub fn parse_rate_limits(windows: &str) -> Result<Vec<WindowLimit>> {
    let mut limits = Vec::new();

    for part in windows.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (capacity, seconds) = part
            .split_once(':')
            .with_context(|| format!("window `{}` is missing `:`", part))?;

        let capacity: u32 = capacity
            .trim()
            .parse()
            .with_context(|| format!("invalid capacity in `{}`", part))?;
        let seconds: u64 = seconds
            .trim()
            .parse()
            .with_context(|| format!("invalid period in `{}`", part))?;

        if capacity == 0 || seconds == 0 {
            bail!("window `{}` must have a non-zero capacity and period", part);
        }

        limits.push(WindowLimit::new(capacity, Duration::from_secs(seconds)));
    }

    if limits.is_empty() {
        bail!("at least one rate limit window is required");
    }

    Ok(limits)
}
