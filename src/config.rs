//! Runtime configuration
//!
//! Values come from the process environment (optionally seeded from `.env`).
//! Retry counts and backoff curves live here rather than inline so tests can
//! run with zero delays.

use crate::error::AgentError;
use crate::Result;
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_FINANCIAL_API_BASE_URL: &str = "https://api.financialdatasets.ai";

/// Bounded exponential backoff: `base * factor^(attempt - 1)` between attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub factor: u32,
}

impl RetryPolicy {
    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let multiplier = self.factor.saturating_pow(exponent);
        self.base_delay.saturating_mul(multiplier)
    }

    /// Same attempt count, no waiting. Used by tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            factor: 1,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        // 3 attempts: wait 200ms, then 800ms
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            factor: 4,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub financial_api_key: String,
    pub financial_api_base_url: String,
    /// Cap on executor loop iterations per subtask
    pub max_iterations: u32,
    /// Structured planning attempts before giving up
    pub planning_attempts: u32,
    /// Re-prompts allowed for an invalid tool choice
    pub tool_selection_retries: u32,
    pub tool_retry: RetryPolicy,
    /// Number of recent conversation turns rendered into prompts
    pub history_window: usize,
    pub port: u16,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            gemini_api_key: String::new(),
            gemini_model: DEFAULT_GEMINI_MODEL.to_string(),
            financial_api_key: String::new(),
            financial_api_base_url: DEFAULT_FINANCIAL_API_BASE_URL.to_string(),
            max_iterations: 5,
            planning_attempts: 3,
            tool_selection_retries: 1,
            tool_retry: RetryPolicy::default(),
            history_window: 10,
            port: 8080,
        }
    }
}

impl AgentConfig {
    /// Load `.env` (if present) and read configuration from the environment.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup; unset keys keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let defaults_retry = defaults.tool_retry.clone();

        let tool_retry = RetryPolicy {
            max_attempts: parse_or(&lookup, "AGENT_TOOL_ATTEMPTS", defaults_retry.max_attempts)?,
            base_delay: Duration::from_millis(parse_or(
                &lookup,
                "AGENT_BACKOFF_BASE_MS",
                defaults_retry.base_delay.as_millis() as u64,
            )?),
            factor: parse_or(&lookup, "AGENT_BACKOFF_FACTOR", defaults_retry.factor)?,
        };

        let port = match lookup("PORT").or_else(|| lookup("API_PORT")) {
            Some(raw) => parse_value("PORT", &raw)?,
            None => defaults.port,
        };

        let config = Self {
            gemini_api_key: lookup("GEMINI_API_KEY").unwrap_or_default(),
            gemini_model: lookup("GEMINI_MODEL").unwrap_or(defaults.gemini_model),
            financial_api_key: lookup("FINANCIAL_DATASETS_API_KEY").unwrap_or_default(),
            financial_api_base_url: lookup("FINANCIAL_API_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.financial_api_base_url),
            max_iterations: parse_or(&lookup, "AGENT_MAX_ITERATIONS", defaults.max_iterations)?,
            planning_attempts: parse_or(
                &lookup,
                "AGENT_PLANNING_ATTEMPTS",
                defaults.planning_attempts,
            )?,
            tool_selection_retries: parse_or(
                &lookup,
                "AGENT_TOOL_SELECTION_RETRIES",
                defaults.tool_selection_retries,
            )?,
            tool_retry,
            history_window: parse_or(&lookup, "AGENT_HISTORY_WINDOW", defaults.history_window)?,
            port,
        };

        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(AgentError::Config(
                "AGENT_MAX_ITERATIONS must be at least 1".to_string(),
            ));
        }
        if self.planning_attempts == 0 {
            return Err(AgentError::Config(
                "AGENT_PLANNING_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        if self.tool_retry.max_attempts == 0 {
            return Err(AgentError::Config(
                "AGENT_TOOL_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| AgentError::Config(format!("{} has invalid value '{}'", key, raw)))
}
