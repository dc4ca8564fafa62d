use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// What to do when a rating was stored but the provider summary update failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AggregationPolicy {
    /// Log, count, and report the failure in the operation's outcome.
    #[default]
    LogAndContinue,
    /// Return the failure to the caller.
    FailLoud,
}

impl FromStr for AggregationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "log" | "log_and_continue" => Ok(AggregationPolicy::LogAndContinue),
            "fail" | "fail_loud" => Ok(AggregationPolicy::FailLoud),
            other => Err(format!("unknown aggregation policy: {other}")),
        }
    }
}

/// Tunables of the lifecycle and rating services.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Upper bound on every store round-trip.
    pub store_timeout: Duration,
    /// Attempts for version-guarded writes before reporting a conflict.
    pub cas_max_attempts: u32,
    pub aggregation_policy: AggregationPolicy,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_millis(5000),
            cas_max_attempts: 3,
            aggregation_policy: AggregationPolicy::LogAndContinue,
        }
    }
}

impl CoreConfig {
    pub fn from_env() -> Self {
        let aggregation_policy = match std::env::var("RATING_AGGREGATION_POLICY") {
            Ok(raw) => raw.parse().unwrap_or_else(|e| {
                warn!("{e}, falling back to log-and-continue");
                AggregationPolicy::LogAndContinue
            }),
            Err(_) => AggregationPolicy::LogAndContinue,
        };

        Self {
            store_timeout: parse_duration_millis("STORE_TIMEOUT_MS", 5000),
            cas_max_attempts: parse_u32("CAS_MAX_ATTEMPTS", 3).max(1),
            aggregation_policy,
        }
    }
}

fn parse_duration_millis(env_var: &str, default: u64) -> Duration {
    std::env::var(env_var)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or_else(|| Duration::from_millis(default))
}

fn parse_u32(env_var: &str, default: u32) -> u32 {
    std::env::var(env_var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
