//! Runtime configuration read from the environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::queues::LaneLimits;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeEnv {
    Development,
    Test,
    Production,
}

impl RuntimeEnv {
    /// Upper bound of the random delay applied before each tick.
    pub fn default_max_jitter(self) -> Duration {
        match self {
            Self::Development => Duration::from_secs(5),
            Self::Test => Duration::from_secs(1),
            Self::Production => Duration::from_secs(60),
        }
    }
}

impl FromStr for RuntimeEnv {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dev" | "development" => Ok(Self::Development),
            "test" => Ok(Self::Test),
            "prod" | "production" => Ok(Self::Production),
            other => Err(format!("unknown environment {other:?}")),
        }
    }
}

/// What the registry does when a tick's ingestion fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// First failure disables the subscription.
    #[default]
    DisableOnFirstFailure,
    /// Disable once consecutive failures exceed the subscription's `max_retry`.
    HonorMaxRetry,
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disable-on-first-failure" => Ok(Self::DisableOnFirstFailure),
            "honor-max-retry" => Ok(Self::HonorMaxRetry),
            other => Err(format!("unknown failure policy {other:?}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FeedloomConfig {
    pub database_url: Option<String>,
    pub environment: RuntimeEnv,
    pub max_jitter: Duration,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub lanes: LaneLimits,
    pub failure_policy: FailurePolicy,
    pub subscriptions_path: PathBuf,
}

impl FeedloomConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset or unparseable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        let environment = lookup("FEEDLOOM_ENV")
            .and_then(|v| v.parse().ok())
            .unwrap_or(RuntimeEnv::Development);
        let max_jitter = parsed("FEEDLOOM_MAX_JITTER_SECS")
            .map(Duration::from_secs)
            .unwrap_or_else(|| environment.default_max_jitter());

        let defaults = LaneLimits::default();
        let lane = |key: &str, default: usize| parsed(key).map(|v| v as usize).unwrap_or(default);
        let lanes = LaneLimits {
            fetch: lane("FEEDLOOM_LANE_FETCH", defaults.fetch),
            hook: lane("FEEDLOOM_LANE_HOOK", defaults.hook),
            download: lane("FEEDLOOM_LANE_DOWNLOAD", defaults.download),
            summarize: lane("FEEDLOOM_LANE_SUMMARIZE", defaults.summarize),
            bittorrent: lane("FEEDLOOM_LANE_BITTORRENT", defaults.bittorrent),
            notify: lane("FEEDLOOM_LANE_NOTIFY", defaults.notify),
            file_removal: lane("FEEDLOOM_LANE_FILE_REMOVAL", defaults.file_removal),
        };

        Self {
            database_url: lookup("DATABASE_URL").filter(|v| !v.trim().is_empty()),
            environment,
            max_jitter,
            user_agent: lookup("FEEDLOOM_USER_AGENT").unwrap_or_else(|| "feedloom/0.1".to_string()),
            http_timeout_secs: parsed("FEEDLOOM_HTTP_TIMEOUT_SECS").unwrap_or(20),
            lanes,
            failure_policy: lookup("FEEDLOOM_FAILURE_POLICY")
                .and_then(|v| v.parse().ok())
                .unwrap_or_default(),
            subscriptions_path: lookup("FEEDLOOM_SUBSCRIPTIONS")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./subscriptions.yaml")),
        }
    }
}
