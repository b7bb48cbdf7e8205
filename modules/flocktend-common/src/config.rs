use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Postgres
    pub database_url: String,
    pub db_schema: String,

    // Platform data export (relation id sets, exclusion list)
    pub archive_dir: PathBuf,

    // Directory of profile documents served by the file-backed fetcher
    pub profile_feed_dir: Option<PathBuf>,

    pub policy: Policy,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            database_url: required_env("DATABASE_URL"),
            db_schema: env::var("DB_SCHEMA").unwrap_or_else(|_| "flocktend".to_string()),
            archive_dir: PathBuf::from(required_env("ARCHIVE_DIR")),
            profile_feed_dir: env::var("PROFILE_FEED_DIR").ok().map(PathBuf::from),
            policy: Policy::from_env(),
        }
    }
}

/// Thresholds and pacing knobs consumed by the pipeline. Read once at
/// startup and passed into each component, never process-wide state.
#[derive(Debug, Clone)]
pub struct Policy {
    /// Maximum snapshot age, in days, before an account is re-fetched.
    pub staleness_days: i64,
    pub batch_size: usize,

    // Delay ranges in seconds; actual sleeps are drawn uniformly.
    pub min_batch_delay: f64,
    pub max_batch_delay: f64,
    pub min_search_delay: f64,
    pub max_search_delay: f64,
    pub min_error_delay: f64,
    pub max_error_delay: f64,

    // Per-run action caps.
    pub new_friend_limit: usize,
    pub prune_limit: usize,

    // Flagging thresholds.
    pub min_followers: i64,
    pub min_account_age_days: i64,
    pub min_listed_count: i64,
    pub min_status_count: i64,
    pub max_idle_days: i64,

    /// Minimum repeat-interaction count before a new account is a follow
    /// candidate.
    pub min_interaction_count: usize,
    /// Prune is cancelled when more than this many of the owner's other
    /// friends follow the candidate.
    pub common_friends_threshold: usize,

    pub consecutive_error_ceiling: u32,
    pub retry_budget: u32,

    /// Test clamp: truncate the fetch candidate set to this many accounts.
    pub max_accounts: Option<usize>,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            staleness_days: 30,
            batch_size: 100,
            min_batch_delay: 30.0,
            max_batch_delay: 90.0,
            min_search_delay: 2.0,
            max_search_delay: 8.0,
            min_error_delay: 300.0,
            max_error_delay: 600.0,
            new_friend_limit: 25,
            prune_limit: 50,
            min_followers: 100,
            min_account_age_days: 90,
            min_listed_count: 1,
            min_status_count: 100,
            max_idle_days: 180,
            min_interaction_count: 2,
            common_friends_threshold: 3,
            consecutive_error_ceiling: 25,
            retry_budget: 3,
            max_accounts: None,
        }
    }
}

impl Policy {
    /// Defaults overridden by environment variables where set.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            staleness_days: env_parse("CACHE_DAYS", d.staleness_days),
            batch_size: env_parse("BATCH_SIZE", d.batch_size),
            min_batch_delay: env_parse("MIN_BATCH_DELAY", d.min_batch_delay),
            max_batch_delay: env_parse("MAX_BATCH_DELAY", d.max_batch_delay),
            min_search_delay: env_parse("MIN_SEARCH_DELAY", d.min_search_delay),
            max_search_delay: env_parse("MAX_SEARCH_DELAY", d.max_search_delay),
            min_error_delay: env_parse("MIN_ERROR_DELAY", d.min_error_delay),
            max_error_delay: env_parse("MAX_ERROR_DELAY", d.max_error_delay),
            new_friend_limit: env_parse("NEW_FRIEND_LIMIT", d.new_friend_limit),
            prune_limit: env_parse("PRUNE_LIMIT", d.prune_limit),
            min_followers: env_parse("MIN_FOLLOWERS", d.min_followers),
            min_account_age_days: env_parse("MIN_ACCOUNT_AGE_DAYS", d.min_account_age_days),
            min_listed_count: env_parse("MIN_LISTED_COUNT", d.min_listed_count),
            min_status_count: env_parse("MIN_STATUS_COUNT", d.min_status_count),
            max_idle_days: env_parse("MAX_IDLE_DAYS", d.max_idle_days),
            min_interaction_count: env_parse("MIN_INTERACTION_COUNT", d.min_interaction_count),
            common_friends_threshold: env_parse(
                "COMMON_FRIENDS_THRESHOLD",
                d.common_friends_threshold,
            ),
            consecutive_error_ceiling: env_parse(
                "CONSECUTIVE_ERROR_CEILING",
                d.consecutive_error_ceiling,
            ),
            retry_budget: env_parse("RETRY_BUDGET", d.retry_budget),
            max_accounts: env::var("MAX_ACCOUNTS").ok().and_then(|v| v.parse().ok()),
        }
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|_| panic!("{key} must parse as {}", std::any::type_name::<T>())),
        Err(_) => default,
    }
}
