//! Engine configuration
//!
//! Tunables live in the settings table (seeded with defaults at database
//! init) and may be overridden per-process through environment variables,
//! which is how tests and staging deployments shrink the grouping window.

use scout_common::db::init::get_setting;
use scout_common::Result;
use sqlx::SqlitePool;
use tracing::warn;

/// Runtime configuration of the orchestration engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Batching on/off; disabled means every fragment processes immediately
    pub grouping_enabled: bool,
    /// Quiet period of the debounce and the grouping window (same value by
    /// design)
    pub grouping_window_secs: i64,
    /// Safety margin added to the window for the evaluator's lookback query
    pub grouping_lookback_buffer_secs: i64,
    /// Hard ceiling on questions per interview
    pub max_questions: i64,
    /// Flush worker polling cadence
    pub timer_poll_interval_ms: u64,
    /// Max due timers claimed per poll
    pub timer_claim_batch_size: i64,
    /// Timeout for the reasoning collaborator call
    pub reasoning_timeout_ms: u64,
    /// EventBus broadcast channel capacity
    pub event_bus_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            grouping_enabled: true,
            grouping_window_secs: 600,
            grouping_lookback_buffer_secs: 300,
            max_questions: 4,
            timer_poll_interval_ms: 1000,
            timer_claim_batch_size: 16,
            reasoning_timeout_ms: 30_000,
            event_bus_capacity: 1000,
        }
    }
}

impl EngineConfig {
    /// Load configuration from the settings table, then apply environment
    /// overrides (`SCOUT_GROUPING_WINDOW_SECS`, `SCOUT_MAX_QUESTIONS`, ...)
    pub async fn load(db: &SqlitePool) -> Result<Self> {
        let defaults = Self::default();

        let mut config = Self {
            grouping_enabled: read_setting(db, "grouping_enabled", defaults.grouping_enabled)
                .await?,
            grouping_window_secs: read_setting(
                db,
                "grouping_window_secs",
                defaults.grouping_window_secs,
            )
            .await?,
            grouping_lookback_buffer_secs: read_setting(
                db,
                "grouping_lookback_buffer_secs",
                defaults.grouping_lookback_buffer_secs,
            )
            .await?,
            max_questions: read_setting(db, "max_questions", defaults.max_questions).await?,
            timer_poll_interval_ms: read_setting(
                db,
                "timer_poll_interval_ms",
                defaults.timer_poll_interval_ms,
            )
            .await?,
            timer_claim_batch_size: read_setting(
                db,
                "timer_claim_batch_size",
                defaults.timer_claim_batch_size,
            )
            .await?,
            reasoning_timeout_ms: read_setting(
                db,
                "reasoning_timeout_ms",
                defaults.reasoning_timeout_ms,
            )
            .await?,
            event_bus_capacity: read_setting(
                db,
                "event_bus_capacity",
                defaults.event_bus_capacity,
            )
            .await?,
        };

        apply_env_override(&mut config.grouping_enabled, "SCOUT_GROUPING_ENABLED");
        apply_env_override(&mut config.grouping_window_secs, "SCOUT_GROUPING_WINDOW_SECS");
        apply_env_override(&mut config.max_questions, "SCOUT_MAX_QUESTIONS");
        apply_env_override(
            &mut config.timer_poll_interval_ms,
            "SCOUT_TIMER_POLL_INTERVAL_MS",
        );

        Ok(config)
    }

    pub fn grouping_window_ms(&self) -> i64 {
        self.grouping_window_secs * 1000
    }

    pub fn grouping_lookback_buffer_ms(&self) -> i64 {
        self.grouping_lookback_buffer_secs * 1000
    }
}

async fn read_setting<T>(db: &SqlitePool, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr + Copy,
{
    match get_setting(db, key).await? {
        Some(raw) => match raw.parse::<T>() {
            Ok(value) => Ok(value),
            Err(_) => {
                warn!("Setting '{}' has unparseable value '{}', using default", key, raw);
                Ok(default)
            }
        },
        None => Ok(default),
    }
}

fn apply_env_override<T: std::str::FromStr>(slot: &mut T, var: &str) {
    if let Ok(raw) = std::env::var(var) {
        match raw.parse::<T>() {
            Ok(value) => *slot = value,
            Err(_) => warn!("Ignoring unparseable {}={}", var, raw),
        }
    }
}
