//! Scheduler configuration, loaded from the environment.

/// Configuration recognized by the scheduling core. Transport-only options
/// (`APP_NAME`, `API_PREFIX`, listen address, logging level) live in
/// `scheduler-api`'s own config, not here; this crate never reads them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Global concurrent execution cap (`MAX_WORKERS`).
    pub max_workers: usize,
    /// Tenant admission cap (`MAX_ACTIVE_USERS`).
    pub max_active_users: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_workers: 5,
            max_active_users: 3,
        }
    }
}

impl SchedulerConfig {
    /// Build configuration from environment variables, falling back to the
    /// documented defaults (`MAX_WORKERS=5`, `MAX_ACTIVE_USERS=3`) for any
    /// variable that is unset or fails to parse.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_workers: env_usize("MAX_WORKERS", defaults.max_workers),
            max_active_users: env_usize("MAX_ACTIVE_USERS", defaults.max_active_users),
        }
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
