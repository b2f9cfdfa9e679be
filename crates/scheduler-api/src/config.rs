//! Transport-only configuration, loaded from the environment.
//!
//! `MAX_WORKERS` / `MAX_ACTIVE_USERS` are read by `scheduler_core::SchedulerConfig`
//! directly; this module only owns the options the distilled spec calls "surface
//! only, not semantic": the app name, the route prefix, and the listen address.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    pub app_name: String,
    /// Prepended to every route, e.g. `/api/v1`. Empty means no prefix.
    pub api_prefix: String,
    pub host: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            app_name: "workflow-scheduler".into(),
            api_prefix: String::new(),
            host: "0.0.0.0".into(),
            port: 8080,
        }
    }
}

impl ApiConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            app_name: std::env::var("APP_NAME").unwrap_or(defaults.app_name),
            api_prefix: std::env::var("API_PREFIX").unwrap_or(defaults.api_prefix),
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.port),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_have_no_prefix_and_listen_on_8080() {
        let config = ApiConfig::default();
        assert_eq!(config.api_prefix, "");
        assert_eq!(config.bind_addr(), "0.0.0.0:8080");
    }
}
