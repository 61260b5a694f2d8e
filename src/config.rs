//! Service configuration.
//!
//! Everything has a default, so `Config::default()` is a working service on
//! `0.0.0.0:3000`. [`Config::from_env`] reads the same settings from the
//! environment for container deployments:
//!
//! | Variable | Field |
//! |---|---|
//! | `COURIER_NAME` | `name` |
//! | `COURIER_ENDPOINT` | `endpoint` |
//! | `COURIER_USER_AGENT` | `user_agent` |
//! | `COURIER_TRACE` | `trace_patterns`, comma-separated regexes |

use regex::Regex;

use crate::error::Error;

#[derive(Clone, Debug)]
pub struct Config {
    /// Service name stamped on log lines.
    pub name: String,
    /// `host:port` the server binds to.
    pub endpoint: String,
    /// Sent as `User-Agent` on every response when set.
    pub user_agent: Option<String>,
    /// Requests whose path matches any of these are traced: request and
    /// response are mirrored to the log at debug level.
    pub trace_patterns: Vec<Regex>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: "service".into(),
            endpoint: "0.0.0.0:3000".into(),
            user_agent: None,
            trace_patterns: Vec::new(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let mut config = Self::default();
        if let Some(name) = get("COURIER_NAME").filter(|v| !v.is_empty()) {
            config.name = name;
        }
        if let Some(endpoint) = get("COURIER_ENDPOINT").filter(|v| !v.is_empty()) {
            config.endpoint = endpoint;
        }
        config.user_agent = get("COURIER_USER_AGENT").filter(|v| !v.is_empty());
        if let Some(patterns) = get("COURIER_TRACE") {
            for pattern in patterns.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                config = config.trace(pattern)?;
            }
        }
        Ok(config)
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Adds a trace pattern. Fails if `pattern` is not a valid regex.
    pub fn trace(mut self, pattern: &str) -> Result<Self, Error> {
        self.trace_patterns.push(Regex::new(pattern)?);
        Ok(self)
    }
}
