//! Runtime configuration passed explicitly into the pipeline.

use std::collections::HashMap;

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const DEFAULT_MAX_PAGE_SIZE: u32 = 1000;

const SECRET_PREFIX: &str = "ACTIONS_SECRET_";

#[derive(Clone, Debug, PartialEq)]
pub struct RuntimeConfig {
    /// Used when a list request gives neither `first` nor `last`.
    pub default_page_size: u32,
    /// Upper bound applied to `first`/`last`.
    pub max_page_size: u32,
    /// Render PermissionDenied exactly like NotFound in error bodies.
    pub conceal_not_found: bool,
    /// Values for `ctx.secrets.<NAME>`.
    pub secrets: HashMap<String, String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
            conceal_not_found: false,
            secrets: HashMap::new(),
        }
    }
}

impl RuntimeConfig {
    /// Read `ACTIONS_PAGE_SIZE`, `ACTIONS_MAX_PAGE_SIZE`, `ACTIONS_CONCEAL_NOT_FOUND` and every
    /// `ACTIONS_SECRET_<NAME>` from the process environment.
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut config = RuntimeConfig::default();
        for (key, value) in vars {
            match key.as_str() {
                "ACTIONS_PAGE_SIZE" => match value.trim().parse::<u32>() {
                    Ok(n) if n > 0 => config.default_page_size = n,
                    _ => tracing::warn!(value = %value, "ignoring invalid ACTIONS_PAGE_SIZE"),
                },
                "ACTIONS_MAX_PAGE_SIZE" => match value.trim().parse::<u32>() {
                    Ok(n) if n > 0 => config.max_page_size = n,
                    _ => tracing::warn!(value = %value, "ignoring invalid ACTIONS_MAX_PAGE_SIZE"),
                },
                "ACTIONS_CONCEAL_NOT_FOUND" => {
                    config.conceal_not_found = matches!(value.trim(), "1" | "true" | "TRUE" | "yes")
                }
                _ => {
                    if let Some(name) = key.strip_prefix(SECRET_PREFIX) {
                        if !name.is_empty() {
                            config.secrets.insert(name.to_string(), value);
                        }
                    }
                }
            }
        }
        config
    }

    pub fn with_secret(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.insert(name.into(), value.into());
        self
    }

    pub fn secret(&self, name: &str) -> Option<&str> {
        self.secrets.get(name).map(String::as_str)
    }
}
