use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// `[logging]`. Every field has a default, so the section may be omitted.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Global level filter, e.g. `"info"`.
    pub level: String,
    /// Per-module overrides, e.g. `{ "tw_runtime::engine" = "debug" }`.
    pub modules: HashMap<String, String>,
    /// Optional log file; relative paths resolve against the config file's
    /// directory.
    pub file: Option<PathBuf>,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            modules: HashMap::new(),
            file: None,
            format: LogFormat::Plain,
        }
    }
}

impl LoggingConfig {
    /// `EnvFilter` directive string: the global level followed by the
    /// per-module overrides in name order.
    pub fn filter_directives(&self) -> String {
        let mut modules: Vec<_> = self.modules.iter().collect();
        modules.sort();
        let mut directives = self.level.clone();
        for (module, level) in modules {
            directives.push_str(&format!(",{module}={level}"));
        }
        directives
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable, `[domain]` prefixed.
    Plain,
    /// One JSON object per event.
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_are_sorted() {
        let cfg = LoggingConfig {
            level: "warn".into(),
            modules: HashMap::from([
                ("tw_runtime::engine".to_string(), "debug".to_string()),
                ("tw_core::buffer".to_string(), "trace".to_string()),
            ]),
            ..LoggingConfig::default()
        };
        assert_eq!(
            cfg.filter_directives(),
            "warn,tw_core::buffer=trace,tw_runtime::engine=debug"
        );
    }
}
