use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use crate::buffer::BufferConfig;
use crate::evaluation::EvaluationConfig;
use crate::limits::LimitsConfig;
use crate::logging::LoggingConfig;
use crate::store::StoreConfig;
use crate::validate;
use crate::violations::{SinkUri, ViolationsConfig, parse_sink_uri};

// ---------------------------------------------------------------------------
// Raw TOML structure
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TraceWardenConfigRaw {
    buffer: BufferConfig,
    evaluation: EvaluationConfig,
    limits: LimitsConfig,
    store: StoreConfig,
    violations: ViolationsConfig,
    logging: LoggingConfig,
}

// ---------------------------------------------------------------------------
// TraceWardenConfig (resolved, validated)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TraceWardenConfig {
    pub buffer: BufferConfig,
    pub evaluation: EvaluationConfig,
    pub limits: LimitsConfig,
    pub store: StoreConfig,
    pub violations: ViolationsConfig,
    /// `violations.sinks`, parsed.
    pub sinks: Vec<SinkUri>,
    pub logging: LoggingConfig,
}

impl Default for TraceWardenConfig {
    fn default() -> Self {
        Self {
            buffer: BufferConfig::default(),
            evaluation: EvaluationConfig::default(),
            limits: LimitsConfig::default(),
            store: StoreConfig::default(),
            violations: ViolationsConfig::default(),
            sinks: Vec::new(),
            logging: LoggingConfig::default(),
        }
    }
}

impl TraceWardenConfig {
    /// Read and parse a `tracewarden.toml` file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.as_ref().display()))?;
        content.parse()
    }
}

impl FromStr for TraceWardenConfig {
    type Err = anyhow::Error;

    fn from_str(toml_str: &str) -> anyhow::Result<Self> {
        let raw: TraceWardenConfigRaw = toml::from_str(toml_str)?;

        let sinks = raw
            .violations
            .sinks
            .iter()
            .enumerate()
            .map(|(i, uri)| {
                parse_sink_uri(uri).map_err(|e| anyhow::anyhow!("violations.sinks[{i}]: {e}"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let config = TraceWardenConfig {
            buffer: raw.buffer,
            evaluation: raw.evaluation,
            limits: raw.limits,
            store: raw.store,
            violations: raw.violations,
            sinks,
            logging: raw.logging,
        };

        validate::validate(&config)?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::path::PathBuf;
    use std::time::Duration;

    use super::*;
    use crate::logging::LogFormat;
    use crate::types::{ByteSize, HumanDuration};

    const FULL_TOML: &str = r#"
[buffer]
inactivity_timeout = "5s"
sweep_interval     = "1s"
shards             = 32
max_spans_per_trace = 50000
max_attributes_per_span = 500
max_attribute_value_bytes = "1MB"
late_marker_ttl    = "2m"

[evaluation]
trace_deadline  = "5s"
batch_deadline  = "10s"
parallelism     = 4

[limits]
max_source_bytes     = "64KB"
max_string_bytes     = "10KB"
max_identifier_chars = 100
max_depth            = 100
parse_timeout        = "100ms"

[store]
max_rules_per_tenant = 500

[violations]
sinks = ["file:///var/log/tracewarden/violations.jsonl", "memory://audit"]

[logging]
level = "info"
format = "json"
file = "logs/tracewarden.log"
modules = { "tw_runtime::engine" = "debug" }
"#;

    #[test]
    fn load_full_toml() {
        let cfg: TraceWardenConfig = FULL_TOML.parse().unwrap();

        assert_eq!(cfg.buffer.shards, 32);
        assert_eq!(cfg.buffer.max_attribute_value_bytes, ByteSize::mib(1));
        assert_eq!(cfg.buffer.late_marker_ttl.as_duration(), Duration::from_secs(120));
        assert_eq!(cfg.evaluation.parallelism, 4);
        assert_eq!(cfg.limits.parse_timeout, HumanDuration::from_millis(100));
        assert_eq!(cfg.store.max_rules_per_tenant, 500);
        assert_eq!(
            cfg.sinks,
            vec![
                SinkUri::File(PathBuf::from("/var/log/tracewarden/violations.jsonl")),
                SinkUri::Memory("audit".into()),
            ]
        );
        assert_eq!(cfg.logging.format, LogFormat::Json);
        assert_eq!(cfg.logging.modules["tw_runtime::engine"], "debug");
    }

    #[test]
    fn empty_document_uses_defaults() {
        let cfg: TraceWardenConfig = "".parse().unwrap();
        assert_eq!(cfg.buffer, BufferConfig::default());
        assert_eq!(cfg.evaluation.trace_deadline, HumanDuration::from_secs(5));
        assert_eq!(cfg.evaluation.batch_deadline, HumanDuration::from_secs(10));
        assert!(cfg.sinks.is_empty());
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let cfg: TraceWardenConfig = "[buffer]\nshards = 4\n".parse().unwrap();
        assert_eq!(cfg.buffer.shards, 4);
        assert_eq!(cfg.buffer.inactivity_timeout, HumanDuration::from_secs(5));
    }

    #[test]
    fn bad_sink_is_indexed() {
        let toml = FULL_TOML.replace("memory://audit", "kafka://topic");
        let err = toml.parse::<TraceWardenConfig>().unwrap_err();
        assert!(err.to_string().contains("violations.sinks[1]"), "{err}");
    }

    #[test]
    fn bad_duration_is_rejected() {
        let toml = FULL_TOML.replace("trace_deadline  = \"5s\"", "trace_deadline  = \"5 seconds\"");
        assert!(toml.parse::<TraceWardenConfig>().is_err());
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FULL_TOML.as_bytes()).unwrap();
        let cfg = TraceWardenConfig::load(file.path()).unwrap();
        assert_eq!(cfg.evaluation.parallelism, 4);

        let missing = TraceWardenConfig::load("/nonexistent/tracewarden.toml").unwrap_err();
        assert!(missing.to_string().contains("failed to read"));
    }
}
