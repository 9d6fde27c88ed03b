use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// `[violations]`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ViolationsConfig {
    /// Sink URIs, e.g. `"file:///var/log/tracewarden/violations.jsonl"` or
    /// `"memory://audit"`.
    pub sinks: Vec<String>,
}

/// A parsed violation sink destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkUri {
    /// Append JSON Lines to a file.
    File(PathBuf),
    /// In-process collecting sink, addressed by name.
    Memory(String),
}

pub fn parse_sink_uri(uri: &str) -> anyhow::Result<SinkUri> {
    if let Some(path) = uri.strip_prefix("file://") {
        if path.is_empty() {
            anyhow::bail!("sink URI {uri:?} has an empty path");
        }
        return Ok(SinkUri::File(PathBuf::from(path)));
    }
    if let Some(name) = uri.strip_prefix("memory://") {
        if name.is_empty() {
            anyhow::bail!("sink URI {uri:?} needs a name, e.g. \"memory://audit\"");
        }
        return Ok(SinkUri::Memory(name.to_string()));
    }
    anyhow::bail!("unsupported sink URI {uri:?} (expected file:// or memory://)")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_schemes() {
        assert_eq!(
            parse_sink_uri("file:///tmp/v.jsonl").unwrap(),
            SinkUri::File(PathBuf::from("/tmp/v.jsonl"))
        );
        assert_eq!(
            parse_sink_uri("memory://audit").unwrap(),
            SinkUri::Memory("audit".into())
        );
    }

    #[test]
    fn rejects_unknown_or_empty() {
        assert!(parse_sink_uri("http://localhost:9200").is_err());
        assert!(parse_sink_uri("file://").is_err());
        assert!(parse_sink_uri("memory://").is_err());
    }
}
