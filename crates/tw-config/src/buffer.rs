use serde::{Deserialize, Serialize};

use crate::types::{ByteSize, HumanDuration};

/// `[buffer]`: trace grouping and admission limits.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct BufferConfig {
    /// A collecting trace becomes ready after this much silence.
    pub inactivity_timeout: HumanDuration,
    /// Period of the background inactivity sweep.
    pub sweep_interval: HumanDuration,
    /// Shard count of the in-flight trace map.
    pub shards: usize,
    pub max_spans_per_trace: usize,
    pub max_attributes_per_span: usize,
    pub max_attribute_value_bytes: ByteSize,
    /// How long a flushed trace id is remembered so that spans arriving
    /// afterwards are tagged as late.
    pub late_marker_ttl: HumanDuration,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout: HumanDuration::from_secs(5),
            sweep_interval: HumanDuration::from_secs(1),
            shards: 16,
            max_spans_per_trace: 100_000,
            max_attributes_per_span: 10_000,
            max_attribute_value_bytes: ByteSize::mib(10),
            late_marker_ttl: HumanDuration::from_secs(60),
        }
    }
}
