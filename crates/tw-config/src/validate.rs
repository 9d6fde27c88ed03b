use crate::warden::TraceWardenConfig;

/// Called automatically by `TraceWardenConfig::from_str` / `load`.
pub(crate) fn validate(config: &TraceWardenConfig) -> anyhow::Result<()> {
    let buffer = &config.buffer;
    if buffer.shards == 0 {
        anyhow::bail!("buffer.shards must be > 0");
    }
    if buffer.inactivity_timeout.is_zero() {
        anyhow::bail!("buffer.inactivity_timeout must be > 0");
    }
    if buffer.sweep_interval.is_zero() {
        anyhow::bail!("buffer.sweep_interval must be > 0");
    }
    if buffer.sweep_interval > buffer.inactivity_timeout {
        anyhow::bail!(
            "buffer.sweep_interval ({}) must not exceed buffer.inactivity_timeout ({})",
            buffer.sweep_interval,
            buffer.inactivity_timeout,
        );
    }
    if buffer.max_spans_per_trace == 0
        || buffer.max_attributes_per_span == 0
        || buffer.max_attribute_value_bytes.as_bytes() == 0
    {
        anyhow::bail!("buffer admission limits must be > 0");
    }

    let eval = &config.evaluation;
    if eval.parallelism == 0 {
        anyhow::bail!("evaluation.parallelism must be > 0");
    }
    if eval.trace_deadline.is_zero() {
        anyhow::bail!("evaluation.trace_deadline must be > 0");
    }
    if eval.batch_deadline < eval.trace_deadline {
        anyhow::bail!(
            "evaluation.batch_deadline ({}) must be >= evaluation.trace_deadline ({})",
            eval.batch_deadline,
            eval.trace_deadline,
        );
    }

    let limits = &config.limits;
    for (name, value) in [
        ("max_source_bytes", limits.max_source_bytes.as_bytes()),
        ("max_string_bytes", limits.max_string_bytes.as_bytes()),
        ("max_identifier_chars", limits.max_identifier_chars),
        ("max_depth", limits.max_depth),
    ] {
        if value == 0 {
            anyhow::bail!("limits.{name} must be > 0");
        }
    }
    if limits.parse_timeout.is_zero() {
        anyhow::bail!("limits.parse_timeout must be > 0");
    }

    if config.store.max_rules_per_tenant == 0 {
        anyhow::bail!("store.max_rules_per_tenant must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::TraceWardenConfig;

    fn rejects(toml: &str, needle: &str) {
        let err = toml.parse::<TraceWardenConfig>().unwrap_err();
        assert!(err.to_string().contains(needle), "expected {needle:?} in: {err}");
    }

    #[test]
    fn zero_parallelism() {
        rejects("[evaluation]\nparallelism = 0", "evaluation.parallelism");
    }

    #[test]
    fn zero_shards() {
        rejects("[buffer]\nshards = 0", "buffer.shards");
    }

    #[test]
    fn batch_shorter_than_trace_deadline() {
        rejects(
            "[evaluation]\ntrace_deadline = \"5s\"\nbatch_deadline = \"2s\"",
            "batch_deadline",
        );
    }

    #[test]
    fn sweep_longer_than_inactivity() {
        rejects(
            "[buffer]\ninactivity_timeout = \"1s\"\nsweep_interval = \"5s\"",
            "sweep_interval",
        );
    }

    #[test]
    fn zero_limits() {
        rejects("[limits]\nmax_depth = 0", "limits.max_depth");
        rejects("[limits]\nmax_source_bytes = \"0B\"", "limits.max_source_bytes");
        rejects("[limits]\nparse_timeout = \"0ms\"", "limits.parse_timeout");
    }

    #[test]
    fn zero_rule_cap() {
        rejects("[store]\nmax_rules_per_tenant = 0", "store.max_rules_per_tenant");
    }
}
