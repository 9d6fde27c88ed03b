//! Domain-tagged logging macros.
//!
//! Every macro adds a `domain` field so log consumers can filter by area:
//! `sys` (lifecycle), `pipe` (span intake and evaluation), `rule` (rule
//! management), `res` (resource limits and sweeping), `conf` (configuration).
//!
//! ```ignore
//! tw_info!(sys, parallelism = 8, "reactor started");
//! tw_warn!(rule, abuse = true, tenant = %tenant, "rule hit the recursion limit");
//! ```

#[doc(hidden)]
macro_rules! tw_log {
    ($level:ident, $domain:ident, $($field:tt)*) => {
        tracing::$level!(domain = stringify!($domain), $($field)*)
    };
}

macro_rules! tw_error {
    ($domain:ident, $($rest:tt)*) => {
        tw_log!(error, $domain, $($rest)*)
    };
}

macro_rules! tw_warn {
    ($domain:ident, $($rest:tt)*) => {
        tw_log!(warn, $domain, $($rest)*)
    };
}

macro_rules! tw_info {
    ($domain:ident, $($rest:tt)*) => {
        tw_log!(info, $domain, $($rest)*)
    };
}

macro_rules! tw_debug {
    ($domain:ident, $($rest:tt)*) => {
        tw_log!(debug, $domain, $($rest)*)
    };
}

#[allow(unused_macros)]
macro_rules! tw_trace {
    ($domain:ident, $($rest:tt)*) => {
        tw_log!(trace, $domain, $($rest)*)
    };
}
