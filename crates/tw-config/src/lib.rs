pub mod buffer;
pub mod evaluation;
pub mod limits;
pub mod logging;
pub mod store;
pub mod types;
mod validate;
pub mod violations;
pub mod warden;

pub use buffer::BufferConfig;
pub use evaluation::EvaluationConfig;
pub use limits::LimitsConfig;
pub use logging::{LogFormat, LoggingConfig};
pub use store::StoreConfig;
pub use types::{ByteSize, HumanDuration};
pub use violations::{SinkUri, ViolationsConfig, parse_sink_uri};
pub use warden::TraceWardenConfig;
