//! Telemetry for the harness.
//!
//! Structured logging setup plus the progress events long-running operations
//! report through.

mod events;
mod logging;

pub use events::{
    is_attention_line, is_progress_line, HeartbeatTick, NullSink, ProgressSink, RecordingSink,
    TracingSink,
};
pub use logging::{init_logging, LogConfig, LogError, LogFormat};
