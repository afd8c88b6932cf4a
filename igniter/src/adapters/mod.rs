//! Adapter contracts consumed by the core
//!
//! The runtime talks to the outside world through four seams: [`Store`]
//! (key-value + pub/sub), [`Jobs`] (background work), [`Logger`], and
//! [`Telemetry`]. Concrete backends (Redis, NATS, OTLP, ...) live in adapter
//! crates; the core ships defaults that keep a bare application operational:
//! a silent store, jobs that refuse enqueues, a tracing-backed logger, and a
//! no-op telemetry.

mod jobs;
mod logger;
mod memory;
mod memory_jobs;
mod store;
mod telemetry;

pub use jobs::{JobHandler, JobOptions, JobTrigger, Jobs, NoopJobs};
pub use logger::{LogFields, LogLevel, Logger, NoopLogger, TracingLogger};
pub use memory::MemoryStore;
pub use memory_jobs::MemoryJobs;
pub use store::{MessageHandler, NoopStore, Store, Subscription};
pub use telemetry::{
    NoopTelemetry, RecordedSpan, RecordingTelemetry, Telemetry, TelemetrySpan, TracingTelemetry,
};
