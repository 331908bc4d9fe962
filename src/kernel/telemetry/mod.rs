//! Turn and action telemetry.
//!
//! # READ-ONLY
//! Recording is a side effect of a turn. The extractor, compiler, gate and
//! engine never read it back.
//!
//! # CONTENT-FREE
//! Events carry plan ids, enums, durations and counts. Utterances, package
//! names, arguments and session ids stay out.

pub mod event;
pub mod metrics;
pub mod recorder;

pub use event::TelemetryEvent;
pub use metrics::TelemetrySnapshot;
pub use recorder::TelemetryRecorder;
