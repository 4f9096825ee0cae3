// ------------------------------------------------------------
// Module declarations
// ------------------------------------------------------------
//
// Each module represents a well-defined responsibility:
//
// - config:    Pipeline configuration loaded from JSON
// - schema:    Strongly typed measurement and envelope definitions
// - util:      Shared helper utilities (time, batching, ids)
// - error:     Component-boundary error types
// - metrics:   Lock-free runtime metrics + periodic reporter
// - source:    Collection source contract and the host snapshot source
// - processor: Bounded worker pool for parallel transforms
// - sender:    HTTP delivery with concurrent dispatch and retry
// - collector: Collection loop and lifecycle coordination
//
pub mod config;
pub mod schema;
pub mod util;
pub mod error;
pub mod metrics;
pub mod source;
pub mod processor;
pub mod sender;
pub mod collector;

pub use collector::{Collector, LoopState};
pub use config::Config;
pub use metrics::RuntimeMetrics;
pub use processor::Processor;
pub use sender::Sender;
pub use source::{CollectionSource, HostStatsSource};
