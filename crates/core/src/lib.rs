#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Status-aware build gating: polls Cachet-style status aggregators, caches
//! the merged resource view and blocks pipelines until their required
//! resources are operational.

pub mod config;
pub mod gate;
pub mod model;
pub mod registry;
pub mod report;
pub mod source;

mod util;

pub use config::{GateOptions, OnSourceFailure, RegistryConfig, SourceConfig};
pub use gate::{GateError, GateLog, GatingEngine, MemoryLog, TracingLog};
pub use model::{Resource, StatusKind};
pub use registry::{RefreshSummary, ResourceRegistry, Snapshot};
pub use report::{GateOutcome, GateState, GatingMetrics, GatingReport};
pub use source::{FetchError, SourceClient};
pub use util::{new_ulid, now_ms};
