//! tierci CI - tier execution and pipeline composition
//!
//! Provides the pipeline layer of tierci:
//! - Runs test tiers with their instrumentation policy (`runner`)
//! - Runs the integration tier inside a container and surfaces the remote
//!   process's own status (`bridge`)
//! - Composes stages in a fixed order gated by run-time switches
//!   (`stage`, `pipeline`) and judges the result (`gate`)
//! - Records every run as JSON (`spec`)

pub mod bridge;
pub mod error;
pub mod gate;
pub mod pipeline;
pub mod runner;
pub mod spec;
pub mod stage;

// Re-export key types
pub use bridge::{
    BridgeConfig, BridgeOutcome, ComposeBackend, RemoteBackend, RemoteBridge, RemoteHandle,
};
pub use error::{CiError, Result};
pub use gate::{GateVerdict, PipelineGate};
pub use pipeline::{Composer, PipelineResult};
pub use runner::{StageResult, TierOutcome, TierRunner};
pub use spec::{RunRecord, RUN_RECORD_FILE};
pub use stage::Stage;
