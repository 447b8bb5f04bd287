// Import pipeline: per-record processing, batch pacing, and run orchestration

pub mod batching;
pub mod orchestrator;
pub mod processing;
pub mod run;

pub use batching::{BatchPlanner, FixedMemoryProbe, MemoryProbe, SystemMemoryProbe};
pub use orchestrator::{ImportOrchestrator, RecordOutcome};
pub use run::{AbortReason, CancelFlag, ImportOptions, ImportRunResult, RunPhase};
