pub mod app;
pub mod common;
pub mod config;
pub mod domain;
pub mod infra;
pub mod observability;
pub mod pipeline;

pub use common::error::{ImportError, Result};
pub use config::Config;
pub use pipeline::{ImportOptions, ImportOrchestrator, ImportRunResult};
