// Adapters for the application ports

pub mod file_source;
pub mod humanitix_client;
pub mod in_memory_store;
pub mod log_sink;

pub use file_source::FileEventSource;
pub use humanitix_client::HumanitixClient;
pub use in_memory_store::InMemoryStore;
pub use log_sink::{MemoryLogSink, TracingLogSink};
