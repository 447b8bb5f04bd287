// Per-record processing: shape inspection, mapping, series detection, and catalog resolution

pub mod catalog;
pub mod mapper;
pub mod schema;
pub mod series;

pub use mapper::{FieldMapper, MappingSuggester, MappingSuggestion};
pub use schema::SchemaAnalyzer;
pub use series::SeriesDetector;
