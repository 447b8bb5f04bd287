// Catalog stage: matching mapped events and their related entities against local records

pub mod duplicate;
pub mod related;

pub use duplicate::DuplicateResolver;
pub use related::{EntityCache, RelatedEntityResolver, RelatedRecord, Resolved};
