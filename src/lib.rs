// Sorting pipeline, checkpointing and output buckets
pub mod sorter;

// Domain to country lookups over HTTP
pub mod lookup;

pub mod constants;
pub mod utils;

// Re-export main types for convenience
pub use sorter::{sort_emails, SortStats, SorterConfig, SortingPipeline};
