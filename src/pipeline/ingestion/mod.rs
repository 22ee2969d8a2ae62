// Pipeline ingestion: reading the panel file and selecting model columns

pub mod loader;
pub mod selector;

// Re-export key types and functions for external use
pub use loader::{load_csv, parse_csv, LoadedFrame};
pub use selector::ColumnSelector;
