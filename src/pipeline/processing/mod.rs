// Pipeline processing: reconciliation, normalization, reference joins and features

pub mod conflation;
pub mod features;
pub mod geo_join;
pub mod normalize;

pub use conflation::{DedupOutcome, DedupStats, Deduplicator};
pub use features::{FeatureBuilder, FeatureMatrix};
pub use geo_join::{GeoJoiner, JoinStats};
pub use normalize::{NormalizeStats, Normalizer};
