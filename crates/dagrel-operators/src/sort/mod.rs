//! Sorting: bucket sort (in memory or external with spilled runs), bounded
//! top-K, and the range partitioner that spreads a total order over buckets.

pub mod external;
pub mod range;
pub mod run;

pub use external::{top_k, ExternalSort};
pub use range::RangePartitioner;
