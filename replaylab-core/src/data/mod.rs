//! Bar Store Adapter contract and adapters

pub mod memory;
pub mod parquet;
pub mod quality;
pub mod store;
pub mod synthetic;

pub use memory::MemoryBarStore;
pub use parquet::ParquetBarStore;
pub use quality::{assess, DataQualityReport};
pub use store::{BarStore, StoreError, Timeframe};
pub use synthetic::SyntheticBarStore;
