//! Storage engine: ordered index, write-ahead log and buffered merge store

pub mod btree;
pub mod catalog;
pub mod engine;
pub mod fractal;
pub mod wal;

// Re-export core types
pub use btree::{BPlusTree, LeafIter, Node, NodeId};
pub use catalog::{MemoryCatalog, TableCatalog};
pub use engine::{EngineStats, ReplaySummary, StorageEngine};
pub use fractal::FractalTree;
pub use wal::{WalRecord, WriteAheadLog};
