//! Kodiak - storage core
//!
//! Ordered B+Tree index, append-only write-ahead log and a leveled write
//! buffer, coordinated by [`StorageEngine`].

pub mod config;
pub mod error;
pub mod storage;

use std::collections::BTreeMap;

pub use config::{EngineConfig, FractalConfig, WalConfig};
pub use error::{KodiakError, KodiakResult};
pub use storage::{MemoryCatalog, StorageEngine, TableCatalog};

/// A row: column name to text value
pub type Row = BTreeMap<String, String>;
