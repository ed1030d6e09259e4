//! Table existence checks
//!
//! The engine does not own table definitions. Callers hand it anything that
//! can answer whether a table exists.

use parking_lot::RwLock;
use std::collections::{BTreeSet, HashSet};

pub trait TableCatalog {
	fn table_exists(&self, name: &str) -> bool;
}

impl TableCatalog for HashSet<String> {
	fn table_exists(&self, name: &str) -> bool {
		self.contains(name)
	}
}

impl TableCatalog for BTreeSet<String> {
	fn table_exists(&self, name: &str) -> bool {
		self.contains(name)
	}
}

impl<T: TableCatalog + ?Sized> TableCatalog for &T {
	fn table_exists(&self, name: &str) -> bool {
		(**self).table_exists(name)
	}
}

/// Thread-safe set of table names
#[derive(Debug, Default)]
pub struct MemoryCatalog {
	tables: RwLock<BTreeSet<String>>,
}

impl MemoryCatalog {
	pub fn new() -> Self {
		Self::default()
	}

	/// Register a table, returns false if it already existed
	pub fn create_table(&self, name: &str) -> bool {
		self.tables.write().insert(name.to_string())
	}

	/// Forget a table, returns false if it was unknown
	pub fn drop_table(&self, name: &str) -> bool {
		self.tables.write().remove(name)
	}

	pub fn list_tables(&self) -> Vec<String> {
		self.tables.read().iter().cloned().collect()
	}
}

impl TableCatalog for MemoryCatalog {
	fn table_exists(&self, name: &str) -> bool {
		self.tables.read().contains(name)
	}
}
