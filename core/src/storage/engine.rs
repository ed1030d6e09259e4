//! Main storage engine coordinating all components

use crate::Row;
use crate::config::EngineConfig;
use crate::error::{KodiakError, KodiakResult};
use crate::storage::{BPlusTree, FractalTree, TableCatalog, WalRecord, WriteAheadLog};
use parking_lot::RwLock;
use std::path::Path;

/// Index and write buffer, always mutated together
struct EngineState {
    index: BPlusTree,
    buffer: FractalTree,
}

/// Point-in-time view of engine sizes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStats {
    pub indexed_entries: usize,
    pub tree_height: usize,
    pub tree_nodes: usize,
    pub buffer_levels: Vec<usize>,
    pub buffer_merges: u64,
}

/// Outcome of reapplying the WAL
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub applied: usize,
    pub skipped: usize,
}

/// Main storage engine
///
/// One instance per data directory. Mutations hold the write lock for the
/// WAL append, the index insert and the buffer insert, so the log record is
/// durable before the row becomes visible to readers.
pub struct StorageEngine {
    wal: WriteAheadLog,
    state: RwLock<EngineState>,
    config: EngineConfig,
}

impl StorageEngine {
    /// Open an engine over `config.data_dir` with an empty index
    pub fn open(config: EngineConfig) -> KodiakResult<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.data_dir)?;

        let wal = WriteAheadLog::open(config.wal_path(), config.wal.sync_on_write)?;
        let index = BPlusTree::new(config.btree_order)?;
        let buffer = FractalTree::from_config(&config.fractal)?;

        tracing::info!(
            "Storage engine opened at {} (order {}, {} buffer levels)",
            config.data_dir.display(),
            config.btree_order,
            config.fractal.max_level
        );

        Ok(Self {
            wal,
            state: RwLock::new(EngineState { index, buffer }),
            config,
        })
    }

    /// Open and immediately rebuild the in-memory state from the WAL
    pub fn open_and_replay(config: EngineConfig) -> KodiakResult<(Self, ReplaySummary)> {
        let engine = Self::open(config)?;
        let summary = engine.replay()?;
        Ok((engine, summary))
    }

    /// Log and insert a row under `key`
    pub fn insert_row<C: TableCatalog + ?Sized>(
        &self,
        catalog: &C,
        table: &str,
        key: i64,
        row: Row,
    ) -> KodiakResult<()> {
        let mut state = self.state.write();

        if !catalog.table_exists(table) {
            return Err(KodiakError::TableNotFound(table.to_string()));
        }

        // Nothing below runs unless the record reached the log
        let record = WalRecord::insert(table, key, &row).encode()?;
        self.wal.append(&record)?;

        state.index.insert(key, row.clone());
        state.buffer.insert(row);

        Ok(())
    }

    /// Copy of the row stored under `key`
    pub fn lookup(&self, key: i64) -> Option<Row> {
        self.state.read().index.search(key).cloned()
    }

    /// Rows with `start <= key <= end` in key order
    pub fn range(&self, start: i64, end: i64) -> Vec<(i64, Row)> {
        self.state
            .read()
            .index
            .range(start, end)
            .into_iter()
            .map(|(key, row)| (key, row.clone()))
            .collect()
    }

    /// Contents of the write buffer in level order
    pub fn buffered_rows(&self) -> Vec<Row> {
        self.state.read().buffer.get_all_rows()
    }

    /// Logged operations in the order they were written
    pub fn recover(&self) -> KodiakResult<Vec<String>> {
        let _state = self.state.read();
        self.wal.recover()
    }

    /// Reapply every logged insert to the index and buffer without logging
    /// it again. Only valid while both are empty.
    pub fn replay(&self) -> KodiakResult<ReplaySummary> {
        let mut state = self.state.write();

        if !state.index.is_empty() || !state.buffer.is_empty() {
            return Err(KodiakError::Storage(
                "WAL replay requires an empty engine".into(),
            ));
        }

        let mut summary = ReplaySummary::default();
        for (line_no, line) in self.wal.recover()?.iter().enumerate() {
            // Left behind when an append failed before its newline
            if line.is_empty() {
                continue;
            }
            match line.parse::<WalRecord>() {
                Ok(WalRecord::Insert { key, row, .. }) => {
                    state.index.insert(key, row.clone());
                    state.buffer.insert(row);
                    summary.applied += 1;
                }
                Err(e) => {
                    tracing::warn!("Skipping WAL line {}: {}", line_no + 1, e);
                    summary.skipped += 1;
                }
            }
        }

        tracing::info!(
            "WAL replay complete: {} applied, {} skipped",
            summary.applied,
            summary.skipped
        );
        Ok(summary)
    }

    pub fn stats(&self) -> EngineStats {
        let state = self.state.read();
        EngineStats {
            indexed_entries: state.index.len(),
            tree_height: state.index.height(),
            tree_nodes: state.index.node_count(),
            buffer_levels: state.buffer.level_lens(),
            buffer_merges: state.buffer.merges(),
        }
    }

    /// Structural check of the index
    pub fn verify_index(&self) -> KodiakResult<()> {
        self.state.read().index.check_invariants()
    }

    pub fn wal_path(&self) -> &Path {
        self.wal.path()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}
