//! Buffered merge store ("fractal tree")
//!
//! Rows land unsorted in level 0. Once a level is full its whole contents
//! move to the next level, cascading while the next level is full too. The
//! last level is uncapped.

use crate::Row;
use crate::config::FractalConfig;
use crate::error::{KodiakError, KodiakResult};

/// Leveled write buffer
#[derive(Debug, Clone)]
pub struct FractalTree {
    levels: Vec<Vec<Row>>,
    level_threshold: usize,
    level_fanout: usize,
    merges: u64,
}

impl FractalTree {
    /// Create `max_level` empty levels
    pub fn new(max_level: usize, level_threshold: usize, level_fanout: usize) -> KodiakResult<Self> {
        if max_level < 1 {
            return Err(KodiakError::InvalidInput(
                "Fractal tree needs at least one level".to_string(),
            ));
        }
        if level_threshold < 1 || level_fanout < 1 {
            return Err(KodiakError::InvalidInput(format!(
                "Invalid level threshold {} / fanout {}",
                level_threshold, level_fanout
            )));
        }

        Ok(Self {
            levels: vec![Vec::new(); max_level],
            level_threshold,
            level_fanout,
            merges: 0,
        })
    }

    pub fn from_config(config: &FractalConfig) -> KodiakResult<Self> {
        Self::new(config.max_level, config.level_threshold, config.level_fanout)
    }

    pub fn max_level(&self) -> usize {
        self.levels.len()
    }

    /// Rows level `level` may hold before it is merged down
    pub fn level_capacity(&self, level: usize) -> usize {
        let growth = u32::try_from(level)
            .ok()
            .and_then(|exp| self.level_fanout.checked_pow(exp))
            .unwrap_or(usize::MAX);
        self.level_threshold.saturating_mul(growth)
    }

    pub fn insert(&mut self, row: Row) {
        self.levels[0].push(row);
        self.cascade();
    }

    fn cascade(&mut self) {
        let last = self.levels.len() - 1;
        let mut level = 0;

        while level < last && self.levels[level].len() >= self.level_capacity(level) {
            let moved = std::mem::take(&mut self.levels[level]);
            tracing::debug!(
                "Merging {} rows from level {} into level {}",
                moved.len(),
                level,
                level + 1
            );
            self.levels[level + 1].extend(moved);
            self.merges += 1;
            level += 1;
        }
    }

    /// Every buffered row in level order, neither sorted nor deduplicated
    pub fn get_all_rows(&self) -> Vec<Row> {
        self.levels.iter().flatten().cloned().collect()
    }

    pub fn level(&self, level: usize) -> &[Row] {
        self.levels.get(level).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn level_lens(&self) -> Vec<usize> {
        self.levels.iter().map(Vec::len).collect()
    }

    pub fn len(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.iter().all(Vec::is_empty)
    }

    /// Cascade merge steps performed so far
    pub fn merges(&self) -> u64 {
        self.merges
    }
}
