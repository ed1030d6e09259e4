//! Engine configuration

use crate::error::{KodiakError, KodiakResult};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Write-ahead log settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalConfig {
	/// Sync file data to the medium after every append (default: true)
	pub sync_on_write: bool,
}

impl Default for WalConfig {
	fn default() -> Self {
		Self {
			sync_on_write: true,
		}
	}
}

/// Buffered merge store settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FractalConfig {
	/// Number of levels, the last one is uncapped
	pub max_level: usize,
	/// Capacity of level 0
	pub level_threshold: usize,
	/// Capacity multiplier between consecutive levels
	pub level_fanout: usize,
}

impl Default for FractalConfig {
	fn default() -> Self {
		Self {
			max_level: 5,
			level_threshold: 10,
			level_fanout: 10,
		}
	}
}

/// Storage engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
	/// Directory holding the WAL
	pub data_dir: PathBuf,
	/// WAL file name inside `data_dir`
	pub wal_file: String,
	/// B+Tree order, a node splits once it holds `order` keys
	pub btree_order: usize,
	pub fractal: FractalConfig,
	pub wal: WalConfig,
}

impl Default for EngineConfig {
	fn default() -> Self {
		Self {
			data_dir: PathBuf::from("./data"),
			wal_file: "wal.log".to_string(),
			btree_order: 4,
			fractal: FractalConfig::default(),
			wal: WalConfig::default(),
		}
	}
}

impl EngineConfig {
	/// Default configuration rooted at `data_dir`.
	pub fn with_data_dir<P: AsRef<Path>>(data_dir: P) -> Self {
		Self {
			data_dir: data_dir.as_ref().to_path_buf(),
			..Self::default()
		}
	}

	/// Load configuration from a JSON file, falling back to defaults if it does not exist
	pub fn load<P: AsRef<Path>>(path: P) -> KodiakResult<Self> {
		match File::open(path) {
			Ok(mut file) => {
				let mut contents = String::new();
				file.read_to_string(&mut contents)?;

				let config: Self = serde_json::from_str(&contents)
					.map_err(|e| KodiakError::Config(format!("Failed to parse config: {}", e)))?;
				config.validate()?;
				Ok(config)
			}
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
			Err(e) => Err(KodiakError::Io(e)),
		}
	}

	/// Save configuration as pretty-printed JSON
	pub fn save<P: AsRef<Path>>(&self, path: P) -> KodiakResult<()> {
		let json = serde_json::to_string_pretty(self)
			.map_err(|e| KodiakError::Config(format!("Failed to serialize config: {}", e)))?;

		let mut file = OpenOptions::new()
			.create(true)
			.write(true)
			.truncate(true)
			.open(path)?;

		file.write_all(json.as_bytes())?;
		file.sync_all()?;

		Ok(())
	}

	/// Check every tunable is in range
	pub fn validate(&self) -> KodiakResult<()> {
		if self.btree_order < 3 {
			return Err(KodiakError::Config(format!(
				"btree_order must be at least 3, got {}",
				self.btree_order
			)));
		}
		if self.fractal.max_level < 1 {
			return Err(KodiakError::Config(
				"fractal.max_level must be at least 1".to_string(),
			));
		}
		if self.fractal.level_threshold < 1 {
			return Err(KodiakError::Config(
				"fractal.level_threshold must be at least 1".to_string(),
			));
		}
		if self.fractal.level_fanout < 1 {
			return Err(KodiakError::Config(
				"fractal.level_fanout must be at least 1".to_string(),
			));
		}
		if self.wal_file.is_empty() {
			return Err(KodiakError::Config("wal_file must not be empty".to_string()));
		}
		Ok(())
	}

	/// Location of the WAL file
	pub fn wal_path(&self) -> PathBuf {
		self.data_dir.join(&self.wal_file)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;
	use tempfile::tempdir;

	#[test]
	fn test_missing_file_yields_defaults() {
		let dir = tempdir().unwrap();
		let config = EngineConfig::load(dir.path().join("absent.json")).unwrap();
		assert_eq!(config, EngineConfig::default());
	}

	#[test]
	fn test_save_and_load() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("engine.json");

		let mut config = EngineConfig::with_data_dir(dir.path());
		config.btree_order = 7;
		config.fractal.level_threshold = 32;
		config.wal.sync_on_write = false;
		config.save(&path).unwrap();

		let loaded = EngineConfig::load(&path).unwrap();
		assert_eq!(loaded, config);
	}

	#[test]
	fn test_partial_file_fills_defaults() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("engine.json");
		std::fs::write(&path, r#"{ "btree_order": 5 }"#).unwrap();

		let loaded = EngineConfig::load(&path).unwrap();
		assert_eq!(loaded.btree_order, 5);
		assert_eq!(loaded.fractal, FractalConfig::default());
		assert_eq!(loaded.wal_file, "wal.log");
	}

	#[test]
	fn test_rejects_out_of_range_values() {
		let mut config = EngineConfig::default();
		config.btree_order = 2;
		assert!(matches!(config.validate(), Err(KodiakError::Config(_))));

		let mut config = EngineConfig::default();
		config.fractal.max_level = 0;
		assert!(config.validate().is_err());

		let mut config = EngineConfig::default();
		config.fractal.level_threshold = 0;
		assert!(config.validate().is_err());
	}

	#[test]
	fn test_rejects_zero_fanout_and_empty_wal_file() {
		let mut config = EngineConfig::default();
		config.fractal.level_fanout = 0;
		let err = config.validate().unwrap_err();
		assert!(err.to_string().contains("level_fanout"));

		let mut config = EngineConfig::default();
		config.wal_file = String::new();
		let err = config.validate().unwrap_err();
		assert!(matches!(err, KodiakError::Config(_)));
		assert!(err.to_string().contains("wal_file"));

		let mut config = EngineConfig::default();
		config.fractal.level_fanout = 1;
		assert!(config.validate().is_ok());
	}

	#[test]
	fn test_malformed_json() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("engine.json");
		std::fs::write(&path, "{ not json").unwrap();

		assert!(matches!(
			EngineConfig::load(&path),
			Err(KodiakError::Config(_))
		));
	}

	#[test]
	fn test_wal_path() {
		let config = EngineConfig::with_data_dir("/var/lib/kodiak");
		assert_eq!(config.wal_path(), PathBuf::from("/var/lib/kodiak/wal.log"));
	}
}
