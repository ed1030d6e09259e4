//! Write-Ahead Logging implementation
//!
//! The log is a plain text file, one newline-terminated record per mutating
//! operation. Records are appended and never rewritten.

use crate::Row;
use crate::error::{KodiakError, KodiakResult};
use parking_lot::Mutex;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

const INSERT_PREFIX: &str = "INSERT INTO ";
const KEY_MARKER: &str = " KEY ";
const ROW_MARKER: &str = " ROW ";

/// A decoded WAL line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalRecord {
	Insert { table: String, key: i64, row: Row },
}

impl WalRecord {
	pub fn insert(table: &str, key: i64, row: &Row) -> Self {
		WalRecord::Insert {
			table: table.to_string(),
			key,
			row: row.clone(),
		}
	}

	/// Encode as a single log line (without the trailing newline)
	pub fn encode(&self) -> KodiakResult<String> {
		let table = self.table();
		if table.is_empty() || table.chars().any(char::is_whitespace) {
			return Err(KodiakError::InvalidInput(format!(
				"Table name '{}' cannot be logged",
				table
			)));
		}
		Ok(self.to_string())
	}

	/// Short human-readable description, not decodable
	pub fn summary(&self) -> String {
		match self {
			WalRecord::Insert { table, key, row } => {
				format!("INSERT INTO {} (key {}, {} columns)", table, key, row.len())
			}
		}
	}

	pub fn table(&self) -> &str {
		match self {
			WalRecord::Insert { table, .. } => table,
		}
	}
}

impl fmt::Display for WalRecord {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			WalRecord::Insert { table, key, row } => {
				let row_json = serde_json::to_string(row).map_err(|_| fmt::Error)?;
				write!(
					f,
					"{}{}{}{}{}{}",
					INSERT_PREFIX, table, KEY_MARKER, key, ROW_MARKER, row_json
				)
			}
		}
	}
}

impl FromStr for WalRecord {
	type Err = KodiakError;

	fn from_str(line: &str) -> Result<Self, Self::Err> {
		let rest = line
			.strip_prefix(INSERT_PREFIX)
			.ok_or_else(|| KodiakError::Wal(format!("Unknown WAL record: {}", line)))?;

		let (table, rest) = rest
			.split_once(KEY_MARKER)
			.ok_or_else(|| KodiakError::Wal(format!("Missing key in WAL record: {}", line)))?;

		let (key, row_json) = rest
			.split_once(ROW_MARKER)
			.ok_or_else(|| KodiakError::Wal(format!("Missing row in WAL record: {}", line)))?;

		let key = key
			.parse::<i64>()
			.map_err(|e| KodiakError::Wal(format!("Invalid key '{}': {}", key, e)))?;

		let row: Row = serde_json::from_str(row_json)
			.map_err(|e| KodiakError::Wal(format!("Invalid row payload: {}", e)))?;

		Ok(WalRecord::Insert {
			table: table.to_string(),
			key,
			row,
		})
	}
}

struct LogFile {
	file: File,
	/// A previous write may have left a partial line at the end
	needs_terminator: bool,
}

/// Append-only durability log
pub struct WriteAheadLog {
	path: PathBuf,
	file: Mutex<LogFile>,
	sync_on_write: bool,
}

impl WriteAheadLog {
	/// Open (or create) the log at `path` in append mode
	pub fn open<P: AsRef<Path>>(path: P, sync_on_write: bool) -> KodiakResult<Self> {
		let path = path.as_ref().to_path_buf();

		if let Some(parent) = path.parent() {
			if !parent.as_os_str().is_empty() {
				std::fs::create_dir_all(parent)?;
			}
		}

		let mut file = OpenOptions::new()
			.create(true)
			.read(true)
			.append(true)
			.open(&path)?;

		// Terminate a torn final record so later appends start on their own line
		if Self::has_torn_tail(&mut file)? {
			tracing::warn!("WAL {} ends in an unterminated record, sealing it", path.display());
			file.write_all(b"\n")?;
			file.flush()?;
			file.sync_data()?;
		}
		tracing::debug!("Opened WAL at {}", path.display());

		Ok(Self {
			path,
			file: Mutex::new(LogFile {
				file,
				needs_terminator: false,
			}),
			sync_on_write,
		})
	}

	fn has_torn_tail(file: &mut File) -> KodiakResult<bool> {
		let metadata = file.metadata()?;
		if !metadata.is_file() || metadata.len() == 0 {
			return Ok(false);
		}

		let mut last = [0u8; 1];
		file.seek(SeekFrom::End(-1))?;
		file.read_exact(&mut last)?;
		Ok(last[0] != b'\n')
	}

	/// Append one record; it is on the medium when this returns Ok
	pub fn append(&self, record: &str) -> KodiakResult<()> {
		let mut line = String::with_capacity(record.len() + 1);
		line.push_str(record);
		line.push('\n');

		let mut log = self.file.lock();
		if log.needs_terminator {
			log.file.write_all(b"\n")?;
			log.needs_terminator = false;
		}

		let written = match log.file.write_all(line.as_bytes()) {
			Ok(()) => log.file.flush(),
			Err(e) => Err(e),
		};
		if let Err(e) = written {
			log.needs_terminator = true;
			return Err(KodiakError::Io(e));
		}
		if self.sync_on_write {
			log.file.sync_data()?;
		}

		Ok(())
	}

	/// Read every record from the start of the file, in file order
	pub fn recover(&self) -> KodiakResult<Vec<String>> {
		Self::read_records(&self.path)
	}

	/// Read the records of the log at `path` without opening it for writing
	pub fn read_records<P: AsRef<Path>>(path: P) -> KodiakResult<Vec<String>> {
		let file = match File::open(path.as_ref()) {
			Ok(file) => file,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
			Err(e) => return Err(KodiakError::Io(e)),
		};

		let mut records = Vec::new();
		for line in BufReader::new(file).lines() {
			records.push(line?.trim_end().to_string());
		}

		Ok(records)
	}

	/// Force buffered data to the medium
	pub fn sync(&self) -> KodiakResult<()> {
		self.file.lock().file.sync_all()?;
		Ok(())
	}

	pub fn path(&self) -> &Path {
		&self.path
	}
}
