// ---------------------------------------------------------------------------
// Durable key-value storage
// ---------------------------------------------------------------------------
//
// The filter store keeps its whole state under one key. Backends only move
// bytes; encoding lives in `persistence`.
// ---------------------------------------------------------------------------

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::FilterError;

pub trait FilterStorage {
	/// Bytes stored under `key`, or `None` if nothing was ever written.
	fn read(&self, key: &str) -> Result<Option<Vec<u8>>, FilterError>;

	/// Replace the bytes under `key`. Readers see either the old or the new
	/// value, never a mix.
	fn write(&mut self, key: &str, data: &[u8]) -> Result<(), FilterError>;

	fn remove(&mut self, key: &str) -> Result<(), FilterError>;
}

// ---------------------------------------------------------------------------
// MemoryStorage
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
	entries: HashMap<String, Vec<u8>>,
}

impl MemoryStorage {
	pub fn new() -> Self {
		Self::default()
	}

	/// Seed a key, e.g. with a blob written by an earlier session.
	pub fn with_entry(mut self, key: &str, data: impl Into<Vec<u8>>) -> Self {
		self.entries.insert(key.to_string(), data.into());
		self
	}
}

impl FilterStorage for MemoryStorage {
	fn read(&self, key: &str) -> Result<Option<Vec<u8>>, FilterError> {
		Ok(self.entries.get(key).cloned())
	}

	fn write(&mut self, key: &str, data: &[u8]) -> Result<(), FilterError> {
		self.entries.insert(key.to_string(), data.to_vec());
		Ok(())
	}

	fn remove(&mut self, key: &str) -> Result<(), FilterError> {
		self.entries.remove(key);
		Ok(())
	}
}

// ---------------------------------------------------------------------------
// FileStorage
// ---------------------------------------------------------------------------

/// One file per key (`<dir>/<key>.json`). Writes land in a sibling temp
/// file first and are renamed into place.
#[derive(Debug, Clone)]
pub struct FileStorage {
	dir: PathBuf,
}

impl FileStorage {
	pub fn new(dir: impl Into<PathBuf>) -> Self {
		Self { dir: dir.into() }
	}

	pub fn dir(&self) -> &Path {
		&self.dir
	}

	fn path_for(&self, key: &str) -> Result<PathBuf, FilterError> {
		let valid = !key.is_empty()
			&& key
				.chars()
				.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
			&& !key.starts_with('.');
		if !valid {
			return Err(FilterError::Storage(format!("Invalid storage key: {key:?}")));
		}
		Ok(self.dir.join(format!("{key}.json")))
	}
}

impl FilterStorage for FileStorage {
	fn read(&self, key: &str) -> Result<Option<Vec<u8>>, FilterError> {
		let path = self.path_for(key)?;
		match std::fs::read(&path) {
			Ok(bytes) => Ok(Some(bytes)),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
			Err(e) => Err(FilterError::Io(e)),
		}
	}

	fn write(&mut self, key: &str, data: &[u8]) -> Result<(), FilterError> {
		let path = self.path_for(key)?;
		std::fs::create_dir_all(&self.dir)?;
		let tmp = path.with_extension("json.tmp");
		std::fs::write(&tmp, data)?;
		std::fs::rename(&tmp, &path)?;
		Ok(())
	}

	fn remove(&mut self, key: &str) -> Result<(), FilterError> {
		let path = self.path_for(key)?;
		match std::fs::remove_file(&path) {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(FilterError::Io(e)),
		}
	}
}
