// ---------------------------------------------------------------------------
// Filter blob codec + Gzip compression
// ---------------------------------------------------------------------------
//
// The whole filter store is one JSON object:
//
//   { "<collectionId>": { "<fieldPath>": ["v1", "v2"], "_text_search": "q" } }
//
// optionally gzip-compressed. Reads auto-detect gzip by its magic bytes.
// Decoding never fails: unreadable blobs become an empty store and are
// logged, malformed entries inside an otherwise valid blob are skipped.
// ---------------------------------------------------------------------------

use std::collections::BTreeMap;
use std::io::Read;

use flate2::read::{GzDecoder, GzEncoder};
use flate2::Compression;
use serde_json::Value;

use crate::error::FilterError;
use crate::storage::FilterStorage;
use crate::types::{FilterSet, FilterStoreData};

// ---------------------------------------------------------------------------
// Gzip compress / decompress
// ---------------------------------------------------------------------------

/// Gzip-compress a byte slice (level 6).
pub fn compress(data: &[u8]) -> Result<Vec<u8>, FilterError> {
	let mut encoder = GzEncoder::new(data, Compression::new(6));
	let mut compressed = Vec::new();
	encoder.read_to_end(&mut compressed)?;
	Ok(compressed)
}

/// Gunzip-decompress a byte slice.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, FilterError> {
	let mut decoder = GzDecoder::new(data);
	let mut decompressed = Vec::new();
	decoder.read_to_end(&mut decompressed)?;
	Ok(decompressed)
}

/// Check if data starts with gzip magic bytes (0x1f, 0x8b).
pub fn is_gzipped(data: &[u8]) -> bool {
	data.len() >= 2 && data[0] == 0x1f && data[1] == 0x8b
}

// ---------------------------------------------------------------------------
// Encode / decode
// ---------------------------------------------------------------------------

pub fn encode_store(data: &FilterStoreData, compressed: bool) -> Result<Vec<u8>, FilterError> {
	let json = serde_json::to_vec(data)
		.map_err(|e| FilterError::Serialization(format!("Failed to encode filters: {}", e)))?;
	if compressed {
		compress(&json)
	} else {
		Ok(json)
	}
}

/// Decode a stored blob. Any failure yields an empty store.
pub fn decode_store(bytes: &[u8]) -> FilterStoreData {
	match try_decode(bytes) {
		Ok(data) => data,
		Err(reason) => {
			tracing::warn!(%reason, "Discarding unreadable filter store");
			FilterStoreData::new()
		}
	}
}

fn try_decode(bytes: &[u8]) -> Result<FilterStoreData, String> {
	let json_bytes = if is_gzipped(bytes) {
		decompress(bytes).map_err(|e| format!("Invalid gzip data: {}", e))?
	} else {
		bytes.to_vec()
	};

	let root: Value = serde_json::from_slice(&json_bytes)
		.map_err(|e| format!("Invalid filter JSON: {}", e))?;
	let Value::Object(collections) = root else {
		return Err("Filter store is not a JSON object".to_string());
	};

	let mut data = FilterStoreData::new();
	let mut skipped = 0usize;
	for (collection_id, entry) in collections {
		let Value::Object(fields) = entry else {
			skipped += 1;
			continue;
		};
		let filters = FilterSet::from(fields.into_iter().collect::<BTreeMap<_, _>>());
		if !collection_id.is_empty() && !filters.is_empty() {
			data.insert(collection_id, filters);
		}
	}
	if skipped > 0 {
		tracing::warn!(skipped, "Skipped malformed collection entries in filter store");
	}
	Ok(data)
}

// ---------------------------------------------------------------------------
// Storage I/O
// ---------------------------------------------------------------------------

/// Load the store under `key`. Missing, unreadable or corrupt data all
/// yield an empty store.
pub fn load(storage: &dyn FilterStorage, key: &str) -> FilterStoreData {
	match storage.read(key) {
		Ok(Some(bytes)) => decode_store(&bytes),
		Ok(None) => FilterStoreData::new(),
		Err(e) => {
			tracing::warn!(key, error = %e, "Failed to read filter store; starting empty");
			FilterStoreData::new()
		}
	}
}

/// Encode and write the whole store under `key`.
pub fn save(
	storage: &mut dyn FilterStorage,
	key: &str,
	data: &FilterStoreData,
	compressed: bool,
) -> Result<(), FilterError> {
	let bytes = encode_store(data, compressed)?;
	storage.write(key, &bytes)
}
