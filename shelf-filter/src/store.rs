// ---------------------------------------------------------------------------
// FilterStateStore: persisted, hierarchy-aware filter selections
// ---------------------------------------------------------------------------
//
// Owns every collection's own FilterSet. Reads can inherit down the active
// ancestor chain: ancestors merge outermost first, each field replacing the
// same field from an earlier ancestor, and the collection's own filters win
// last.
//
// Every mutation is one read-modify-write of the whole store: the next state
// is built aside, written to storage, and only then swapped in, so a failed
// write leaves the store exactly as it was.
// ---------------------------------------------------------------------------

use uuid::Uuid;

use crate::error::FilterError;
use crate::persistence;
use crate::storage::{FilterStorage, MemoryStorage};
use crate::types::{FilterSet, FilterStoreData, FilterValue};

pub const DEFAULT_STORAGE_KEY: &str = "collectionFilters";

pub type SubscriptionId = Uuid;
pub type Listener = Box<dyn FnMut(&FilterChange)>;

/// Sent to subscribers after a committed mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterChange {
	pub collection_id: String,
	/// The collection's own filters after the change (empty when cleared).
	pub filters: FilterSet,
}

// ---------------------------------------------------------------------------
// FilterSource
// ---------------------------------------------------------------------------

/// The small interface consumers need from a filter store.
pub trait FilterSource {
	/// Effective filters for a collection, inheritance included.
	fn get(&self, collection_id: Option<&str>) -> FilterSet;

	/// Replace a collection's own filters.
	fn set(&mut self, collection_id: &str, filters: FilterSet) -> Result<(), FilterError>;

	fn subscribe(&mut self, listener: Listener) -> SubscriptionId;

	fn unsubscribe(&mut self, id: SubscriptionId) -> bool;
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct StoreConfig {
	/// Key the whole store is written under.
	pub storage_key: String,
	/// Gzip the blob on write.
	pub compress: bool,
}

impl Default for StoreConfig {
	fn default() -> Self {
		Self {
			storage_key: DEFAULT_STORAGE_KEY.to_string(),
			compress: false,
		}
	}
}

// ---------------------------------------------------------------------------
// FilterStateStore
// ---------------------------------------------------------------------------

pub struct FilterStateStore {
	storage: Box<dyn FilterStorage>,
	config: StoreConfig,
	filters: FilterStoreData,
	active_collection: Option<String>,
	ancestor_chain: Vec<String>,
	listeners: Vec<(SubscriptionId, Listener)>,
}

impl FilterStateStore {
	// -- Lifecycle -----------------------------------------------------------

	/// Load the persisted store from `storage`. Corrupt data starts empty.
	pub fn open(storage: Box<dyn FilterStorage>, config: StoreConfig) -> Self {
		let filters = persistence::load(storage.as_ref(), &config.storage_key);
		tracing::info!(
			key = %config.storage_key,
			collections = filters.len(),
			"Filter store loaded"
		);
		Self {
			storage,
			config,
			filters,
			active_collection: None,
			ancestor_chain: Vec::new(),
			listeners: Vec::new(),
		}
	}

	/// A store backed by process memory only.
	pub fn in_memory() -> Self {
		Self::open(Box::new(MemoryStorage::new()), StoreConfig::default())
	}

	// -- Navigation ----------------------------------------------------------

	/// Record the collection being viewed and its ancestors, outermost
	/// first. Stored filters are untouched.
	pub fn set_active_collection(&mut self, collection_id: Option<&str>, ancestor_chain: Vec<String>) {
		self.active_collection = collection_id
			.filter(|id| !id.is_empty())
			.map(str::to_string);
		self.ancestor_chain = ancestor_chain;
		tracing::debug!(
			active = ?self.active_collection,
			depth = self.ancestor_chain.len(),
			"Active collection changed"
		);
	}

	pub fn active_collection(&self) -> Option<&str> {
		self.active_collection.as_deref()
	}

	pub fn ancestor_chain(&self) -> &[String] {
		&self.ancestor_chain
	}

	// -- Reads ---------------------------------------------------------------

	/// Filters for `collection_id`. With `include_inherited`, ancestors of the
	/// active chain are merged first. A missing id yields an empty set.
	pub fn get_filters(&self, collection_id: Option<&str>, include_inherited: bool) -> FilterSet {
		let Some(id) = collection_id.filter(|id| !id.is_empty()) else {
			return FilterSet::new();
		};

		let mut result = FilterSet::new();
		if include_inherited {
			for ancestor in &self.ancestor_chain {
				if let Some(own) = self.filters.get(ancestor) {
					result.overlay(own);
				}
			}
		}
		if let Some(own) = self.filters.get(id) {
			result.overlay(own);
		}
		result
	}

	pub fn has_own_filters(&self, collection_id: &str) -> bool {
		self.filters
			.get(collection_id)
			.is_some_and(|own| !own.is_empty())
	}

	pub fn has_effective_filters(&self, collection_id: &str) -> bool {
		!self.get_filters(Some(collection_id), true).is_empty()
	}

	/// Number of selected values in the effective filters, for badges.
	pub fn active_filter_count(&self, collection_id: Option<&str>) -> usize {
		self.get_filters(collection_id, true).selection_count()
	}

	/// Ids of every collection that has its own filters.
	pub fn collections(&self) -> Vec<&str> {
		self.filters.keys().map(String::as_str).collect()
	}

	// -- Mutations -----------------------------------------------------------

	/// Replace a collection's own filters.
	pub fn set_filters(&mut self, collection_id: &str, filters: FilterSet) -> Result<(), FilterError> {
		if collection_id.is_empty() {
			return Ok(());
		}
		let mut next = self.filters.clone();
		if filters.is_empty() {
			next.remove(collection_id);
		} else {
			next.insert(collection_id.to_string(), filters);
		}
		self.commit(collection_id, next)
	}

	/// Set one field, or delete it when `value` is absent or empty.
	pub fn update_field(
		&mut self,
		collection_id: &str,
		field: &str,
		value: Option<FilterValue>,
	) -> Result<(), FilterError> {
		if collection_id.is_empty() || field.is_empty() {
			return Ok(());
		}
		let mut next = self.filters.clone();
		let mut own = next.remove(collection_id).unwrap_or_default();
		match value {
			Some(value) => {
				own.insert(field, value);
			}
			None => {
				own.remove(field);
			}
		}
		if !own.is_empty() {
			next.insert(collection_id.to_string(), own);
		}
		self.commit(collection_id, next)
	}

	pub fn clear_field(&mut self, collection_id: &str, field: &str) -> Result<(), FilterError> {
		self.update_field(collection_id, field, None)
	}

	/// Drop the collection's entry entirely.
	pub fn clear_all_for_collection(&mut self, collection_id: &str) -> Result<(), FilterError> {
		if collection_id.is_empty() {
			return Ok(());
		}
		let mut next = self.filters.clone();
		next.remove(collection_id);
		self.commit(collection_id, next)
	}

	/// Persist `next`, then make it current and notify subscribers.
	fn commit(&mut self, collection_id: &str, next: FilterStoreData) -> Result<(), FilterError> {
		if let Err(e) = persistence::save(
			self.storage.as_mut(),
			&self.config.storage_key,
			&next,
			self.config.compress,
		) {
			tracing::error!(collection_id, error = %e, "Failed to persist filters");
			return Err(e);
		}
		self.filters = next;

		let change = FilterChange {
			collection_id: collection_id.to_string(),
			filters: self.filters.get(collection_id).cloned().unwrap_or_default(),
		};
		tracing::debug!(
			collection_id,
			fields = change.filters.len(),
			"Filters updated"
		);
		for (_, listener) in self.listeners.iter_mut() {
			listener(&change);
		}
		Ok(())
	}
}

impl FilterSource for FilterStateStore {
	fn get(&self, collection_id: Option<&str>) -> FilterSet {
		self.get_filters(collection_id, true)
	}

	fn set(&mut self, collection_id: &str, filters: FilterSet) -> Result<(), FilterError> {
		self.set_filters(collection_id, filters)
	}

	fn subscribe(&mut self, listener: Listener) -> SubscriptionId {
		let id = Uuid::new_v4();
		self.listeners.push((id, listener));
		id
	}

	fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
		let before = self.listeners.len();
		self.listeners.retain(|(existing, _)| *existing != id);
		self.listeners.len() != before
	}
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
