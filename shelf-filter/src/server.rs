// ---------------------------------------------------------------------------
// FilterServer: JSON-RPC dispatcher
// ---------------------------------------------------------------------------
//
// Routes JSON-RPC 2.0 requests (NDJSON over stdin) to the filter engine.
// Store methods go through `with_store` / `with_store_mut` and fail until
// `store/initialize` has run; catalog, predicate and facet methods are pure
// and work at any time.
// ---------------------------------------------------------------------------

use std::io::{self, BufRead};
use std::path::PathBuf;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::catalog::{CatalogCache, CatalogInput, RemoteMetadataSlot};
use crate::config::ServerConfig;
use crate::error::FilterError;
use crate::facets::{count_catalog, count_values};
use crate::predicate::{filter_items, filter_view, matches, MatchContext};
use crate::protocol::*;
use crate::storage::{FileStorage, FilterStorage, MemoryStorage};
use crate::store::{FilterChange, FilterSource, FilterStateStore, StoreConfig};
use crate::transport::NdjsonTransport;
use crate::types::{AncestorCollection, FilterSet, FilterValue, Item, OwnershipSet, RemoteField};

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

pub struct FilterServer {
	transport: NdjsonTransport,
	config: ServerConfig,
	store: Option<FilterStateStore>,
	metadata: RemoteMetadataSlot,
	catalog_cache: CatalogCache,
}

impl FilterServer {
	/// The store is opened lazily by `store/initialize`.
	pub fn new(transport: NdjsonTransport, config: ServerConfig) -> Self {
		Self {
			transport,
			config,
			store: None,
			metadata: RemoteMetadataSlot::new(),
			catalog_cache: CatalogCache::new(),
		}
	}

	/// Main loop: read JSON-RPC messages from stdin, dispatch to handlers.
	pub fn run(&mut self) -> Result<(), FilterError> {
		let stdin = io::stdin();
		let reader = stdin.lock();

		for line_result in reader.lines() {
			let line = line_result?;
			if line.trim().is_empty() {
				continue;
			}

			let request: JsonRpcRequest = match serde_json::from_str(&line) {
				Ok(r) => r,
				Err(e) => {
					tracing::error!("Failed to parse request: {}", e);
					continue;
				}
			};

			self.dispatch(request);
		}

		Ok(())
	}

	// ── Dispatch ──────────────────────────────────────────────────────────

	fn dispatch(&mut self, req: JsonRpcRequest) {
		let id = req.id;
		let result = match req.method.as_str() {
			// -- Lifecycle -----------------------------------------------
			"store/initialize" => self.handle_initialize(req.params),
			"store/setActiveCollection" => self.handle_set_active_collection(req.params),

			// -- Filters -------------------------------------------------
			"filters/get" => self.with_store(|s| handle_get(s, req.params)),
			"filters/set" => self.with_store_mut(|s| handle_set(s, req.params)),
			"filters/updateField" => self.with_store_mut(|s| handle_update_field(s, req.params)),
			"filters/clearField" => self.with_store_mut(|s| handle_clear_field(s, req.params)),
			"filters/clearAll" => self.with_store_mut(|s| handle_clear_all(s, req.params)),
			"filters/hasOwn" => self.with_store(|s| {
				let p: CollectionParams = parse_params(req.params)?;
				Ok(json!({ "hasFilters": s.has_own_filters(&p.collection_id) }))
			}),
			"filters/hasEffective" => self.with_store(|s| {
				let p: CollectionParams = parse_params(req.params)?;
				Ok(json!({ "hasFilters": s.has_effective_filters(&p.collection_id) }))
			}),
			"filters/activeCount" => self.with_store(|s| {
				let p: OptionalCollectionParams = parse_params(req.params)?;
				Ok(json!({ "count": s.active_filter_count(p.collection_id.as_deref()) }))
			}),
			"filters/collections" => self.with_store(|s| {
				Ok(json!({ "collections": s.collections() }))
			}),

			// -- Catalog -------------------------------------------------
			"catalog/build" => self.handle_catalog_build(req.params),
			"catalog/beginRemote" => self.handle_begin_remote(req.params),
			"catalog/applyRemote" => self.handle_apply_remote(req.params),

			// -- Items ---------------------------------------------------
			"items/matches" => self.handle_items_matches(req.params),
			"items/filter" => self.handle_items_filter(req.params),

			// -- Facets --------------------------------------------------
			"facets/count" => handle_facets_count(req.params),

			// -- Unknown -------------------------------------------------
			_ => {
				self.transport.write_error(
					id,
					METHOD_NOT_FOUND,
					format!("Unknown method: {}", req.method),
					None,
				);
				return;
			}
		};

		match result {
			Ok(value) => self.transport.write_response(id, value),
			Err(e) => {
				let code = match &e {
					FilterError::InvalidParams(_) => INVALID_PARAMS,
					_ => FILTER_ERROR,
				};
				self.transport
					.write_error(id, code, e.to_string(), Some(e.to_json_rpc_error()));
			}
		}
	}

	// ── Store accessors ───────────────────────────────────────────────────

	fn with_store<F>(&self, f: F) -> Result<Value, FilterError>
	where
		F: FnOnce(&FilterStateStore) -> Result<Value, FilterError>,
	{
		match &self.store {
			Some(s) => f(s),
			None => Err(FilterError::NotInitialized),
		}
	}

	fn with_store_mut<F>(&mut self, f: F) -> Result<Value, FilterError>
	where
		F: FnOnce(&mut FilterStateStore) -> Result<Value, FilterError>,
	{
		match &mut self.store {
			Some(s) => f(s),
			None => Err(FilterError::NotInitialized),
		}
	}

	// ── Lifecycle ─────────────────────────────────────────────────────────

	fn handle_initialize(&mut self, params: Value) -> Result<Value, FilterError> {
		let p: InitializeParams = parse_params(params)?;

		let storage_dir = p
			.storage_dir
			.map(PathBuf::from)
			.or_else(|| self.config.storage_dir.clone());
		let config = StoreConfig {
			storage_key: p
				.storage_key
				.filter(|key| !key.is_empty())
				.unwrap_or_else(|| self.config.store.storage_key.clone()),
			compress: p.compress.unwrap_or(self.config.store.compress),
		};

		let storage: Box<dyn FilterStorage> = match &storage_dir {
			Some(dir) => Box::new(FileStorage::new(dir)),
			None => Box::new(MemoryStorage::new()),
		};

		let mut store = FilterStateStore::open(storage, config);
		let transport = self.transport;
		store.subscribe(Box::new(move |change: &FilterChange| {
			transport.notify_filters_changed(change);
		}));

		let collections = store.collections().len();
		self.store = Some(store);
		self.metadata = RemoteMetadataSlot::new();
		self.catalog_cache.invalidate();

		tracing::info!(
			storage_dir = ?storage_dir,
			collections,
			"Filter engine initialized"
		);
		Ok(json!({ "collections": collections }))
	}

	fn handle_set_active_collection(&mut self, params: Value) -> Result<Value, FilterError> {
		let p: SetActiveCollectionParams = parse_params(params)?;
		let store = self.store.as_mut().ok_or(FilterError::NotInitialized)?;
		store.set_active_collection(p.collection_id.as_deref(), p.ancestor_chain);
		if let Some(collection_id) = store.active_collection() {
			self.metadata.begin(collection_id);
		}
		Ok(json!({}))
	}

	// ── Catalog ───────────────────────────────────────────────────────────

	fn handle_catalog_build(&mut self, params: Value) -> Result<Value, FilterError> {
		let p: CatalogBuildParams = parse_params(params)?;
		let ownership = p.context.ownership();

		// Without explicit metadata, fall back to the response held for the
		// active collection.
		let remote_metadata = match &p.remote_metadata {
			Some(fields) => Some(fields.as_slice()),
			None => match p.collection_id.as_deref() {
				Some(id) if self.metadata.active() == Some(id) => self.metadata.current(),
				_ => None,
			},
		};

		let input = CatalogInput {
			items: &p.items,
			remote_metadata,
			is_root: p.is_root,
			ancestors: &p.context.ancestor_collections,
			is_authenticated: p.is_authenticated,
			ownership: ownership.as_ref(),
		};
		let (fields, cached) = self.catalog_cache.get_or_build(&input);

		let mut result = json!({ "fields": fields, "cached": cached });
		if p.with_counts {
			let ctx = MatchContext::new(ownership.as_ref(), &p.context.ancestor_collections);
			result["counts"] = json!(count_catalog(&p.items, fields, &ctx));
		}
		Ok(result)
	}

	fn handle_begin_remote(&mut self, params: Value) -> Result<Value, FilterError> {
		let p: CollectionParams = parse_params(params)?;
		self.metadata.begin(&p.collection_id);
		Ok(json!({}))
	}

	fn handle_apply_remote(&mut self, params: Value) -> Result<Value, FilterError> {
		let p: ApplyRemoteParams = parse_params(params)?;
		let accepted = self.metadata.accept(&p.collection_id, p.fields);
		Ok(json!({ "accepted": accepted }))
	}

	// ── Items ─────────────────────────────────────────────────────────────

	/// Explicit filters win; otherwise the store's effective filters for
	/// `collectionId` apply.
	fn resolve_filters(
		&self,
		filters: Option<FilterSet>,
		collection_id: Option<&str>,
	) -> Result<FilterSet, FilterError> {
		match filters {
			Some(filters) => Ok(filters),
			None => {
				let store = self.store.as_ref().ok_or(FilterError::NotInitialized)?;
				Ok(store.get(collection_id))
			}
		}
	}

	fn handle_items_matches(&self, params: Value) -> Result<Value, FilterError> {
		let p: ItemMatchesParams = parse_params(params)?;
		let filters = self.resolve_filters(p.filters, p.collection_id.as_deref())?;
		let ownership = p.context.ownership();
		let ctx = MatchContext::new(ownership.as_ref(), &p.context.ancestor_collections);
		Ok(json!({ "matches": matches(&p.item, &filters, &ctx) }))
	}

	fn handle_items_filter(&self, params: Value) -> Result<Value, FilterError> {
		let p: ItemsFilterParams = parse_params(params)?;
		let ownership = p.context.ownership();
		let ctx = MatchContext::new(ownership.as_ref(), &p.context.ancestor_collections);

		let visible = match (p.filters, &self.store) {
			(Some(filters), _) => filter_items(&p.items, &filters, &ctx),
			(None, Some(store)) => filter_view(store, p.collection_id.as_deref(), &p.items, &ctx),
			(None, None) => return Err(FilterError::NotInitialized),
		};
		let count = visible.len();
		Ok(json!({ "count": count, "items": visible }))
	}
}

// ---------------------------------------------------------------------------
// Param types
// ---------------------------------------------------------------------------

fn parse_params<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, FilterError> {
	let params = if params.is_null() { json!({}) } else { params };
	serde_json::from_value(params).map_err(|e| FilterError::InvalidParams(e.to_string()))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitializeParams {
	storage_dir: Option<String>,
	storage_key: Option<String>,
	compress: Option<bool>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CollectionParams {
	collection_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OptionalCollectionParams {
	collection_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetActiveCollectionParams {
	collection_id: Option<String>,
	#[serde(default)]
	ancestor_chain: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetParams {
	collection_id: Option<String>,
	#[serde(default = "default_true")]
	include_inherited: bool,
}

fn default_true() -> bool {
	true
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetParams {
	collection_id: String,
	#[serde(default)]
	filters: FilterSet,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateFieldParams {
	collection_id: String,
	field: String,
	#[serde(default)]
	values: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FieldParams {
	collection_id: String,
	field: String,
}

/// Evaluation context shared by the item, facet and catalog methods.
#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ContextParams {
	/// IDs the user owns. Absent means no ownership information.
	owned_ids: Option<Vec<String>>,
	#[serde(default)]
	ancestor_collections: Vec<AncestorCollection>,
}

impl ContextParams {
	fn ownership(&self) -> Option<OwnershipSet> {
		self.owned_ids.as_ref().map(|ids| ids.iter().cloned().collect())
	}
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogBuildParams {
	#[serde(default)]
	items: Vec<Item>,
	collection_id: Option<String>,
	remote_metadata: Option<Vec<RemoteField>>,
	#[serde(default)]
	is_root: bool,
	#[serde(default)]
	is_authenticated: bool,
	#[serde(default)]
	with_counts: bool,
	#[serde(flatten)]
	context: ContextParams,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApplyRemoteParams {
	collection_id: String,
	#[serde(default)]
	fields: Vec<RemoteField>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemMatchesParams {
	item: Item,
	filters: Option<FilterSet>,
	collection_id: Option<String>,
	#[serde(flatten)]
	context: ContextParams,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemsFilterParams {
	#[serde(default)]
	items: Vec<Item>,
	filters: Option<FilterSet>,
	collection_id: Option<String>,
	#[serde(flatten)]
	context: ContextParams,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FacetsCountParams {
	#[serde(default)]
	items: Vec<Item>,
	field: Option<String>,
	fields: Option<Vec<String>>,
	#[serde(flatten)]
	context: ContextParams,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

fn handle_get(store: &FilterStateStore, params: Value) -> Result<Value, FilterError> {
	let p: GetParams = parse_params(params)?;
	let filters = store.get_filters(p.collection_id.as_deref(), p.include_inherited);
	Ok(json!({ "filters": filters }))
}

fn handle_set(store: &mut FilterStateStore, params: Value) -> Result<Value, FilterError> {
	let p: SetParams = parse_params(params)?;
	store.set_filters(&p.collection_id, p.filters)?;
	Ok(json!({}))
}

fn handle_update_field(store: &mut FilterStateStore, params: Value) -> Result<Value, FilterError> {
	let p: UpdateFieldParams = parse_params(params)?;
	let value: Option<FilterValue> = FilterValue::from_json(&p.field, &p.values);
	store.update_field(&p.collection_id, &p.field, value)?;
	Ok(json!({}))
}

fn handle_clear_field(store: &mut FilterStateStore, params: Value) -> Result<Value, FilterError> {
	let p: FieldParams = parse_params(params)?;
	store.clear_field(&p.collection_id, &p.field)?;
	Ok(json!({}))
}

fn handle_clear_all(store: &mut FilterStateStore, params: Value) -> Result<Value, FilterError> {
	let p: CollectionParams = parse_params(params)?;
	store.clear_all_for_collection(&p.collection_id)?;
	Ok(json!({}))
}

fn handle_facets_count(params: Value) -> Result<Value, FilterError> {
	let p: FacetsCountParams = parse_params(params)?;
	let ownership = p.context.ownership();
	let ctx = MatchContext::new(ownership.as_ref(), &p.context.ancestor_collections);

	match (p.field, p.fields) {
		(Some(field), _) => Ok(json!({ "counts": count_values(&p.items, &field, &ctx) })),
		(None, Some(fields)) => {
			let facets: serde_json::Map<String, Value> = fields
				.into_iter()
				.map(|field| {
					let counts = count_values(&p.items, &field, &ctx);
					(field, json!(counts))
				})
				.collect();
			Ok(json!({ "facets": facets }))
		}
		(None, None) => Err(FilterError::InvalidParams(
			"facets/count requires `field` or `fields`".into(),
		)),
	}
}
