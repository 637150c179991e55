// ---------------------------------------------------------------------------
// Field catalog
// ---------------------------------------------------------------------------
//
// Builds the ordered list of fields a user can filter on for the current
// view. Sources:
//   - remote field metadata from the catalog service, used as-is
//   - local inference over item attributes (root view only)
//   - synthetic `ownership` and `parent_collections` fields
//
// `build_field_catalog` is a pure function of its input. `CatalogCache`
// memoizes it on the full input tuple and `RemoteMetadataSlot` drops
// metadata responses that arrive after the user navigated elsewhere.
// ---------------------------------------------------------------------------

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::Value;

use crate::field_path::{coerce_scalar, is_scalar};
use crate::types::{
	AncestorCollection, FieldDescriptor, FieldKind, Item, OwnershipSet, RemoteField,
	SpecialField, MISSING, OWNED, OWNERSHIP_FIELD, OWNERSHIP_PRIORITY,
	PARENT_COLLECTIONS_FIELD, PARENT_COLLECTIONS_PRIORITY,
};

static WORD_START: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\b\w").ok());

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct CatalogInput<'a> {
	pub items: &'a [Item],
	/// `None` when no metadata response is available for this view.
	pub remote_metadata: Option<&'a [RemoteField]>,
	/// Synthetic root level: the only place local inference runs.
	pub is_root: bool,
	pub ancestors: &'a [AncestorCollection],
	pub is_authenticated: bool,
	pub ownership: Option<&'a OwnershipSet>,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Ordered field descriptors for a view: descending priority, ties in
/// discovery order (synthetic fields, then metadata in source order).
pub fn build_field_catalog(input: &CatalogInput<'_>) -> Vec<FieldDescriptor> {
	let mut fields = Vec::new();

	if input.is_authenticated && input.ownership.is_some() {
		fields.push(ownership_field());
	}
	if !input.ancestors.is_empty() {
		fields.push(parent_collections_field(input.ancestors));
	}

	let discovered = match input.remote_metadata {
		Some(remote) if !remote.is_empty() => remote.iter().map(from_remote).collect(),
		_ if input.is_root => infer_fields(input.items),
		_ => Vec::new(),
	};
	for descriptor in discovered {
		if fields.iter().any(|f: &FieldDescriptor| f.field == descriptor.field) {
			continue;
		}
		fields.push(descriptor);
	}

	fields.sort_by_key(|f| Reverse(f.priority));
	fields
}

/// `"card_set_name"` -> `"Card Set Name"`.
pub fn humanize_label(key: &str) -> String {
	let spaced = key.replace('_', " ");
	match WORD_START.as_ref() {
		Some(re) => re
			.replace_all(&spaced, |caps: &Captures| caps[0].to_uppercase())
			.into_owned(),
		None => spaced,
	}
}

fn ownership_field() -> FieldDescriptor {
	FieldDescriptor {
		field: OWNERSHIP_FIELD.to_string(),
		label: "Ownership".to_string(),
		kind: FieldKind::Multiselect,
		values: vec![OWNED.to_string(), MISSING.to_string()],
		priority: OWNERSHIP_PRIORITY,
		special: Some(SpecialField::Ownership),
		count: None,
		collections: Vec::new(),
	}
}

fn parent_collections_field(ancestors: &[AncestorCollection]) -> FieldDescriptor {
	FieldDescriptor {
		field: PARENT_COLLECTIONS_FIELD.to_string(),
		label: "Parent Collections".to_string(),
		kind: FieldKind::Multiselect,
		values: ancestors.iter().map(|c| c.id.clone()).collect(),
		priority: PARENT_COLLECTIONS_PRIORITY,
		special: Some(SpecialField::ParentCollections),
		count: None,
		collections: ancestors.to_vec(),
	}
}

fn from_remote(remote: &RemoteField) -> FieldDescriptor {
	let label = if remote.label.is_empty() {
		humanize_label(remote.field.rsplit('.').next().unwrap_or(&remote.field))
	} else {
		remote.label.clone()
	};
	FieldDescriptor {
		field: remote.field.clone(),
		label,
		kind: FieldKind::parse(&remote.field_type),
		values: remote.values.clone(),
		priority: remote.priority,
		special: None,
		count: remote.count,
		collections: Vec::new(),
	}
}

/// One multiselect field per attribute key holding a scalar or a list of
/// scalars somewhere in `items`. Keys appear in first-seen order; values are
/// sorted.
fn infer_fields(items: &[Item]) -> Vec<FieldDescriptor> {
	let mut order: Vec<&str> = Vec::new();
	let mut values: HashMap<&str, BTreeSet<String>> = HashMap::new();

	for item in items {
		let Some(attributes) = item.attribute_map() else {
			continue;
		};
		for (key, value) in attributes {
			let coerced: Vec<String> = match value {
				Value::Array(elements)
					if elements.iter().all(|e| e.is_null() || is_scalar(e)) =>
				{
					elements.iter().filter_map(coerce_scalar).collect()
				}
				scalar if is_scalar(scalar) => coerce_scalar(scalar).into_iter().collect(),
				_ => continue,
			};
			let entry = values.entry(key.as_str()).or_insert_with(|| {
				order.push(key.as_str());
				BTreeSet::new()
			});
			entry.extend(coerced);
		}
	}

	order
		.into_iter()
		.filter_map(|key| {
			let found = values.remove(key)?;
			if found.is_empty() {
				return None;
			}
			Some(FieldDescriptor {
				field: format!("attributes.{key}"),
				label: humanize_label(key),
				kind: FieldKind::Multiselect,
				values: found.into_iter().collect(),
				priority: 0,
				special: None,
				count: None,
				collections: Vec::new(),
			})
		})
		.collect()
}

// ---------------------------------------------------------------------------
// RemoteMetadataSlot
// ---------------------------------------------------------------------------

/// Holds the metadata response for the collection currently being viewed.
#[derive(Debug, Default)]
pub struct RemoteMetadataSlot {
	active: Option<String>,
	fields: Option<Vec<RemoteField>>,
}

impl RemoteMetadataSlot {
	pub fn new() -> Self {
		Self::default()
	}

	/// Mark `collection_id` as the view a fetch is in flight for. Switching
	/// collections drops the previous response.
	pub fn begin(&mut self, collection_id: &str) {
		if self.active.as_deref() != Some(collection_id) {
			self.active = Some(collection_id.to_string());
			self.fields = None;
		}
	}

	/// Store a response. Returns `false` (and discards it) when the response
	/// belongs to a collection other than the active one.
	pub fn accept(&mut self, collection_id: &str, fields: Vec<RemoteField>) -> bool {
		if self.active.as_deref() != Some(collection_id) {
			tracing::debug!(
				collection_id,
				active = ?self.active,
				"Discarding stale field metadata"
			);
			return false;
		}
		self.fields = Some(fields);
		true
	}

	pub fn active(&self) -> Option<&str> {
		self.active.as_deref()
	}

	pub fn current(&self) -> Option<&[RemoteField]> {
		self.fields.as_deref()
	}
}

// ---------------------------------------------------------------------------
// CatalogCache
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct CatalogKey {
	items: Vec<Item>,
	remote_metadata: Option<Vec<RemoteField>>,
	is_root: bool,
	ancestors: Vec<AncestorCollection>,
	is_authenticated: bool,
	ownership: Option<OwnershipSet>,
}

impl CatalogKey {
	fn capture(input: &CatalogInput<'_>) -> Self {
		Self {
			items: input.items.to_vec(),
			remote_metadata: input.remote_metadata.map(<[RemoteField]>::to_vec),
			is_root: input.is_root,
			ancestors: input.ancestors.to_vec(),
			is_authenticated: input.is_authenticated,
			ownership: input.ownership.cloned(),
		}
	}

	fn matches(&self, input: &CatalogInput<'_>) -> bool {
		self.is_root == input.is_root
			&& self.is_authenticated == input.is_authenticated
			&& self.ownership.as_ref() == input.ownership
			&& self.ancestors.as_slice() == input.ancestors
			&& self.remote_metadata.as_deref() == input.remote_metadata
			&& self.items.as_slice() == input.items
	}
}

/// Memoizes the last catalog built, keyed on every input.
#[derive(Debug, Default)]
pub struct CatalogCache {
	key: Option<CatalogKey>,
	fields: Vec<FieldDescriptor>,
}

impl CatalogCache {
	pub fn new() -> Self {
		Self::default()
	}

	/// Cached fields when the input is unchanged, a fresh build otherwise.
	/// The flag reports whether the cache was hit.
	pub fn get_or_build(&mut self, input: &CatalogInput<'_>) -> (&[FieldDescriptor], bool) {
		let hit = self.key.as_ref().is_some_and(|key| key.matches(input));
		if !hit {
			self.fields = build_field_catalog(input);
			self.key = Some(CatalogKey::capture(input));
		}
		(self.fields.as_slice(), hit)
	}

	pub fn invalidate(&mut self) {
		self.key = None;
		self.fields.clear();
	}
}
