// ---------------------------------------------------------------------------
// Data model
// ---------------------------------------------------------------------------
//
// Items and ancestor collections arrive from the catalog service as loosely
// typed JSON. Everything here deserializes leniently: ids may be numbers,
// names may be null, unknown top-level keys are kept in `Item::extra` so
// field paths can still reach them.
// ---------------------------------------------------------------------------

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::field_path::coerce_scalar;

// ---------------------------------------------------------------------------
// Reserved field names and constants
// ---------------------------------------------------------------------------

pub const TEXT_SEARCH_FIELD: &str = "_text_search";
pub const OWNERSHIP_FIELD: &str = "ownership";
pub const PARENT_COLLECTIONS_FIELD: &str = "parent_collections";

pub const OWNED: &str = "owned";
pub const MISSING: &str = "missing";

/// `Item::item_type` value marking a container of other items.
pub const COLLECTION_TYPE: &str = "collection";

pub const OWNERSHIP_PRIORITY: i64 = 110;
pub const PARENT_COLLECTIONS_PRIORITY: i64 = 100;

/// Item IDs the current user owns.
pub type OwnershipSet = HashSet<String>;

/// Persisted mapping of collection id to that collection's own filters.
pub type FilterStoreData = BTreeMap<String, FilterSet>;

// ---------------------------------------------------------------------------
// Lenient deserializers
// ---------------------------------------------------------------------------

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
	D: Deserializer<'de>,
{
	let value = Value::deserialize(deserializer)?;
	Ok(coerce_scalar(&value).unwrap_or_default())
}

fn lenient_string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
	D: Deserializer<'de>,
{
	let value = Value::deserialize(deserializer)?;
	Ok(match value {
		Value::Array(values) => values.iter().filter_map(coerce_scalar).collect(),
		other => coerce_scalar(&other).into_iter().collect(),
	})
}

// ---------------------------------------------------------------------------
// Item
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
	#[serde(default, deserialize_with = "lenient_string")]
	pub id: String,
	#[serde(rename = "type", default, deserialize_with = "lenient_string")]
	pub item_type: String,
	#[serde(default, deserialize_with = "lenient_string")]
	pub name: String,
	#[serde(default, skip_serializing_if = "Value::is_null")]
	pub attributes: Value,
	/// Any other top-level keys (membership markers, flattened attributes).
	#[serde(flatten)]
	pub extra: Map<String, Value>,
}

impl Item {
	pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
		Self {
			id: id.into(),
			item_type: String::new(),
			name: name.into(),
			attributes: Value::Null,
			extra: Map::new(),
		}
	}

	/// Containers are exempt from the missing-value exclusion in the
	/// predicate evaluator.
	pub fn is_collection(&self) -> bool {
		self.item_type.eq_ignore_ascii_case(COLLECTION_TYPE)
	}

	/// Attribute map, or `None` when attributes are absent or not an object.
	pub fn attribute_map(&self) -> Option<&Map<String, Value>> {
		self.attributes.as_object()
	}
}

// ---------------------------------------------------------------------------
// Ancestor collections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AncestorAttributes {
	#[serde(default, deserialize_with = "lenient_string_list")]
	pub item_ids: Vec<String>,
}

/// A collection above the active one, with its known member IDs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AncestorCollection {
	#[serde(deserialize_with = "lenient_string")]
	pub id: String,
	#[serde(default, deserialize_with = "lenient_string")]
	pub name: String,
	#[serde(default)]
	pub attributes: AncestorAttributes,
}

impl AncestorCollection {
	pub fn contains(&self, item_id: &str) -> bool {
		self.attributes.item_ids.iter().any(|id| id == item_id)
	}
}

// ---------------------------------------------------------------------------
// Field metadata
// ---------------------------------------------------------------------------

/// One entry of the catalog service's field-metadata response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteField {
	pub field: String,
	#[serde(default, deserialize_with = "lenient_string")]
	pub label: String,
	#[serde(rename = "type", default)]
	pub field_type: String,
	#[serde(default, deserialize_with = "lenient_string_list")]
	pub values: Vec<String>,
	#[serde(default)]
	pub count: Option<u64>,
	#[serde(default)]
	pub priority: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
	Multiselect,
	Text,
}

impl FieldKind {
	/// Anything other than `"text"` renders as a checkbox group.
	pub fn parse(raw: &str) -> Self {
		if raw.eq_ignore_ascii_case("text") {
			Self::Text
		} else {
			Self::Multiselect
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecialField {
	Ownership,
	ParentCollections,
}

/// A filterable field as shown in the filter drawer. Derived, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
	pub field: String,
	pub label: String,
	#[serde(rename = "type")]
	pub kind: FieldKind,
	pub values: Vec<String>,
	pub priority: i64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub special: Option<SpecialField>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub count: Option<u64>,
	/// Ancestor collections backing a `parent_collections` field.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub collections: Vec<AncestorCollection>,
}

impl FieldDescriptor {
	/// Display label for one of this field's values. Parent-collection IDs
	/// resolve to the collection name; everything else is shown verbatim.
	pub fn value_label<'a>(&'a self, value: &'a str) -> &'a str {
		self.collections
			.iter()
			.find(|c| c.id == value && !c.name.is_empty())
			.map(|c| c.name.as_str())
			.unwrap_or(value)
	}
}

// ---------------------------------------------------------------------------
// FilterValue / FilterSet
// ---------------------------------------------------------------------------

/// Selection for one field: a list of values, or the free-text query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
	Values(Vec<String>),
	Text(String),
}

impl FilterValue {
	pub fn is_empty(&self) -> bool {
		match self {
			Self::Values(values) => values.is_empty(),
			Self::Text(text) => text.is_empty(),
		}
	}

	/// Selected values; a text query counts as a single value.
	pub fn selected(&self) -> Vec<&str> {
		match self {
			Self::Values(values) => values.iter().map(String::as_str).collect(),
			Self::Text(text) if text.is_empty() => Vec::new(),
			Self::Text(text) => vec![text.as_str()],
		}
	}

	pub fn as_text(&self) -> Option<&str> {
		match self {
			Self::Text(text) => Some(text.as_str()),
			Self::Values(_) => None,
		}
	}

	/// Coerce into the shape `field` stores: a plain string for the text
	/// search key, a list for everything else.
	fn shaped_for(self, field: &str) -> Self {
		match (field == TEXT_SEARCH_FIELD, self) {
			(true, Self::Values(values)) => {
				Self::Text(values.into_iter().next().unwrap_or_default())
			}
			(false, Self::Text(text)) if text.is_empty() => Self::Values(Vec::new()),
			(false, Self::Text(text)) => Self::Values(vec![text]),
			(_, value) => value,
		}
	}

	/// Read a stored or client-supplied value leniently. Unusable and empty
	/// shapes yield `None`.
	pub fn from_json(field: &str, value: &Value) -> Option<Self> {
		let parsed = match value {
			Value::Array(values) => Self::Values(values.iter().filter_map(coerce_scalar).collect()),
			Value::String(text) => Self::Text(text.clone()),
			Value::Number(_) | Value::Bool(_) => Self::Text(coerce_scalar(value)?),
			Value::Null | Value::Object(_) => return None,
		}
		.shaped_for(field);
		(!parsed.is_empty()).then_some(parsed)
	}
}

impl From<Vec<String>> for FilterValue {
	fn from(values: Vec<String>) -> Self {
		Self::Values(values)
	}
}

impl From<Vec<&str>> for FilterValue {
	fn from(values: Vec<&str>) -> Self {
		Self::Values(values.into_iter().map(str::to_string).collect())
	}
}

impl From<&str> for FilterValue {
	fn from(text: &str) -> Self {
		Self::Text(text.to_string())
	}
}

impl From<String> for FilterValue {
	fn from(text: String) -> Self {
		Self::Text(text)
	}
}

/// A collection's field -> selection map.
///
/// Never holds an empty selection: inserting an empty value removes the
/// field instead.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
	from = "BTreeMap<String, Value>",
	into = "BTreeMap<String, FilterValue>"
)]
pub struct FilterSet {
	fields: BTreeMap<String, FilterValue>,
}

impl FilterSet {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn is_empty(&self) -> bool {
		self.fields.is_empty()
	}

	pub fn len(&self) -> usize {
		self.fields.len()
	}

	pub fn get(&self, field: &str) -> Option<&FilterValue> {
		self.fields.get(field)
	}

	pub fn contains(&self, field: &str) -> bool {
		self.fields.contains_key(field)
	}

	/// Selected values for `field`, empty when the field is not filtered.
	pub fn selected(&self, field: &str) -> Vec<&str> {
		self.fields.get(field).map(FilterValue::selected).unwrap_or_default()
	}

	pub fn text_search(&self) -> Option<&str> {
		self.fields.get(TEXT_SEARCH_FIELD).and_then(FilterValue::as_text)
	}

	/// Set `field`, or remove it when `value` is empty. Returns whether the
	/// field is present afterwards.
	pub fn insert(&mut self, field: impl Into<String>, value: impl Into<FilterValue>) -> bool {
		let field = field.into();
		if field.is_empty() {
			return false;
		}
		let value = value.into().shaped_for(&field);
		if value.is_empty() {
			self.fields.remove(&field);
			false
		} else {
			self.fields.insert(field, value);
			true
		}
	}

	/// Builder form of [`FilterSet::insert`].
	pub fn with(mut self, field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
		self.insert(field, value);
		self
	}

	pub fn remove(&mut self, field: &str) -> Option<FilterValue> {
		self.fields.remove(field)
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &FilterValue)> {
		self.fields.iter().map(|(k, v)| (k.as_str(), v))
	}

	/// Shallow merge: each field of `other` replaces the same field here.
	/// Values are never unioned.
	pub fn overlay(&mut self, other: &FilterSet) {
		for (field, value) in &other.fields {
			self.fields.insert(field.clone(), value.clone());
		}
	}

	/// Total number of selected values across all fields.
	pub fn selection_count(&self) -> usize {
		self.fields.values().map(|v| v.selected().len()).sum()
	}
}

impl From<BTreeMap<String, Value>> for FilterSet {
	fn from(raw: BTreeMap<String, Value>) -> Self {
		let fields = raw
			.into_iter()
			.filter(|(field, _)| !field.is_empty())
			.filter_map(|(field, value)| {
				FilterValue::from_json(&field, &value).map(|parsed| (field, parsed))
			})
			.collect();
		Self { fields }
	}
}

impl From<FilterSet> for BTreeMap<String, FilterValue> {
	fn from(set: FilterSet) -> Self {
		set.fields
	}
}

impl<K: Into<String>, V: Into<FilterValue>> FromIterator<(K, V)> for FilterSet {
	fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
		let mut set = Self::new();
		for (field, value) in iter {
			set.insert(field, value);
		}
		set
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn empty_selection_removes_field() {
		let mut set = FilterSet::new().with("year", vec!["2020"]);
		assert!(set.contains("year"));
		assert!(!set.insert("year", Vec::<String>::new()));
		assert!(set.is_empty());
	}

	#[test]
	fn text_search_is_stored_as_string() {
		let set = FilterSet::new().with(TEXT_SEARCH_FIELD, vec!["dragon"]);
		assert_eq!(set.text_search(), Some("dragon"));

		let set = FilterSet::new().with(TEXT_SEARCH_FIELD, "");
		assert!(set.is_empty());
	}

	#[test]
	fn plain_string_for_generic_field_becomes_list() {
		let set = FilterSet::new().with("country", "US");
		assert_eq!(
			set.get("country"),
			Some(&FilterValue::Values(vec!["US".to_string()]))
		);
	}

	#[test]
	fn deserialize_drops_empty_and_coerces_scalars() {
		let set: FilterSet = serde_json::from_value(json!({
			"year": [2020, 2021.0, null],
			"country": [],
			"_text_search": "",
			"flags": {"nested": true},
			"attributes.rarity": ["Rare"]
		}))
		.unwrap();

		assert_eq!(set.len(), 2);
		assert_eq!(set.selected("year"), vec!["2020", "2021"]);
		assert_eq!(set.selected("attributes.rarity"), vec!["Rare"]);
	}

	#[test]
	fn serializes_to_blob_shape() {
		let set = FilterSet::new()
			.with("year", vec!["2020"])
			.with(TEXT_SEARCH_FIELD, "foil");
		let value = serde_json::to_value(&set).unwrap();
		assert_eq!(value, json!({ "year": ["2020"], "_text_search": "foil" }));
	}

	#[test]
	fn overlay_replaces_whole_field() {
		let mut base = FilterSet::new()
			.with("year", vec!["2020"])
			.with("country", vec!["US"]);
		base.overlay(&FilterSet::new().with("year", vec!["2021"]));
		assert_eq!(base.selected("year"), vec!["2021"]);
		assert_eq!(base.selected("country"), vec!["US"]);
	}

	#[test]
	fn item_deserializes_leniently() {
		let item: Item = serde_json::from_value(json!({
			"id": 7,
			"type": "Collection",
			"name": null,
			"year": 2020
		}))
		.unwrap();
		assert_eq!(item.id, "7");
		assert!(item.is_collection());
		assert_eq!(item.name, "");
		assert!(item.attributes.is_null());
		assert_eq!(item.extra.get("year"), Some(&json!(2020)));
	}

	#[test]
	fn value_label_resolves_collection_names() {
		let descriptor = FieldDescriptor {
			field: PARENT_COLLECTIONS_FIELD.to_string(),
			label: "Parent Collections".to_string(),
			kind: FieldKind::Multiselect,
			values: vec!["c1".to_string(), "c2".to_string()],
			priority: PARENT_COLLECTIONS_PRIORITY,
			special: Some(SpecialField::ParentCollections),
			count: None,
			collections: vec![AncestorCollection {
				id: "c1".to_string(),
				name: "Base Set".to_string(),
				attributes: AncestorAttributes::default(),
			}],
		};
		assert_eq!(descriptor.value_label("c1"), "Base Set");
		assert_eq!(descriptor.value_label("c2"), "c2");
	}
}
