// ---------------------------------------------------------------------------
// Field paths
// ---------------------------------------------------------------------------
//
// A field path is a dot-separated address into an item ("attributes.rarity",
// "year", "attributes.set.code"). Resolution starts at the item's top level
// and falls back to its attribute map, so server metadata may use either
// form. Null values and malformed paths both resolve to `None`.
// ---------------------------------------------------------------------------

use std::borrow::Cow;

use serde_json::Value;

use crate::types::Item;

/// Largest integer a double holds exactly; integral floats below this
/// render without a fractional part.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// String form of a scalar JSON value. Arrays, objects and null have none.
pub fn coerce_scalar(value: &Value) -> Option<String> {
	match value {
		Value::String(s) => Some(s.clone()),
		Value::Bool(b) => Some(b.to_string()),
		Value::Number(n) => {
			if let Some(i) = n.as_i64() {
				Some(i.to_string())
			} else if let Some(u) = n.as_u64() {
				Some(u.to_string())
			} else {
				let f = n.as_f64()?;
				if f.is_finite() && f.fract() == 0.0 && f.abs() <= MAX_SAFE_INTEGER {
					Some(format!("{}", f as i64))
				} else {
					Some(f.to_string())
				}
			}
		}
		Value::Null | Value::Array(_) | Value::Object(_) => None,
	}
}

pub fn is_scalar(value: &Value) -> bool {
	matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_))
}

/// Resolve `path` against `item`. Returns `None` for missing, null or
/// unreachable values.
pub fn resolve<'a>(item: &'a Item, path: &str) -> Option<Cow<'a, Value>> {
	let segments: Vec<&str> = path.trim().split('.').collect();
	if segments.iter().any(|s| s.is_empty()) {
		return None;
	}
	let (head, rest) = segments.split_first()?;

	let top_level = match *head {
		"id" => owned_leaf(&item.id, rest),
		"type" => owned_leaf(&item.item_type, rest),
		"name" => owned_leaf(&item.name, rest),
		"attributes" => descend(&item.attributes, rest).map(Cow::Borrowed),
		other => item
			.extra
			.get(other)
			.and_then(|v| descend(v, rest))
			.map(Cow::Borrowed),
	};

	top_level.or_else(|| descend(&item.attributes, &segments).map(Cow::Borrowed))
}

/// Resolve `path` to its string-coerced values: one entry for a scalar,
/// every non-null scalar element for an array, nothing for an object.
/// `None` means the value is missing or null.
pub fn resolve_strings(item: &Item, path: &str) -> Option<Vec<String>> {
	let value = resolve(item, path)?;
	Some(match value.as_ref() {
		Value::Array(values) => values.iter().filter_map(coerce_scalar).collect(),
		scalar => coerce_scalar(scalar).into_iter().collect(),
	})
}

fn owned_leaf<'a>(value: &str, rest: &[&str]) -> Option<Cow<'a, Value>> {
	if rest.is_empty() && !value.is_empty() {
		Some(Cow::Owned(Value::String(value.to_string())))
	} else {
		None
	}
}

fn descend<'a>(root: &'a Value, segments: &[&str]) -> Option<&'a Value> {
	let mut current = root;
	for segment in segments {
		current = match current {
			Value::Object(map) => map.get(*segment)?,
			Value::Array(values) => values.get(segment.parse::<usize>().ok()?)?,
			_ => return None,
		};
	}
	(!current.is_null()).then_some(current)
}
