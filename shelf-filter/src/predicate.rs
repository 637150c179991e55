// ---------------------------------------------------------------------------
// Predicate evaluation
// ---------------------------------------------------------------------------
//
// Decides whether an item belongs in a filtered view. Fields combine with
// AND, values within a field with OR, and an empty filter set passes every
// item.
//
// Generic attribute fields exclude items whose value is missing or null,
// except collection-type items, which are kept: a container can still hold
// matching descendants that are not visible at this level.
// ---------------------------------------------------------------------------

use crate::field_path::resolve_strings;
use crate::store::FilterSource;
use crate::types::{
	AncestorCollection, FilterSet, FilterValue, Item, OwnershipSet, MISSING, OWNED,
	OWNERSHIP_FIELD, PARENT_COLLECTIONS_FIELD, TEXT_SEARCH_FIELD,
};

/// Caller-supplied context for the synthetic fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchContext<'a> {
	/// `None` for unauthenticated users: nothing counts as owned.
	pub ownership: Option<&'a OwnershipSet>,
	pub ancestors: &'a [AncestorCollection],
}

impl<'a> MatchContext<'a> {
	pub fn new(ownership: Option<&'a OwnershipSet>, ancestors: &'a [AncestorCollection]) -> Self {
		Self {
			ownership,
			ancestors,
		}
	}

	pub fn is_owned(&self, item_id: &str) -> bool {
		self.ownership.is_some_and(|owned| owned.contains(item_id))
	}

	pub fn ancestor(&self, collection_id: &str) -> Option<&'a AncestorCollection> {
		self.ancestors.iter().find(|c| c.id == collection_id)
	}
}

/// Whether `item` satisfies every non-empty selection in `filters`.
pub fn matches(item: &Item, filters: &FilterSet, ctx: &MatchContext<'_>) -> bool {
	filters
		.iter()
		.all(|(field, value)| matches_field(item, field, value, ctx))
}

/// Items of `items` that pass `filters`, in their original order.
pub fn filter_items<'i>(
	items: &'i [Item],
	filters: &FilterSet,
	ctx: &MatchContext<'_>,
) -> Vec<&'i Item> {
	if filters.is_empty() {
		return items.iter().collect();
	}
	items.iter().filter(|item| matches(item, filters, ctx)).collect()
}

/// Filter `items` with the effective (inherited) filters `source` holds for
/// `collection_id`.
pub fn filter_view<'i, S: FilterSource + ?Sized>(
	source: &S,
	collection_id: Option<&str>,
	items: &'i [Item],
	ctx: &MatchContext<'_>,
) -> Vec<&'i Item> {
	let filters = source.get(collection_id);
	filter_items(items, &filters, ctx)
}

fn matches_field(item: &Item, field: &str, value: &FilterValue, ctx: &MatchContext<'_>) -> bool {
	match field {
		TEXT_SEARCH_FIELD => matches_text(item, value),
		OWNERSHIP_FIELD => {
			let selected = value.selected();
			if selected.is_empty() {
				return true;
			}
			let owned = ctx.is_owned(&item.id);
			selected.iter().any(|v| match *v {
				OWNED => owned,
				MISSING => !owned,
				_ => false,
			})
		}
		PARENT_COLLECTIONS_FIELD => {
			let selected = value.selected();
			if selected.is_empty() {
				return true;
			}
			selected.iter().any(|collection_id| {
				ctx.ancestor(collection_id)
					.is_some_and(|ancestor| ancestor.contains(&item.id))
			})
		}
		path => {
			let selected = value.selected();
			if selected.is_empty() {
				return true;
			}
			match resolve_strings(item, path) {
				Some(actual) => actual.iter().any(|a| selected.contains(&a.as_str())),
				None => item.is_collection(),
			}
		}
	}
}

fn matches_text(item: &Item, value: &FilterValue) -> bool {
	let query = match value.as_text() {
		Some(q) if !q.is_empty() => q.to_lowercase(),
		_ => return true,
	};
	item.name.to_lowercase().contains(&query)
}
