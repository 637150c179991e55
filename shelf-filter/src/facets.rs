// ---------------------------------------------------------------------------
// Facet counting
// ---------------------------------------------------------------------------
//
// Per-value counts over the visible item set, shown next to each checkbox.
// ---------------------------------------------------------------------------

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::field_path::resolve_strings;
use crate::predicate::MatchContext;
use crate::types::{
	FieldDescriptor, Item, MISSING, OWNED, OWNERSHIP_FIELD, PARENT_COLLECTIONS_FIELD,
	TEXT_SEARCH_FIELD,
};

pub type FacetCounts = BTreeMap<String, usize>;

/// Count, for each value of `field`, how many of `items` carry it.
///
/// An item contributes at most once to any given value. Items without the
/// field contribute nothing.
pub fn count_values(items: &[Item], field: &str, ctx: &MatchContext<'_>) -> FacetCounts {
	match field {
		OWNERSHIP_FIELD => {
			let owned = items.iter().filter(|item| ctx.is_owned(&item.id)).count();
			FacetCounts::from([
				(OWNED.to_string(), owned),
				(MISSING.to_string(), items.len() - owned),
			])
		}
		PARENT_COLLECTIONS_FIELD => {
			let visible: HashSet<&str> = items.iter().map(|item| item.id.as_str()).collect();
			ctx.ancestors
				.iter()
				.map(|ancestor| {
					let members: HashSet<&str> = ancestor
						.attributes
						.item_ids
						.iter()
						.map(String::as_str)
						.collect();
					(ancestor.id.clone(), members.intersection(&visible).count())
				})
				.collect()
		}
		TEXT_SEARCH_FIELD => FacetCounts::new(),
		path => {
			let mut counts = FacetCounts::new();
			for item in items {
				let Some(values) = resolve_strings(item, path) else {
					continue;
				};
				let distinct: BTreeSet<String> = values.into_iter().collect();
				for value in distinct {
					*counts.entry(value).or_insert(0) += 1;
				}
			}
			counts
		}
	}
}

/// Counts for every descriptor, keyed by field path.
pub fn count_catalog(
	items: &[Item],
	fields: &[FieldDescriptor],
	ctx: &MatchContext<'_>,
) -> BTreeMap<String, FacetCounts> {
	fields
		.iter()
		.map(|descriptor| {
			(
				descriptor.field.clone(),
				count_values(items, &descriptor.field, ctx),
			)
		})
		.collect()
}
