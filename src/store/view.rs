//! Recipe overlay resolution.
//!
//! A recipe is an ordered stack of bags. Position 0 is the top of the stack:
//! it is the writable bag and it shadows every higher position when titles
//! collide. A tombstone at the winning position hides the title even when a
//! deeper bag holds live content.

use std::collections::BTreeMap;

use super::{Store, SyncOptions};
use crate::error::Result;
use crate::types::{BagState, RecipeBag, TiddlerData};

/// A merged tiddler together with the bag it was resolved from.
#[derive(Debug, Clone)]
pub struct ResolvedTiddler {
    pub bag_name: String,
    pub tiddler: TiddlerData,
}

/// Merges the current tiddlers of all recipe bags into one title-keyed view.
///
/// Bags are read in descending position order so the final insert per title
/// comes from the lowest position, which therefore wins ties. Tombstones are
/// carried through the merge so a deletion in the winning bag masks deeper
/// content; they are stripped at the end unless `include_deleted` is set.
pub fn resolve_recipe_view(
    store: &dyn Store,
    recipe_bags: &[RecipeBag],
    opts: SyncOptions,
) -> Result<Vec<ResolvedTiddler>> {
    let mut merged: BTreeMap<String, ResolvedTiddler> = BTreeMap::new();

    let fetch = SyncOptions {
        include_deleted: true,
        ..opts
    };
    for recipe_bag in recipe_bags.iter().rev() {
        for tiddler in store.read_bag_tiddlers(recipe_bag.bag_id, fetch)? {
            merged.insert(
                tiddler.title.clone(),
                ResolvedTiddler {
                    bag_name: recipe_bag.bag_name.clone(),
                    tiddler,
                },
            );
        }
    }

    if !opts.include_deleted {
        merged.retain(|_, resolved| !resolved.tiddler.is_deleted);
    }
    Ok(merged.into_values().collect())
}

/// Resolves a single title through the overlay: walk positions in ascending
/// order and let the first bag holding any current revision decide. A
/// tombstone there means the title is absent from the view.
pub fn recipe_tiddler(
    store: &dyn Store,
    recipe_bags: &[RecipeBag],
    title: &str,
) -> Result<Option<ResolvedTiddler>> {
    for recipe_bag in recipe_bags {
        if let Some(tiddler) = store.tiddler(recipe_bag.bag_id, title)? {
            if tiddler.is_deleted {
                return Ok(None);
            }
            return Ok(Some(ResolvedTiddler {
                bag_name: recipe_bag.bag_name.clone(),
                tiddler,
            }));
        }
    }
    Ok(None)
}

/// Per-bag state lists in recipe order, for client-side merging.
pub fn recipe_bag_states(
    store: &dyn Store,
    recipe_bags: &[RecipeBag],
    opts: SyncOptions,
) -> Result<Vec<BagState>> {
    let mut states = Vec::with_capacity(recipe_bags.len());
    for recipe_bag in recipe_bags {
        states.push(BagState {
            bag_name: recipe_bag.bag_name.clone(),
            position: recipe_bag.position,
            tiddlers: store.bag_state(recipe_bag.bag_id, opts)?,
        });
    }
    Ok(states)
}

/// The highest revision id observed across a set of state lists, used as
/// ETag material for repeat polling.
pub fn max_observed_revision(states: &[BagState]) -> i64 {
    states
        .iter()
        .flat_map(|s| s.tiddlers.iter())
        .map(|t| t.revision_id)
        .max()
        .unwrap_or(0)
}
