//! Bag-per-directory archive import/export.
//!
//! The archive is a plain directory tree: `bags/<n>/bag.json` plus one JSON
//! file per current tiddler, and a `recipes.json` describing recipe
//! composition. It exists for bootstrap imports and backups, not as a wire
//! format; tombstones and revision history are not carried.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::store::{Store, SyncOptions};

#[derive(Debug, Serialize, Deserialize)]
struct BagMeta {
    name: String,
    description: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct TiddlerArchive {
    fields: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    attachment_hash: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RecipeBagArchive {
    bag_name: String,
    with_acl: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct RecipeArchive {
    name: String,
    description: String,
    bags: Vec<RecipeBagArchive>,
    #[serde(default)]
    plugin_names: Vec<String>,
    #[serde(default)]
    skip_required_plugins: bool,
    #[serde(default)]
    skip_core: bool,
}

/// Writes every bag's current tiddlers and every recipe definition to `dir`.
pub fn save_archive(store: &dyn Store, dir: &Path) -> Result<()> {
    let bags_dir = dir.join("bags");
    fs::create_dir_all(&bags_dir)?;

    for (index, bag) in store.list_bags()?.iter().enumerate() {
        let bag_dir = bags_dir.join(format!("{index:04}"));
        let tiddlers_dir = bag_dir.join("tiddlers");
        fs::create_dir_all(&tiddlers_dir)?;

        let meta = BagMeta {
            name: bag.name.clone(),
            description: bag.description.clone(),
        };
        fs::write(bag_dir.join("bag.json"), serde_json::to_vec_pretty(&meta)?)?;

        let tiddlers = store.read_bag_tiddlers(
            bag.id,
            SyncOptions {
                last_known_revision_id: None,
                include_deleted: false,
            },
        )?;
        for (n, tiddler) in tiddlers.iter().enumerate() {
            let entry = TiddlerArchive {
                fields: tiddler.fields.clone(),
                attachment_hash: tiddler.attachment_hash.clone(),
            };
            fs::write(
                tiddlers_dir.join(format!("{n:06}.json")),
                serde_json::to_vec_pretty(&entry)?,
            )?;
        }
    }

    let mut recipes = Vec::new();
    for recipe in store.list_recipes()? {
        let bags = store
            .recipe_bags(recipe.id)?
            .into_iter()
            .map(|rb| RecipeBagArchive {
                bag_name: rb.bag_name,
                with_acl: rb.with_acl,
            })
            .collect();
        recipes.push(RecipeArchive {
            name: recipe.name,
            description: recipe.description,
            bags,
            plugin_names: recipe.plugin_names,
            skip_required_plugins: recipe.skip_required_plugins,
            skip_core: recipe.skip_core,
        });
    }
    fs::write(dir.join("recipes.json"), serde_json::to_vec_pretty(&recipes)?)?;
    Ok(())
}

fn sorted_dirs(path: &Path) -> Result<Vec<std::path::PathBuf>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        if entry.path().is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Loads an archive into the store. Bags are created or emptied and
/// repopulated; recipes are created or retargeted. Ownership and ACLs are
/// not part of the archive and are left untouched on existing resources.
pub fn load_archive(store: &dyn Store, dir: &Path) -> Result<()> {
    let bags_dir = dir.join("bags");
    if !bags_dir.is_dir() {
        return Err(Error::BadRequest(format!(
            "not an archive directory: {}",
            dir.display()
        )));
    }

    for bag_dir in sorted_dirs(&bags_dir)? {
        let meta: BagMeta = serde_json::from_slice(&fs::read(bag_dir.join("bag.json"))?)?;
        let owner_id = store.get_bag_by_name(&meta.name)?.and_then(|b| b.owner_id);
        let bag = store.upsert_bag(&meta.name, &meta.description, owner_id)?;
        store.empty_bag(bag.id)?;

        let tiddlers_dir = bag_dir.join("tiddlers");
        if !tiddlers_dir.is_dir() {
            continue;
        }
        let mut files: Vec<_> = fs::read_dir(&tiddlers_dir)?
            .collect::<std::io::Result<Vec<_>>>()?
            .into_iter()
            .map(|e| e.path())
            .collect();
        files.sort();
        for file in files {
            let entry: TiddlerArchive = serde_json::from_slice(&fs::read(&file)?)?;
            store.save_tiddler(bag.id, &entry.fields, entry.attachment_hash.as_deref())?;
        }
    }

    let recipes_path = dir.join("recipes.json");
    if recipes_path.is_file() {
        let recipes: Vec<RecipeArchive> = serde_json::from_slice(&fs::read(&recipes_path)?)?;
        for recipe in recipes {
            let owner_id = store
                .get_recipe_by_name(&recipe.name)?
                .and_then(|r| r.owner_id);
            let bags: Vec<(String, bool)> = recipe
                .bags
                .into_iter()
                .map(|b| (b.bag_name, b.with_acl))
                .collect();
            store.upsert_recipe(
                &recipe.name,
                &recipe.description,
                owner_id,
                &bags,
                &recipe.plugin_names,
                recipe.skip_required_plugins,
                recipe.skip_core,
            )?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::store::SqliteStore;

    fn fields(title: &str, text: &str) -> HashMap<String, String> {
        HashMap::from([
            ("title".to_string(), title.to_string()),
            ("text".to_string(), text.to_string()),
        ])
    }

    #[test]
    fn test_archive_roundtrip() {
        let source = SqliteStore::in_memory().unwrap();
        source.initialize().unwrap();
        let bag = source.upsert_bag("notes", "my notes", None).unwrap();
        source.save_tiddler(bag.id, &fields("Alpha", "one"), None).unwrap();
        source.save_tiddler(bag.id, &fields("Beta", "two"), None).unwrap();
        source.delete_tiddler(bag.id, "Beta").unwrap();
        source
            .upsert_recipe("wiki", "", None, &[("notes".to_string(), true)], &[], false, false)
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        save_archive(&source, dir.path()).unwrap();

        let target = SqliteStore::in_memory().unwrap();
        target.initialize().unwrap();
        load_archive(&target, dir.path()).unwrap();

        let bag = target.get_bag_by_name("notes").unwrap().unwrap();
        assert_eq!(bag.description, "my notes");
        let alpha = target.tiddler(bag.id, "Alpha").unwrap().unwrap();
        assert_eq!(alpha.fields["text"], "one");
        // tombstoned tiddlers are not carried
        assert!(target.tiddler(bag.id, "Beta").unwrap().is_none());

        let recipe = target.get_recipe_by_name("wiki").unwrap().unwrap();
        let bags = target.recipe_bags(recipe.id).unwrap();
        assert_eq!(bags.len(), 1);
        assert!(bags[0].with_acl);
    }

    #[test]
    fn test_load_rejects_non_archive_dir() {
        let store = SqliteStore::in_memory().unwrap();
        store.initialize().unwrap();
        let dir = tempfile::tempdir().unwrap();
        assert!(load_archive(&store, dir.path()).is_err());
    }
}
