//! The merged wiki shell and its startup-time asset caches.

use std::collections::HashMap;
use std::path::Path;

use bytes::Bytes;
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::server::compress;

/// A precompiled plugin bundle, content-hashed and pre-gzipped at startup.
pub struct PluginAsset {
    pub name: String,
    pub raw: Bytes,
    pub gz: Bytes,
    pub hash: String,
}

/// Read-only caches shared by every request: the HTML template split around
/// its two injection markers, and the plugin bundle map.
pub struct WikiAssets {
    pub head: Bytes,
    pub mid: Bytes,
    pub tail: Bytes,
    pub template_hash: String,
    pub plugins: HashMap<String, PluginAsset>,
    /// Bundles every recipe loads unless it sets `skip_required_plugins`.
    pub required: Vec<String>,
}

/// Bundle name of the core document set, loaded unless `skip_core` is set.
pub const CORE_PLUGIN: &str = "core";

const PLUGIN_MARKER: &str = "<!--~~ PLUGIN AREA ~~-->";
const STORE_MARKER: &str = "<!--~~ STORE AREA ~~-->";

const DEFAULT_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>satchel wiki</title>
<!--~~ PLUGIN AREA ~~-->
</head>
<body>
<script class="tiddler-store" type="application/json">
[
<!--~~ STORE AREA ~~-->
]
</script>
</body>
</html>
"#;

impl WikiAssets {
    /// Loads the template and scans `plugins_dir` for `*.js` bundles.
    /// Bundles in the `required/` subdirectory are loaded by every recipe
    /// that does not opt out. A missing directory is fine; the map is just
    /// empty.
    pub fn load(plugins_dir: &Path) -> Result<Self> {
        let mut assets = Self::from_template(DEFAULT_TEMPLATE);
        Self::scan_bundles(plugins_dir, &mut assets.plugins)?;
        assets.required = Self::scan_bundles(&plugins_dir.join("required"), &mut assets.plugins)?;
        assets.required.sort();
        Ok(assets)
    }

    fn scan_bundles(dir: &Path, plugins: &mut HashMap<String, PluginAsset>) -> Result<Vec<String>> {
        let mut names = Vec::new();
        if !dir.is_dir() {
            return Ok(names);
        }
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("js") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let raw = std::fs::read(&path)?;
            let gz = compress::gzip_body(&raw)?;
            let hash = hex::encode(Sha256::digest(&raw));
            plugins.insert(
                name.to_string(),
                PluginAsset {
                    name: name.to_string(),
                    raw: Bytes::from(raw),
                    gz: Bytes::from(gz),
                    hash,
                },
            );
            names.push(name.to_string());
        }
        Ok(names)
    }

    /// Template-only assets with no plugins, used by tests.
    #[must_use]
    pub fn from_template(template: &str) -> Self {
        let (head, rest) = template
            .split_once(PLUGIN_MARKER)
            .unwrap_or((template, ""));
        let (mid, tail) = rest.split_once(STORE_MARKER).unwrap_or((rest, ""));
        Self {
            head: Bytes::copy_from_slice(head.as_bytes()),
            mid: Bytes::copy_from_slice(mid.as_bytes()),
            tail: Bytes::copy_from_slice(tail.as_bytes()),
            template_hash: hex::encode(Sha256::digest(template.as_bytes())),
            plugins: HashMap::new(),
            required: Vec::new(),
        }
    }

    /// The bundles a recipe's shell should load, in load order: the core
    /// set unless skipped, the required set unless skipped, then the
    /// recipe's own selection. Duplicates collapse to the first mention.
    #[must_use]
    pub fn select_plugins(
        &self,
        requested: &[String],
        skip_required_plugins: bool,
        skip_core: bool,
    ) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        if !skip_core && self.plugins.contains_key(CORE_PLUGIN) {
            names.push(CORE_PLUGIN.to_string());
        }
        if !skip_required_plugins {
            for name in &self.required {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
        }
        for name in requested {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        names
    }

    /// Strong ETag for a recipe's rendered shell: template bytes, the bag
    /// name list, every selected plugin's content hash, the delivery mode,
    /// and the highest revision id in scope.
    #[must_use]
    pub fn wiki_etag(
        &self,
        bag_names: &[String],
        plugin_names: &[String],
        max_revision: i64,
        inline_plugins: bool,
    ) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.template_hash.as_bytes());
        for name in bag_names {
            hasher.update(name.as_bytes());
            hasher.update([0]);
        }
        for name in plugin_names {
            if let Some(plugin) = self.plugins.get(name) {
                hasher.update(plugin.hash.as_bytes());
            }
        }
        hasher.update([u8::from(inline_plugins)]);
        hasher.update(max_revision.to_le_bytes());
        format!("\"{}\"", hex::encode(hasher.finalize()))
    }
}

/// Escapes a JSON blob for embedding inside a `<script>` element.
#[must_use]
pub fn escape_script_json(json: &str) -> String {
    json.replace("</script", "<\\/script").replace("<!--", "<\\!--")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_splits_at_markers() {
        let assets = WikiAssets::from_template(DEFAULT_TEMPLATE);
        assert!(!assets.head.is_empty());
        assert!(!assets.mid.is_empty());
        assert!(!assets.tail.is_empty());
        let whole = [&assets.head[..], &assets.mid[..], &assets.tail[..]].concat();
        assert!(String::from_utf8(whole).unwrap().contains("tiddler-store"));
    }

    #[test]
    fn test_etag_changes_with_inputs() {
        let assets = WikiAssets::from_template(DEFAULT_TEMPLATE);
        let bags = vec!["a".to_string(), "b".to_string()];
        let base = assets.wiki_etag(&bags, &[], 10, false);
        assert_eq!(base, assets.wiki_etag(&bags, &[], 10, false));
        assert_ne!(base, assets.wiki_etag(&bags, &[], 11, false));
        assert_ne!(base, assets.wiki_etag(&["a".to_string()], &[], 10, false));
        assert_ne!(base, assets.wiki_etag(&bags, &[], 10, true));
    }

    fn bundle(name: &str) -> PluginAsset {
        PluginAsset {
            name: name.to_string(),
            raw: Bytes::from_static(b"js"),
            gz: Bytes::new(),
            hash: name.to_string(),
        }
    }

    #[test]
    fn test_select_plugins_core_required_then_requested() {
        let mut assets = WikiAssets::from_template(DEFAULT_TEMPLATE);
        assets.plugins.insert("core".to_string(), bundle("core"));
        assets.plugins.insert("base".to_string(), bundle("base"));
        assets.plugins.insert("extra".to_string(), bundle("extra"));
        assets.required = vec!["base".to_string()];

        let extra = vec!["extra".to_string()];
        assert_eq!(assets.select_plugins(&extra, false, false), ["core", "base", "extra"]);
        assert_eq!(assets.select_plugins(&extra, true, false), ["core", "extra"]);
        assert_eq!(assets.select_plugins(&extra, false, true), ["base", "extra"]);
        assert_eq!(assets.select_plugins(&[], true, true), [""; 0]);
        // an explicit pick of an implied bundle does not duplicate it
        assert_eq!(assets.select_plugins(&["base".to_string()], false, true), ["base"]);
    }

    #[test]
    fn test_select_plugins_without_core_bundle() {
        let assets = WikiAssets::from_template(DEFAULT_TEMPLATE);
        assert_eq!(assets.select_plugins(&["x".to_string()], false, false), ["x"]);
    }

    #[test]
    fn test_escape_script_json() {
        let out = escape_script_json(r#"{"text":"</script><script>alert(1)"}"#);
        assert!(!out.contains("</script>"));
    }
}
