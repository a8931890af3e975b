//! Reduces a full registry document to the slim record stored in the cache.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::contract::PackageDocument;

/// Top-level keys kept from a registry document.
pub const PACKAGE_KEYS: &[&str] = &["_rev", "name", "dist-tags", "versions"];

/// Keys kept from each entry of `versions`.
pub const VERSION_KEYS: &[&str] = &[
    "name",
    "version",
    "main",
    "browser",
    "unpkg",
    "dependencies",
    "devDependencies",
    "optionalDependencies",
    "peerDependencies",
    "module",
    "jsnext:main",
    "types",
    "typings",
];

/// Whitelisted projection of a [`PackageDocument`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlimPackage(Map<String, Value>);

impl SlimPackage {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn name(&self) -> Option<&str> {
        self.0.get("name").and_then(Value::as_str)
    }

    pub fn versions(&self) -> Option<&Map<String, Value>> {
        self.0.get("versions").and_then(Value::as_object)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

/// Keep only whitelisted fields. Pure; absent fields stay absent.
pub fn project(document: &PackageDocument) -> SlimPackage {
    let Some(source) = document.0.as_object() else {
        return SlimPackage::default();
    };

    let mut slim = pick(source, PACKAGE_KEYS);

    // A malformed `versions` is already carried over as-is by `pick`.
    if let Some(versions) = source.get("versions").and_then(Value::as_object) {
        let projected = versions
            .iter()
            .map(|(version, manifest)| {
                let manifest = manifest
                    .as_object()
                    .map(|m| pick(m, VERSION_KEYS))
                    .unwrap_or_default();
                (version.clone(), Value::Object(manifest))
            })
            .collect::<Map<_, _>>();
        slim.insert("versions".to_string(), Value::Object(projected));
    }

    SlimPackage(slim)
}

fn pick(source: &Map<String, Value>, keys: &[&str]) -> Map<String, Value> {
    keys.iter()
        .filter_map(|key| source.get(*key).map(|v| (key.to_string(), v.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn drops_unlisted_top_level_and_version_fields() {
        let doc = PackageDocument(json!({
            "_id": "left-pad",
            "_rev": "12-abc",
            "name": "left-pad",
            "readme": "# left-pad",
            "dist-tags": { "latest": "1.3.0" },
            "time": { "modified": "2020-01-01T00:00:00.000Z" },
            "versions": {
                "1.3.0": {
                    "name": "left-pad",
                    "version": "1.3.0",
                    "main": "index.js",
                    "scripts": { "test": "node test" },
                    "jsnext:main": "es/index.js",
                    "dist": { "tarball": "https://example.invalid/left-pad.tgz" }
                }
            }
        }));

        let slim = project(&doc);

        assert_eq!(
            slim.into_value(),
            json!({
                "_rev": "12-abc",
                "name": "left-pad",
                "dist-tags": { "latest": "1.3.0" },
                "versions": {
                    "1.3.0": {
                        "name": "left-pad",
                        "version": "1.3.0",
                        "main": "index.js",
                        "jsnext:main": "es/index.js"
                    }
                }
            })
        );
    }

    #[test]
    fn absent_fields_are_not_defaulted() {
        let slim = project(&PackageDocument(json!({ "name": "bare" })));
        assert_eq!(slim.into_value(), json!({ "name": "bare" }));
    }

    #[test]
    fn keeps_every_version_key_even_when_manifest_is_empty() {
        let slim = project(&PackageDocument(json!({
            "versions": { "0.0.1": {}, "0.0.2": { "readme": "x" }, "0.0.3": null }
        })));
        let versions = slim.versions().expect("versions present");
        assert_eq!(versions.len(), 3);
        assert!(versions.values().all(|v| v == &json!({})));
    }

    #[test]
    fn malformed_versions_value_is_copied_through() {
        let slim = project(&PackageDocument(json!({ "name": "odd", "versions": "1.0.0" })));
        assert_eq!(slim.into_value(), json!({ "name": "odd", "versions": "1.0.0" }));
        assert!(project(&PackageDocument(json!({ "versions": null })))
            .versions()
            .is_none());
    }

    #[test]
    fn non_object_document_projects_to_empty_record() {
        let slim = project(&PackageDocument(json!("not a document")));
        assert!(slim.as_map().is_empty());
    }
}
