//! Configuration Translation
//!
//! Walks a concrete document's key/value tree and produces a
//! [`ConfigurationSelection`]: activated feature ids, literal values for
//! verbatim/enumerated hits, and the list of key paths that had no mapping
//! entry. Misses are never silently dropped.
//!
//! Null values and empty containers are normalized into synthetic
//! `isNull`/`isEmpty` activations rather than omitted, matching how sparse
//! real-world manifests declare them.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::mapping::{KeyMap, ValueKind};
use crate::model::FeatureId;

/// A concrete document translated into model terms
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigurationSelection {
    /// Activated feature ids, ancestors included
    pub selected: BTreeSet<FeatureId>,
    /// Literal values recorded for verbatim/enumerated hits
    pub values: BTreeMap<FeatureId, String>,
    /// Key paths with no mapping entry, in document order
    pub unmapped: Vec<String>,
}

/// Top-level routing keys; they name the resource kind rather than configure it
const ROUTING_KEYS: &[&str] = &["apiVersion", "kind"];

/// Translates documents against a shared, read-only key mapping table
pub struct Translator<'a> {
    keymap: &'a KeyMap,
    /// Per-document budget guarding against pathological nesting
    time_budget: Option<Duration>,
}

impl<'a> Translator<'a> {
    pub fn new(keymap: &'a KeyMap) -> Self {
        Self {
            keymap,
            time_budget: None,
        }
    }

    pub fn with_time_budget(mut self, budget: Duration) -> Self {
        self.time_budget = Some(budget);
        self
    }

    /// Translate one document. The document's `kind` field, when present,
    /// prefixes every key path so keys land under the right top-level
    /// feature.
    pub fn translate(
        &self,
        document_id: &str,
        doc: &serde_json::Value,
    ) -> Result<ConfigurationSelection> {
        let root = doc.as_object().ok_or_else(|| Error::MalformedDocument {
            document: document_id.to_string(),
            message: "document root is not a mapping".to_string(),
        })?;

        let kind = root.get("kind").and_then(|v| v.as_str());
        let mut walk = Walk {
            keymap: self.keymap,
            selection: ConfigurationSelection::default(),
            started: Instant::now(),
            budget: self.time_budget,
            document_id,
        };

        for (key, value) in root {
            if kind.is_some() && ROUTING_KEYS.contains(&key.as_str()) {
                continue;
            }
            let path = match kind {
                Some(kind) => format!("{}.{}", kind, key),
                None => key.clone(),
            };
            walk.visit(&path, value)?;
        }

        if let Some(kind) = kind {
            walk.activate(kind);
        }
        Ok(walk.selection)
    }
}

struct Walk<'a> {
    keymap: &'a KeyMap,
    selection: ConfigurationSelection,
    started: Instant,
    budget: Option<Duration>,
    document_id: &'a str,
}

impl Walk<'_> {
    fn check_budget(&self) -> Result<()> {
        if let Some(budget) = self.budget {
            if self.started.elapsed() > budget {
                return Err(Error::TranslationTimeout {
                    document: self.document_id.to_string(),
                    budget_ms: budget.as_millis() as u64,
                });
            }
        }
        Ok(())
    }

    /// Activate a feature and its ancestors
    fn activate(&mut self, feature: &str) {
        let mut end = feature.len();
        loop {
            self.selection.selected.insert(feature[..end].to_string());
            match feature[..end].rfind('.') {
                Some(pos) => end = pos,
                None => break,
            }
        }
    }

    fn visit(&mut self, path: &str, value: &serde_json::Value) -> Result<()> {
        self.check_budget()?;

        let entry = self.keymap.lookup(path)?;
        match value {
            serde_json::Value::Null => match entry {
                Some(entry) => {
                    let feature = entry.feature.clone();
                    self.activate(&feature);
                    self.activate(&format!("{}.isNull", feature));
                }
                None => self.selection.unmapped.push(path.to_string()),
            },

            serde_json::Value::Object(map) => {
                // A miss on a non-empty container is reported through its
                // children's paths, which pin down the exact unmapped keys
                match entry {
                    Some(entry) if map.is_empty() => {
                        let feature = entry.feature.clone();
                        self.activate(&feature);
                        self.activate(&format!("{}.isEmpty", feature));
                    }
                    Some(entry) => {
                        let feature = entry.feature.clone();
                        self.activate(&feature);
                    }
                    None if map.is_empty() => self.selection.unmapped.push(path.to_string()),
                    None => {}
                }
                for (key, child) in map {
                    self.visit(&format!("{}.{}", path, key), child)?;
                }
            }

            serde_json::Value::Array(items) => {
                match entry {
                    Some(entry) if items.is_empty() => {
                        let feature = entry.feature.clone();
                        self.activate(&feature);
                        self.activate(&format!("{}.isEmpty", feature));
                    }
                    Some(entry) => {
                        let feature = entry.feature.clone();
                        self.activate(&feature);
                    }
                    None if items.is_empty() => self.selection.unmapped.push(path.to_string()),
                    None => {}
                }
                for (i, item) in items.iter().enumerate() {
                    self.visit(&format!("{}[{}]", path, i), item)?;
                }
            }

            scalar => match entry {
                Some(entry) => {
                    let feature = entry.feature.clone();
                    self.activate(&feature);
                    if matches!(entry.kind, ValueKind::Verbatim | ValueKind::Enumerated) {
                        self.selection
                            .values
                            .insert(feature, scalar_text(scalar));
                    }
                }
                None => self.selection.unmapped.push(path.to_string()),
            },
        }
        Ok(())
    }
}

fn scalar_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Load a document file into one or more JSON values. YAML files may contain
/// multiple documents; each becomes its own unit of work.
pub fn load_documents(path: &Path) -> Result<Vec<serde_json::Value>> {
    let text = std::fs::read_to_string(path)?;
    let is_json = path
        .extension()
        .map(|e| e == "json")
        .unwrap_or(false);

    if is_json {
        return Ok(vec![serde_json::from_str(&text)?]);
    }

    let mut docs = Vec::new();
    for doc in serde_yaml::Deserializer::from_str(&text) {
        let value: serde_yaml::Value = serde_yaml::Value::deserialize(doc)?;
        if value.is_null() {
            continue;
        }
        docs.push(serde_json::to_value(value)?);
    }
    Ok(docs)
}
