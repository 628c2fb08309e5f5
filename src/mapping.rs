//! Key Mapping
//!
//! Bidirectional table between configuration key-paths and feature ids.
//! Patterns are dotted key paths whose array segments may carry a concrete
//! index (`ports[0]`) or a wildcard (`containers[*]`). Path uniqueness is
//! validated at load time; two entries able to match the same concrete key
//! are an error, never resolved by "last one wins".
//!
//! The table is tabular text, one entry per line:
//!
//! ```text
//! # key-path<TAB>feature-id<TAB>value-kind
//! Pod.spec.containers[*].image	Pod.spec.containers.image	verbatim
//! Pod.spec.hostNetwork	Pod.spec.hostNetwork	boolean-presence
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::{FeatureId, FeatureModel, FeatureNode};

/// How a mapped key contributes to the selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValueKind {
    /// Record the literal value alongside the activation
    Verbatim,
    /// Record the activation only
    BooleanPresence,
    /// Record the literal value, constrained to the feature's enum set
    Enumerated,
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Verbatim => "verbatim",
            Self::BooleanPresence => "boolean-presence",
            Self::Enumerated => "enumerated",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "verbatim" => Some(Self::Verbatim),
            "boolean-presence" => Some(Self::BooleanPresence),
            "enumerated" => Some(Self::Enumerated),
            _ => None,
        }
    }
}

/// One mapping table row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyMappingEntry {
    pub pattern: String,
    pub feature: FeatureId,
    pub kind: ValueKind,
}

/// Index pattern on an array segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IndexPat {
    /// `[*]`
    Any,
    /// `[n]`
    At(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PatternSeg {
    name: String,
    index: Option<IndexPat>,
}

/// The loaded key mapping table
pub struct KeyMap {
    entries: Vec<KeyMappingEntry>,
    patterns: Vec<Vec<PatternSeg>>,
}

impl KeyMap {
    /// Build a table from entries, validating uniqueness and pairwise overlap
    pub fn new(entries: Vec<KeyMappingEntry>) -> Result<Self> {
        let mut patterns = Vec::with_capacity(entries.len());
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        for entry in &entries {
            if !seen.insert(entry.pattern.as_str()) {
                return Err(Error::DuplicateKeyPath {
                    path: entry.pattern.clone(),
                });
            }
            patterns.push(parse_pattern(&entry.pattern)?);
        }

        // Two distinct patterns that can match the same concrete key are
        // ambiguous; surface the collision instead of picking a winner.
        for i in 0..patterns.len() {
            for j in (i + 1)..patterns.len() {
                if overlaps(&patterns[i], &patterns[j]) {
                    return Err(Error::AmbiguousKeyPath {
                        path: entries[j].pattern.clone(),
                        first: entries[i].pattern.clone(),
                        second: entries[j].pattern.clone(),
                    });
                }
            }
        }

        debug!(entries = entries.len(), "key mapping table loaded");
        Ok(Self { entries, patterns })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[KeyMappingEntry] {
        &self.entries
    }

    /// Look up the entry matching a concrete key path.
    ///
    /// Overlap is rejected at load time; a second match here means the table
    /// was built outside [`KeyMap::new`] and is still an error.
    pub fn lookup(&self, key: &str) -> Result<Option<&KeyMappingEntry>> {
        let segs = parse_key(key)?;
        let mut hit: Option<usize> = None;
        for (i, pattern) in self.patterns.iter().enumerate() {
            if matches_key(pattern, &segs) {
                if let Some(first) = hit {
                    return Err(Error::AmbiguousKeyPath {
                        path: key.to_string(),
                        first: self.entries[first].pattern.clone(),
                        second: self.entries[i].pattern.clone(),
                    });
                }
                hit = Some(i);
            }
        }
        Ok(hit.map(|i| &self.entries[i]))
    }

    /// Derive a table from a feature model: one entry per feature, with `[*]`
    /// wildcards inserted after repeatable segments. Terminal features with a
    /// value constraint map as enumerated/verbatim, everything else as
    /// boolean presence.
    pub fn derive(model: &FeatureModel) -> Result<Self> {
        let mut entries = Vec::new();
        for kind in &model.root.children {
            derive_node(kind, "", &mut entries);
        }
        Self::new(entries)
    }

    // ========== Tabular text ==========

    pub fn from_text(text: &str) -> Result<Self> {
        let mut entries = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim_end();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut cols = line.split('\t');
            let (Some(pattern), Some(feature), Some(kind)) =
                (cols.next(), cols.next(), cols.next())
            else {
                return Err(Error::MappingParse {
                    line: lineno + 1,
                    message: "expected three tab-separated columns".to_string(),
                });
            };
            if cols.next().is_some() {
                return Err(Error::MappingParse {
                    line: lineno + 1,
                    message: "trailing columns".to_string(),
                });
            }
            let kind = ValueKind::parse(kind).ok_or_else(|| Error::MappingParse {
                line: lineno + 1,
                message: format!("unknown value kind '{}'", kind),
            })?;
            entries.push(KeyMappingEntry {
                pattern: pattern.to_string(),
                feature: feature.to_string(),
                kind,
            });
        }
        Self::new(entries)
    }

    pub fn to_text(&self) -> String {
        let mut out = String::from("# key-path\tfeature-id\tvalue-kind\n");
        for entry in &self.entries {
            out.push_str(&format!(
                "{}\t{}\t{}\n",
                entry.pattern,
                entry.feature,
                entry.kind.as_str()
            ));
        }
        out
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_text(&text)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_text())?;
        Ok(())
    }
}

fn derive_node(node: &FeatureNode, parent_pattern: &str, entries: &mut Vec<KeyMappingEntry>) {
    let segment = node.id.rsplit('.').next().unwrap_or(&node.id);
    let mut pattern = if parent_pattern.is_empty() {
        segment.to_string()
    } else {
        format!("{}.{}", parent_pattern, segment)
    };

    let kind = match &node.attribute {
        Some(attr) if !attr.enum_values.is_empty() => ValueKind::Enumerated,
        Some(_) => ValueKind::Verbatim,
        None => ValueKind::BooleanPresence,
    };
    entries.push(KeyMappingEntry {
        pattern: pattern.clone(),
        feature: node.id.clone(),
        kind,
    });

    if node.repeatable {
        // Indexed elements map onto the same repeatable feature
        pattern.push_str("[*]");
        entries.push(KeyMappingEntry {
            pattern: pattern.clone(),
            feature: node.id.clone(),
            kind,
        });
    }
    for child in &node.children {
        derive_node(child, &pattern, entries);
    }
}

fn parse_pattern(pattern: &str) -> Result<Vec<PatternSeg>> {
    pattern
        .split('.')
        .map(|seg| {
            if let Some(open) = seg.find('[') {
                let name = &seg[..open];
                let idx = seg[open..]
                    .strip_prefix('[')
                    .and_then(|s| s.strip_suffix(']'))
                    .ok_or_else(|| Error::MappingParse {
                        line: 0,
                        message: format!("malformed index in segment '{}'", seg),
                    })?;
                let index = if idx == "*" {
                    IndexPat::Any
                } else {
                    IndexPat::At(idx.parse().map_err(|_| Error::MappingParse {
                        line: 0,
                        message: format!("invalid index '{}'", idx),
                    })?)
                };
                Ok(PatternSeg {
                    name: name.to_string(),
                    index: Some(index),
                })
            } else {
                Ok(PatternSeg {
                    name: seg.to_string(),
                    index: None,
                })
            }
        })
        .collect()
}

struct KeySeg<'a> {
    name: &'a str,
    index: Option<usize>,
}

fn parse_key(key: &str) -> Result<Vec<KeySeg<'_>>> {
    key.split('.')
        .map(|seg| {
            if let Some(open) = seg.find('[') {
                let idx = seg[open..]
                    .strip_prefix('[')
                    .and_then(|s| s.strip_suffix(']'))
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| Error::MappingParse {
                        line: 0,
                        message: format!("malformed index in key segment '{}'", seg),
                    })?;
                Ok(KeySeg {
                    name: &seg[..open],
                    index: Some(idx),
                })
            } else {
                Ok(KeySeg {
                    name: seg,
                    index: None,
                })
            }
        })
        .collect()
}

fn matches_key(pattern: &[PatternSeg], key: &[KeySeg<'_>]) -> bool {
    pattern.len() == key.len()
        && pattern.iter().zip(key).all(|(p, k)| {
            p.name == k.name
                && match (p.index, k.index) {
                    (None, None) => true,
                    (Some(IndexPat::Any), Some(_)) => true,
                    (Some(IndexPat::At(n)), Some(i)) => n == i,
                    _ => false,
                }
        })
}

/// Whether two patterns can match the same concrete key
fn overlaps(a: &[PatternSeg], b: &[PatternSeg]) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|(x, y)| {
            x.name == y.name
                && match (x.index, y.index) {
                    (None, None) => true,
                    (Some(IndexPat::Any), Some(_)) | (Some(_), Some(IndexPat::Any)) => true,
                    (Some(IndexPat::At(n)), Some(IndexPat::At(m))) => n == m,
                    _ => false,
                }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(pattern: &str, feature: &str, kind: ValueKind) -> KeyMappingEntry {
        KeyMappingEntry {
            pattern: pattern.to_string(),
            feature: feature.to_string(),
            kind,
        }
    }

    #[test]
    fn test_wildcard_lookup() {
        let map = KeyMap::new(vec![entry(
            "Pod.spec.containers[*].image",
            "Pod.spec.containers.image",
            ValueKind::Verbatim,
        )])
        .unwrap();

        let hit = map.lookup("Pod.spec.containers[3].image").unwrap().unwrap();
        assert_eq!(hit.feature, "Pod.spec.containers.image");
        assert!(map.lookup("Pod.spec.containers.image").unwrap().is_none());
        assert!(map.lookup("Pod.spec.volumes[0].name").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_pattern_rejected() {
        let result = KeyMap::new(vec![
            entry("a.b", "A.b", ValueKind::Verbatim),
            entry("a.b", "A.other", ValueKind::Verbatim),
        ]);
        assert!(matches!(result, Err(Error::DuplicateKeyPath { .. })));
    }

    #[test]
    fn test_overlapping_patterns_rejected_at_load() {
        let result = KeyMap::new(vec![
            entry("a.b[*].c", "A.b.c", ValueKind::Verbatim),
            entry("a.b[0].c", "A.b.c0", ValueKind::Verbatim),
        ]);
        assert!(matches!(result, Err(Error::AmbiguousKeyPath { .. })));
    }

    #[test]
    fn test_tabular_round_trip() {
        let map = KeyMap::new(vec![
            entry("Pod.spec", "Pod.spec", ValueKind::BooleanPresence),
            entry(
                "Pod.spec.containers[*].image",
                "Pod.spec.containers.image",
                ValueKind::Verbatim,
            ),
        ])
        .unwrap();

        let text = map.to_text();
        let reloaded = KeyMap::from_text(&text).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.entries()[1].kind, ValueKind::Verbatim);
        assert_eq!(reloaded.to_text(), text);
    }

    #[test]
    fn test_malformed_line_is_surfaced() {
        let result = KeyMap::from_text("just-one-column\n");
        assert!(matches!(result, Err(Error::MappingParse { line: 1, .. })));
    }
}
