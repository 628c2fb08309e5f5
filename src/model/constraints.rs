//! Constraint Derivation
//!
//! An ordered set of independent rules run per definition; their outputs are
//! unioned, never short-circuited. Each derived constraint carries a trace
//! naming the rule and the schema path it came from.
//!
//! Conflicting derivations (both requires and excludes for the same feature
//! pair) are kept and flagged as a model-inconsistency warning; source
//! precedence is not well-defined, so no priority order is invented.

use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

use crate::diagnostics::{DiagnosticCode, Diagnostics};
use crate::graph::{Definition, DefinitionKind, DefinitionName, SchemaGraph};

use super::synthesis::{branch_label, sanitize_segment};
use super::{Constraint, ConstraintExpr, ConstraintKind, FeatureId, FeatureNode};

/// Result of the derivation pass
pub struct DerivedConstraints {
    pub constraints: Vec<Constraint>,
    pub diagnostics: Diagnostics,
}

/// Compiled description patterns, built once per derivation pass
struct RuleSet {
    /// "... Required when `scope` is set to ..." / "required when X is ..."
    required_when: Regex,
    /// "Must be set if type is ..." (the `type` sibling gates this property)
    must_be_set_if: Regex,
    /// "X and Y are mutually exclusive"
    mutually_exclusive: Regex,
    /// "At least one of X, Y and Z is required/must be set"
    at_least_one: Regex,
}

impl RuleSet {
    fn new() -> Self {
        Self {
            required_when: Regex::new(r"(?i)required when `?([A-Za-z][A-Za-z0-9_]*)`? is").unwrap(),
            must_be_set_if: Regex::new(r#"(?i)must be set if `?type`? is"#).unwrap(),
            mutually_exclusive: Regex::new(r"(?i)mutually exclusive").unwrap(),
            at_least_one: Regex::new(r"(?i)at least one of ([A-Za-z0-9_,`\s]+?)(?:is required|must be (?:set|specified)|\.)").unwrap(),
        }
    }
}

/// Derive cross-tree constraints for every definition that made it into the
/// feature trees. `expansions` maps definition names to the feature id of
/// their canonical expansion; `trees` are the synthesized kind trees used to
/// drop constraints whose features do not exist (never silently).
pub fn derive(
    graph: &SchemaGraph,
    expansions: &HashMap<DefinitionName, FeatureId>,
    trees: &[FeatureNode],
) -> DerivedConstraints {
    let rules = RuleSet::new();
    let mut diagnostics = Diagnostics::new();
    let mut constraints = Vec::new();

    for name in graph.names() {
        let Some(def) = graph.get(name) else { continue };
        let Some(base) = expansions.get(name) else {
            continue;
        };

        // Rule order is fixed; every rule sees the same definition
        derive_conditional_requirement(&rules, def, base, &mut constraints);
        derive_mutual_exclusion(&rules, def, base, &mut constraints);
        derive_union_exclusion(def, base, &mut constraints);
        derive_at_least_one(&rules, def, base, &mut constraints);
    }

    retain_known_features(&mut constraints, trees, &mut diagnostics);
    flag_conflicts(&constraints, &mut diagnostics);

    debug!(count = constraints.len(), "constraints derived");
    DerivedConstraints {
        constraints,
        diagnostics,
    }
}

/// R1: a property required only conditionally on a sibling yields a requires
/// constraint from the gating sibling to the dependent property.
fn derive_conditional_requirement(
    rules: &RuleSet,
    def: &Definition,
    base: &str,
    out: &mut Vec<Constraint>,
) {
    let DefinitionKind::Object { properties, .. } = &def.kind else {
        return;
    };

    for prop in properties {
        let Some(desc) = &prop.description else { continue };
        let this = feature_of(base, &prop.name);

        if let Some(caps) = rules.required_when.captures(desc) {
            let sibling = &caps[1];
            if properties.iter().any(|p| p.name == sibling) {
                out.push(Constraint::requires(
                    feature_of(base, sibling),
                    this.clone(),
                    format!("rule:conditional-requirement {}.{}", def.name, prop.name),
                ));
            }
        }

        if rules.must_be_set_if.is_match(desc) && properties.iter().any(|p| p.name == "type") {
            out.push(Constraint::requires(
                feature_of(base, "type"),
                this,
                format!("rule:conditional-requirement {}.{}", def.name, prop.name),
            ));
        }
    }
}

/// R2: properties documented as mutually exclusive yield pairwise excludes
/// between this property and every sibling its description names.
fn derive_mutual_exclusion(
    rules: &RuleSet,
    def: &Definition,
    base: &str,
    out: &mut Vec<Constraint>,
) {
    let DefinitionKind::Object { properties, .. } = &def.kind else {
        return;
    };

    let mut emitted: BTreeSet<(String, String)> = BTreeSet::new();
    for prop in properties {
        let Some(desc) = &prop.description else { continue };
        if !rules.mutually_exclusive.is_match(desc) {
            continue;
        }

        for sibling in properties.iter().filter(|p| p.name != prop.name) {
            if !mentions_word(desc, &sibling.name) {
                continue;
            }
            let pair = ordered_pair(&prop.name, &sibling.name);
            if !emitted.insert(pair) {
                continue;
            }
            out.push(Constraint::excludes(
                feature_of(base, &prop.name),
                feature_of(base, &sibling.name),
                format!("rule:mutual-exclusion {}.{}", def.name, prop.name),
            ));
        }
    }
}

/// R3: branches of an exclusive union yield pairwise excludes across their
/// branch features.
fn derive_union_exclusion(def: &Definition, base: &str, out: &mut Vec<Constraint>) {
    let DefinitionKind::Union {
        branches,
        exclusive: true,
    } = &def.kind
    else {
        return;
    };

    let mut labels: Vec<String> = Vec::with_capacity(branches.len());
    let mut used: BTreeSet<String> = BTreeSet::new();
    for (i, branch) in branches.iter().enumerate() {
        let mut label = branch_label(branch);
        if !used.insert(label.clone()) {
            label = format!("{}{}", label, i);
            used.insert(label.clone());
        }
        labels.push(label);
    }

    for i in 0..labels.len() {
        for j in (i + 1)..labels.len() {
            out.push(Constraint::excludes(
                format!("{}.{}", base, labels[i]),
                format!("{}.{}", base, labels[j]),
                format!("rule:union-exclusion {}", def.name),
            ));
        }
    }
}

/// R4: "at least one of A, B" over siblings yields an or-expression gated on
/// the enclosing feature.
fn derive_at_least_one(rules: &RuleSet, def: &Definition, base: &str, out: &mut Vec<Constraint>) {
    let DefinitionKind::Object { properties, .. } = &def.kind else {
        return;
    };

    for prop in properties {
        let Some(desc) = &prop.description else { continue };
        let Some(caps) = rules.at_least_one.captures(desc) else {
            continue;
        };

        let listed: Vec<&str> = caps[1]
            .split(|c: char| c == ',' || c.is_whitespace() || c == '`')
            .filter(|w| !w.is_empty() && *w != "and" && *w != "or")
            .collect();

        let members: Vec<ConstraintExpr> = listed
            .iter()
            .filter(|w| properties.iter().any(|p| &p.name == *w))
            .map(|w| ConstraintExpr::Feature(feature_of(base, w)))
            .collect();

        if members.len() < 2 {
            continue;
        }
        out.push(Constraint::expr(
            ConstraintExpr::Implies(
                Box::new(ConstraintExpr::Feature(base.to_string())),
                Box::new(ConstraintExpr::Or(members)),
            ),
            format!("rule:at-least-one {}.{}", def.name, prop.name),
        ));
        // The listed siblings all carry the same sentence; one constraint is enough
        break;
    }
}

fn feature_of(base: &str, property: &str) -> FeatureId {
    format!("{}.{}", base, sanitize_segment(property))
}

fn mentions_word(text: &str, word: &str) -> bool {
    text.split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .any(|w| w == word)
}

fn ordered_pair(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// Drop constraints whose features are absent from the synthesized trees,
/// surfacing each drop as a warning.
fn retain_known_features(
    constraints: &mut Vec<Constraint>,
    trees: &[FeatureNode],
    diagnostics: &mut Diagnostics,
) {
    let mut known: BTreeSet<&FeatureId> = BTreeSet::new();
    for tree in trees {
        tree.walk(&mut |n| {
            known.insert(&n.id);
        });
    }

    let mut dropped: Vec<(String, String)> = Vec::new();
    constraints.retain(|c| {
        let missing = c
            .referenced_features()
            .into_iter()
            .find(|f| !known.contains(f));
        match missing {
            Some(feature) => {
                dropped.push((c.trace.clone(), feature.clone()));
                false
            }
            None => true,
        }
    });
    for (trace, feature) in dropped {
        diagnostics.report(
            trace,
            DiagnosticCode::DanglingConstraint,
            format!("derived constraint references absent feature '{}'", feature),
        );
    }
}

/// Both requires and excludes over the same unordered feature pair is a model
/// inconsistency; both constraints stay in the model.
fn flag_conflicts(constraints: &[Constraint], diagnostics: &mut Diagnostics) {
    let mut pairs: BTreeMap<(String, String), (bool, bool, Vec<String>)> = BTreeMap::new();

    for c in constraints {
        let (pair, is_requires) = match &c.kind {
            ConstraintKind::Requires { lhs, rhs } => (ordered_pair(lhs, rhs), true),
            ConstraintKind::Excludes { lhs, rhs } => (ordered_pair(lhs, rhs), false),
            ConstraintKind::Expr(_) => continue,
        };
        let entry = pairs.entry(pair).or_insert((false, false, Vec::new()));
        if is_requires {
            entry.0 = true;
        } else {
            entry.1 = true;
        }
        entry.2.push(c.trace.clone());
    }

    for ((a, b), (requires, excludes, traces)) in pairs {
        if requires && excludes {
            diagnostics.constraint_conflict(&a, &b, &traces);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph;
    use crate::model::synthesis::Synthesizer;
    use serde_json::json;

    fn derive_from(doc: serde_json::Value, kinds: &[&str]) -> DerivedConstraints {
        let mut diags = Diagnostics::new();
        let kinds: Vec<String> = kinds.iter().map(|s| s.to_string()).collect();
        let g = graph::resolve(&doc, &kinds, &mut diags).unwrap();
        let mut synth = Synthesizer::new(&g);
        let trees: Vec<FeatureNode> = kinds
            .iter()
            .filter_map(|k| synth.synthesize_kind(k))
            .collect();
        derive(&g, synth.expansions(), &trees)
    }

    #[test]
    fn test_conditional_requirement_rule() {
        let derived = derive_from(
            json!({
                "definitions": {
                    "ScopedSelector": {
                        "properties": {
                            "scopeName": { "type": "string" },
                            "values": {
                                "type": "string",
                                "description": "Values list. Required when scopeName is set to PriorityClass."
                            }
                        }
                    }
                }
            }),
            &["ScopedSelector"],
        );

        assert_eq!(derived.constraints.len(), 1);
        match &derived.constraints[0].kind {
            ConstraintKind::Requires { lhs, rhs } => {
                assert_eq!(lhs, "ScopedSelector.scopeName");
                assert_eq!(rhs, "ScopedSelector.values");
            }
            other => panic!("expected Requires, got {:?}", other),
        }
        assert!(derived.constraints[0].trace.starts_with("rule:conditional-requirement"));
    }

    #[test]
    fn test_mutual_exclusion_rule() {
        let derived = derive_from(
            json!({
                "definitions": {
                    "Toleration": {
                        "properties": {
                            "value": {
                                "type": "string",
                                "description": "value and operator are mutually exclusive properties."
                            },
                            "operator": { "type": "string" }
                        }
                    }
                }
            }),
            &["Toleration"],
        );

        assert_eq!(derived.constraints.len(), 1);
        assert!(matches!(
            derived.constraints[0].kind,
            ConstraintKind::Excludes { .. }
        ));
    }

    #[test]
    fn test_union_exclusion_is_pairwise() {
        let derived = derive_from(
            json!({
                "definitions": {
                    "Value": {
                        "properties": { "raw": { "$ref": "#/definitions/RawValue" } }
                    },
                    "RawValue": {
                        "oneOf": [
                            { "type": "integer" },
                            { "type": "string" },
                            { "type": "boolean" }
                        ]
                    }
                }
            }),
            &["Value"],
        );

        let excludes: Vec<_> = derived
            .constraints
            .iter()
            .filter(|c| matches!(c.kind, ConstraintKind::Excludes { .. }))
            .collect();
        // 3 branches -> 3 pairs
        assert_eq!(excludes.len(), 3);
    }

    #[test]
    fn test_conflicting_pair_keeps_both_and_warns() {
        let derived = derive_from(
            json!({
                "definitions": {
                    "Odd": {
                        "properties": {
                            "a": {
                                "type": "string",
                                "description": "a and b are mutually exclusive. Required when b is set."
                            },
                            "b": { "type": "string" }
                        }
                    }
                }
            }),
            &["Odd"],
        );

        // Both the requires and the excludes survive
        assert_eq!(derived.constraints.len(), 2);
        assert_eq!(
            derived
                .diagnostics
                .count_of(DiagnosticCode::ConstraintConflict),
            1
        );
    }

    #[test]
    fn test_at_least_one_needs_two_known_members() {
        let derived = derive_from(
            json!({
                "definitions": {
                    "Spec": {
                        "properties": {
                            "a": {
                                "type": "string",
                                "description": "At least one of a, ghost must be set."
                            }
                        }
                    }
                }
            }),
            &["Spec"],
        );
        // Single listed member resolvable -> no expression emitted
        assert!(derived.constraints.is_empty());
    }
}
