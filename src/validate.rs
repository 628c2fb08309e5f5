//! Model Validation
//!
//! Checks a [`ConfigurationSelection`] against a feature model. The result is
//! never a bare boolean: it is `valid` plus an ordered list of violated-rule
//! identifiers, so a failing document is diagnosable without re-running.
//!
//! Checks, in order:
//! 1. tree pass (depth-first): every mandatory child of a selected and-group
//!    feature must be selected (`mandatory:<child>`); or-groups need at least
//!    one selected child, alternative groups exactly one (`group:<parent>`);
//! 2. constraint pass, in model order, with an unselected feature counting as
//!    false (`requires:`/`excludes:`/`expr:` identifiers).
//!
//! Synthetic activations the model does not know (`isNull`/`isEmpty` markers
//! on unmodeled spots) are reported in `unknown_features`, never silently
//! dropped and never counted as violations.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::model::{Cardinality, FeatureId, FeatureModel, FeatureNode, GroupType};
use crate::translate::ConfigurationSelection;

/// Outcome of validating one document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub document_id: String,
    pub valid: bool,
    /// Ordered violated-rule identifiers
    pub violations: Vec<String>,
    /// Selected ids absent from the model (after alias resolution)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unknown_features: Vec<FeatureId>,
    /// Wall time spent on this document, filled by the batch layer
    #[serde(default)]
    pub elapsed_ms: u64,
}

/// Validate a selection against a model
pub fn validate(
    model: &FeatureModel,
    selection: &ConfigurationSelection,
    document_id: &str,
) -> ValidationReport {
    // Canonicalize through the alias table; collect ids the model has never
    // heard of (synthetic markers on unmodeled spots, stray activations).
    let mut selected: BTreeSet<FeatureId> = BTreeSet::new();
    let mut unknown_features = Vec::new();
    for id in &selection.selected {
        let canonical = model.canonical(id);
        if model.find(canonical).is_some() {
            selected.insert(canonical.to_string());
        } else {
            unknown_features.push(id.clone());
        }
    }
    // The synthetic root is always in force
    selected.insert(model.root.id.clone());

    let mut violations = Vec::new();
    check_tree(model, &model.root, &selected, &mut violations);

    for constraint in &model.constraints {
        if !constraint.eval(&selected) {
            violations.push(constraint.violation_id());
        }
    }

    ValidationReport {
        document_id: document_id.to_string(),
        valid: violations.is_empty(),
        violations,
        unknown_features,
        elapsed_ms: 0,
    }
}

fn is_selected(model: &FeatureModel, selected: &BTreeSet<FeatureId>, node: &FeatureNode) -> bool {
    selected.contains(&node.id) || selected.contains(model.canonical(&node.id))
}

fn check_tree(
    model: &FeatureModel,
    node: &FeatureNode,
    selected: &BTreeSet<FeatureId>,
    violations: &mut Vec<String>,
) {
    if is_selected(model, selected, node) && !node.children.is_empty() {
        match node.group {
            GroupType::And => {
                for child in &node.children {
                    if child.cardinality == Cardinality::Mandatory
                        && !is_selected(model, selected, child)
                    {
                        violations.push(format!("mandatory:{}", child.id));
                    }
                }
            }
            GroupType::Or => {
                let count = node
                    .children
                    .iter()
                    .filter(|c| is_selected(model, selected, c))
                    .count();
                if count == 0 {
                    violations.push(format!("group:{}", node.id));
                }
            }
            GroupType::Alternative => {
                let count = node
                    .children
                    .iter()
                    .filter(|c| is_selected(model, selected, c))
                    .count();
                if count != 1 {
                    violations.push(format!("group:{}", node.id));
                }
            }
        }
    }

    for child in &node.children {
        check_tree(model, child, selected, violations);
    }
}
