//! Feature model types
//!
//! The variability model produced from a schema graph: a feature tree with
//! group semantics plus propositional cross-tree constraints. The model is
//! persisted through [`text`] and reloaded independently of the schema
//! pipeline for every later validation run.

pub mod assemble;
pub mod constraints;
pub mod synthesis;
pub mod text;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::{Error, Result};
use crate::graph::ScalarType;

/// Feature identifier: a dotted path of sanitized schema-path segments,
/// stable across runs (e.g. "Pod.spec.containers")
pub type FeatureId = String;

/// Whether a child must be selected whenever its parent is selected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    Mandatory,
    Optional,
}

/// Cardinality rule over how many children of a feature may be selected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupType {
    /// Each child constrained only by its own cardinality
    And,
    /// At least one child selected
    Or,
    /// Exactly one child selected
    Alternative,
}

/// Value constraint attached to a terminal feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeConstraint {
    pub ty: ScalarType,
    /// Allowed values; empty means unconstrained
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<String>,
}

/// A node in the feature tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureNode {
    pub id: FeatureId,
    pub cardinality: Cardinality,
    /// Group type governing this node's children
    pub group: GroupType,
    pub children: Vec<FeatureNode>,
    /// Type/enum constraint for terminal nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<AttributeConstraint>,
    /// Array element: repetition is a data-value concern, not per-instance features
    #[serde(default)]
    pub repeatable: bool,
    /// Originating schema path
    pub provenance: String,
}

impl FeatureNode {
    pub fn new(id: impl Into<FeatureId>, cardinality: Cardinality) -> Self {
        let id = id.into();
        Self {
            provenance: id.clone(),
            id,
            cardinality,
            group: GroupType::And,
            children: Vec::new(),
            attribute: None,
            repeatable: false,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Depth-first traversal, parent before children, in declaration order
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a FeatureNode)) {
        f(self);
        for child in &self.children {
            child.walk(f);
        }
    }

    /// Find a node by feature id anywhere in this subtree
    pub fn find(&self, id: &str) -> Option<&FeatureNode> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(id))
    }
}

/// Propositional expression over feature identifiers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConstraintExpr {
    Feature(FeatureId),
    Not(Box<ConstraintExpr>),
    And(Vec<ConstraintExpr>),
    Or(Vec<ConstraintExpr>),
    Implies(Box<ConstraintExpr>, Box<ConstraintExpr>),
}

impl ConstraintExpr {
    /// Evaluate against a selection; an absent feature is false
    pub fn eval(&self, selected: &BTreeSet<FeatureId>) -> bool {
        match self {
            Self::Feature(id) => selected.contains(id),
            Self::Not(e) => !e.eval(selected),
            Self::And(es) => es.iter().all(|e| e.eval(selected)),
            Self::Or(es) => es.iter().any(|e| e.eval(selected)),
            Self::Implies(a, b) => !a.eval(selected) || b.eval(selected),
        }
    }

    /// Collect every feature id mentioned in the expression
    pub fn features<'a>(&'a self, out: &mut Vec<&'a FeatureId>) {
        match self {
            Self::Feature(id) => out.push(id),
            Self::Not(e) => e.features(out),
            Self::And(es) | Self::Or(es) => es.iter().for_each(|e| e.features(out)),
            Self::Implies(a, b) => {
                a.features(out);
                b.features(out);
            }
        }
    }
}

impl fmt::Display for ConstraintExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Feature(id) => write!(f, "{}", id),
            Self::Not(e) => write!(f, "!{}", paren(e)),
            Self::And(es) => join(f, es, " & "),
            Self::Or(es) => join(f, es, " | "),
            Self::Implies(a, b) => write!(f, "{} => {}", paren(a), paren(b)),
        }
    }
}

fn paren(e: &ConstraintExpr) -> String {
    match e {
        ConstraintExpr::Feature(_) | ConstraintExpr::Not(_) => e.to_string(),
        _ => format!("({})", e),
    }
}

fn join(f: &mut fmt::Formatter<'_>, es: &[ConstraintExpr], sep: &str) -> fmt::Result {
    for (i, e) in es.iter().enumerate() {
        if i > 0 {
            write!(f, "{}", sep)?;
        }
        write!(f, "{}", paren(e))?;
    }
    Ok(())
}

/// Kind and operands of a cross-tree constraint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConstraintKind {
    Requires { lhs: FeatureId, rhs: FeatureId },
    Excludes { lhs: FeatureId, rhs: FeatureId },
    Expr(ConstraintExpr),
}

/// A cross-tree constraint with its derivation trace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Constraint {
    pub kind: ConstraintKind,
    /// Which rule derived this constraint, and from where
    pub trace: String,
}

impl Constraint {
    pub fn requires(lhs: impl Into<FeatureId>, rhs: impl Into<FeatureId>, trace: impl Into<String>) -> Self {
        Self {
            kind: ConstraintKind::Requires {
                lhs: lhs.into(),
                rhs: rhs.into(),
            },
            trace: trace.into(),
        }
    }

    pub fn excludes(lhs: impl Into<FeatureId>, rhs: impl Into<FeatureId>, trace: impl Into<String>) -> Self {
        Self {
            kind: ConstraintKind::Excludes {
                lhs: lhs.into(),
                rhs: rhs.into(),
            },
            trace: trace.into(),
        }
    }

    pub fn expr(expr: ConstraintExpr, trace: impl Into<String>) -> Self {
        Self {
            kind: ConstraintKind::Expr(expr),
            trace: trace.into(),
        }
    }

    /// Evaluate against a selection; an absent feature is false
    pub fn eval(&self, selected: &BTreeSet<FeatureId>) -> bool {
        match &self.kind {
            ConstraintKind::Requires { lhs, rhs } => {
                !selected.contains(lhs) || selected.contains(rhs)
            }
            ConstraintKind::Excludes { lhs, rhs } => {
                !(selected.contains(lhs) && selected.contains(rhs))
            }
            ConstraintKind::Expr(e) => e.eval(selected),
        }
    }

    /// Stable identifier used in violation reports
    pub fn violation_id(&self) -> String {
        match &self.kind {
            ConstraintKind::Requires { lhs, rhs } => format!("requires:{}->{}", lhs, rhs),
            ConstraintKind::Excludes { lhs, rhs } => format!("excludes:{},{}", lhs, rhs),
            ConstraintKind::Expr(_) => format!("expr:{}", self.trace),
        }
    }

    /// Every feature id this constraint mentions
    pub fn referenced_features(&self) -> Vec<&FeatureId> {
        match &self.kind {
            ConstraintKind::Requires { lhs, rhs } | ConstraintKind::Excludes { lhs, rhs } => {
                vec![lhs, rhs]
            }
            ConstraintKind::Expr(e) => {
                let mut out = Vec::new();
                e.features(&mut out);
                out
            }
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ConstraintKind::Requires { lhs, rhs } => write!(f, "{} => {}", lhs, rhs),
            ConstraintKind::Excludes { lhs, rhs } => write!(f, "{} => !{}", lhs, rhs),
            ConstraintKind::Expr(e) => write!(f, "{}", e),
        }
    }
}

/// The assembled variability model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureModel {
    pub name: String,
    /// Schema version this model was synthesized from
    pub schema_version: semver::Version,
    /// Synthetic root; one child per top-level resource kind
    pub root: FeatureNode,
    pub constraints: Vec<Constraint>,
    /// Feature documentation carried from schema descriptions
    pub descriptions: BTreeMap<FeatureId, String>,
    /// Declared default values carried from the schema
    pub defaults: BTreeMap<FeatureId, String>,
    /// Features whose schema description declares them deprecated
    pub deprecated: BTreeSet<FeatureId>,
    /// Later-visited schema paths mapped to their first expansion
    pub aliases: BTreeMap<FeatureId, FeatureId>,
}

impl FeatureModel {
    /// All feature ids in depth-first order
    pub fn feature_ids(&self) -> Vec<&FeatureId> {
        let mut ids = Vec::new();
        self.root.walk(&mut |n| ids.push(&n.id));
        ids
    }

    pub fn feature_count(&self) -> usize {
        let mut n = 0;
        self.root.walk(&mut |_| n += 1);
        n
    }

    pub fn find(&self, id: &str) -> Option<&FeatureNode> {
        self.root.find(id)
    }

    /// Whether an id names a feature directly or through the alias table
    pub fn contains(&self, id: &str) -> bool {
        self.find(id).is_some() || self.aliases.contains_key(id)
    }

    /// Check model invariants: unique feature ids, and every constraint
    /// referencing an existing feature (directly or via alias).
    pub fn verify(&self) -> Result<()> {
        let mut seen: BTreeSet<&FeatureId> = BTreeSet::new();
        let mut duplicate = None;
        self.root.walk(&mut |n| {
            if !seen.insert(&n.id) && duplicate.is_none() {
                duplicate = Some(n.id.clone());
            }
        });
        if let Some(id) = duplicate {
            return Err(Error::DuplicateFeature(id));
        }

        for constraint in &self.constraints {
            for feature in constraint.referenced_features() {
                if !self.contains(feature) {
                    return Err(Error::UnknownFeature {
                        context: constraint.violation_id(),
                        feature: feature.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Resolve an id through the alias table to its canonical feature id
    pub fn canonical<'a>(&'a self, id: &'a str) -> &'a str {
        self.aliases.get(id).map(|s| s.as_str()).unwrap_or(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selection(ids: &[&str]) -> BTreeSet<FeatureId> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_constraint_eval_absent_is_false() {
        let c = Constraint::requires("A", "B", "rule:test");
        assert!(c.eval(&selection(&[])));
        assert!(c.eval(&selection(&["B"])));
        assert!(!c.eval(&selection(&["A"])));
        assert!(c.eval(&selection(&["A", "B"])));

        let x = Constraint::excludes("A", "B", "rule:test");
        assert!(x.eval(&selection(&["A"])));
        assert!(!x.eval(&selection(&["A", "B"])));
    }

    #[test]
    fn test_expr_rendering() {
        let e = ConstraintExpr::Implies(
            Box::new(ConstraintExpr::Feature("A".into())),
            Box::new(ConstraintExpr::Or(vec![
                ConstraintExpr::Feature("B".into()),
                ConstraintExpr::Not(Box::new(ConstraintExpr::Feature("C".into()))),
            ])),
        );
        assert_eq!(e.to_string(), "A => (B | !C)");
    }

    #[test]
    fn test_verify_rejects_duplicate_ids() {
        let mut root = FeatureNode::new("root", Cardinality::Mandatory);
        root.children.push(FeatureNode::new("A", Cardinality::Optional));
        root.children.push(FeatureNode::new("A", Cardinality::Optional));
        let model = FeatureModel {
            name: "m".into(),
            schema_version: semver::Version::new(1, 0, 0),
            root,
            constraints: Vec::new(),
            descriptions: BTreeMap::new(),
            defaults: BTreeMap::new(),
            deprecated: BTreeSet::new(),
            aliases: BTreeMap::new(),
        };
        assert!(matches!(model.verify(), Err(Error::DuplicateFeature(_))));
    }

    #[test]
    fn test_verify_rejects_dangling_constraint() {
        let mut root = FeatureNode::new("root", Cardinality::Mandatory);
        root.children.push(FeatureNode::new("A", Cardinality::Optional));
        let model = FeatureModel {
            name: "m".into(),
            schema_version: semver::Version::new(1, 0, 0),
            root,
            constraints: vec![Constraint::requires("A", "Ghost", "rule:test")],
            descriptions: BTreeMap::new(),
            defaults: BTreeMap::new(),
            deprecated: BTreeSet::new(),
            aliases: BTreeMap::new(),
        };
        assert!(matches!(model.verify(), Err(Error::UnknownFeature { .. })));
    }
}
