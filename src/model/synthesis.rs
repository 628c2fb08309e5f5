//! Feature Synthesis
//!
//! Walks the resolved schema graph and emits a feature tree per top-level
//! resource kind. Dispatch is a fixed rule table over [`DefinitionKind`]:
//!
//! - object with properties -> and-group, required properties mandatory
//! - oneOf union            -> alternative group of synthetic branch features
//! - anyOf disjunction      -> or group of synthetic branch features
//! - allOf intersection     -> children folded into the enclosing and-group
//! - array of object        -> single repeatable element node
//! - scalar                 -> terminal node with a type/enum attribute
//!
//! Cycles are broken with an explicit path stack; a definition reached again
//! through another branch is recorded as an alias of its first expansion, not
//! duplicated.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

use crate::diagnostics::{DiagnosticCode, Diagnostics};
use crate::graph::{DefinitionKind, DefinitionName, SchemaGraph, TypeRef};

use super::{AttributeConstraint, Cardinality, FeatureId, FeatureNode, GroupType};

/// Keywords of the model text grammar; feature segments colliding with one
/// get a stable escape prefix.
const RESERVED: &[&str] = &[
    "model",
    "features",
    "constraints",
    "mandatory",
    "optional",
    "alternative",
    "or",
    "and",
    "requires",
    "excludes",
    "true",
    "false",
];

/// Sanitize one feature-id segment: grammar-safe characters only, never a
/// reserved keyword, never starting with a digit.
pub fn sanitize_segment(raw: &str) -> String {
    let mut out: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if out.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(true) {
        out.insert(0, '_');
    }
    if RESERVED.contains(&out.as_str()) {
        out.insert(0, '_');
    }
    out
}

/// Strip characters that break the model grammar out of a description
pub fn clean_description(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii() && *c != '\n' && *c != '\r')
        .filter(|c| !matches!(c, '\'' | '"' | '`' | '{' | '}' | '\\'))
        .collect::<String>()
        .trim()
        .to_string()
}

fn is_deprecated(description: &str) -> bool {
    let lower = description.to_lowercase();
    lower.contains("deprecated:") || lower.contains("deprecated.") || lower.contains("deprecated field")
}

/// Short display name of a definition (last qualified segment)
fn short_name(name: &DefinitionName) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

/// Walks a read-only schema graph and accumulates feature trees plus the
/// metadata maps that end up in the assembled model. One synthesizer instance
/// is scoped to one model build.
pub struct Synthesizer<'g> {
    graph: &'g SchemaGraph,
    /// Definition -> feature id of its first (canonical) expansion
    expanded: HashMap<DefinitionName, FeatureId>,
    pub aliases: BTreeMap<FeatureId, FeatureId>,
    pub descriptions: BTreeMap<FeatureId, String>,
    pub defaults: BTreeMap<FeatureId, String>,
    pub deprecated: BTreeSet<FeatureId>,
    pub diagnostics: Diagnostics,
}

impl<'g> Synthesizer<'g> {
    pub fn new(graph: &'g SchemaGraph) -> Self {
        Self {
            graph,
            expanded: HashMap::new(),
            aliases: BTreeMap::new(),
            descriptions: BTreeMap::new(),
            defaults: BTreeMap::new(),
            deprecated: BTreeSet::new(),
            diagnostics: Diagnostics::new(),
        }
    }

    /// Definition name -> feature id of its canonical expansion
    pub fn expansions(&self) -> &HashMap<DefinitionName, FeatureId> {
        &self.expanded
    }

    /// Synthesize the feature tree for one top-level resource kind.
    /// Returns `None` when the definition is not in the graph.
    pub fn synthesize_kind(&mut self, definition: &str) -> Option<FeatureNode> {
        let def = self.graph.get(definition)?;
        let id = sanitize_segment(short_name(&def.name));
        let mut node = FeatureNode::new(id, Cardinality::Mandatory);
        node.provenance = def.name.clone();

        if let Some(desc) = &def.description {
            self.descriptions
                .insert(node.id.clone(), clean_description(desc));
        }

        let mut stack = vec![def.name.clone()];
        self.expanded.insert(def.name.clone(), node.id.clone());
        self.expand_definition(definition, &mut node, &mut stack);
        debug!(kind = definition, features = count(&node), "synthesized kind");
        Some(node)
    }

    fn expand_definition(
        &mut self,
        name: &str,
        node: &mut FeatureNode,
        stack: &mut Vec<DefinitionName>,
    ) {
        let Some(def) = self.graph.get(name) else {
            return;
        };

        // Clone is what lets the rule table borrow &mut self while walking;
        // the graph itself stays read-only.
        match def.kind.clone() {
            DefinitionKind::Object {
                properties,
                required,
            } => {
                node.group = GroupType::And;
                for prop in &properties {
                    let segment = sanitize_segment(&prop.name);
                    if segment != prop.name {
                        self.diagnostics.report(
                            format!("{}.{}", node.id, prop.name),
                            DiagnosticCode::EscapedKeyword,
                            format!("property '{}' renamed to '{}'", prop.name, segment),
                        );
                    }
                    let id = format!("{}.{}", node.id, segment);
                    let cardinality = if required.contains(&prop.name) {
                        Cardinality::Mandatory
                    } else {
                        Cardinality::Optional
                    };
                    let mut child = FeatureNode::new(id, cardinality);
                    child.provenance = format!("{}.{}", def.name, prop.name);

                    if let Some(desc) = &prop.description {
                        let cleaned = clean_description(desc);
                        if is_deprecated(&cleaned) {
                            self.deprecated.insert(child.id.clone());
                        }
                        self.descriptions.insert(child.id.clone(), cleaned);
                    }
                    if let Some(default) = &prop.default {
                        self.defaults.insert(child.id.clone(), default.clone());
                    }

                    self.expand_type_ref(&mut child, &prop.ty, stack);
                    node.children.push(child);
                }
            }

            DefinitionKind::Array { items } => {
                // Cardinality of repetition is a data-value concern; the
                // element expands into this single node.
                node.repeatable = true;
                self.expand_type_ref(node, &items, stack);
            }

            DefinitionKind::Scalar {
                ty,
                enum_values,
                default,
            } => {
                node.attribute = Some(AttributeConstraint { ty, enum_values });
                if let Some(default) = default {
                    self.defaults.insert(node.id.clone(), default);
                }
            }

            DefinitionKind::Union {
                branches,
                exclusive,
            } => {
                node.group = if exclusive {
                    GroupType::Alternative
                } else {
                    GroupType::Or
                };
                let mut used: BTreeSet<String> = BTreeSet::new();
                for (i, branch) in branches.iter().enumerate() {
                    let mut label = branch_label(branch);
                    if !used.insert(label.clone()) {
                        label = format!("{}{}", label, i);
                        used.insert(label.clone());
                    }
                    let id = format!("{}.{}", node.id, label);
                    let mut child = FeatureNode::new(id, Cardinality::Optional);
                    child.provenance = format!("{}<{}>", def.name, i);
                    self.expand_type_ref(&mut child, branch, stack);
                    node.children.push(child);
                }
            }

            DefinitionKind::Intersection { parts } => {
                // Flattened merge: parts fold into this node's and-group
                for part in &parts {
                    self.expand_type_ref(node, part, stack);
                }
            }

            DefinitionKind::Opaque => {
                // Unknown feature: selectable, carries no modeled structure
            }
        }
    }

    fn expand_type_ref(&mut self, node: &mut FeatureNode, ty: &TypeRef, stack: &mut Vec<DefinitionName>) {
        match ty {
            TypeRef::Ref(target) => {
                if stack.iter().any(|n| n == target) {
                    // Reference cycle: the feature already exists on this
                    // path, so the recursion stops here.
                    return;
                }
                if let Some(canonical) = self.dedup_target(target, node).cloned() {
                    self.aliases.insert(node.id.clone(), canonical.clone());
                    self.diagnostics.report(
                        node.id.clone(),
                        DiagnosticCode::AliasedExpansion,
                        format!("'{}' already expanded at '{}'", target, canonical),
                    );
                    return;
                }
                stack.push(target.clone());
                self.expanded
                    .entry(target.clone())
                    .or_insert_with(|| node.id.clone());
                self.expand_definition(target, node, stack);
                stack.pop();
            }
            TypeRef::Scalar { ty, enum_values } => {
                node.attribute = Some(AttributeConstraint {
                    ty: *ty,
                    enum_values: enum_values.clone(),
                });
            }
            TypeRef::Array(inner) | TypeRef::Map(inner) => {
                node.repeatable = true;
                self.expand_type_ref(node, inner, stack);
            }
            TypeRef::Opaque => {}
        }
    }

    /// Composite named definitions expand once; later reachings alias the
    /// first expansion. Scalars and site-specific inline definitions always
    /// re-expand (their attributes are needed at every site).
    fn dedup_target(&self, target: &str, node: &FeatureNode) -> Option<&FeatureId> {
        let canonical = self.expanded.get(target)?;
        if *canonical == node.id {
            return None;
        }
        let def = self.graph.get(target)?;
        let composite = match &def.kind {
            DefinitionKind::Object { properties, .. } => !properties.is_empty(),
            DefinitionKind::Union { .. } | DefinitionKind::Intersection { .. } => true,
            DefinitionKind::Array { .. } => self.graph.is_cyclic(target),
            _ => false,
        };
        composite.then_some(canonical)
    }
}

/// Display label for a union branch; shared with the constraint deriver so
/// union-exclusion constraints land on the same ids synthesis emitted.
pub(crate) fn branch_label(branch: &TypeRef) -> String {
    match branch {
        TypeRef::Ref(name) => sanitize_segment(short_name(name)),
        TypeRef::Scalar { ty, .. } => format!("as{}", ty.as_str()),
        TypeRef::Array(_) => "asList".to_string(),
        TypeRef::Map(_) => "asMap".to_string(),
        TypeRef::Opaque => "asUnknown".to_string(),
    }
}

fn count(node: &FeatureNode) -> usize {
    let mut n = 0;
    node.walk(&mut |_| n += 1);
    n
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph;
    use serde_json::json;

    fn synthesize(doc: serde_json::Value, kind: &str) -> (FeatureNode, Diagnostics) {
        let mut diags = Diagnostics::new();
        let g = graph::resolve(&doc, &[kind.to_string()], &mut diags).unwrap();
        let mut synth = Synthesizer::new(&g);
        let tree = synth.synthesize_kind(kind).unwrap();
        let mut all = diags;
        all.merge(synth.diagnostics);
        (tree, all)
    }

    #[test]
    fn test_object_mapping() {
        let (tree, _) = synthesize(
            json!({
                "definitions": {
                    "Pod": {
                        "properties": {
                            "spec": { "$ref": "#/definitions/PodSpec" },
                            "status": { "type": "string" }
                        },
                        "required": ["spec"]
                    },
                    "PodSpec": {
                        "properties": { "hostname": { "type": "string" } }
                    }
                }
            }),
            "Pod",
        );

        assert_eq!(tree.id, "Pod");
        assert_eq!(tree.group, GroupType::And);
        assert_eq!(tree.children.len(), 2);

        let spec = tree.find("Pod.spec").unwrap();
        assert_eq!(spec.cardinality, Cardinality::Mandatory);
        assert!(spec.find("Pod.spec.hostname").is_some());

        let status = tree.find("Pod.status").unwrap();
        assert_eq!(status.cardinality, Cardinality::Optional);
        assert!(status.is_leaf());
    }

    #[test]
    fn test_union_becomes_alternative_group() {
        let (tree, _) = synthesize(
            json!({
                "definitions": {
                    "Backend": {
                        "properties": {
                            "port": { "$ref": "#/definitions/IntOrString" }
                        }
                    },
                    "IntOrString": {
                        "oneOf": [ { "type": "integer" }, { "type": "string" } ]
                    }
                }
            }),
            "Backend",
        );

        let port = tree.find("Backend.port").unwrap();
        assert_eq!(port.group, GroupType::Alternative);
        assert_eq!(port.children.len(), 2);
        assert!(port.find("Backend.port.asInteger").is_some());
        assert!(port.find("Backend.port.asString").is_some());
    }

    #[test]
    fn test_disjunction_becomes_or_group() {
        let (tree, _) = synthesize(
            json!({
                "definitions": {
                    "Probe": {
                        "anyOf": [
                            { "$ref": "#/definitions/ExecAction" },
                            { "$ref": "#/definitions/HttpAction" }
                        ]
                    },
                    "ExecAction": { "properties": { "command": { "type": "string" } } },
                    "HttpAction": { "properties": { "path": { "type": "string" } } }
                }
            }),
            "Probe",
        );

        assert_eq!(tree.group, GroupType::Or);
        assert_eq!(tree.children.len(), 2);
        assert!(tree.find("Probe.ExecAction.command").is_some());
    }

    #[test]
    fn test_intersection_flattens() {
        let (tree, _) = synthesize(
            json!({
                "definitions": {
                    "Widget": {
                        "allOf": [
                            { "$ref": "#/definitions/Meta" },
                            { "$ref": "#/definitions/Spec" }
                        ]
                    },
                    "Meta": { "properties": { "name": { "type": "string" } } },
                    "Spec": { "properties": { "size": { "type": "integer" } } }
                }
            }),
            "Widget",
        );

        // No synthetic group level: both parts fold into Widget's and-group
        assert_eq!(tree.group, GroupType::And);
        assert_eq!(tree.children.len(), 2);
        assert!(tree.find("Widget.name").is_some());
        assert!(tree.find("Widget.size").is_some());
    }

    #[test]
    fn test_array_of_object_is_single_repeatable_node() {
        let (tree, _) = synthesize(
            json!({
                "definitions": {
                    "PodSpec": {
                        "properties": {
                            "containers": {
                                "type": "array",
                                "items": { "$ref": "#/definitions/Container" }
                            }
                        },
                        "required": ["containers"]
                    },
                    "Container": {
                        "properties": { "image": { "type": "string" } },
                        "required": ["image"]
                    }
                }
            }),
            "PodSpec",
        );

        let containers = tree.find("PodSpec.containers").unwrap();
        assert!(containers.repeatable);
        assert_eq!(containers.cardinality, Cardinality::Mandatory);
        // One element expansion, not one feature per instance
        assert_eq!(containers.children.len(), 1);
        assert!(containers.find("PodSpec.containers.image").is_some());
    }

    #[test]
    fn test_scalar_enum_becomes_attribute() {
        let (tree, _) = synthesize(
            json!({
                "definitions": {
                    "Container": {
                        "properties": {
                            "imagePullPolicy": {
                                "type": "string",
                                "enum": ["Always", "Never", "IfNotPresent"]
                            }
                        }
                    }
                }
            }),
            "Container",
        );

        let policy = tree.find("Container.imagePullPolicy").unwrap();
        assert!(policy.is_leaf(), "enum values are an attribute, not child features");
        let attr = policy.attribute.as_ref().unwrap();
        assert_eq!(attr.enum_values, vec!["Always", "Never", "IfNotPresent"]);
    }

    #[test]
    fn test_self_reference_expands_exactly_once() {
        let (tree, _) = synthesize(
            json!({
                "definitions": {
                    "JSONSchemaProps": {
                        "properties": {
                            "not": { "type": "boolean" },
                            "items": { "$ref": "#/definitions/JSONSchemaProps" }
                        }
                    }
                }
            }),
            "JSONSchemaProps",
        );

        let mut occurrences = 0;
        tree.walk(&mut |n| {
            if n.provenance.starts_with("JSONSchemaProps.items") {
                occurrences += 1;
            }
        });
        assert_eq!(occurrences, 1, "cycle must be broken after one expansion");
        // The recursive child exists but has no further expansion
        let items = tree.find("JSONSchemaProps.items").unwrap();
        assert!(items.is_leaf());
    }

    #[test]
    fn test_shared_definition_recorded_as_alias() {
        let (tree, diags) = synthesize(
            json!({
                "definitions": {
                    "Deployment": {
                        "properties": {
                            "primary": { "$ref": "#/definitions/Template" },
                            "canary": { "$ref": "#/definitions/Template" }
                        }
                    },
                    "Template": {
                        "properties": { "image": { "type": "string" } }
                    }
                }
            }),
            "Deployment",
        );

        assert!(tree.find("Deployment.primary.image").is_some());
        let canary = tree.find("Deployment.canary").unwrap();
        assert!(canary.is_leaf(), "second visit must not duplicate the subtree");
        assert_eq!(diags.count_of(DiagnosticCode::AliasedExpansion), 1);
    }

    #[test]
    fn test_reserved_segment_is_escaped() {
        let (tree, diags) = synthesize(
            json!({
                "definitions": {
                    "Rule": {
                        "properties": { "requires": { "type": "string" } }
                    }
                }
            }),
            "Rule",
        );

        assert!(tree.find("Rule._requires").is_some());
        assert_eq!(diags.count_of(DiagnosticCode::EscapedKeyword), 1);
    }
}
