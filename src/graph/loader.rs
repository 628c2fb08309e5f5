//! Schema Resolution
//!
//! Turns a flat mapping of definition name -> raw schema node into a
//! [`SchemaGraph`]. Definitions are materialized lazily from a worklist:
//! resolving a reference schedules the target instead of recursing, which is
//! what bounds memory and guarantees termination on self-referential
//! definitions. Only definitions transitively reachable from the requested
//! root set are expanded.

use petgraph::algo::kosaraju_scc;
use petgraph::graph::DiGraph;
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use tracing::debug;

use crate::diagnostics::{DiagnosticCode, Diagnostics};
use crate::error::{Error, Result};

use super::{
    Definition, DefinitionKind, DefinitionName, EdgeKind, Property, ScalarType, SchemaGraph,
    TypeRef,
};

/// Raw-node keys outside the supported operator subset. A node carrying one
/// degrades to an opaque feature instead of failing the build.
const UNSUPPORTED_KEYS: &[&str] = &[
    "not",
    "if",
    "then",
    "else",
    "patternProperties",
    "dependentSchemas",
    "dependentRequired",
    "$dynamicRef",
    "unevaluatedProperties",
];

const REF_PREFIX: &str = "#/definitions/";

struct ResolveCtx<'a> {
    raw: &'a serde_json::Map<String, serde_json::Value>,
    queue: VecDeque<DefinitionName>,
    scheduled: HashSet<DefinitionName>,
    /// Inline composite nodes materialized under synthesized names
    inline: Vec<Definition>,
    edges: Vec<(DefinitionName, DefinitionName, EdgeKind)>,
    diags: &'a mut Diagnostics,
}

impl ResolveCtx<'_> {
    fn schedule(&mut self, name: &str) {
        if self.scheduled.insert(name.to_string()) {
            self.queue.push_back(name.to_string());
        }
    }
}

/// Resolve a raw definitions document into a schema graph.
///
/// `roots` selects the top-level definitions to expand; an empty slice means
/// every definition in the document. Unresolvable references and unsupported
/// constructs are recorded in `diags` and degrade the affected branch; they
/// never abort the build.
pub fn resolve(
    raw_doc: &serde_json::Value,
    roots: &[String],
    diags: &mut Diagnostics,
) -> Result<SchemaGraph> {
    let raw = raw_doc
        .get("definitions")
        .unwrap_or(raw_doc)
        .as_object()
        .ok_or_else(|| Error::MalformedDocument {
            document: "<definitions>".to_string(),
            message: "expected an object of definition name -> schema node".to_string(),
        })?;

    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_string(raw_doc)?.as_bytes());
    let bundle_hash = format!("{:x}", hasher.finalize());

    let mut ctx = ResolveCtx {
        raw,
        queue: VecDeque::new(),
        scheduled: HashSet::new(),
        inline: Vec::new(),
        edges: Vec::with_capacity(raw.len() * 3),
        diags,
    };

    let mut root_names: Vec<DefinitionName> = Vec::new();
    if roots.is_empty() {
        for name in raw.keys() {
            ctx.schedule(name);
            root_names.push(name.clone());
        }
    } else {
        for root in roots {
            if raw.contains_key(root) {
                ctx.schedule(root);
                root_names.push(root.clone());
            } else {
                ctx.diags.unresolved_reference("<roots>", root);
            }
        }
    }

    let mut definitions: HashMap<DefinitionName, Definition> = HashMap::with_capacity(raw.len());
    let mut order: Vec<DefinitionName> = Vec::with_capacity(raw.len());

    while let Some(name) = ctx.queue.pop_front() {
        if definitions.contains_key(&name) {
            continue;
        }
        let Some(node) = ctx.raw.get(&name) else {
            // Scheduled names are pre-checked; a miss here is a placeholder
            // whose raw node vanished between scheduling and expansion.
            ctx.diags.unresolved_reference(&name, &name);
            continue;
        };
        let kind = extract_kind(&name, node, &mut ctx);
        let description = node
            .get("description")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        order.push(name.clone());
        definitions.insert(
            name.clone(),
            Definition {
                name,
                description,
                kind,
            },
        );

        // Inline composites discovered while extracting this definition join
        // the arena in discovery order.
        for def in ctx.inline.drain(..) {
            if !definitions.contains_key(&def.name) {
                order.push(def.name.clone());
                definitions.insert(def.name.clone(), def);
            }
        }
    }

    let eliminated = raw.len() - order.iter().filter(|n| raw.contains_key(*n)).count();
    debug!(
        materialized = order.len(),
        eliminated, "schema graph resolved"
    );

    // Build the dependency graph from the recorded edges
    let mut graph = DiGraph::with_capacity(order.len(), ctx.edges.len());
    let mut node_indices = HashMap::with_capacity(order.len());
    for name in &order {
        let idx = graph.add_node(name.clone());
        node_indices.insert(name.clone(), idx);
    }
    for (from, to, kind) in ctx.edges {
        if let (Some(&f), Some(&t)) = (node_indices.get(&from), node_indices.get(&to)) {
            graph.add_edge(f, t, kind);
        }
    }

    // Cycle groups: SCCs of size > 1, plus self-referencing singletons
    let mut scc_groups: Vec<Vec<DefinitionName>> = Vec::new();
    let mut cyclic = HashSet::new();
    for scc in kosaraju_scc(&graph) {
        let names: Vec<DefinitionName> = scc
            .iter()
            .filter_map(|&idx| graph.node_weight(idx).cloned())
            .collect();
        let self_loop = scc.len() == 1 && graph.find_edge(scc[0], scc[0]).is_some();
        if names.len() > 1 || self_loop {
            cyclic.extend(names.iter().cloned());
            scc_groups.push(names);
        }
    }

    Ok(SchemaGraph {
        definitions,
        order,
        graph,
        node_indices,
        scc_groups,
        cyclic,
        roots: root_names,
        bundle_hash,
        eliminated,
    })
}

/// Classify a raw node into the tagged operator subset
fn extract_kind(name: &str, node: &serde_json::Value, ctx: &mut ResolveCtx<'_>) -> DefinitionKind {
    let Some(obj) = node.as_object() else {
        ctx.diags.report(
            name,
            DiagnosticCode::UnsupportedConstruct,
            "definition node is not an object",
        );
        return DefinitionKind::Opaque;
    };

    if let Some(key) = UNSUPPORTED_KEYS.iter().find(|k| obj.contains_key(**k)) {
        ctx.diags.report(
            name,
            DiagnosticCode::UnsupportedConstruct,
            format!("'{}' is outside the supported operator subset", key),
        );
        return DefinitionKind::Opaque;
    }

    if let Some(parts) = obj.get("allOf").and_then(|v| v.as_array()) {
        let parts = branch_refs(name, parts, EdgeKind::Intersection, ctx);
        return DefinitionKind::Intersection { parts };
    }

    // A definition that is only a reference behaves as a single-part merge
    if obj.contains_key("$ref") {
        let parts = match type_ref_of(name, name, node, EdgeKind::Intersection, ctx) {
            Some(t) => vec![t],
            None => Vec::new(),
        };
        return DefinitionKind::Intersection { parts };
    }

    if let Some(branches) = obj.get("oneOf").and_then(|v| v.as_array()) {
        let branches = branch_refs(name, branches, EdgeKind::Union, ctx);
        return DefinitionKind::Union {
            branches,
            exclusive: true,
        };
    }

    if let Some(branches) = obj.get("anyOf").and_then(|v| v.as_array()) {
        let branches = branch_refs(name, branches, EdgeKind::Union, ctx);
        return DefinitionKind::Union {
            branches,
            exclusive: false,
        };
    }

    if let Some(props) = obj.get("properties").and_then(|v| v.as_object()) {
        let required: BTreeSet<String> = obj
            .get("required")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        let mut properties = Vec::with_capacity(props.len());
        for (pname, pnode) in props {
            let site = format!("{}.{}", name, pname);
            // A dropped branch (unresolved reference) drops the property
            let Some(ty) = type_ref_of(name, &site, pnode, EdgeKind::Property, ctx) else {
                continue;
            };
            properties.push(Property {
                name: pname.clone(),
                ty,
                description: pnode
                    .get("description")
                    .and_then(|v| v.as_str())
                    .map(String::from),
                default: pnode.get("default").map(stringify),
            });
        }
        return DefinitionKind::Object {
            properties,
            required,
        };
    }

    match obj.get("type").and_then(|v| v.as_str()) {
        Some("array") => {
            let items = obj
                .get("items")
                .and_then(|items| {
                    type_ref_of(name, &format!("{}.items", name), items, EdgeKind::Items, ctx)
                })
                .unwrap_or(TypeRef::Opaque);
            DefinitionKind::Array { items }
        }
        Some("object") | None => {
            // Unstructured object (map-like or description-only): a terminal
            // definition with no modeled children.
            if let Some(values) = enum_strings(obj) {
                return DefinitionKind::Scalar {
                    ty: ScalarType::String,
                    enum_values: values,
                    default: obj.get("default").map(stringify),
                };
            }
            DefinitionKind::Object {
                properties: Vec::new(),
                required: BTreeSet::new(),
            }
        }
        Some(other) => match ScalarType::parse(other) {
            Some(ty) => DefinitionKind::Scalar {
                ty,
                enum_values: enum_strings(obj).unwrap_or_default(),
                default: obj.get("default").map(stringify),
            },
            None => {
                ctx.diags.report(
                    name,
                    DiagnosticCode::UnsupportedConstruct,
                    format!("unknown type '{}'", other),
                );
                DefinitionKind::Opaque
            }
        },
    }
}

/// Resolve composition branch nodes into type references
fn branch_refs(
    owner: &str,
    branches: &[serde_json::Value],
    edge: EdgeKind,
    ctx: &mut ResolveCtx<'_>,
) -> Vec<TypeRef> {
    branches
        .iter()
        .enumerate()
        .filter_map(|(i, b)| {
            let site = format!("{}_branch{}", owner, i);
            type_ref_of(owner, &site, b, edge, ctx)
        })
        .collect()
}

/// Resolve a use-site node into a [`TypeRef`].
///
/// `owner` is the arena definition the reference edge originates from; `site`
/// names any inline composite that has to be materialized for this node.
/// Returns `None` when the branch is dropped (unresolved reference).
fn type_ref_of(
    owner: &str,
    site: &str,
    node: &serde_json::Value,
    edge: EdgeKind,
    ctx: &mut ResolveCtx<'_>,
) -> Option<TypeRef> {
    let Some(obj) = node.as_object() else {
        ctx.diags.report(
            site,
            DiagnosticCode::UnsupportedConstruct,
            "schema node is not an object",
        );
        return Some(TypeRef::Opaque);
    };

    if let Some(key) = UNSUPPORTED_KEYS.iter().find(|k| obj.contains_key(**k)) {
        ctx.diags.report(
            site,
            DiagnosticCode::UnsupportedConstruct,
            format!("'{}' is outside the supported operator subset", key),
        );
        return Some(TypeRef::Opaque);
    }

    if let Some(reference) = obj.get("$ref").and_then(|v| v.as_str()) {
        let target = reference.strip_prefix(REF_PREFIX).unwrap_or(reference);
        if ctx.raw.contains_key(target) {
            ctx.schedule(target);
            ctx.edges
                .push((owner.to_string(), target.to_string(), edge));
            return Some(TypeRef::Ref(target.to_string()));
        }
        ctx.diags.unresolved_reference(owner, reference);
        return None;
    }

    // Inline composition or object: materialize under the synthesized site name
    if obj.contains_key("oneOf")
        || obj.contains_key("anyOf")
        || obj.contains_key("allOf")
        || obj.contains_key("properties")
    {
        let kind = extract_kind(site, node, ctx);
        let description = obj
            .get("description")
            .and_then(|v| v.as_str())
            .map(String::from);
        ctx.inline.push(Definition {
            name: site.to_string(),
            description,
            kind,
        });
        ctx.edges.push((owner.to_string(), site.to_string(), edge));
        return Some(TypeRef::Ref(site.to_string()));
    }

    match obj.get("type").and_then(|v| v.as_str()) {
        Some("array") => {
            let inner = obj
                .get("items")
                .and_then(|items| type_ref_of(owner, site, items, EdgeKind::Items, ctx))
                .unwrap_or(TypeRef::Opaque);
            Some(TypeRef::Array(Box::new(inner)))
        }
        Some("object") => {
            let inner = obj
                .get("additionalProperties")
                .and_then(|ap| type_ref_of(owner, site, ap, EdgeKind::AdditionalProperties, ctx))
                .unwrap_or(TypeRef::Opaque);
            Some(TypeRef::Map(Box::new(inner)))
        }
        Some(other) => match ScalarType::parse(other) {
            Some(ty) => Some(TypeRef::Scalar {
                ty,
                enum_values: enum_strings(obj).unwrap_or_default(),
            }),
            None => {
                ctx.diags.report(
                    site,
                    DiagnosticCode::UnsupportedConstruct,
                    format!("unknown type '{}'", other),
                );
                Some(TypeRef::Opaque)
            }
        },
        None => {
            if let Some(values) = enum_strings(obj) {
                return Some(TypeRef::Scalar {
                    ty: ScalarType::String,
                    enum_values: values,
                });
            }
            // Bare node with only a description: unknown leaf
            Some(TypeRef::Opaque)
        }
    }
}

fn enum_strings(obj: &serde_json::Map<String, serde_json::Value>) -> Option<Vec<String>> {
    let arr = obj.get("enum")?.as_array()?;
    if arr.is_empty() {
        return None;
    }
    Some(arr.iter().map(stringify).collect())
}

fn stringify(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn graph_of(doc: serde_json::Value) -> (SchemaGraph, Diagnostics) {
        let mut diags = Diagnostics::new();
        let graph = resolve(&doc, &[], &mut diags).unwrap();
        (graph, diags)
    }

    #[test]
    fn test_resolves_reference_chain() {
        let (graph, diags) = graph_of(json!({
            "definitions": {
                "Pod": {
                    "properties": { "spec": { "$ref": "#/definitions/PodSpec" } },
                    "required": ["spec"]
                },
                "PodSpec": {
                    "properties": { "hostname": { "type": "string" } }
                }
            }
        }));

        assert_eq!(graph.definition_count(), 2);
        assert!(graph.contains("PodSpec"));
        assert_eq!(graph.refs_out("Pod"), vec!["PodSpec"]);
        assert!(diags.is_empty());
    }

    #[test]
    fn test_dead_schema_elimination() {
        let doc = json!({
            "definitions": {
                "Pod": { "properties": { "name": { "type": "string" } } },
                "Orphan": { "properties": { "x": { "type": "integer" } } }
            }
        });
        let mut diags = Diagnostics::new();
        let graph = resolve(&doc, &["Pod".to_string()], &mut diags).unwrap();

        assert!(graph.contains("Pod"));
        assert!(!graph.contains("Orphan"));
        assert_eq!(graph.eliminated, 1);
    }

    #[test]
    fn test_unresolved_reference_drops_branch() {
        let (graph, diags) = graph_of(json!({
            "definitions": {
                "Pod": {
                    "properties": {
                        "spec": { "$ref": "#/definitions/Missing" },
                        "name": { "type": "string" }
                    }
                }
            }
        }));

        let def = graph.get("Pod").unwrap();
        match &def.kind {
            DefinitionKind::Object { properties, .. } => {
                assert_eq!(properties.len(), 1);
                assert_eq!(properties[0].name, "name");
            }
            other => panic!("expected Object, got {:?}", other),
        }
        assert_eq!(
            diags.count_of(DiagnosticCode::UnresolvedReference),
            1,
            "dropped branch must be surfaced"
        );
    }

    #[test]
    fn test_self_reference_terminates_and_is_cyclic() {
        let (graph, _) = graph_of(json!({
            "definitions": {
                "JSONSchemaProps": {
                    "properties": {
                        "items": { "$ref": "#/definitions/JSONSchemaProps" },
                        "type": { "type": "string" }
                    }
                }
            }
        }));

        assert_eq!(graph.definition_count(), 1);
        assert!(graph.is_cyclic("JSONSchemaProps"));
        assert_eq!(graph.scc_groups().len(), 1);
    }

    #[test]
    fn test_mutual_recursion_forms_scc() {
        let (graph, _) = graph_of(json!({
            "definitions": {
                "A": { "properties": { "b": { "$ref": "#/definitions/B" } } },
                "B": { "properties": { "a": { "$ref": "#/definitions/A" } } }
            }
        }));

        assert!(graph.is_cyclic("A"));
        assert!(graph.is_cyclic("B"));
        assert_eq!(graph.scc_groups().len(), 1);
        assert_eq!(graph.scc_groups()[0].len(), 2);
    }

    #[test]
    fn test_unsupported_construct_degrades_to_opaque() {
        let (graph, diags) = graph_of(json!({
            "definitions": {
                "Weird": { "not": { "type": "string" } }
            }
        }));

        match graph.get("Weird").unwrap().kind {
            DefinitionKind::Opaque => {}
            ref other => panic!("expected Opaque, got {:?}", other),
        }
        assert_eq!(diags.count_of(DiagnosticCode::UnsupportedConstruct), 1);
    }

    #[test]
    fn test_union_and_enum_extraction() {
        let (graph, _) = graph_of(json!({
            "definitions": {
                "IntOrString": {
                    "oneOf": [ { "type": "integer" }, { "type": "string" } ]
                },
                "Policy": {
                    "type": "string",
                    "enum": ["Always", "Never", "IfNotPresent"],
                    "default": "Always"
                }
            }
        }));

        match &graph.get("IntOrString").unwrap().kind {
            DefinitionKind::Union { branches, exclusive } => {
                assert!(*exclusive);
                assert_eq!(branches.len(), 2);
            }
            other => panic!("expected Union, got {:?}", other),
        }
        match &graph.get("Policy").unwrap().kind {
            DefinitionKind::Scalar {
                enum_values,
                default,
                ..
            } => {
                assert_eq!(enum_values.len(), 3);
                assert_eq!(default.as_deref(), Some("Always"));
            }
            other => panic!("expected Scalar, got {:?}", other),
        }
    }

    #[test]
    fn test_inline_object_is_materialized() {
        let (graph, _) = graph_of(json!({
            "definitions": {
                "Deployment": {
                    "properties": {
                        "strategy": {
                            "properties": { "type": { "type": "string" } }
                        }
                    }
                }
            }
        }));

        assert!(graph.contains("Deployment.strategy"));
        assert_eq!(graph.refs_out("Deployment"), vec!["Deployment.strategy"]);
    }
}
