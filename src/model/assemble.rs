//! Model Assembly
//!
//! Runs synthesis for every requested top-level kind over the resolved graph,
//! merges the kind trees under a synthetic root, derives the cross-tree
//! constraints, and verifies the model invariants.
//!
//! The synthetic root is an or-group with one mandatory child per kind: a
//! real-world document instantiates exactly one kind, while the model stays
//! able to represent a library of kinds. Definitions shared between kinds are
//! unified through the synthesizer's alias table, so a shared subtree appears
//! once.

use tracing::info;

use crate::diagnostics::Diagnostics;
use crate::error::Result;
use crate::graph::SchemaGraph;

use super::constraints;
use super::synthesis::{sanitize_segment, Synthesizer};
use super::{Cardinality, FeatureModel, FeatureNode, GroupType};

/// Assemble a feature model from a resolved schema graph.
///
/// `kinds` selects the top-level resource kinds; an empty slice means every
/// root the graph was resolved from. Reference resolution has an inherent
/// dependency order, so synthesis runs as one sequential pass over the
/// read-only graph; the shared alias table is what unifies subtrees across
/// kinds.
pub fn assemble(
    name: &str,
    schema_version: semver::Version,
    graph: &SchemaGraph,
    kinds: &[String],
    diagnostics: &mut Diagnostics,
) -> Result<FeatureModel> {
    let kinds: Vec<String> = if kinds.is_empty() {
        graph.roots.clone()
    } else {
        kinds.to_vec()
    };

    let mut synth = Synthesizer::new(graph);
    let mut root = FeatureNode::new(sanitize_segment(name), Cardinality::Mandatory);
    root.group = GroupType::Or;
    root.provenance = format!("<root:{}>", name);

    for kind in &kinds {
        match synth.synthesize_kind(kind) {
            Some(tree) => root.children.push(tree),
            None => {
                // A requested top-level kind that never resolved is a caller
                // error, not a droppable branch
                return Err(crate::error::Error::UnresolvedReference {
                    reference: kind.clone(),
                    origin: "<kinds>".to_string(),
                });
            }
        }
    }

    let derived = constraints::derive(graph, synth.expansions(), &root.children);

    let model = FeatureModel {
        name: name.to_string(),
        schema_version,
        root,
        constraints: derived.constraints,
        descriptions: synth.descriptions,
        defaults: synth.defaults,
        deprecated: synth.deprecated,
        aliases: synth.aliases,
    };

    diagnostics.merge(synth.diagnostics);
    diagnostics.merge(derived.diagnostics);

    model.verify()?;
    info!(
        kinds = kinds.len(),
        features = model.feature_count(),
        constraints = model.constraints.len(),
        "model assembled"
    );
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph;
    use serde_json::json;

    #[test]
    fn test_root_is_or_group_of_mandatory_kinds() {
        let doc = json!({
            "definitions": {
                "Pod": { "properties": { "name": { "type": "string" } } },
                "Service": { "properties": { "port": { "type": "integer" } } }
            }
        });
        let mut diags = Diagnostics::new();
        let g = graph::resolve(&doc, &[], &mut diags).unwrap();
        let model = assemble(
            "cluster",
            semver::Version::new(1, 30, 2),
            &g,
            &[],
            &mut diags,
        )
        .unwrap();

        assert_eq!(model.root.id, "cluster");
        assert_eq!(model.root.group, GroupType::Or);
        assert_eq!(model.root.children.len(), 2);
        assert!(model
            .root
            .children
            .iter()
            .all(|c| c.cardinality == Cardinality::Mandatory));
        model.verify().unwrap();
    }

    #[test]
    fn test_shared_definition_appears_once_across_kinds() {
        let doc = json!({
            "definitions": {
                "Deployment": {
                    "properties": { "template": { "$ref": "#/definitions/PodTemplate" } }
                },
                "StatefulSet": {
                    "properties": { "template": { "$ref": "#/definitions/PodTemplate" } }
                },
                "PodTemplate": {
                    "properties": { "image": { "type": "string" } }
                }
            }
        });
        let mut diags = Diagnostics::new();
        let g = graph::resolve(
            &doc,
            &["Deployment".to_string(), "StatefulSet".to_string()],
            &mut diags,
        )
        .unwrap();
        let model = assemble(
            "cluster",
            semver::Version::new(1, 0, 0),
            &g,
            &[],
            &mut diags,
        )
        .unwrap();

        // First kind expands the template; the second aliases it
        assert!(model.find("Deployment.template.image").is_some());
        assert!(model.find("StatefulSet.template.image").is_none());
        assert_eq!(
            model.aliases.get("StatefulSet.template").map(String::as_str),
            Some("Deployment.template")
        );
    }
}
