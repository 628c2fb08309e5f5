//! Schema Graph
//!
//! Arena of resolved schema definitions keyed by qualified name, with a
//! petgraph dependency graph over their references. The raw input may be
//! cyclic and self-referential; the arena holds each definition once and the
//! SCC groups record which ones participate in cycles.
//!
//! The graph is built once per schema version and passed by reference through
//! every synthesis stage; it is discarded once the feature model exists.

pub mod loader;

pub use loader::resolve;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Qualified definition name (e.g. "io.k8s.api.core.v1.PodSpec")
pub type DefinitionName = String;

/// Scalar value types in the supported operator subset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    String,
    Integer,
    Number,
    Boolean,
}

impl ScalarType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "String",
            Self::Integer => "Integer",
            Self::Number => "Number",
            Self::Boolean => "Boolean",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "string" | "String" => Some(Self::String),
            "integer" | "Integer" => Some(Self::Integer),
            "number" | "Number" => Some(Self::Number),
            "boolean" | "Boolean" => Some(Self::Boolean),
            _ => None,
        }
    }
}

/// Non-owning reference to a type: either a named definition in the arena or
/// an inline scalar/container shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypeRef {
    /// Reference to an arena definition (named or synthesized for inline objects)
    Ref(DefinitionName),
    /// Inline scalar, possibly with an enumeration
    Scalar {
        ty: ScalarType,
        enum_values: Vec<String>,
    },
    /// Inline array of some element type
    Array(Box<TypeRef>),
    /// Inline string-keyed map of some value type (additionalProperties)
    Map(Box<TypeRef>),
    /// Construct outside the supported subset, kept as an opaque leaf
    Opaque,
}

/// A single named property of an object definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    pub ty: TypeRef,
    pub description: Option<String>,
    /// Declared default, stringified for model metadata
    pub default: Option<String>,
}

/// Tagged variant over the supported schema operator subset.
///
/// Dispatch in later stages is a match on this enum, never open-ended
/// inspection of raw nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DefinitionKind {
    Object {
        /// Declaration order preserved; the serializer depends on it
        properties: Vec<Property>,
        required: BTreeSet<String>,
    },
    Array {
        items: TypeRef,
    },
    Scalar {
        ty: ScalarType,
        enum_values: Vec<String>,
        default: Option<String>,
    },
    Union {
        branches: Vec<TypeRef>,
        /// true for oneOf (exactly one), false for anyOf (one or more)
        exclusive: bool,
    },
    Intersection {
        parts: Vec<TypeRef>,
    },
    /// Degraded unsupported construct; becomes an opaque "unknown" feature
    Opaque,
}

/// A resolved schema definition, owned exclusively by the graph arena
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Definition {
    pub name: DefinitionName,
    pub description: Option<String>,
    pub kind: DefinitionKind,
}

/// Kinds of reference edges in the dependency graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeKind {
    /// Property field type
    Property,
    /// Array element type
    Items,
    /// additionalProperties map value type
    AdditionalProperties,
    /// Union branch (oneOf/anyOf)
    Union,
    /// Intersection part (allOf)
    Intersection,
}

/// The resolved schema graph
pub struct SchemaGraph {
    /// Arena: every materialized definition, keyed by qualified name
    pub(crate) definitions: HashMap<DefinitionName, Definition>,

    /// Materialization order, stable across runs for an unchanged input
    pub(crate) order: Vec<DefinitionName>,

    /// Reference edges between arena definitions
    pub(crate) graph: DiGraph<DefinitionName, EdgeKind>,

    /// Node index lookup
    pub(crate) node_indices: HashMap<DefinitionName, NodeIndex>,

    /// Strongly connected components with more than one member, plus
    /// self-referencing singletons
    pub(crate) scc_groups: Vec<Vec<DefinitionName>>,

    /// Every definition that participates in a reference cycle
    pub(crate) cyclic: HashSet<DefinitionName>,

    /// Top-level root definitions the expansion started from
    pub roots: Vec<DefinitionName>,

    /// SHA256 over the raw definitions document
    pub bundle_hash: String,

    /// Definitions present in the input but never reachable from the roots
    pub eliminated: usize,
}

impl SchemaGraph {
    /// Get a definition by qualified name
    pub fn get(&self, name: &str) -> Option<&Definition> {
        self.definitions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    /// Number of materialized definitions
    pub fn definition_count(&self) -> usize {
        self.definitions.len()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Definitions in materialization order
    pub fn names(&self) -> impl Iterator<Item = &DefinitionName> {
        self.order.iter()
    }

    /// Whether a definition participates in a reference cycle
    pub fn is_cyclic(&self, name: &str) -> bool {
        self.cyclic.contains(name)
    }

    /// Cycle groups (SCCs of size > 1 and self-referencing singletons)
    pub fn scc_groups(&self) -> &[Vec<DefinitionName>] {
        &self.scc_groups
    }

    /// Immediate outgoing references (dependencies)
    pub fn refs_out(&self, name: &str) -> Vec<&DefinitionName> {
        let Some(&node_idx) = self.node_indices.get(name) else {
            return Vec::new();
        };

        self.graph
            .edges_directed(node_idx, Direction::Outgoing)
            .filter_map(|e| self.graph.node_weight(e.target()))
            .collect()
    }

    /// Immediate incoming references (dependents)
    pub fn refs_in(&self, name: &str) -> Vec<&DefinitionName> {
        let Some(&node_idx) = self.node_indices.get(name) else {
            return Vec::new();
        };

        self.graph
            .edges_directed(node_idx, Direction::Incoming)
            .filter_map(|e| self.graph.node_weight(e.source()))
            .collect()
    }
}
