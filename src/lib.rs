//! Varimodel
//!
//! Converts a large, recursively-referenced schema document (e.g. the
//! Kubernetes API `_definitions.json`) into a formal variability model: a
//! feature tree plus propositional cross-tree constraints. The inverse path
//! translates concrete configuration documents into feature selections and
//! validates them against the model at corpus scale.
//!
//! ## Pipeline
//!
//! ```text
//! raw definitions --> graph::resolve --> SchemaGraph
//!                 --> model::assemble --> FeatureModel --> model file
//!
//! model file + key mapping + document
//!                 --> translate --> ConfigurationSelection
//!                 --> validate  --> ValidationReport
//! ```
//!
//! The schema graph is built once per schema version and discarded once the
//! model exists; the model and the key mapping table are persisted and
//! reloaded independently for every later validation run.

pub mod batch;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod graph;
pub mod mapping;
pub mod model;
pub mod translate;
pub mod validate;

pub use batch::{BatchConfig, BatchOutcome, BatchRunner, SummaryRow};
pub use config::PipelineConfig;
pub use diagnostics::{DiagnosticCode, DiagnosticItem, Diagnostics, Severity};
pub use error::{Error, Result};
pub use graph::{Definition, DefinitionKind, ScalarType, SchemaGraph, TypeRef};
pub use mapping::{KeyMap, KeyMappingEntry, ValueKind};
pub use model::{
    Cardinality, Constraint, ConstraintExpr, ConstraintKind, FeatureId, FeatureModel, FeatureNode,
    GroupType,
};
pub use translate::{ConfigurationSelection, Translator};
pub use validate::{validate, ValidationReport};
