//! Error types for the variability pipeline

use thiserror::Error;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Variability pipeline errors
#[derive(Error, Debug)]
pub enum Error {
    #[error("Unresolved reference: {reference} (from {origin})")]
    UnresolvedReference { reference: String, origin: String },

    #[error("Unsupported schema construct in {definition}: {construct}")]
    UnsupportedConstruct { definition: String, construct: String },

    #[error("Ambiguous key path: {path} matches entries for {first} and {second}")]
    AmbiguousKeyPath {
        path: String,
        first: String,
        second: String,
    },

    #[error("Duplicate key path in mapping table: {path}")]
    DuplicateKeyPath { path: String },

    #[error("Unknown feature id referenced by {context}: {feature}")]
    UnknownFeature { context: String, feature: String },

    #[error("Duplicate feature id in model: {0}")]
    DuplicateFeature(String),

    #[error("Model parse error at line {line}: {message}")]
    ModelParse { line: usize, message: String },

    #[error("Mapping table parse error at line {line}: {message}")]
    MappingParse { line: usize, message: String },

    #[error("Malformed document {document}: {message}")]
    MalformedDocument { document: String, message: String },

    #[error("Translation of {document} exceeded the {budget_ms}ms time budget")]
    TranslationTimeout { document: String, budget_ms: u64 },

    #[error("Invalid schema version: {0}")]
    InvalidVersion(#[from] semver::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
