//! Diagnostics
//!
//! Collects warnings raised while resolving schemas, deriving constraints, and
//! translating documents. Every recoverable condition lands here and is
//! enumerated in the final summary; nothing is silently discarded.

use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Diagnostic Codes
// =============================================================================

/// Diagnostic code for categorizing issues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiagnosticCode {
    // === Schema resolution ===
    /// Reference target missing; the dependent branch was dropped
    UnresolvedReference,
    /// Vocabulary outside the supported operator subset; node degraded to opaque
    UnsupportedConstruct,

    // === Synthesis ===
    /// Schema path reachable through multiple branches; later visit recorded as alias
    AliasedExpansion,
    /// Feature name collided with a grammar keyword and was escaped
    EscapedKeyword,

    // === Constraint derivation ===
    /// Requires and Excludes derived for the same feature pair; both kept
    ConstraintConflict,
    /// A derived constraint references a feature absent from the tree
    DanglingConstraint,

    // === Translation ===
    /// Configuration key had no mapping entry
    UnmappedKey,
    /// Document skipped (malformed, unreadable, or over time budget)
    DocumentSkipped,
}

impl DiagnosticCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnresolvedReference => "S001",
            Self::UnsupportedConstruct => "S002",
            Self::AliasedExpansion => "F001",
            Self::EscapedKeyword => "F002",
            Self::ConstraintConflict => "C001",
            Self::DanglingConstraint => "C002",
            Self::UnmappedKey => "T001",
            Self::DocumentSkipped => "T002",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::ConstraintConflict | Self::DanglingConstraint => Severity::Warning,
            Self::UnresolvedReference | Self::UnsupportedConstruct | Self::DocumentSkipped => {
                Severity::Warning
            }
            Self::AliasedExpansion | Self::EscapedKeyword | Self::UnmappedKey => Severity::Info,
        }
    }
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Severity
// =============================================================================

/// Diagnostic severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

// =============================================================================
// Diagnostic Item
// =============================================================================

/// A single diagnostic item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticItem {
    /// Schema path, feature id, or document that caused this diagnostic
    pub subject: String,
    /// Diagnostic code
    pub code: DiagnosticCode,
    /// Human-readable message
    pub message: String,
    /// Additional context (related features, derivation traces)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<String>,
}

impl DiagnosticItem {
    pub fn new(subject: impl Into<String>, code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            code,
            message: message.into(),
            context: Vec::new(),
        }
    }

    pub fn with_context(mut self, ctx: impl Into<String>) -> Self {
        self.context.push(ctx.into());
        self
    }

    pub fn severity(&self) -> Severity {
        self.code.severity()
    }
}

impl fmt::Display for DiagnosticItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {} ({})",
            self.code,
            self.code.severity(),
            self.message,
            self.subject
        )?;

        for ctx in &self.context {
            write!(f, "\n  - {}", ctx)?;
        }

        Ok(())
    }
}

// =============================================================================
// Diagnostics Collection
// =============================================================================

/// Collection of diagnostics from pipeline passes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Diagnostics {
    items: Vec<DiagnosticItem>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a diagnostic item
    pub fn push(&mut self, item: DiagnosticItem) {
        self.items.push(item);
    }

    pub fn report(
        &mut self,
        subject: impl Into<String>,
        code: DiagnosticCode,
        message: impl Into<String>,
    ) {
        self.push(DiagnosticItem::new(subject, code, message));
    }

    /// Add diagnostic for an unresolved reference
    pub fn unresolved_reference(&mut self, origin: impl Into<String>, target: &str) {
        self.push(DiagnosticItem::new(
            origin,
            DiagnosticCode::UnresolvedReference,
            format!("reference target '{}' not found; branch dropped", target),
        ));
    }

    /// Add diagnostic for a conflicting constraint pair
    pub fn constraint_conflict(&mut self, a: &str, b: &str, traces: &[String]) {
        let mut item = DiagnosticItem::new(
            a,
            DiagnosticCode::ConstraintConflict,
            format!(
                "both requires and excludes derived between '{}' and '{}'; keeping both",
                a, b
            ),
        );
        for trace in traces {
            item = item.with_context(trace.clone());
        }
        self.push(item);
    }

    pub fn warnings(&self) -> impl Iterator<Item = &DiagnosticItem> {
        self.items.iter().filter(|i| i.severity() == Severity::Warning)
    }

    pub fn infos(&self) -> impl Iterator<Item = &DiagnosticItem> {
        self.items.iter().filter(|i| i.severity() == Severity::Info)
    }

    pub fn all(&self) -> &[DiagnosticItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn warning_count(&self) -> usize {
        self.warnings().count()
    }

    /// Count items with a specific code
    pub fn count_of(&self, code: DiagnosticCode) -> usize {
        self.items.iter().filter(|i| i.code == code).count()
    }

    /// Merge another Diagnostics into this one
    pub fn merge(&mut self, other: Diagnostics) {
        self.items.extend(other.items);
    }

    /// Format all diagnostics for display
    pub fn format_all(&self) -> String {
        let mut output = String::new();

        for item in &self.items {
            output.push_str(&format!("{}\n", item));
        }

        if !self.is_empty() {
            output.push_str(&format!(
                "\n{} warning(s), {} note(s)\n",
                self.warning_count(),
                self.infos().count()
            ));
        }

        output
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_all())
    }
}

impl IntoIterator for Diagnostics {
    type Item = DiagnosticItem;
    type IntoIter = std::vec::IntoIter<DiagnosticItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a DiagnosticItem;
    type IntoIter = std::slice::Iter<'a, DiagnosticItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
