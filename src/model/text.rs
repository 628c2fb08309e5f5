//! Model Text Format
//!
//! Deterministic textual rendering of a feature model, and the parser that
//! reads it back. The writer emits a fixed depth-first traversal in
//! schema-declaration order, so re-running synthesis on an unchanged schema
//! produces byte-identical text; that is what makes model evolution diffable
//! across schema versions.
//!
//! ```text
//! model cluster
//! version 1.30.2
//! features
//!     cluster
//!         or
//!             Pod {doc 'Pod is a collection of containers'}
//!                 mandatory
//!                     Pod.spec
//!                 optional
//!                     Pod.status {type String}
//! constraints
//!     Pod.spec.os => !Pod.spec.hostUsers  // rule:mutual-exclusion ...
//! ```
//!
//! Indentation is one tab per level. Under a feature, child blocks appear in
//! a fixed order: `mandatory`, then `optional` (and-groups), or a single
//! `alternative` / `or` block (union groups).

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::error::{Error, Result};
use crate::graph::ScalarType;

use super::{
    AttributeConstraint, Cardinality, Constraint, ConstraintExpr, ConstraintKind, FeatureModel,
    FeatureNode, GroupType,
};

// =============================================================================
// Serialization
// =============================================================================

/// Render a model to its canonical text form
pub fn serialize(model: &FeatureModel) -> String {
    let mut out = String::new();
    out.push_str(&format!("model {}\n", model.name));
    out.push_str(&format!("version {}\n", model.schema_version));
    out.push_str("features\n");
    write_feature(model, &model.root, 1, &mut out);

    if !model.constraints.is_empty() {
        out.push_str("constraints\n");
        for c in &model.constraints {
            out.push_str(&format!("\t{}  // {}\n", c, c.trace));
        }
    }
    out
}

fn write_feature(model: &FeatureModel, node: &FeatureNode, depth: usize, out: &mut String) {
    let indent = "\t".repeat(depth);
    out.push_str(&indent);
    out.push_str(&node.id);

    let attrs = render_attrs(model, node);
    if !attrs.is_empty() {
        out.push_str(&format!(" {{{}}}", attrs));
    }
    out.push('\n');

    if node.children.is_empty() {
        return;
    }

    let block_indent = "\t".repeat(depth + 1);
    match node.group {
        GroupType::And => {
            let mandatory: Vec<&FeatureNode> = node
                .children
                .iter()
                .filter(|c| c.cardinality == Cardinality::Mandatory)
                .collect();
            let optional: Vec<&FeatureNode> = node
                .children
                .iter()
                .filter(|c| c.cardinality == Cardinality::Optional)
                .collect();
            if !mandatory.is_empty() {
                out.push_str(&format!("{}mandatory\n", block_indent));
                for child in mandatory {
                    write_feature(model, child, depth + 2, out);
                }
            }
            if !optional.is_empty() {
                out.push_str(&format!("{}optional\n", block_indent));
                for child in optional {
                    write_feature(model, child, depth + 2, out);
                }
            }
        }
        GroupType::Or => {
            out.push_str(&format!("{}or\n", block_indent));
            for child in &node.children {
                write_feature(model, child, depth + 2, out);
            }
        }
        GroupType::Alternative => {
            out.push_str(&format!("{}alternative\n", block_indent));
            for child in &node.children {
                write_feature(model, child, depth + 2, out);
            }
        }
    }
}

/// Attribute list in fixed order: type, enum, repeatable, default,
/// deprecated, alias, doc.
fn render_attrs(model: &FeatureModel, node: &FeatureNode) -> String {
    let mut parts: Vec<String> = Vec::new();

    if let Some(attr) = &node.attribute {
        parts.push(format!("type {}", attr.ty.as_str()));
        if !attr.enum_values.is_empty() {
            let values: Vec<String> = attr.enum_values.iter().map(|v| attr_value(v)).collect();
            parts.push(format!("enum {}", values.join("|")));
        }
    }
    if node.repeatable {
        parts.push("repeatable".to_string());
    }
    if let Some(default) = model.defaults.get(&node.id) {
        parts.push(format!("default {}", attr_value(default)));
    }
    if model.deprecated.contains(&node.id) {
        parts.push("deprecated".to_string());
    }
    // Alias entries pointing at this node's id are emitted on the aliased
    // node itself, which is always a leaf.
    if let Some(canonical) = model.aliases.get(&node.id) {
        parts.push(format!("alias {}", canonical));
    }
    if let Some(doc) = model.descriptions.get(&node.id) {
        if !doc.is_empty() {
            parts.push(format!("doc '{}'", doc));
        }
    }
    parts.join(", ")
}

/// Grammar-safe attribute value
fn attr_value(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if matches!(c, ',' | '{' | '}' | '|' | '\'' | '"' | '\n' | '\r') {
                '_'
            } else {
                c
            }
        })
        .collect()
}

// =============================================================================
// Parsing
// =============================================================================

/// Parse the canonical text form back into a model
pub fn parse(text: &str) -> Result<FeatureModel> {
    let mut lines = text.lines().enumerate();

    let name = expect_header(&mut lines, "model")?;
    let version_str = expect_header(&mut lines, "version")?;
    let schema_version = semver::Version::parse(&version_str)?;

    let (lineno, line) = lines
        .next()
        .ok_or_else(|| parse_err(0, "missing 'features' section"))?;
    if line.trim_end() != "features" {
        return Err(parse_err(lineno + 1, "expected 'features'"));
    }

    let mut descriptions = BTreeMap::new();
    let mut defaults = BTreeMap::new();
    let mut deprecated = BTreeSet::new();
    let mut aliases = BTreeMap::new();

    // Stack of open features; markers map a depth to the block governing the
    // features one level deeper.
    let mut stack: Vec<(usize, FeatureNode)> = Vec::new();
    let mut markers: BTreeMap<usize, String> = BTreeMap::new();
    let mut root: Option<FeatureNode> = None;
    let mut constraints: Vec<Constraint> = Vec::new();
    let mut in_constraints = false;

    for (lineno, raw_line) in lines {
        let lineno = lineno + 1;
        if raw_line.trim().is_empty() {
            continue;
        }
        if raw_line.trim_end() == "constraints" {
            in_constraints = true;
            continue;
        }
        if in_constraints {
            constraints.push(parse_constraint_line(raw_line, lineno)?);
            continue;
        }

        let depth = raw_line.chars().take_while(|c| *c == '\t').count();
        let content = raw_line.trim();

        if matches!(content, "mandatory" | "optional" | "alternative" | "or") {
            close_until(&mut stack, depth.saturating_sub(1));
            let Some((_, parent)) = stack.last_mut() else {
                return Err(parse_err(lineno, "group marker outside a feature"));
            };
            match content {
                "alternative" => parent.group = GroupType::Alternative,
                "or" => parent.group = GroupType::Or,
                _ => {}
            }
            markers.insert(depth, content.to_string());
            continue;
        }

        // Feature line: id plus optional {attrs}
        let (id, attrs) = split_attrs(content, lineno)?;
        let cardinality = match markers.get(&(depth.saturating_sub(1))).map(String::as_str) {
            Some("mandatory") => Cardinality::Mandatory,
            _ => Cardinality::Optional,
        };
        let mut node = FeatureNode::new(id.to_string(), cardinality);
        if let Some(attrs) = attrs {
            apply_attrs(
                &mut node,
                attrs,
                lineno,
                &mut descriptions,
                &mut defaults,
                &mut deprecated,
                &mut aliases,
            )?;
        }

        if stack.is_empty() {
            // First feature is the synthetic root
            node.cardinality = Cardinality::Mandatory;
            stack.push((depth, node));
            continue;
        }

        close_until(&mut stack, depth.saturating_sub(2));
        stack.push((depth, node));
    }

    close_until(&mut stack, 0);
    if let Some((_, node)) = stack.pop() {
        root = Some(node);
    }
    let root = root.ok_or_else(|| parse_err(0, "empty feature tree"))?;

    Ok(FeatureModel {
        name,
        schema_version,
        root,
        constraints,
        descriptions,
        defaults,
        deprecated,
        aliases,
    })
}

impl FeatureModel {
    /// Canonical text rendering (see [`serialize`])
    pub fn to_text(&self) -> String {
        serialize(self)
    }

    pub fn from_text(text: &str) -> Result<Self> {
        parse(text)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_text())?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_text(&text)
    }
}

fn parse_err(line: usize, message: impl Into<String>) -> Error {
    Error::ModelParse {
        line,
        message: message.into(),
    }
}

fn expect_header<'a>(
    lines: &mut impl Iterator<Item = (usize, &'a str)>,
    key: &str,
) -> Result<String> {
    let (lineno, line) = lines
        .next()
        .ok_or_else(|| parse_err(0, format!("missing '{}' header", key)))?;
    line.trim_end()
        .strip_prefix(key)
        .and_then(|rest| rest.strip_prefix(' '))
        .map(|v| v.to_string())
        .ok_or_else(|| parse_err(lineno + 1, format!("expected '{} <value>'", key)))
}

/// Pop finished features until the top of the stack is at or above
/// `target_depth`, attaching each popped node to its parent.
fn close_until(stack: &mut Vec<(usize, FeatureNode)>, target_depth: usize) {
    while stack.len() > 1 {
        let top_depth = stack.last().map(|(d, _)| *d).unwrap_or(0);
        if top_depth <= target_depth {
            break;
        }
        let (_, node) = stack.pop().expect("stack non-empty");
        let (_, parent) = stack.last_mut().expect("parent below top");
        parent.children.push(node);
    }
}

fn split_attrs(content: &str, lineno: usize) -> Result<(&str, Option<&str>)> {
    match content.find(" {") {
        Some(pos) => {
            let id = &content[..pos];
            let rest = &content[pos + 2..];
            let attrs = rest
                .strip_suffix('}')
                .ok_or_else(|| parse_err(lineno, "unterminated attribute list"))?;
            Ok((id, Some(attrs)))
        }
        None => {
            if content.contains('{') {
                return Err(parse_err(lineno, "malformed attribute list"));
            }
            Ok((content, None))
        }
    }
}

fn apply_attrs(
    node: &mut FeatureNode,
    attrs: &str,
    lineno: usize,
    descriptions: &mut BTreeMap<String, String>,
    defaults: &mut BTreeMap<String, String>,
    deprecated: &mut BTreeSet<String>,
    aliases: &mut BTreeMap<String, String>,
) -> Result<()> {
    let mut rest = attrs;
    while !rest.is_empty() {
        // doc is always last and may contain commas
        if let Some(doc) = rest.strip_prefix("doc '") {
            let doc = doc
                .strip_suffix('\'')
                .ok_or_else(|| parse_err(lineno, "unterminated doc attribute"))?;
            descriptions.insert(node.id.clone(), doc.to_string());
            break;
        }

        let (entry, tail) = match rest.find(", ") {
            Some(pos) => (&rest[..pos], &rest[pos + 2..]),
            None => (rest, ""),
        };
        rest = tail;

        if entry == "repeatable" {
            node.repeatable = true;
        } else if entry == "deprecated" {
            deprecated.insert(node.id.clone());
        } else if let Some(ty) = entry.strip_prefix("type ") {
            let ty = ScalarType::parse(ty)
                .ok_or_else(|| parse_err(lineno, format!("unknown type '{}'", ty)))?;
            match &mut node.attribute {
                Some(attr) => attr.ty = ty,
                None => {
                    node.attribute = Some(AttributeConstraint {
                        ty,
                        enum_values: Vec::new(),
                    })
                }
            }
        } else if let Some(values) = entry.strip_prefix("enum ") {
            let enum_values: Vec<String> = values.split('|').map(String::from).collect();
            match &mut node.attribute {
                Some(attr) => attr.enum_values = enum_values,
                None => {
                    node.attribute = Some(AttributeConstraint {
                        ty: ScalarType::String,
                        enum_values,
                    })
                }
            }
        } else if let Some(value) = entry.strip_prefix("default ") {
            defaults.insert(node.id.clone(), value.to_string());
        } else if let Some(canonical) = entry.strip_prefix("alias ") {
            aliases.insert(node.id.clone(), canonical.to_string());
        } else {
            return Err(parse_err(lineno, format!("unknown attribute '{}'", entry)));
        }
    }
    Ok(())
}

// =============================================================================
// Constraint expressions
// =============================================================================

fn parse_constraint_line(raw: &str, lineno: usize) -> Result<Constraint> {
    let content = raw.trim();
    let (expr_text, trace) = match content.find("//") {
        Some(pos) => (
            content[..pos].trim_end(),
            content[pos + 2..].trim().to_string(),
        ),
        None => (content, String::new()),
    };

    let tokens = tokenize(expr_text, lineno)?;
    let mut pos = 0;
    let expr = parse_implies(&tokens, &mut pos, lineno)?;
    if pos != tokens.len() {
        return Err(parse_err(lineno, "trailing tokens in constraint"));
    }

    // Plain implications map back onto requires/excludes
    let kind = match &expr {
        ConstraintExpr::Implies(a, b) => match (a.as_ref(), b.as_ref()) {
            (ConstraintExpr::Feature(lhs), ConstraintExpr::Feature(rhs)) => {
                ConstraintKind::Requires {
                    lhs: lhs.clone(),
                    rhs: rhs.clone(),
                }
            }
            (ConstraintExpr::Feature(lhs), ConstraintExpr::Not(inner)) => match inner.as_ref() {
                ConstraintExpr::Feature(rhs) => ConstraintKind::Excludes {
                    lhs: lhs.clone(),
                    rhs: rhs.clone(),
                },
                _ => ConstraintKind::Expr(expr.clone()),
            },
            _ => ConstraintKind::Expr(expr.clone()),
        },
        _ => ConstraintKind::Expr(expr.clone()),
    };

    Ok(Constraint { kind, trace })
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Not,
    And,
    Or,
    Implies,
    LParen,
    RParen,
}

fn tokenize(text: &str, lineno: usize) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' => {
                chars.next();
            }
            '!' => {
                chars.next();
                tokens.push(Token::Not);
            }
            '&' => {
                chars.next();
                tokens.push(Token::And);
            }
            '|' => {
                chars.next();
                tokens.push(Token::Or);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '=' => {
                chars.next();
                if chars.next() != Some('>') {
                    return Err(parse_err(lineno, "expected '=>'"));
                }
                tokens.push(Token::Implies);
            }
            c if c.is_ascii_alphanumeric() || c == '_' => {
                let mut ident = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            other => {
                return Err(parse_err(
                    lineno,
                    format!("unexpected character '{}' in constraint", other),
                ));
            }
        }
    }
    Ok(tokens)
}

fn parse_implies(tokens: &[Token], pos: &mut usize, lineno: usize) -> Result<ConstraintExpr> {
    let lhs = parse_or(tokens, pos, lineno)?;
    if tokens.get(*pos) == Some(&Token::Implies) {
        *pos += 1;
        let rhs = parse_implies(tokens, pos, lineno)?;
        return Ok(ConstraintExpr::Implies(Box::new(lhs), Box::new(rhs)));
    }
    Ok(lhs)
}

fn parse_or(tokens: &[Token], pos: &mut usize, lineno: usize) -> Result<ConstraintExpr> {
    let first = parse_and(tokens, pos, lineno)?;
    let mut members = vec![first];
    while tokens.get(*pos) == Some(&Token::Or) {
        *pos += 1;
        members.push(parse_and(tokens, pos, lineno)?);
    }
    if members.len() == 1 {
        Ok(members.pop().expect("single member"))
    } else {
        Ok(ConstraintExpr::Or(members))
    }
}

fn parse_and(tokens: &[Token], pos: &mut usize, lineno: usize) -> Result<ConstraintExpr> {
    let first = parse_unary(tokens, pos, lineno)?;
    let mut members = vec![first];
    while tokens.get(*pos) == Some(&Token::And) {
        *pos += 1;
        members.push(parse_unary(tokens, pos, lineno)?);
    }
    if members.len() == 1 {
        Ok(members.pop().expect("single member"))
    } else {
        Ok(ConstraintExpr::And(members))
    }
}

fn parse_unary(tokens: &[Token], pos: &mut usize, lineno: usize) -> Result<ConstraintExpr> {
    match tokens.get(*pos) {
        Some(Token::Not) => {
            *pos += 1;
            let inner = parse_unary(tokens, pos, lineno)?;
            Ok(ConstraintExpr::Not(Box::new(inner)))
        }
        Some(Token::LParen) => {
            *pos += 1;
            let inner = parse_implies(tokens, pos, lineno)?;
            if tokens.get(*pos) != Some(&Token::RParen) {
                return Err(parse_err(lineno, "missing ')'"));
            }
            *pos += 1;
            Ok(inner)
        }
        Some(Token::Ident(id)) => {
            *pos += 1;
            Ok(ConstraintExpr::Feature(id.clone()))
        }
        _ => Err(parse_err(lineno, "expected feature or '(' in constraint")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Constraint;

    fn sample_model() -> FeatureModel {
        let mut root = FeatureNode::new("cluster", Cardinality::Mandatory);
        root.group = GroupType::Or;

        let mut pod = FeatureNode::new("Pod", Cardinality::Mandatory);
        let mut spec = FeatureNode::new("Pod.spec", Cardinality::Mandatory);
        let mut containers = FeatureNode::new("Pod.spec.containers", Cardinality::Mandatory);
        containers.repeatable = true;
        let mut policy = FeatureNode::new("Pod.spec.containers.imagePullPolicy", Cardinality::Optional);
        policy.attribute = Some(AttributeConstraint {
            ty: ScalarType::String,
            enum_values: vec!["Always".into(), "Never".into()],
        });
        containers.children.push(policy);
        spec.children.push(containers);
        pod.children.push(spec);
        pod.children.push(FeatureNode::new("Pod.status", Cardinality::Optional));
        root.children.push(pod);

        let mut descriptions = BTreeMap::new();
        descriptions.insert("Pod".to_string(), "Pod is a collection of containers".to_string());

        FeatureModel {
            name: "cluster".into(),
            schema_version: semver::Version::new(1, 30, 2),
            root,
            constraints: vec![
                Constraint::requires("Pod.spec", "Pod.spec.containers", "rule:test a"),
                Constraint::excludes("Pod.status", "Pod.spec.containers.imagePullPolicy", "rule:test b"),
            ],
            descriptions,
            defaults: BTreeMap::new(),
            deprecated: BTreeSet::new(),
            aliases: BTreeMap::new(),
        }
    }

    #[test]
    fn test_round_trip_preserves_ids_groups_constraints() {
        let model = sample_model();
        let text = serialize(&model);
        let reparsed = parse(&text).unwrap();

        let ids: Vec<_> = model.feature_ids().into_iter().cloned().collect();
        let reparsed_ids: Vec<_> = reparsed.feature_ids().into_iter().cloned().collect();
        assert_eq!(ids, reparsed_ids);

        assert_eq!(reparsed.root.group, GroupType::Or);
        assert_eq!(
            reparsed.find("Pod.spec").unwrap().group,
            GroupType::And
        );
        assert_eq!(reparsed.constraints.len(), 2);
        assert!(matches!(
            reparsed.constraints[0].kind,
            ConstraintKind::Requires { .. }
        ));
        assert!(matches!(
            reparsed.constraints[1].kind,
            ConstraintKind::Excludes { .. }
        ));
        assert_eq!(reparsed.constraints[0].trace, "rule:test a");
    }

    #[test]
    fn test_serialize_parse_serialize_is_byte_identical() {
        let model = sample_model();
        let first = serialize(&model);
        let second = serialize(&parse(&first).unwrap());
        assert_eq!(first, second);
    }

    #[test]
    fn test_attributes_survive_round_trip() {
        let model = sample_model();
        let reparsed = parse(&serialize(&model)).unwrap();

        let containers = reparsed.find("Pod.spec.containers").unwrap();
        assert!(containers.repeatable);

        let policy = reparsed
            .find("Pod.spec.containers.imagePullPolicy")
            .unwrap();
        let attr = policy.attribute.as_ref().unwrap();
        assert_eq!(attr.ty, ScalarType::String);
        assert_eq!(attr.enum_values, vec!["Always", "Never"]);

        assert_eq!(
            reparsed.descriptions.get("Pod").map(String::as_str),
            Some("Pod is a collection of containers")
        );
    }

    #[test]
    fn test_expression_constraint_round_trip() {
        let mut model = sample_model();
        model.constraints = vec![Constraint::expr(
            ConstraintExpr::Implies(
                Box::new(ConstraintExpr::Feature("Pod.spec".into())),
                Box::new(ConstraintExpr::Or(vec![
                    ConstraintExpr::Feature("Pod.spec.containers".into()),
                    ConstraintExpr::Not(Box::new(ConstraintExpr::Feature("Pod.status".into()))),
                ])),
            ),
            "rule:at-least-one test",
        )];

        let reparsed = parse(&serialize(&model)).unwrap();
        assert_eq!(reparsed.constraints.len(), 1);
        match &reparsed.constraints[0].kind {
            ConstraintKind::Expr(e) => {
                assert_eq!(e.to_string(), "Pod.spec => (Pod.spec.containers | !Pod.status)");
            }
            other => panic!("expected Expr, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse("nonsense").is_err());
        assert!(parse("model m\nversion 1.0.0\nfeatures\n\tA {bogus attr}\n").is_err());
        assert!(parse("model m\nversion not-a-version\nfeatures\n\tA\n").is_err());
    }
}
