//! Reference expression grammar and resolution.
//!
//! Configuration values may embed reference tokens of the form
//! `{resource.property}` or `{resource.bindings.binding.property}` between
//! literal text. `{{` and `}}` escape literal braces. The tokenizer is shared
//! with the dependency graph builder; full resolution against a manifest
//! classifies each reference as a generation-time literal or a deploy-time
//! value that emitters must render as a target-template expression.

use caravel_schema::{BindingName, Manifest, ResourceKind, ResourceName};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExprError {
    #[error("resource '{resource}': malformed expression '{expr}': {reason}")]
    Malformed {
        resource: String,
        expr: String,
        reason: String,
    },
    #[error("resource '{resource}': expression '{expr}' references unknown resource '{reference}'")]
    UnknownResource {
        resource: String,
        expr: String,
        reference: String,
    },
    #[error(
        "resource '{resource}': expression '{expr}' references unknown binding \
         '{binding}' on resource '{reference}'"
    )]
    UnknownBinding {
        resource: String,
        expr: String,
        reference: String,
        binding: String,
    },
    #[error(
        "resource '{resource}': expression '{expr}' references property '{property}' \
         which '{reference}' does not expose"
    )]
    UnknownProperty {
        resource: String,
        expr: String,
        reference: String,
        property: String,
    },
}

/// Referencable properties. Closed set; anything else is rejected at
/// resolution time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Property {
    Url,
    Host,
    Port,
    Scheme,
    ConnectionString,
    Value,
}

impl Property {
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "url" => Some(Self::Url),
            "host" => Some(Self::Host),
            "port" => Some(Self::Port),
            "scheme" => Some(Self::Scheme),
            "connectionString" => Some(Self::ConnectionString),
            "value" => Some(Self::Value),
            _ => None,
        }
    }

    pub fn as_wire(self) -> &'static str {
        match self {
            Self::Url => "url",
            Self::Host => "host",
            Self::Port => "port",
            Self::Scheme => "scheme",
            Self::ConnectionString => "connectionString",
            Self::Value => "value",
        }
    }

    /// Properties only valid through a `.bindings.<name>.` path.
    fn requires_binding(self) -> bool {
        matches!(self, Self::Url | Self::Host | Self::Port | Self::Scheme)
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// A parsed reference token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ref {
    pub resource: ResourceName,
    pub binding: Option<BindingName>,
    pub property: Property,
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.binding {
            Some(b) => write!(f, "{}.bindings.{}.{}", self.resource, b, self.property),
            None => write!(f, "{}.{}", self.resource, self.property),
        }
    }
}

/// One lexed segment of an expression string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Reference(Ref),
}

/// Lex an expression into literal and reference segments.
///
/// `owner` is the resource declaring the expression, used for error context
/// only. No manifest validation happens here; the dependency graph builder
/// reuses this lexer before any resolution is attempted.
pub fn tokenize(owner: &str, expr: &str) -> Result<Vec<Segment>, ExprError> {
    lex(expr).map_err(|fail| match fail {
        LexFail::Syntax(reason) => ExprError::Malformed {
            resource: owner.to_owned(),
            expr: expr.to_owned(),
            reason,
        },
        LexFail::Property {
            reference,
            property,
        } => ExprError::UnknownProperty {
            resource: owner.to_owned(),
            expr: expr.to_owned(),
            reference,
            property,
        },
    })
}

enum LexFail {
    Syntax(String),
    Property { reference: String, property: String },
}

fn lex(expr: &str) -> Result<Vec<Segment>, LexFail> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = expr.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                literal.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                literal.push('}');
            }
            '}' => return Err(LexFail::Syntax("unmatched '}'".to_owned())),
            '{' => {
                let mut path = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some('{') => {
                            return Err(LexFail::Syntax(
                                "nested '{' inside reference".to_owned(),
                            ))
                        }
                        Some(p) => path.push(p),
                        None => {
                            return Err(LexFail::Syntax("unterminated reference".to_owned()))
                        }
                    }
                }
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Reference(parse_path(path.trim())?));
            }
            _ => literal.push(c),
        }
    }

    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

fn parse_path(path: &str) -> Result<Ref, LexFail> {
    let parts: Vec<&str> = path.split('.').collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(LexFail::Syntax(format!("empty path segment in '{path}'")));
    }

    let (resource, binding, property) = match parts.as_slice() {
        [resource, property] => (*resource, None, *property),
        [resource, "bindings", binding, property] => (*resource, Some(*binding), *property),
        _ => {
            return Err(LexFail::Syntax(format!(
                "expected 'resource.property' or 'resource.bindings.binding.property', got '{path}'"
            )))
        }
    };

    let property = Property::from_wire(property).ok_or_else(|| LexFail::Property {
        reference: (*resource).to_owned(),
        property: (*property).to_owned(),
    })?;

    Ok(Ref {
        resource: ResourceName::new(resource),
        binding: binding.map(BindingName::new),
        property,
    })
}

/// Validate a reference against the manifest without resolving it.
///
/// Checks that the referenced resource exists, the binding (if any) exists on
/// it, and the property is one the referenced resource actually exposes.
pub fn validate_ref(
    manifest: &Manifest,
    owner: &str,
    expr: &str,
    reference: &Ref,
) -> Result<(), ExprError> {
    let Some(target) = manifest.get(&reference.resource) else {
        return Err(ExprError::UnknownResource {
            resource: owner.to_owned(),
            expr: expr.to_owned(),
            reference: reference.resource.to_string(),
        });
    };

    match &reference.binding {
        Some(binding) => {
            if target.bindings.get(binding).is_none() {
                return Err(ExprError::UnknownBinding {
                    resource: owner.to_owned(),
                    expr: expr.to_owned(),
                    reference: reference.resource.to_string(),
                    binding: binding.to_string(),
                });
            }
            if !reference.property.requires_binding() {
                return Err(unknown_property(owner, expr, reference));
            }
        }
        None => {
            let valid = match reference.property {
                Property::Value => target.kind == ResourceKind::Parameter,
                Property::ConnectionString => target.kind.requires_provisioning(),
                _ => false,
            };
            if !valid {
                return Err(unknown_property(owner, expr, reference));
            }
        }
    }
    Ok(())
}

fn unknown_property(owner: &str, expr: &str, reference: &Ref) -> ExprError {
    ExprError::UnknownProperty {
        resource: owner.to_owned(),
        expr: expr.to_owned(),
        reference: reference.resource.to_string(),
        property: reference.property.to_string(),
    }
}

/// One resolved part: either a generation-time literal or a value that only
/// exists once the referenced resource's infrastructure is provisioned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedPart {
    Literal(String),
    DeployTime(Ref),
}

/// Resolver output: literal runs interleaved with deploy-time references, in
/// source order. Adjacent literals are merged.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResolvedExpression {
    pub parts: Vec<ResolvedPart>,
}

impl ResolvedExpression {
    pub fn is_static(&self) -> bool {
        self.parts
            .iter()
            .all(|p| matches!(p, ResolvedPart::Literal(_)))
    }

    /// Concatenated literal value, if the whole expression is static.
    pub fn as_static(&self) -> Option<String> {
        if !self.is_static() {
            return None;
        }
        let mut out = String::new();
        for part in &self.parts {
            if let ResolvedPart::Literal(text) = part {
                out.push_str(text);
            }
        }
        Some(out)
    }

    pub fn deploy_time_refs(&self) -> impl Iterator<Item = &Ref> {
        self.parts.iter().filter_map(|p| match p {
            ResolvedPart::DeployTime(r) => Some(r),
            ResolvedPart::Literal(_) => None,
        })
    }

    fn push_literal(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(ResolvedPart::Literal(last)) = self.parts.last_mut() {
            last.push_str(text);
        } else {
            self.parts.push(ResolvedPart::Literal(text.to_owned()));
        }
    }

    fn push_ref(&mut self, reference: Ref) {
        self.parts.push(ResolvedPart::DeployTime(reference));
    }
}

/// Resolve an expression declared by `owner` against the manifest.
///
/// Parameter values are inlined when fully static; a parameter whose own
/// value embeds further references is resolved recursively, splicing its
/// parts into the outer expression. The resolver never collapses a chain into
/// a literal unless every link is statically known, so a mixed chain degrades
/// to deploy-time parts anchored at the provisioned resources. Termination is
/// bounded by resource count because cyclic manifests are rejected before any
/// resolution is attempted.
pub fn resolve(
    manifest: &Manifest,
    owner: &str,
    expr: &str,
) -> Result<ResolvedExpression, ExprError> {
    let mut resolved = ResolvedExpression::default();
    resolve_into(manifest, owner, expr, 0, &mut resolved)?;
    Ok(resolved)
}

fn resolve_into(
    manifest: &Manifest,
    owner: &str,
    expr: &str,
    depth: usize,
    out: &mut ResolvedExpression,
) -> Result<(), ExprError> {
    // A chain longer than the resource count can only mean an unrejected cycle.
    if depth > manifest.len() {
        return Err(ExprError::Malformed {
            resource: owner.to_owned(),
            expr: expr.to_owned(),
            reason: "reference chain exceeds resource count".to_owned(),
        });
    }
    for segment in tokenize(owner, expr)? {
        match segment {
            Segment::Literal(text) => out.push_literal(&text),
            Segment::Reference(reference) => {
                validate_ref(manifest, owner, expr, &reference)?;
                if reference.property == Property::Value {
                    let target = manifest.get(&reference.resource).ok_or_else(|| {
                        ExprError::UnknownResource {
                            resource: owner.to_owned(),
                            expr: expr.to_owned(),
                            reference: reference.resource.to_string(),
                        }
                    })?;
                    let value = target.value.clone().unwrap_or_default();
                    resolve_into(manifest, reference.resource.as_str(), &value, depth + 1, out)?;
                } else {
                    out.push_ref(reference);
                }
            }
        }
    }
    Ok(())
}
