//! HCL rendering
//!
//! The document model is lowered to an `hcl-rs` body and printed by its
//! formatter: settings first, then blocks in insertion order, one blank line
//! between blocks. Arrays stay on one line. String literals are escaped by
//! the formatter, so quotes, control characters and template markers (`${`
//! and `%{`) inside payloads such as shell scripts reach Terraform verbatim.

use ::hcl::expr::{FuncCall, TemplateExpr, Traversal, TraversalOperator, Variable};
use ::hcl::format::{Format, Formatter};
use ::hcl::{Attribute, Block, Expression, Identifier, Number, Object, ObjectKey, Structure};

use super::{
    Address, BlockKind, Body, BodyItem, PathSegment, ResourceBlock, Settings, TemplatePart, Value,
};
use crate::{Error, Result};

/// Render settings and blocks as a complete document
pub fn render(settings: &Settings, blocks: &[ResourceBlock]) -> Result<String> {
    print(&to_body(settings, blocks)?)
}

/// Lower settings and blocks into an HCL body
pub fn to_body(settings: &Settings, blocks: &[ResourceBlock]) -> Result<::hcl::Body> {
    let mut structures = Vec::with_capacity(blocks.len() + 1);
    if !settings.required_providers.is_empty() {
        structures.push(Structure::Block(settings_block(settings)));
    }
    for block in blocks {
        structures.push(Structure::Block(to_block(block)?));
    }
    Ok(::hcl::Body::from(structures))
}

/// Render one top-level block
pub fn render_block(block: &ResourceBlock) -> Result<String> {
    print(&to_block(block)?)
}

/// Render a value as an HCL expression
pub fn render_value(value: &Value) -> Result<String> {
    print(&expression(value)?)
}

fn print<T: Format>(item: &T) -> Result<String> {
    let mut formatter = Formatter::builder().compact_arrays(true).build_vec();
    Ok(item.format_string(&mut formatter)?)
}

fn settings_block(settings: &Settings) -> Block {
    let providers = settings.required_providers.iter().map(|(name, req)| {
        let mut constraint = Object::new();
        constraint.insert(
            ObjectKey::Identifier(Identifier::sanitized("source")),
            Expression::String(req.source.clone()),
        );
        constraint.insert(
            ObjectKey::Identifier(Identifier::sanitized("version")),
            Expression::String(req.version.clone()),
        );
        Attribute::new(Identifier::sanitized(name), Expression::Object(constraint))
    });

    Block::builder("terraform")
        .add_block(
            Block::builder("required_providers")
                .add_attributes(providers)
                .build(),
        )
        .build()
}

/// Lower one top-level block
pub fn to_block(block: &ResourceBlock) -> Result<Block> {
    let builder = match &block.kind {
        BlockKind::Provider(t) => Block::builder("provider").add_label(t.as_str()),
        BlockKind::Resource(t) => Block::builder("resource")
            .add_label(t.as_str())
            .add_label(block.name.as_str()),
        BlockKind::Data(t) => Block::builder("data")
            .add_label(t.as_str())
            .add_label(block.name.as_str()),
        BlockKind::Locals => Block::builder("locals"),
        BlockKind::Output => Block::builder("output").add_label(block.name.as_str()),
    };

    let mut builder = builder.add_structures(structures(&block.body)?);
    if !block.depends_on.is_empty() {
        let deps = block
            .depends_on
            .iter()
            .map(|a| traversal(a, &[]))
            .collect::<Vec<_>>();
        builder = builder.add_attribute(Attribute::new("depends_on", Expression::Array(deps)));
    }
    Ok(builder.build())
}

fn structures(body: &Body) -> Result<Vec<Structure>> {
    body.items
        .iter()
        .map(|item| match item {
            BodyItem::Attribute(key, value) => Ok(Structure::Attribute(Attribute::new(
                Identifier::sanitized(key),
                expression(value)?,
            ))),
            BodyItem::Block(nested) => Ok(Structure::Block(
                Block::builder(Identifier::sanitized(&nested.ident))
                    .add_labels(nested.labels.iter().map(String::as_str))
                    .add_structures(structures(&nested.body)?)
                    .build(),
            )),
        })
        .collect()
}

/// Lower a value to an HCL expression
pub fn expression(value: &Value) -> Result<Expression> {
    Ok(match value {
        Value::Null => Expression::Null,
        Value::String(s) => Expression::String(s.clone()),
        Value::Bool(b) => Expression::Bool(*b),
        Value::Number(n) => Expression::Number(number(n)?),
        Value::List(items) => {
            Expression::Array(items.iter().map(expression).collect::<Result<_>>()?)
        }
        Value::Map(map) => {
            let mut object = Object::new();
            for (k, v) in map {
                object.insert(ObjectKey::Expression(Expression::String(k.clone())), expression(v)?);
            }
            Expression::Object(object)
        }
        Value::Ref(r) => traversal(&r.address, &r.path),
        Value::Call { func, args } => {
            let call = args
                .iter()
                .try_fold(FuncCall::builder(Identifier::sanitized(func)), |call, arg| {
                    Ok::<_, Error>(call.arg(expression(arg)?))
                })?;
            Expression::FuncCall(Box::new(call.build()))
        }
        Value::Template(parts) => template(parts)?,
    })
}

fn number(n: &serde_json::Number) -> Result<Number> {
    if let Some(u) = n.as_u64() {
        return Ok(Number::from(u));
    }
    if let Some(i) = n.as_i64() {
        return Ok(Number::from(i));
    }
    n.as_f64()
        .and_then(Number::from_f64)
        .ok_or_else(|| Error::Serialization(format!("number {n} has no HCL form")))
}

fn traversal(address: &Address, path: &[PathSegment]) -> Expression {
    let (root, mut operators) = match &address.kind {
        BlockKind::Resource(t) => (t.as_str(), vec![get_attr(&address.name)]),
        BlockKind::Data(t) => ("data", vec![get_attr(t), get_attr(&address.name)]),
        BlockKind::Locals => ("local", vec![get_attr(&address.name)]),
        BlockKind::Output => ("output", vec![get_attr(&address.name)]),
        BlockKind::Provider(t) => ("provider", vec![get_attr(t)]),
    };
    operators.extend(path.iter().map(|segment| match segment {
        PathSegment::Attr(name) => get_attr(name),
        PathSegment::Index(i) => TraversalOperator::Index(Expression::Number(Number::from(*i))),
    }));
    Expression::Traversal(Box::new(Traversal::new(Variable::sanitized(root), operators)))
}

fn get_attr(name: &str) -> TraversalOperator {
    TraversalOperator::GetAttr(Identifier::sanitized(name))
}

// Quoted templates are written raw, so literal parts go through the string
// escaper first and references are wrapped in `${...}`.
fn template(parts: &[TemplatePart]) -> Result<Expression> {
    let mut raw = String::new();
    for part in parts {
        match part {
            TemplatePart::Literal(lit) => {
                let quoted = print(&Expression::String(lit.clone()))?;
                let inner = quoted
                    .strip_prefix('"')
                    .and_then(|s| s.strip_suffix('"'))
                    .ok_or_else(|| Error::Serialization(format!("unquoted literal {quoted}")))?;
                raw.push_str(inner);
            }
            TemplatePart::Ref(r) => {
                raw.push_str("${");
                raw.push_str(&print(&traversal(&r.address, &r.path))?);
                raw.push('}');
            }
        }
    }
    Ok(Expression::TemplateExpr(Box::new(TemplateExpr::QuotedString(raw))))
}
