//! Parses ROS 2 `.msg`-format schema text (as carried in a [`crate::Schema`]'s `data`, when
//! `encoding == "ros2msg"`) into a typed graph of message definitions, ready for
//! [`crate::codec`] to compile into a decode/encode plan.
//!
//! Schema text is one primary message definition, optionally followed by dependency blocks for
//! every nested type it (transitively) references, each introduced by a line of 80 `=`
//! characters and a `MSG: <package>/<Type>` header. Comments start with `#` and run to the end
//! of the line; constants look like `TYPE NAME=VALUE`; everything else is `TYPE NAME` (plus an
//! optional default value for fields, which we keep but don't interpret).

use std::collections::BTreeMap;

use crate::error::{McapError, McapResult};

const SEPARATOR_PREFIX: &str = "======";

/// A primitive ROS field type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    Bool,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl PrimitiveType {
    fn try_from_str(s: &str) -> Option<Self> {
        Some(match s {
            "bool" => PrimitiveType::Bool,
            "int8" => PrimitiveType::I8,
            "byte" | "uint8" | "char" => PrimitiveType::U8,
            "int16" => PrimitiveType::I16,
            "uint16" => PrimitiveType::U16,
            "int32" => PrimitiveType::I32,
            "uint32" => PrimitiveType::U32,
            "int64" => PrimitiveType::I64,
            "uint64" => PrimitiveType::U64,
            "float32" | "float" => PrimitiveType::F32,
            "float64" | "double" => PrimitiveType::F64,
            _ => return None,
        })
    }

    /// CDR-required alignment of this type, in bytes.
    pub fn alignment(self) -> u64 {
        match self {
            PrimitiveType::Bool | PrimitiveType::I8 | PrimitiveType::U8 => 1,
            PrimitiveType::I16 | PrimitiveType::U16 => 2,
            PrimitiveType::I32 | PrimitiveType::U32 | PrimitiveType::F32 => 4,
            PrimitiveType::I64 | PrimitiveType::U64 | PrimitiveType::F64 => 8,
        }
    }

    /// Fixed wire size of this type, in bytes.
    pub fn size(self) -> usize {
        match self {
            PrimitiveType::Bool | PrimitiveType::I8 | PrimitiveType::U8 => 1,
            PrimitiveType::I16 | PrimitiveType::U16 => 2,
            PrimitiveType::I32 | PrimitiveType::U32 | PrimitiveType::F32 => 4,
            PrimitiveType::I64 | PrimitiveType::U64 | PrimitiveType::F64 => 8,
        }
    }
}

/// A field's declared type.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    Primitive(PrimitiveType),
    /// `string` / `wstring`.
    String,
    /// A ROS 1-style `time` or `duration`: two `u32`s (seconds, nanoseconds), 4-byte aligned.
    TimeOrDuration,
    /// `T[N]`: exactly `N` elements, no length prefix.
    Array(Box<FieldType>, usize),
    /// `T[]`: a length-prefixed, unbounded sequence.
    Sequence(Box<FieldType>),
    /// `T[<=N]`: a length-prefixed sequence with at most `N` elements.
    BoundedSequence(Box<FieldType>, usize),
    /// A reference to another message type defined elsewhere in the same schema graph.
    Complex(String),
}

/// One field of a message definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub type_: FieldType,
}

/// One constant declared in a message definition. Constants aren't part of the wire format;
/// they're kept only so callers introspecting a schema can see them.
#[derive(Debug, Clone, PartialEq)]
pub struct Constant {
    pub name: String,
    pub type_: FieldType,
    pub value: String,
}

/// A single parsed message type: the root message, or one of its (transitive) dependencies.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MessageSpec {
    pub fields: Vec<Field>,
    pub constants: Vec<Constant>,
}

/// The result of parsing one `.msg`-format schema: the root message plus every dependency
/// block it referenced, keyed by the fully-qualified name given after `MSG:`.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaGraph {
    pub root: String,
    pub messages: BTreeMap<String, MessageSpec>,
}

impl SchemaGraph {
    pub fn root_message(&self) -> &MessageSpec {
        self.messages
            .get(&self.root)
            .expect("root message is always inserted during parsing")
    }

    /// Checks that every [`FieldType::Complex`] reference (transitively) resolves to a message
    /// defined in this graph.
    pub fn validate_references(&self) -> McapResult<()> {
        for spec in self.messages.values() {
            for field in &spec.fields {
                validate_type_refs(&field.type_, &self.messages)?;
            }
        }
        Ok(())
    }
}

fn validate_type_refs(ty: &FieldType, messages: &BTreeMap<String, MessageSpec>) -> McapResult<()> {
    match ty {
        FieldType::Complex(name) => {
            if !messages.contains_key(name) {
                return Err(McapError::UnresolvedNestedType(name.clone()));
            }
            Ok(())
        }
        FieldType::Array(inner, _)
        | FieldType::Sequence(inner)
        | FieldType::BoundedSequence(inner, _) => validate_type_refs(inner, messages),
        FieldType::Primitive(_) | FieldType::String | FieldType::TimeOrDuration => Ok(()),
    }
}

/// Parses `.msg`-format schema text for a message named `name` (as it would appear in a
/// [`crate::Schema`]'s `name` field, e.g. `std_msgs/msg/Header`).
pub fn parse(name: &str, text: &str) -> McapResult<SchemaGraph> {
    let mut blocks = Vec::new();
    let mut current_name = name.to_string();
    let mut current_lines: Vec<&str> = Vec::new();

    for (lineno, raw_line) in text.lines().enumerate() {
        if raw_line.trim_start().starts_with(SEPARATOR_PREFIX)
            && raw_line.trim().chars().all(|c| c == '=')
        {
            blocks.push((current_name.clone(), std::mem::take(&mut current_lines)));
            // The next non-comment line must be `MSG: <name>`.
            current_name = String::new();
            continue;
        }
        if current_name.is_empty() && blocks.len() > 0 {
            let trimmed = strip_comment(raw_line).trim();
            if trimmed.is_empty() {
                continue;
            }
            let Some(fqname) = trimmed.strip_prefix("MSG:") else {
                return Err(McapError::SchemaParse {
                    line: lineno + 1,
                    message: format!("expected 'MSG: <name>' after separator, got {trimmed:?}"),
                });
            };
            current_name = fqname.trim().to_string();
            continue;
        }
        current_lines.push(raw_line);
    }
    blocks.push((current_name, current_lines));

    let mut messages = BTreeMap::new();
    for (block_name, lines) in blocks {
        if block_name.is_empty() {
            continue;
        }
        let spec = parse_message_body(&lines)?;
        messages.insert(block_name, spec);
    }

    alias_bare_header(&mut messages);
    canonicalize_complex_refs(&mut messages);

    let graph = SchemaGraph {
        root: name.to_string(),
        messages,
    };
    graph.validate_references()?;
    Ok(graph)
}

/// A field typed bare `Header` (no package prefix) means `std_msgs/Header` regardless of how
/// the dependency block for it was actually qualified (`std_msgs/Header` in ROS 1 schemas,
/// `std_msgs/msg/Header` in ROS 2 ones). Alias it so `FieldType::Complex("Header")` resolves.
fn alias_bare_header(messages: &mut BTreeMap<String, MessageSpec>) {
    if messages.contains_key("Header") {
        return;
    }
    if let Some(spec) = messages
        .iter()
        .find(|(name, _)| name.as_str() == "std_msgs/Header" || name.ends_with("/msg/Header"))
        .map(|(_, spec)| spec.clone())
    {
        messages.insert("Header".to_string(), spec);
    }
}

/// Field type tokens reference nested types by their *unqualified* package path
/// (`geometry_msgs/Vector3`), but a concatenated schema's `MSG:` dependency headers carry the
/// fully-qualified ROS 2 path (`geometry_msgs/msg/Vector3`). Rewrite every [`FieldType::Complex`]
/// reference to whichever key is actually present in `messages`, trying the token as given, then
/// with a `/msg/` segment inserted before the final component, then (for a bare, unqualified
/// name) any block whose final path component matches. References that resolve to nothing are
/// left untouched, so [`SchemaGraph::validate_references`] can report them.
fn canonicalize_complex_refs(messages: &mut BTreeMap<String, MessageSpec>) {
    let known: Vec<String> = messages.keys().cloned().collect();
    let resolve = |token: &str| -> Option<String> {
        if known.iter().any(|k| k == token) {
            return Some(token.to_string());
        }
        if let Some((pkg, ty)) = token.rsplit_once('/') {
            let qualified = format!("{pkg}/msg/{ty}");
            if known.iter().any(|k| k == &qualified) {
                return Some(qualified);
            }
        }
        known
            .iter()
            .find(|k| k.rsplit('/').next() == Some(token))
            .cloned()
    };

    for spec in messages.values_mut() {
        for field in &mut spec.fields {
            canonicalize_field_type(&mut field.type_, &resolve);
        }
    }
}

fn canonicalize_field_type(ty: &mut FieldType, resolve: &impl Fn(&str) -> Option<String>) {
    match ty {
        FieldType::Complex(name) => {
            if let Some(canonical) = resolve(name) {
                *name = canonical;
            }
        }
        FieldType::Array(inner, _)
        | FieldType::Sequence(inner)
        | FieldType::BoundedSequence(inner, _) => canonicalize_field_type(inner, resolve),
        FieldType::Primitive(_) | FieldType::String | FieldType::TimeOrDuration => {}
    }
}

fn parse_message_body(lines: &[&str]) -> McapResult<MessageSpec> {
    let mut spec = MessageSpec::default();

    for (lineno, raw_line) in lines.iter().enumerate() {
        let line = strip_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        let mut parts = line.splitn(2, char::is_whitespace);
        let type_token = parts.next().unwrap_or_default();
        let rest = parts.next().unwrap_or_default().trim();

        let type_ = parse_field_type(type_token).ok_or_else(|| McapError::SchemaParse {
            line: lineno + 1,
            message: format!("unrecognized type {type_token:?}"),
        })?;

        if let Some((const_name, value)) = rest.split_once('=') {
            spec.constants.push(Constant {
                name: const_name.trim().to_string(),
                type_,
                value: value.trim().to_string(),
            });
        } else {
            let field_name = rest.split_whitespace().next().unwrap_or(rest);
            if field_name.is_empty() {
                return Err(McapError::SchemaParse {
                    line: lineno + 1,
                    message: "field has no name".to_string(),
                });
            }
            spec.fields.push(Field {
                name: field_name.to_string(),
                type_,
            });
        }
    }

    Ok(spec)
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    }
}

fn parse_field_type(token: &str) -> Option<FieldType> {
    let (base, suffix) = match token.find('[') {
        Some(idx) => (&token[..idx], Some(&token[idx..])),
        None => (token, None),
    };

    if base == "time" || base == "duration" {
        return wrap_suffix(FieldType::TimeOrDuration, suffix);
    }

    let elem = if base == "string" || base == "wstring" {
        FieldType::String
    } else if let Some(p) = PrimitiveType::try_from_str(base) {
        FieldType::Primitive(p)
    } else if !base.is_empty() {
        FieldType::Complex(base.to_string())
    } else {
        return None;
    };

    wrap_suffix(elem, suffix)
}

fn wrap_suffix(elem: FieldType, suffix: Option<&str>) -> Option<FieldType> {
    let Some(suffix) = suffix else {
        return Some(elem);
    };
    let inner = suffix.strip_prefix('[')?.strip_suffix(']')?;
    if inner.is_empty() {
        Some(FieldType::Sequence(Box::new(elem)))
    } else if let Some(bound) = inner.strip_prefix("<=") {
        Some(FieldType::BoundedSequence(
            Box::new(elem),
            bound.trim().parse().ok()?,
        ))
    } else {
        Some(FieldType::Array(Box::new(elem), inner.trim().parse().ok()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flat_message() {
        let text = "float64 x\nfloat64 y\nfloat64 z\n";
        let graph = parse("geometry_msgs/msg/Vector3", text).unwrap();
        let root = graph.root_message();
        assert_eq!(root.fields.len(), 3);
        assert_eq!(root.fields[0].name, "x");
        assert_eq!(
            root.fields[0].type_,
            FieldType::Primitive(PrimitiveType::F64)
        );
    }

    #[test]
    fn parses_constants_and_arrays() {
        let text = "uint8 FOO=1\nuint8[] data\nstring[<=4] names\nint32[3] fixed\n";
        let graph = parse("pkg/msg/Thing", text).unwrap();
        let root = graph.root_message();
        assert_eq!(root.constants.len(), 1);
        assert_eq!(root.constants[0].name, "FOO");
        assert_eq!(
            root.fields[0].type_,
            FieldType::Sequence(Box::new(FieldType::Primitive(PrimitiveType::U8)))
        );
        assert_eq!(
            root.fields[1].type_,
            FieldType::BoundedSequence(Box::new(FieldType::String), 4)
        );
        assert_eq!(
            root.fields[2].type_,
            FieldType::Array(Box::new(FieldType::Primitive(PrimitiveType::I32)), 3)
        );
    }

    #[test]
    fn parses_dependency_blocks() {
        let text = "\
Header header
geometry_msgs/Vector3 linear
================================================================================
MSG: std_msgs/msg/Header
uint32 seq
================================================================================
MSG: geometry_msgs/msg/Vector3
float64 x
float64 y
float64 z
";
        let graph = parse("geometry_msgs/msg/Twist", text).unwrap();
        assert_eq!(graph.messages.len(), 3);
        assert!(graph.messages.contains_key("std_msgs/msg/Header"));
        assert_eq!(
            graph.root_message().fields[1].type_,
            FieldType::Complex("geometry_msgs/msg/Vector3".to_string())
        );
    }

    #[test]
    fn rejects_unresolved_nested_type() {
        let text = "other_pkg/msg/Missing thing\n";
        assert!(matches!(
            parse("pkg/msg/Thing", text),
            Err(McapError::UnresolvedNestedType(_))
        ));
    }
}
