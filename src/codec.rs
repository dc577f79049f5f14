//! Compiles a parsed [`crate::schema`] graph into a decode/encode plan for a message's wire
//! bytes, and interprets that plan against CDR (ROS 2) or ROS 1 payloads.
//!
//! Schemas aren't known until a file is opened, so there's no Rust type to decode into; instead
//! each message type compiles once into a flat [`MessagePlan`] of micro-ops, and decoding just
//! walks that plan against a byte cursor, producing a [`DecodedValue`] tree. The plan is built at
//! most once per schema name and kept on the [`CodecCache`] that owns it - never in a global.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::error::{McapError, McapResult};
use crate::schema::{self, FieldType, MessageSpec, PrimitiveType, SchemaGraph};

/// Which wire dialect a [`CompiledSchema`] was compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// ROS 2's CDR encoding: a 4-byte encapsulation header, fields aligned to their natural
    /// size from the start of the CDR body, NUL-terminated length-prefixed strings.
    Cdr,
    /// ROS 1's bag encoding: always little-endian, no alignment padding, strings without a
    /// trailing NUL, and an extra synthetic `seq: u32` field on `Header` messages.
    Ros1,
}

/// A decoded message value. Schemas are only known at file-open time, so there's no per-schema
/// Rust type to decode into - this tagged tree stands in for one.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedValue {
    Bool(bool),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Str(String),
    Bytes(Vec<u8>),
    Array(Vec<DecodedValue>),
    Message(BTreeMap<String, DecodedValue>),
}

impl DecodedValue {
    fn field(&self, name: &str) -> McapResult<&DecodedValue> {
        match self {
            DecodedValue::Message(fields) => fields
                .get(name)
                .ok_or_else(|| McapError::MissingField(name.to_string())),
            _ => Err(McapError::MissingField(name.to_string())),
        }
    }
}

/// One step of a compiled message's decode/encode plan.
#[derive(Debug, Clone, PartialEq)]
enum FieldOp {
    /// A run of consecutive fields sharing the same primitive type, decoded with a single
    /// alignment and then read back to back (primitive size always equals its alignment, so
    /// no further padding is needed between elements).
    Primitives(Vec<(String, PrimitiveType)>),
    String(String),
    /// ROS 1's `time`/`duration`: a `{sec: u32, nsec: u32}` pair, 4-byte aligned under CDR.
    TimeOrDuration(String),
    /// `T[N]`: exactly `len` elements of `elem`, with no length prefix.
    Array {
        name: String,
        elem: FieldType,
        len: usize,
    },
    /// `T[]` / `T[<=N]`: a `u32` element count (checked against `bound` if present) followed
    /// by that many elements of `elem`.
    Sequence {
        name: String,
        elem: FieldType,
        bound: Option<usize>,
    },
    Nested {
        name: String,
        type_name: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
struct MessagePlan {
    ops: Vec<FieldOp>,
}

fn compile_message(spec: &MessageSpec, synthetic_seq: bool) -> MessagePlan {
    let mut ops = Vec::new();
    let mut run: Vec<(String, PrimitiveType)> = Vec::new();

    if synthetic_seq {
        run.push(("seq".to_string(), PrimitiveType::U32));
    }

    for field in &spec.fields {
        if let FieldType::Primitive(p) = field.type_ {
            if matches!(run.last(), Some((_, last)) if *last != p) {
                ops.push(FieldOp::Primitives(std::mem::take(&mut run)));
            }
            run.push((field.name.clone(), p));
            continue;
        }

        if !run.is_empty() {
            ops.push(FieldOp::Primitives(std::mem::take(&mut run)));
        }

        ops.push(match &field.type_ {
            FieldType::String => FieldOp::String(field.name.clone()),
            FieldType::TimeOrDuration => FieldOp::TimeOrDuration(field.name.clone()),
            FieldType::Array(elem, len) => FieldOp::Array {
                name: field.name.clone(),
                elem: (**elem).clone(),
                len: *len,
            },
            FieldType::Sequence(elem) => FieldOp::Sequence {
                name: field.name.clone(),
                elem: (**elem).clone(),
                bound: None,
            },
            FieldType::BoundedSequence(elem, bound) => FieldOp::Sequence {
                name: field.name.clone(),
                elem: (**elem).clone(),
                bound: Some(*bound),
            },
            FieldType::Complex(type_name) => FieldOp::Nested {
                name: field.name.clone(),
                type_name: type_name.clone(),
            },
            FieldType::Primitive(_) => unreachable!("primitive runs flushed above"),
        });
    }

    if !run.is_empty() {
        ops.push(FieldOp::Primitives(run));
    }

    MessagePlan { ops }
}

/// Does this message type get ROS 1's synthetic leading `seq: u32` field?
fn is_header_type(name: &str) -> bool {
    name == "Header" || name == "std_msgs/Header" || name.ends_with("/msg/Header")
}

/// A schema graph with one [`MessagePlan`] compiled per message type, ready to decode or encode
/// payloads for its root type (or any of its nested types, by name).
pub struct CompiledSchema {
    graph: SchemaGraph,
    dialect: Dialect,
    plans: HashMap<String, MessagePlan>,
}

impl CompiledSchema {
    /// Compiles every message type in `graph` (the root plus all of its dependencies) into a
    /// plan for `dialect`.
    pub fn compile(graph: SchemaGraph, dialect: Dialect) -> McapResult<Self> {
        graph.validate_references()?;
        let synthetic_seq = dialect == Dialect::Ros1;
        let plans = graph
            .messages
            .iter()
            .map(|(name, spec)| {
                let plan = compile_message(spec, synthetic_seq && is_header_type(name));
                (name.clone(), plan)
            })
            .collect();
        Ok(Self {
            graph,
            dialect,
            plans,
        })
    }

    pub fn root_type_name(&self) -> &str {
        &self.graph.root
    }

    /// Decodes a full message payload (including the CDR encapsulation header, for
    /// [`Dialect::Cdr`]) into a [`DecodedValue::Message`].
    pub fn decode(&self, data: &[u8]) -> McapResult<DecodedValue> {
        let (body, little_endian) = match self.dialect {
            Dialect::Cdr => {
                if data.len() < 4 {
                    return Err(McapError::MalformedCdr);
                }
                let representation_id = data[1];
                let little_endian = match representation_id {
                    0 => false,
                    1 => true,
                    other => return Err(McapError::UnsupportedRepresentation(other)),
                };
                (&data[4..], little_endian)
            }
            Dialect::Ros1 => (data, true),
        };

        let mut cursor = ReadCursor {
            buf: body,
            pos: 0,
            dialect: self.dialect,
            little_endian,
        };
        let fields = self.decode_message(&self.graph.root, &mut cursor)?;
        Ok(DecodedValue::Message(fields))
    }

    fn decode_message(
        &self,
        type_name: &str,
        cursor: &mut ReadCursor,
    ) -> McapResult<BTreeMap<String, DecodedValue>> {
        let plan = self
            .plans
            .get(type_name)
            .ok_or_else(|| McapError::UnresolvedNestedType(type_name.to_string()))?;

        let mut fields = BTreeMap::new();
        for op in &plan.ops {
            match op {
                FieldOp::Primitives(run) => {
                    if let Some((_, ty)) = run.first() {
                        cursor.align(ty.alignment())?;
                    }
                    for (name, ty) in run {
                        fields.insert(name.clone(), cursor.read_primitive(*ty)?);
                    }
                }
                FieldOp::String(name) => {
                    fields.insert(name.clone(), DecodedValue::Str(cursor.read_string()?));
                }
                FieldOp::TimeOrDuration(name) => {
                    cursor.align(4)?;
                    let mut pair = BTreeMap::new();
                    pair.insert("sec".to_string(), cursor.read_primitive(PrimitiveType::U32)?);
                    pair.insert("nsec".to_string(), cursor.read_primitive(PrimitiveType::U32)?);
                    fields.insert(name.clone(), DecodedValue::Message(pair));
                }
                FieldOp::Array { name, elem, len } => {
                    let mut values = Vec::with_capacity(*len);
                    for _ in 0..*len {
                        values.push(self.decode_field(elem, cursor)?);
                    }
                    fields.insert(name.clone(), DecodedValue::Array(values));
                }
                FieldOp::Sequence { name, elem, bound } => {
                    cursor.align(4)?;
                    let count = cursor.read_u32_raw()? as usize;
                    if let Some(bound) = bound {
                        if count > *bound {
                            return Err(McapError::SchemaMismatch {
                                declared: count as u64,
                                available: *bound as u64,
                            });
                        }
                    }
                    let mut values = Vec::with_capacity(count);
                    for _ in 0..count {
                        values.push(self.decode_field(elem, cursor)?);
                    }
                    fields.insert(name.clone(), DecodedValue::Array(values));
                }
                FieldOp::Nested { name, type_name } => {
                    let nested = self.decode_message(type_name, cursor)?;
                    fields.insert(name.clone(), DecodedValue::Message(nested));
                }
            }
        }
        Ok(fields)
    }

    fn decode_field(&self, ty: &FieldType, cursor: &mut ReadCursor) -> McapResult<DecodedValue> {
        Ok(match ty {
            FieldType::Primitive(p) => {
                cursor.align(p.alignment())?;
                cursor.read_primitive(*p)?
            }
            FieldType::String => DecodedValue::Str(cursor.read_string()?),
            FieldType::TimeOrDuration => {
                cursor.align(4)?;
                let mut pair = BTreeMap::new();
                pair.insert("sec".to_string(), cursor.read_primitive(PrimitiveType::U32)?);
                pair.insert("nsec".to_string(), cursor.read_primitive(PrimitiveType::U32)?);
                DecodedValue::Message(pair)
            }
            FieldType::Array(inner, len) => {
                let mut values = Vec::with_capacity(*len);
                for _ in 0..*len {
                    values.push(self.decode_field(inner, cursor)?);
                }
                DecodedValue::Array(values)
            }
            FieldType::Sequence(inner) | FieldType::BoundedSequence(inner, _) => {
                cursor.align(4)?;
                let count = cursor.read_u32_raw()? as usize;
                if let FieldType::BoundedSequence(_, bound) = ty {
                    if count > *bound {
                        return Err(McapError::SchemaMismatch {
                            declared: count as u64,
                            available: *bound as u64,
                        });
                    }
                }
                let mut values = Vec::with_capacity(count);
                for _ in 0..count {
                    values.push(self.decode_field(inner, cursor)?);
                }
                DecodedValue::Array(values)
            }
            FieldType::Complex(type_name) => {
                DecodedValue::Message(self.decode_message(type_name, cursor)?)
            }
        })
    }

    /// Encodes a [`DecodedValue::Message`] matching this schema's root type into a full
    /// payload (including the CDR encapsulation header, for [`Dialect::Cdr`]).
    pub fn encode(&self, value: &DecodedValue) -> McapResult<Vec<u8>> {
        let mut cursor = WriteCursor {
            buf: Vec::new(),
            dialect: self.dialect,
        };
        if self.dialect == Dialect::Cdr {
            cursor.buf.extend_from_slice(&[0x00, 0x01, 0x00, 0x00]);
        }
        self.encode_message(self.graph.root_message_name(), value, &mut cursor)?;
        Ok(cursor.buf)
    }

    fn encode_message(
        &self,
        type_name: &str,
        value: &DecodedValue,
        cursor: &mut WriteCursor,
    ) -> McapResult<()> {
        let plan = self
            .plans
            .get(type_name)
            .ok_or_else(|| McapError::UnresolvedNestedType(type_name.to_string()))?;

        for op in &plan.ops {
            match op {
                FieldOp::Primitives(run) => {
                    if let Some((_, ty)) = run.first() {
                        cursor.align(ty.alignment());
                    }
                    for (name, ty) in run {
                        cursor.write_primitive(*ty, value.field(name)?)?;
                    }
                }
                FieldOp::String(name) => {
                    let s = match value.field(name)? {
                        DecodedValue::Str(s) => s,
                        _ => return Err(McapError::ValueOutOfRange(name.clone())),
                    };
                    cursor.write_string(s);
                }
                FieldOp::TimeOrDuration(name) => {
                    cursor.align(4);
                    let pair = value.field(name)?;
                    cursor.write_primitive(PrimitiveType::U32, pair.field("sec")?)?;
                    cursor.write_primitive(PrimitiveType::U32, pair.field("nsec")?)?;
                }
                FieldOp::Array { name, elem, len } => {
                    let values = match value.field(name)? {
                        DecodedValue::Array(v) => v,
                        _ => return Err(McapError::ValueOutOfRange(name.clone())),
                    };
                    if values.len() != *len {
                        return Err(McapError::ValueOutOfRange(name.clone()));
                    }
                    for v in values {
                        self.encode_field(elem, v, cursor)?;
                    }
                }
                FieldOp::Sequence { name, elem, bound } => {
                    let values = match value.field(name)? {
                        DecodedValue::Array(v) => v,
                        _ => return Err(McapError::ValueOutOfRange(name.clone())),
                    };
                    if let Some(bound) = bound {
                        if values.len() > *bound {
                            return Err(McapError::ValueOutOfRange(name.clone()));
                        }
                    }
                    cursor.align(4);
                    cursor.write_u32_raw(values.len() as u32);
                    for v in values {
                        self.encode_field(elem, v, cursor)?;
                    }
                }
                FieldOp::Nested { name, type_name } => {
                    self.encode_message(type_name, value.field(name)?, cursor)?;
                }
            }
        }
        Ok(())
    }

    fn encode_field(
        &self,
        ty: &FieldType,
        value: &DecodedValue,
        cursor: &mut WriteCursor,
    ) -> McapResult<()> {
        match ty {
            FieldType::Primitive(p) => {
                cursor.align(p.alignment());
                cursor.write_primitive(*p, value)?;
            }
            FieldType::String => match value {
                DecodedValue::Str(s) => cursor.write_string(s),
                _ => return Err(McapError::ValueOutOfRange("string element".to_string())),
            },
            FieldType::TimeOrDuration => {
                cursor.align(4);
                cursor.write_primitive(PrimitiveType::U32, value.field("sec")?)?;
                cursor.write_primitive(PrimitiveType::U32, value.field("nsec")?)?;
            }
            FieldType::Array(inner, len) => {
                let values = match value {
                    DecodedValue::Array(v) => v,
                    _ => return Err(McapError::ValueOutOfRange("array element".to_string())),
                };
                if values.len() != *len {
                    return Err(McapError::ValueOutOfRange("array element".to_string()));
                }
                for v in values {
                    self.encode_field(inner, v, cursor)?;
                }
            }
            FieldType::Sequence(inner) | FieldType::BoundedSequence(inner, _) => {
                let values = match value {
                    DecodedValue::Array(v) => v,
                    _ => return Err(McapError::ValueOutOfRange("sequence element".to_string())),
                };
                if let FieldType::BoundedSequence(_, bound) = ty {
                    if values.len() > *bound {
                        return Err(McapError::ValueOutOfRange("sequence element".to_string()));
                    }
                }
                cursor.align(4);
                cursor.write_u32_raw(values.len() as u32);
                for v in values {
                    self.encode_field(inner, v, cursor)?;
                }
            }
            FieldType::Complex(type_name) => self.encode_message(type_name, value, cursor)?,
        }
        Ok(())
    }
}

trait RootMessageName {
    fn root_message_name(&self) -> &str;
}

impl RootMessageName for SchemaGraph {
    fn root_message_name(&self) -> &str {
        &self.root
    }
}

struct ReadCursor<'a> {
    buf: &'a [u8],
    pos: usize,
    dialect: Dialect,
    little_endian: bool,
}

impl<'a> ReadCursor<'a> {
    fn align(&mut self, to: u64) -> McapResult<()> {
        if self.dialect == Dialect::Ros1 {
            return Ok(());
        }
        let to = to as usize;
        let rem = self.pos % to;
        if rem != 0 {
            self.pos += to - rem;
        }
        if self.pos > self.buf.len() {
            return Err(McapError::MalformedCdr);
        }
        Ok(())
    }

    fn take(&mut self, n: usize) -> McapResult<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(McapError::MalformedCdr);
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    fn read_u32_raw(&mut self) -> McapResult<u32> {
        let bytes: [u8; 4] = self.take(4)?.try_into().unwrap();
        Ok(if self.little_endian {
            u32::from_le_bytes(bytes)
        } else {
            u32::from_be_bytes(bytes)
        })
    }

    fn read_string(&mut self) -> McapResult<String> {
        self.align(4)?;
        let len = self.read_u32_raw()? as usize;
        match self.dialect {
            Dialect::Cdr => {
                if len == 0 {
                    return Err(McapError::MalformedCdr);
                }
                let bytes = self.take(len)?;
                let (content, nul) = bytes.split_at(len - 1);
                if nul != [0u8] {
                    return Err(McapError::MalformedCdr);
                }
                String::from_utf8(content.to_vec()).map_err(|_| McapError::MalformedCdr)
            }
            Dialect::Ros1 => {
                let bytes = self.take(len)?;
                String::from_utf8(bytes.to_vec()).map_err(|_| McapError::MalformedCdr)
            }
        }
    }

    fn read_primitive(&mut self, ty: PrimitiveType) -> McapResult<DecodedValue> {
        macro_rules! num {
            ($t:ty, $variant:ident) => {{
                let bytes: [u8; std::mem::size_of::<$t>()] =
                    self.take(std::mem::size_of::<$t>())?.try_into().unwrap();
                let v = if self.little_endian {
                    <$t>::from_le_bytes(bytes)
                } else {
                    <$t>::from_be_bytes(bytes)
                };
                DecodedValue::$variant(v)
            }};
        }

        Ok(match ty {
            PrimitiveType::Bool => DecodedValue::Bool(self.take(1)?[0] != 0),
            PrimitiveType::I8 => DecodedValue::I8(self.take(1)?[0] as i8),
            PrimitiveType::U8 => DecodedValue::U8(self.take(1)?[0]),
            PrimitiveType::I16 => num!(i16, I16),
            PrimitiveType::U16 => num!(u16, U16),
            PrimitiveType::I32 => num!(i32, I32),
            PrimitiveType::U32 => num!(u32, U32),
            PrimitiveType::I64 => num!(i64, I64),
            PrimitiveType::U64 => num!(u64, U64),
            PrimitiveType::F32 => num!(f32, F32),
            PrimitiveType::F64 => num!(f64, F64),
        })
    }
}

struct WriteCursor {
    buf: Vec<u8>,
    dialect: Dialect,
}

impl WriteCursor {
    fn align(&mut self, to: u64) {
        if self.dialect == Dialect::Ros1 {
            return;
        }
        let to = to as usize;
        let rem = self.buf.len() % to;
        if rem != 0 {
            self.buf.resize(self.buf.len() + (to - rem), 0);
        }
    }

    fn write_u32_raw(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_string(&mut self, s: &str) {
        self.align(4);
        match self.dialect {
            Dialect::Cdr => {
                self.write_u32_raw(s.len() as u32 + 1);
                self.buf.extend_from_slice(s.as_bytes());
                self.buf.push(0);
            }
            Dialect::Ros1 => {
                self.write_u32_raw(s.len() as u32);
                self.buf.extend_from_slice(s.as_bytes());
            }
        }
    }

    fn write_primitive(&mut self, ty: PrimitiveType, value: &DecodedValue) -> McapResult<()> {
        macro_rules! expect {
            ($variant:ident) => {
                match value {
                    DecodedValue::$variant(v) => *v,
                    _ => return Err(McapError::ValueOutOfRange(format!("{ty:?}"))),
                }
            };
        }

        match ty {
            PrimitiveType::Bool => self.buf.push(expect!(Bool) as u8),
            PrimitiveType::I8 => self.buf.push(expect!(I8) as u8),
            PrimitiveType::U8 => self.buf.push(expect!(U8)),
            PrimitiveType::I16 => self.buf.extend_from_slice(&expect!(I16).to_le_bytes()),
            PrimitiveType::U16 => self.buf.extend_from_slice(&expect!(U16).to_le_bytes()),
            PrimitiveType::I32 => self.buf.extend_from_slice(&expect!(I32).to_le_bytes()),
            PrimitiveType::U32 => self.buf.extend_from_slice(&expect!(U32).to_le_bytes()),
            PrimitiveType::I64 => self.buf.extend_from_slice(&expect!(I64).to_le_bytes()),
            PrimitiveType::U64 => self.buf.extend_from_slice(&expect!(U64).to_le_bytes()),
            PrimitiveType::F32 => self.buf.extend_from_slice(&expect!(F32).to_le_bytes()),
            PrimitiveType::F64 => self.buf.extend_from_slice(&expect!(F64).to_le_bytes()),
        }
        Ok(())
    }
}

impl Dialect {
    /// Maps a channel's `message_encoding` (the wire encoding of its messages, as opposed to
    /// its schema's text encoding) onto the dialect that can decode/encode it.
    pub fn for_message_encoding(message_encoding: &str) -> McapResult<Self> {
        match message_encoding {
            "cdr" => Ok(Dialect::Cdr),
            "ros1" => Ok(Dialect::Ros1),
            other => Err(McapError::UnsupportedMessageEncoding(other.to_string())),
        }
    }
}

/// A per-instance cache of compiled schemas, keyed by schema name *and* dialect so a single
/// file mixing `cdr` and `ros1` channels against the same schema name compiles each once.
/// Never shared globally - owned by whichever [`crate::reader::Reader`]/[`crate::write::Writer`]
/// handle is decoding or encoding messages.
#[derive(Default)]
pub struct CodecCache {
    compiled: HashMap<(String, Dialect), Arc<CompiledSchema>>,
}

impl CodecCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the compiled schema for `name` under `dialect`, compiling (and parsing `text`)
    /// on first use.
    pub fn get_or_compile(
        &mut self,
        name: &str,
        text: &str,
        dialect: Dialect,
    ) -> McapResult<Arc<CompiledSchema>> {
        let key = (name.to_string(), dialect);
        if let Some(compiled) = self.compiled.get(&key) {
            return Ok(compiled.clone());
        }
        let graph = schema::parse(name, text)?;
        let compiled = Arc::new(CompiledSchema::compile(graph, dialect)?);
        self.compiled.insert(key, compiled.clone());
        Ok(compiled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vec3() -> Arc<CompiledSchema> {
        let graph = schema::parse("geometry_msgs/msg/Vector3", "float64 x\nfloat64 y\nfloat64 z\n")
            .unwrap();
        Arc::new(CompiledSchema::compile(graph, Dialect::Cdr).unwrap())
    }

    #[test]
    fn round_trips_flat_primitives() {
        let compiled = vec3();
        let mut fields = BTreeMap::new();
        fields.insert("x".to_string(), DecodedValue::F64(1.5));
        fields.insert("y".to_string(), DecodedValue::F64(-2.0));
        fields.insert("z".to_string(), DecodedValue::F64(0.0));
        let value = DecodedValue::Message(fields);

        let bytes = compiled.encode(&value).unwrap();
        let decoded = compiled.decode(&bytes).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn round_trips_strings_and_sequences() {
        let graph = schema::parse("pkg/msg/Thing", "string name\nfloat32[] samples\n").unwrap();
        let compiled = CompiledSchema::compile(graph, Dialect::Cdr).unwrap();

        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), DecodedValue::Str("hello".to_string()));
        fields.insert(
            "samples".to_string(),
            DecodedValue::Array(vec![
                DecodedValue::F32(1.0),
                DecodedValue::F32(2.0),
                DecodedValue::F32(3.0),
            ]),
        );
        let value = DecodedValue::Message(fields);

        let bytes = compiled.encode(&value).unwrap();
        let decoded = compiled.decode(&bytes).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn round_trips_nested_messages() {
        let text = "\
Header header
int32 data
================================================================================
MSG: std_msgs/msg/Header
uint32 seq
";
        let graph = schema::parse("pkg/msg/Wrapper", text).unwrap();
        let compiled = CompiledSchema::compile(graph, Dialect::Cdr).unwrap();

        let mut header = BTreeMap::new();
        header.insert("seq".to_string(), DecodedValue::U32(7));
        let mut fields = BTreeMap::new();
        fields.insert("header".to_string(), DecodedValue::Message(header));
        fields.insert("data".to_string(), DecodedValue::I32(-1));
        let value = DecodedValue::Message(fields);

        let bytes = compiled.encode(&value).unwrap();
        let decoded = compiled.decode(&bytes).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn ros1_header_gets_synthetic_seq_field() {
        let graph = schema::parse("std_msgs/Header", "uint32 dummy\n").unwrap();
        let compiled = CompiledSchema::compile(graph, Dialect::Ros1).unwrap();

        let mut fields = BTreeMap::new();
        fields.insert("seq".to_string(), DecodedValue::U32(42));
        fields.insert("dummy".to_string(), DecodedValue::U32(0));
        let value = DecodedValue::Message(fields);

        let bytes = compiled.encode(&value).unwrap();
        // seq then dummy, both little-endian u32, no alignment padding needed anyway.
        assert_eq!(bytes, [42, 0, 0, 0, 0, 0, 0, 0]);
        let decoded = compiled.decode(&bytes).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn rejects_truncated_payload() {
        let compiled = vec3();
        assert!(matches!(
            compiled.decode(&[0u8; 4]),
            Err(McapError::MalformedCdr)
        ));
    }
}
