//! Decoding a cleartext record stream into a `Node` tree.
//!
//! Decoding runs in two passes. The first reads every record in stream
//! order into an object table, with member values that refer to other
//! objects kept as references. The second walks the table from the root
//! id and builds the tree, rejecting shared records and cycles.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use tracing::debug;

use atosave_common::{Error, Result};

use crate::forwarding::TypeForwardingRegistry;
use crate::node::{Field, List, MemberType, Node, Primitive, Record, TypeId};
use crate::wire::{binary_type, record_type, ByteReader, BINARY_ARRAY_SINGLE, MAJOR_VERSION, MINOR_VERSION};

/// Maximum nesting of records and lists.
///
/// Decoding recurses once per level, so this also bounds stack use.
pub const MAX_DEPTH: usize = 128;

/// Maximum number of member and element values across the whole graph.
///
/// Null runs let a few bytes declare many values; this caps what a single
/// input can make the decoder allocate.
pub const MAX_VALUES: usize = 1 << 22;

/// Decode a cleartext buffer into its root node.
///
/// Record type names (and class names in member type descriptors) are
/// passed through `registry` before they become visible in the tree.
///
/// # Errors
/// - `MalformedGraph` for truncated input, unknown tags, undeclared type
///   descriptors or libraries, dangling references, and lists or null
///   runs that disagree with their declared lengths
/// - `UnsupportedGraphFeature` for shared records, reference cycles,
///   untyped class records, multi-dimensional arrays and remoting records,
///   and graphs nested deeper than `MAX_DEPTH` or holding more than
///   `MAX_VALUES` values
pub fn decode(bytes: &[u8], registry: &TypeForwardingRegistry) -> Result<Node> {
    let mut decoder = Decoder::new(bytes, registry);
    let root_id = decoder.read_header()?;
    decoder.read_records()?;

    let mut resolver = Resolver {
        objects: decoder.objects,
        strings: decoder.strings,
        visiting: HashSet::new(),
        consumed: HashSet::new(),
    };
    let root = resolver.resolve_ref(root_id, 1, 0)?;

    if !resolver.objects.is_empty() {
        debug!(count = resolver.objects.len(), "Ignoring unreferenced objects");
    }
    Ok(root)
}

/// Type descriptor shared by every record of the same shape.
#[derive(Debug)]
struct ClassMetadata {
    type_id: TypeId,
    members: Vec<(String, MemberType)>,
}

#[derive(Debug)]
enum Value {
    Null,
    Primitive(Primitive),
    Ref { id: i32, offset: usize },
}

#[derive(Debug)]
enum RawObject {
    Record {
        metadata: Rc<ClassMetadata>,
        values: Vec<Value>,
    },
    List {
        element_type: MemberType,
        values: Vec<Value>,
    },
}

/// One value record read from a member or element position.
enum Slot {
    Value(Value),
    Nulls { count: usize, offset: usize },
}

struct Decoder<'a> {
    reader: ByteReader<'a>,
    registry: &'a TypeForwardingRegistry,
    libraries: HashMap<i32, String>,
    metadata: HashMap<i32, Rc<ClassMetadata>>,
    objects: HashMap<i32, RawObject>,
    strings: HashMap<i32, String>,
    depth: usize,
    values: usize,
}

impl<'a> Decoder<'a> {
    fn new(bytes: &'a [u8], registry: &'a TypeForwardingRegistry) -> Self {
        Self {
            reader: ByteReader::new(bytes),
            registry,
            libraries: HashMap::new(),
            metadata: HashMap::new(),
            objects: HashMap::new(),
            strings: HashMap::new(),
            depth: 0,
            values: 0,
        }
    }

    /// Read the stream header and return the root object id.
    fn read_header(&mut self) -> Result<i32> {
        let tag = self.reader.read_u8()?;
        if tag != record_type::SERIALIZED_STREAM_HEADER {
            return Err(Error::malformed(0, format!("expected stream header, found record type {}", tag)));
        }
        let root_id = self.reader.read_i32()?;
        let _header_id = self.reader.read_i32()?;
        let at = self.reader.position();
        let major = self.reader.read_i32()?;
        let minor = self.reader.read_i32()?;
        if (major, minor) != (MAJOR_VERSION, MINOR_VERSION) {
            return Err(Error::malformed(
                at,
                format!("unsupported serialization version {}.{}", major, minor),
            ));
        }
        Ok(root_id)
    }

    /// Read top-level records up to and including the message end.
    fn read_records(&mut self) -> Result<()> {
        loop {
            let at = self.reader.position();
            let tag = self.reader.read_u8()?;
            match tag {
                record_type::MESSAGE_END => break,
                record_type::BINARY_LIBRARY => self.read_library()?,
                _ => {
                    if self.read_object(tag, at)?.is_none() {
                        return Err(Error::malformed(
                            at,
                            format!("unexpected record type {} at top level", tag),
                        ));
                    }
                }
            }
        }

        if self.reader.remaining() > 0 {
            return Err(Error::malformed(
                self.reader.position(),
                format!("{} trailing bytes after message end", self.reader.remaining()),
            ));
        }
        Ok(())
    }

    fn read_library(&mut self) -> Result<()> {
        let id = self.reader.read_i32()?;
        let name = self.reader.read_string()?;
        self.libraries.insert(id, name);
        Ok(())
    }

    fn library(&self, id: i32, at: usize) -> Result<String> {
        self.libraries
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::malformed(at, format!("reference to undeclared library {}", id)))
    }

    fn forward(&self, raw: &str) -> String {
        let resolved = self.registry.resolve(raw);
        if resolved != raw {
            debug!(from = raw, to = resolved, "Forwarded type identifier");
        }
        resolved.to_string()
    }

    /// Read an object record. Returns `None` if `tag` is not an object record.
    fn read_object(&mut self, tag: u8, at: usize) -> Result<Option<i32>> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(Error::UnsupportedGraphFeature(format!(
                "inline nesting deeper than {} levels",
                MAX_DEPTH
            )));
        }

        let id = match tag {
            record_type::CLASS_WITH_MEMBERS_AND_TYPES => Some(self.read_class(at, true)?),
            record_type::SYSTEM_CLASS_WITH_MEMBERS_AND_TYPES => Some(self.read_class(at, false)?),
            record_type::CLASS_WITH_ID => Some(self.read_class_with_id(at)?),
            record_type::BINARY_OBJECT_STRING => {
                let id = self.reader.read_i32()?;
                let value = self.reader.read_string()?;
                self.check_new_id(id, at)?;
                self.strings.insert(id, value);
                Some(id)
            }
            record_type::ARRAY_SINGLE_PRIMITIVE => Some(self.read_primitive_array(at)?),
            record_type::ARRAY_SINGLE_OBJECT => Some(self.read_value_array(at, MemberType::Object)?),
            record_type::ARRAY_SINGLE_STRING => Some(self.read_value_array(at, MemberType::String)?),
            record_type::BINARY_ARRAY => Some(self.read_binary_array(at)?),
            record_type::CLASS_WITH_MEMBERS | record_type::SYSTEM_CLASS_WITH_MEMBERS => {
                return Err(Error::UnsupportedGraphFeature(format!(
                    "class record without member types at byte {}",
                    at
                )))
            }
            record_type::METHOD_CALL | record_type::METHOD_RETURN => {
                return Err(Error::UnsupportedGraphFeature(format!(
                    "remoting record at byte {}",
                    at
                )))
            }
            record_type::SERIALIZED_STREAM_HEADER
            | record_type::MEMBER_PRIMITIVE_TYPED
            | record_type::MEMBER_REFERENCE
            | record_type::OBJECT_NULL
            | record_type::MESSAGE_END
            | record_type::BINARY_LIBRARY
            | record_type::OBJECT_NULL_MULTIPLE_256
            | record_type::OBJECT_NULL_MULTIPLE => None,
            _ => {
                return Err(Error::malformed(at, format!("unknown record type {}", tag)));
            }
        };

        self.depth -= 1;
        Ok(id)
    }

    /// Count `count` more values against `MAX_VALUES` before they are read.
    fn reserve_values(&mut self, count: usize) -> Result<()> {
        self.values = self.values.saturating_add(count);
        if self.values > MAX_VALUES {
            return Err(Error::UnsupportedGraphFeature(format!(
                "graph holds more than {} values",
                MAX_VALUES
            )));
        }
        Ok(())
    }

    fn check_new_id(&self, id: i32, at: usize) -> Result<()> {
        if self.objects.contains_key(&id) || self.strings.contains_key(&id) {
            return Err(Error::malformed(at, format!("duplicate object id {}", id)));
        }
        Ok(())
    }

    fn insert_object(&mut self, id: i32, object: RawObject, at: usize) -> Result<()> {
        self.check_new_id(id, at)?;
        self.objects.insert(id, object);
        Ok(())
    }

    fn read_class(&mut self, at: usize, with_library: bool) -> Result<i32> {
        let object_id = self.reader.read_i32()?;
        let raw_name = self.reader.read_string()?;
        let count = self.reader.read_len("member count")?;

        let mut names = Vec::with_capacity(count.min(self.reader.remaining()));
        for _ in 0..count {
            names.push(self.reader.read_string()?);
        }
        let member_types = self.read_member_types(count)?;

        let library = if with_library {
            let lib_at = self.reader.position();
            let library_id = self.reader.read_i32()?;
            Some(self.library(library_id, lib_at)?)
        } else {
            None
        };

        let metadata = Rc::new(ClassMetadata {
            type_id: TypeId {
                name: self.forward(&raw_name),
                library,
            },
            members: names.into_iter().zip(member_types).collect(),
        });
        self.metadata.insert(object_id, Rc::clone(&metadata));

        let values = self.read_members(&metadata)?;
        self.insert_object(object_id, RawObject::Record { metadata, values }, at)?;
        Ok(object_id)
    }

    fn read_class_with_id(&mut self, at: usize) -> Result<i32> {
        let object_id = self.reader.read_i32()?;
        let metadata_id = self.reader.read_i32()?;
        let metadata = self.metadata.get(&metadata_id).cloned().ok_or_else(|| {
            Error::malformed(
                at,
                format!("record references undeclared type descriptor {}", metadata_id),
            )
        })?;
        self.metadata.insert(object_id, Rc::clone(&metadata));

        let values = self.read_members(&metadata)?;
        self.insert_object(object_id, RawObject::Record { metadata, values }, at)?;
        Ok(object_id)
    }

    /// Read `count` member type tags followed by their additional info.
    fn read_member_types(&mut self, count: usize) -> Result<Vec<MemberType>> {
        let mut tags = Vec::with_capacity(count.min(self.reader.remaining()));
        for _ in 0..count {
            tags.push((self.reader.position(), self.reader.read_u8()?));
        }
        tags.into_iter()
            .map(|(at, tag)| self.read_type_info(tag, at))
            .collect()
    }

    fn read_type_info(&mut self, tag: u8, at: usize) -> Result<MemberType> {
        let member_type = match tag {
            binary_type::PRIMITIVE => MemberType::Primitive(self.reader.read_primitive_kind()?),
            binary_type::STRING => MemberType::String,
            binary_type::OBJECT => MemberType::Object,
            binary_type::SYSTEM_CLASS => {
                let name = self.reader.read_string()?;
                MemberType::SystemClass(self.forward(&name))
            }
            binary_type::CLASS => {
                let name = self.reader.read_string()?;
                let lib_at = self.reader.position();
                let library_id = self.reader.read_i32()?;
                MemberType::Class(TypeId {
                    name: self.forward(&name),
                    library: Some(self.library(library_id, lib_at)?),
                })
            }
            binary_type::OBJECT_ARRAY => MemberType::ObjectArray,
            binary_type::STRING_ARRAY => MemberType::StringArray,
            binary_type::PRIMITIVE_ARRAY => {
                MemberType::PrimitiveArray(self.reader.read_primitive_kind()?)
            }
            _ => return Err(Error::malformed(at, format!("unknown member type tag {}", tag))),
        };
        Ok(member_type)
    }

    fn read_members(&mut self, metadata: &ClassMetadata) -> Result<Vec<Value>> {
        self.reserve_values(metadata.members.len())?;
        let mut values = Vec::with_capacity(metadata.members.len());
        let mut pending_nulls = 0usize;
        let mut run_offset = 0usize;

        for (name, member_type) in &metadata.members {
            if pending_nulls > 0 {
                if let MemberType::Primitive(_) = member_type {
                    return Err(Error::malformed(
                        run_offset,
                        format!("null run covers primitive member '{}'", name),
                    ));
                }
                pending_nulls -= 1;
                values.push(Value::Null);
                continue;
            }

            match member_type {
                MemberType::Primitive(kind) => {
                    values.push(Value::Primitive(self.reader.read_primitive(*kind)?));
                }
                _ => {
                    let slot = self.read_value(|| {
                        format!("member '{}' of {}", name, metadata.type_id.name)
                    })?;
                    match slot {
                        Slot::Value(value) => values.push(value),
                        Slot::Nulls { count, offset } => {
                            values.push(Value::Null);
                            pending_nulls = count - 1;
                            run_offset = offset;
                        }
                    }
                }
            }
        }

        if pending_nulls > 0 {
            return Err(Error::malformed(
                run_offset,
                format!(
                    "null run overruns the {} members of {}",
                    metadata.members.len(),
                    metadata.type_id.name
                ),
            ));
        }
        Ok(values)
    }

    fn read_value<F: Fn() -> String>(&mut self, context: F) -> Result<Slot> {
        loop {
            let at = self.reader.position();
            let tag = self.reader.read_u8()?;
            match tag {
                record_type::BINARY_LIBRARY => self.read_library()?,
                record_type::OBJECT_NULL => return Ok(Slot::Value(Value::Null)),
                record_type::OBJECT_NULL_MULTIPLE_256 => {
                    let count = self.reader.read_u8()? as usize;
                    return null_run(count, at);
                }
                record_type::OBJECT_NULL_MULTIPLE => {
                    let count = self.reader.read_len("null count")?;
                    return null_run(count, at);
                }
                record_type::MEMBER_PRIMITIVE_TYPED => {
                    let kind = self.reader.read_primitive_kind()?;
                    let value = self.reader.read_primitive(kind)?;
                    return Ok(Slot::Value(Value::Primitive(value)));
                }
                record_type::MEMBER_REFERENCE => {
                    let id = self.reader.read_i32()?;
                    return Ok(Slot::Value(Value::Ref { id, offset: at }));
                }
                _ => {
                    return match self.read_object(tag, at)? {
                        Some(id) => Ok(Slot::Value(Value::Ref { id, offset: at })),
                        None => Err(Error::malformed(
                            at,
                            format!("expected a value for {}, found record type {}", context(), tag),
                        )),
                    };
                }
            }
        }
    }

    fn read_primitive_array(&mut self, at: usize) -> Result<i32> {
        let id = self.reader.read_i32()?;
        let len = self.reader.read_len("array length")?;
        let kind = self.reader.read_primitive_kind()?;
        self.reserve_values(len)?;

        let mut values = Vec::with_capacity(len.min(self.reader.remaining()));
        for _ in 0..len {
            values.push(Value::Primitive(self.reader.read_primitive(kind)?));
        }

        let element_type = MemberType::Primitive(kind);
        self.insert_object(id, RawObject::List { element_type, values }, at)?;
        Ok(id)
    }

    fn read_value_array(&mut self, at: usize, element_type: MemberType) -> Result<i32> {
        let id = self.reader.read_i32()?;
        let len = self.reader.read_len("array length")?;
        let values = self.read_elements(id, len)?;
        self.insert_object(id, RawObject::List { element_type, values }, at)?;
        Ok(id)
    }

    fn read_binary_array(&mut self, at: usize) -> Result<i32> {
        let id = self.reader.read_i32()?;
        let shape = self.reader.read_u8()?;
        if shape != BINARY_ARRAY_SINGLE {
            return Err(Error::UnsupportedGraphFeature(format!(
                "array {} has shape {}; only single-dimension arrays are supported",
                id, shape
            )));
        }
        let rank = self.reader.read_i32()?;
        if rank != 1 {
            return Err(Error::UnsupportedGraphFeature(format!(
                "array {} has rank {}",
                id, rank
            )));
        }
        let len = self.reader.read_len("array length")?;
        let tag_at = self.reader.position();
        let tag = self.reader.read_u8()?;
        let element_type = self.read_type_info(tag, tag_at)?;

        let values = match element_type {
            MemberType::Primitive(kind) => {
                self.reserve_values(len)?;
                let mut values = Vec::with_capacity(len.min(self.reader.remaining()));
                for _ in 0..len {
                    values.push(Value::Primitive(self.reader.read_primitive(kind)?));
                }
                values
            }
            _ => self.read_elements(id, len)?,
        };

        self.insert_object(id, RawObject::List { element_type, values }, at)?;
        Ok(id)
    }

    /// Read exactly `len` element values, expanding null runs.
    fn read_elements(&mut self, id: i32, len: usize) -> Result<Vec<Value>> {
        self.reserve_values(len)?;
        let mut values: Vec<Value> = Vec::with_capacity(len.min(self.reader.remaining()));
        while values.len() < len {
            let index = values.len();
            let slot = self.read_value(|| {
                format!("element {} of array {} (declared length {})", index, id, len)
            })?;
            match slot {
                Slot::Value(value) => values.push(value),
                Slot::Nulls { count, offset } => {
                    if index + count > len {
                        return Err(Error::malformed(
                            offset,
                            format!(
                                "null run of {} overruns array {} (declared length {}, {} present)",
                                count, id, len, index
                            ),
                        ));
                    }
                    values.extend((0..count).map(|_| Value::Null));
                }
            }
        }
        Ok(values)
    }
}

fn null_run(count: usize, at: usize) -> Result<Slot> {
    if count == 0 {
        return Err(Error::malformed(at, "empty null run"));
    }
    Ok(Slot::Nulls { count, offset: at })
}

/// Second pass: turn the object table into a tree.
struct Resolver {
    objects: HashMap<i32, RawObject>,
    strings: HashMap<i32, String>,
    visiting: HashSet<i32>,
    consumed: HashSet<i32>,
}

impl Resolver {
    fn resolve_value(&mut self, value: Value, depth: usize) -> Result<Node> {
        match value {
            Value::Null => Ok(Node::Null),
            Value::Primitive(p) => Ok(Node::Primitive(p)),
            Value::Ref { id, offset } => self.resolve_ref(id, offset, depth),
        }
    }

    fn resolve_ref(&mut self, id: i32, offset: usize, depth: usize) -> Result<Node> {
        // Strings are immutable, so sharing them is safe to flatten.
        if let Some(value) = self.strings.get(&id) {
            return Ok(Node::String(value.clone()));
        }
        if self.visiting.contains(&id) {
            return Err(Error::UnsupportedGraphFeature(format!(
                "reference cycle through object {}",
                id
            )));
        }
        if self.consumed.contains(&id) {
            return Err(Error::UnsupportedGraphFeature(format!(
                "object {} is referenced more than once",
                id
            )));
        }
        if depth >= MAX_DEPTH {
            return Err(Error::UnsupportedGraphFeature(format!(
                "graph nesting deeper than {} levels",
                MAX_DEPTH
            )));
        }

        let object = self.objects.remove(&id).ok_or_else(|| {
            Error::malformed(offset, format!("reference to undefined object {}", id))
        })?;
        self.consumed.insert(id);
        self.visiting.insert(id);

        let node = match object {
            RawObject::Record { metadata, values } => {
                let mut record = Record::new(metadata.type_id.clone());
                for ((name, member_type), value) in metadata.members.iter().zip(values) {
                    record.fields.push(Field {
                        name: name.clone(),
                        member_type: member_type.clone(),
                        value: self.resolve_value(value, depth + 1)?,
                    });
                }
                Node::Record(record)
            }
            RawObject::List {
                element_type,
                values,
            } => {
                let mut items = Vec::with_capacity(values.len());
                for value in values {
                    items.push(self.resolve_value(value, depth + 1)?);
                }
                Node::List(List::new(element_type, items))
            }
        };

        self.visiting.remove(&id);
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::encode;
    use crate::forwarding::ForwardingRule;
    use crate::node::PrimitiveKind;
    use crate::wire::{write_i32, write_string};
    use proptest::prelude::*;

    const LIB: &str = "Assembly-CSharp";

    fn hero(name: &str, hp: i32) -> Node {
        Record::new(TypeId::new("Hero", LIB))
            .with_field("name", Node::string(name))
            .with_field("hp", Primitive::Int32(hp).into())
            .into()
    }

    fn sample_graph() -> Node {
        let team = List::new(
            MemberType::Class(TypeId::new("Hero", LIB)),
            vec![hero("Magnus", 40), Node::Null, Node::Null, hero("Andrin", 32)],
        );
        let scores = List::new(
            MemberType::Primitive(PrimitiveKind::Int32),
            vec![
                Primitive::Int32(1).into(),
                Primitive::Int32(-2).into(),
                Primitive::Int32(3).into(),
            ],
        );
        let tags = List::new(
            MemberType::String,
            vec![Node::string("fire"), Node::Null, Node::string("ice")],
        );
        let mixed = List::new(
            MemberType::Object,
            vec![Primitive::Boolean(true).into(), Node::string("x"), Node::Null],
        );

        Record::new(TypeId::new("GameData", LIB))
            .with_field("gameDate", Node::string("2024-03-01"))
            .with_field("team", team.into())
            .with_field("seed", Primitive::Int64(-7).into())
            .with_typed_field("boxed", MemberType::Object, Primitive::Double(1.5).into())
            .with_field("initial", Primitive::Char('é').into())
            .with_field("price", Primitive::Decimal("12.50".to_string()).into())
            .with_field("missing", Node::Null)
            .with_field("scores", scores.into())
            .with_field("tags", tags.into())
            .with_field("mixed", mixed.into())
            .into()
    }

    fn header(root_id: i32) -> Vec<u8> {
        let mut out = vec![record_type::SERIALIZED_STREAM_HEADER];
        write_i32(&mut out, root_id);
        write_i32(&mut out, -1);
        write_i32(&mut out, 1);
        write_i32(&mut out, 0);
        out
    }

    /// Start a system class record; the caller appends type infos and values.
    fn system_class(out: &mut Vec<u8>, id: i32, name: &str, members: &[(&str, u8)]) {
        out.push(record_type::SYSTEM_CLASS_WITH_MEMBERS_AND_TYPES);
        write_i32(out, id);
        write_string(out, name).unwrap();
        write_i32(out, members.len() as i32);
        for (member, _) in members {
            write_string(out, member).unwrap();
        }
        for (_, tag) in members {
            out.push(*tag);
        }
    }

    fn reference(out: &mut Vec<u8>, id: i32) {
        out.push(record_type::MEMBER_REFERENCE);
        write_i32(out, id);
    }

    /// `levels` system class records, each holding the next one inline.
    fn inline_chain(levels: usize) -> Vec<u8> {
        let mut bytes = header(1);
        for id in 1..levels as i32 {
            system_class(&mut bytes, id, "Link", &[("next", binary_type::OBJECT)]);
        }
        system_class(&mut bytes, levels as i32, "Leaf", &[]);
        bytes.push(record_type::MESSAGE_END);
        bytes
    }

    fn decode_plain(bytes: &[u8]) -> Result<Node> {
        decode(bytes, &TypeForwardingRegistry::empty())
    }

    #[test]
    fn test_roundtrip_sample_graph() {
        let graph = sample_graph();
        let bytes = encode(&graph).unwrap();
        assert_eq!(decode_plain(&bytes).unwrap(), graph);
    }

    #[test]
    fn test_roundtrip_list_root() {
        let graph: Node = List::new(MemberType::Object, vec![hero("Evelyn", 28), Node::Null]).into();
        let bytes = encode(&graph).unwrap();
        assert_eq!(decode_plain(&bytes).unwrap(), graph);
    }

    #[test]
    fn test_decode_forwards_type_names() {
        let graph: Node = Record::new(TypeId::new("Old.GameData", LIB))
            .with_field(
                "leader",
                Record::new(TypeId::new("Old.Hero", LIB))
                    .with_field("name", Node::string("Magnus"))
                    .into(),
            )
            .into();
        let bytes = encode(&graph).unwrap();

        let registry = TypeForwardingRegistry::new(vec![
            ForwardingRule::new("Old.GameData", "GameData"),
            ForwardingRule::new("Old.Hero", "Hero"),
        ])
        .unwrap();
        let decoded = decode(&bytes, &registry).unwrap();

        let root = decoded.as_record().unwrap();
        assert_eq!(root.type_id, TypeId::new("GameData", LIB));
        assert_eq!(root.fields[0].member_type, MemberType::Class(TypeId::new("Hero", LIB)));
        let leader = root.field("leader").and_then(Node::as_record).unwrap();
        assert_eq!(leader.type_id.name, "Hero");
        assert_eq!(leader.field("name").and_then(Node::as_str), Some("Magnus"));
    }

    #[test]
    fn test_shared_strings_are_flattened() {
        let mut bytes = header(1);
        system_class(&mut bytes, 1, "Pair", &[("a", binary_type::STRING), ("b", binary_type::STRING)]);
        bytes.push(record_type::BINARY_OBJECT_STRING);
        write_i32(&mut bytes, 2);
        write_string(&mut bytes, "same").unwrap();
        reference(&mut bytes, 2);
        bytes.push(record_type::MESSAGE_END);

        let decoded = decode_plain(&bytes).unwrap();
        let pair = decoded.as_record().unwrap();
        assert_eq!(pair.field("a").and_then(Node::as_str), Some("same"));
        assert_eq!(pair.field("b").and_then(Node::as_str), Some("same"));
    }

    #[test]
    fn test_every_truncation_is_malformed() {
        let bytes = encode(&sample_graph()).unwrap();
        for cut in 0..bytes.len() {
            match decode_plain(&bytes[..cut]) {
                Err(Error::MalformedGraph { .. }) => {}
                other => panic!("cut at {}: expected malformed graph, got {:?}", cut, other),
            }
        }
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = encode(&sample_graph()).unwrap();
        bytes.push(0);
        assert!(matches!(decode_plain(&bytes), Err(Error::MalformedGraph { .. })));
    }

    #[test]
    fn test_missing_header_rejected() {
        let bytes = [record_type::MESSAGE_END];
        assert!(matches!(
            decode_plain(&bytes),
            Err(Error::MalformedGraph { offset: 0, .. })
        ));
    }

    #[test]
    fn test_unknown_primitive_tag() {
        let mut bytes = header(1);
        system_class(&mut bytes, 1, "T", &[("v", binary_type::PRIMITIVE)]);
        bytes.push(4);
        bytes.push(record_type::MESSAGE_END);
        assert!(matches!(decode_plain(&bytes), Err(Error::MalformedGraph { .. })));
    }

    #[test]
    fn test_undeclared_type_descriptor() {
        let mut bytes = header(1);
        bytes.push(record_type::CLASS_WITH_ID);
        write_i32(&mut bytes, 1);
        write_i32(&mut bytes, 9);
        bytes.push(record_type::MESSAGE_END);
        match decode_plain(&bytes) {
            Err(Error::MalformedGraph { reason, .. }) => assert!(reason.contains("descriptor 9")),
            other => panic!("expected malformed graph, got {:?}", other),
        }
    }

    #[test]
    fn test_undefined_reference() {
        let mut bytes = header(1);
        system_class(&mut bytes, 1, "T", &[("child", binary_type::OBJECT)]);
        reference(&mut bytes, 5);
        bytes.push(record_type::MESSAGE_END);
        match decode_plain(&bytes) {
            Err(Error::MalformedGraph { reason, .. }) => assert!(reason.contains("undefined object 5")),
            other => panic!("expected malformed graph, got {:?}", other),
        }
    }

    #[test]
    fn test_shared_record_unsupported() {
        let mut bytes = header(1);
        system_class(&mut bytes, 1, "T", &[("a", binary_type::OBJECT), ("b", binary_type::OBJECT)]);
        reference(&mut bytes, 2);
        reference(&mut bytes, 2);
        system_class(&mut bytes, 2, "U", &[]);
        bytes.push(record_type::MESSAGE_END);
        assert!(matches!(
            decode_plain(&bytes),
            Err(Error::UnsupportedGraphFeature(_))
        ));
    }

    #[test]
    fn test_cycle_unsupported() {
        let mut bytes = header(1);
        system_class(&mut bytes, 1, "T", &[("me", binary_type::OBJECT)]);
        reference(&mut bytes, 1);
        bytes.push(record_type::MESSAGE_END);
        match decode_plain(&bytes) {
            Err(Error::UnsupportedGraphFeature(msg)) => assert!(msg.contains("cycle")),
            other => panic!("expected unsupported feature, got {:?}", other),
        }
    }

    #[test]
    fn test_null_run_overrunning_array() {
        let mut bytes = header(1);
        bytes.push(record_type::ARRAY_SINGLE_OBJECT);
        write_i32(&mut bytes, 1);
        write_i32(&mut bytes, 2);
        bytes.push(record_type::OBJECT_NULL_MULTIPLE_256);
        bytes.push(3);
        bytes.push(record_type::MESSAGE_END);
        assert!(matches!(decode_plain(&bytes), Err(Error::MalformedGraph { .. })));
    }

    #[test]
    fn test_array_shorter_than_declared() {
        let mut bytes = header(1);
        bytes.push(record_type::ARRAY_SINGLE_OBJECT);
        write_i32(&mut bytes, 1);
        write_i32(&mut bytes, 3);
        bytes.push(record_type::OBJECT_NULL);
        bytes.push(record_type::OBJECT_NULL);
        bytes.push(record_type::MESSAGE_END);
        match decode_plain(&bytes) {
            Err(Error::MalformedGraph { reason, .. }) => {
                assert!(reason.contains("declared length 3"))
            }
            other => panic!("expected malformed graph, got {:?}", other),
        }
    }

    #[test]
    fn test_untyped_class_unsupported() {
        let mut bytes = header(1);
        bytes.push(record_type::CLASS_WITH_MEMBERS);
        write_i32(&mut bytes, 1);
        assert!(matches!(
            decode_plain(&bytes),
            Err(Error::UnsupportedGraphFeature(_))
        ));
    }

    #[test]
    fn test_nesting_limit() {
        let mut node: Node = Record::new(TypeId::system("Leaf")).into();
        for _ in 0..MAX_DEPTH + 10 {
            node = Record::new(TypeId::system("Link")).with_field("next", node).into();
        }
        let bytes = encode(&node).unwrap();
        assert!(matches!(
            decode_plain(&bytes),
            Err(Error::UnsupportedGraphFeature(_))
        ));
    }

    #[test]
    fn test_inline_nesting_fits_small_stack() {
        let bytes = inline_chain(MAX_DEPTH);
        let decoded = std::thread::Builder::new()
            .stack_size(2 << 20)
            .spawn(move || decode_plain(&bytes))
            .unwrap()
            .join()
            .unwrap()
            .unwrap();

        let mut levels = 1;
        let mut node = &decoded;
        while let Some(next) = node.as_record().and_then(|r| r.field("next")) {
            node = next;
            levels += 1;
        }
        assert_eq!(levels, MAX_DEPTH);
        assert_eq!(node.as_record().unwrap().type_id.name, "Leaf");
    }

    #[test]
    fn test_inline_nesting_limit() {
        match decode_plain(&inline_chain(MAX_DEPTH + 1)) {
            Err(Error::UnsupportedGraphFeature(msg)) => assert!(msg.contains("nesting")),
            other => panic!("expected unsupported feature, got {:?}", other),
        }
    }

    #[test]
    fn test_huge_null_run_rejected() {
        let mut bytes = header(1);
        bytes.push(record_type::ARRAY_SINGLE_OBJECT);
        write_i32(&mut bytes, 1);
        write_i32(&mut bytes, 20_000_000);
        bytes.push(record_type::OBJECT_NULL_MULTIPLE);
        write_i32(&mut bytes, 20_000_000);
        bytes.push(record_type::MESSAGE_END);
        match decode_plain(&bytes) {
            Err(Error::UnsupportedGraphFeature(msg)) => assert!(msg.contains("values")),
            other => panic!("expected unsupported feature, got {:?}", other),
        }
    }

    #[test]
    fn test_value_budget_spans_records() {
        let members: Vec<(String, u8)> = (0..1024)
            .map(|i| (format!("m{}", i), binary_type::OBJECT))
            .collect();
        let members: Vec<(&str, u8)> = members.iter().map(|(n, t)| (n.as_str(), *t)).collect();

        let mut bytes = header(1);
        system_class(&mut bytes, 1, "Wide", &members);
        bytes.push(record_type::OBJECT_NULL_MULTIPLE);
        write_i32(&mut bytes, 1024);
        for id in 2..=(MAX_VALUES / 1024 + 1) as i32 {
            bytes.push(record_type::CLASS_WITH_ID);
            write_i32(&mut bytes, id);
            write_i32(&mut bytes, 1);
            bytes.push(record_type::OBJECT_NULL_MULTIPLE);
            write_i32(&mut bytes, 1024);
        }
        bytes.push(record_type::MESSAGE_END);
        assert!(matches!(
            decode_plain(&bytes),
            Err(Error::UnsupportedGraphFeature(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_roundtrip_rows(
            rows in proptest::collection::vec(
                (
                    any::<i32>(),
                    ".{0,12}",
                    -1.0e9f64..1.0e9,
                    proptest::option::of("[a-z]{0,6}"),
                ),
                0..20,
            )
        ) {
            let items = rows
                .into_iter()
                .map(|(id, label, weight, note)| {
                    Record::new(TypeId::new("Row", LIB))
                        .with_field("id", Primitive::Int32(id).into())
                        .with_field("label", Node::String(label))
                        .with_field("weight", Primitive::Double(weight).into())
                        .with_typed_field("note", MemberType::String, note.map(Node::String).unwrap_or(Node::Null))
                        .into()
                })
                .collect();
            let graph: Node = Record::new(TypeId::new("Table", LIB))
                .with_field("rows", List::new(MemberType::Object, items).into())
                .into();

            let bytes = encode(&graph).unwrap();
            prop_assert_eq!(decode_plain(&bytes).unwrap(), graph);
        }
    }
}
