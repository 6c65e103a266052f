//! Encoding a `Node` tree into the legacy record stream.
//!
//! Mirrors the legacy writer: strings are written inline where they are
//! used, nested records and lists are written as references and emitted
//! afterwards at top level in first-referenced order, and each distinct
//! record shape gets a full type descriptor once. Later records of that
//! shape point back to it by id.

use std::collections::{HashMap, VecDeque};

use atosave_common::{Error, Result};

use crate::node::{List, MemberType, Node, Record, TypeId};
use crate::wire::{
    binary_type, record_type, write_i32, write_len, write_primitive, write_string,
    BINARY_ARRAY_SINGLE, MAJOR_VERSION, MINOR_VERSION,
};

/// Header id written by the legacy writer.
const HEADER_ID: i32 = -1;

/// Encode a graph rooted at a record or list.
///
/// The output decodes back to an equal graph.
///
/// # Errors
/// - Root is not a record or list
/// - A value does not fit its declared member or element type
/// - A class member type has no library
pub fn encode(root: &Node) -> Result<Vec<u8>> {
    match root {
        Node::Record(_) | Node::List(_) => {}
        other => {
            return Err(Error::InvalidInput(format!(
                "graph root must be a record or list, found {}",
                other.describe()
            )))
        }
    }

    let mut encoder = Encoder::new();
    let root_id = encoder.allocate_id();

    encoder.out.push(record_type::SERIALIZED_STREAM_HEADER);
    write_i32(&mut encoder.out, root_id);
    write_i32(&mut encoder.out, HEADER_ID);
    write_i32(&mut encoder.out, MAJOR_VERSION);
    write_i32(&mut encoder.out, MINOR_VERSION);

    encoder.queue.push_back((root_id, root));
    while let Some((id, node)) = encoder.queue.pop_front() {
        encoder.write_object(id, node)?;
    }

    encoder.out.push(record_type::MESSAGE_END);
    Ok(encoder.out)
}

/// Identity of a type descriptor: type plus ordered, typed member list.
#[derive(PartialEq, Eq, Hash)]
struct ShapeKey {
    type_id: TypeId,
    members: Vec<(String, MemberType)>,
}

struct Encoder<'g> {
    out: Vec<u8>,
    next_id: i32,
    libraries: HashMap<String, i32>,
    shapes: HashMap<ShapeKey, i32>,
    queue: VecDeque<(i32, &'g Node)>,
}

impl<'g> Encoder<'g> {
    fn new() -> Self {
        Self {
            out: Vec::new(),
            next_id: 1,
            libraries: HashMap::new(),
            shapes: HashMap::new(),
            queue: VecDeque::new(),
        }
    }

    fn allocate_id(&mut self) -> i32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn write_object(&mut self, id: i32, node: &'g Node) -> Result<()> {
        match node {
            Node::Record(record) => self.write_record(id, record),
            Node::List(list) => self.write_list(id, list),
            other => Err(Error::InvalidInput(format!(
                "cannot emit a {} as a top-level object",
                other.describe()
            ))),
        }
    }

    /// Emit a library record the first time a library is needed.
    fn ensure_library(&mut self, name: &str) -> Result<i32> {
        if let Some(&id) = self.libraries.get(name) {
            return Ok(id);
        }
        let id = self.allocate_id();
        self.out.push(record_type::BINARY_LIBRARY);
        write_i32(&mut self.out, id);
        write_string(&mut self.out, name)?;
        self.libraries.insert(name.to_string(), id);
        Ok(id)
    }

    /// Libraries must be declared before the record whose descriptor
    /// names them, so this runs ahead of writing a record header.
    fn ensure_type_libraries(&mut self, member_type: &MemberType) -> Result<()> {
        if let MemberType::Class(type_id) = member_type {
            let library = class_library(type_id)?;
            self.ensure_library(library)?;
        }
        Ok(())
    }

    fn write_record(&mut self, id: i32, record: &'g Record) -> Result<()> {
        for field in &record.fields {
            if !field.member_type.accepts(&field.value) {
                return Err(Error::InvalidInput(format!(
                    "field '{}' of {} is declared {:?} but holds a {}",
                    field.name,
                    record.type_id.name,
                    field.member_type,
                    field.value.describe()
                )));
            }
        }

        let library_id = record
            .type_id
            .library
            .as_deref()
            .map(|library| self.ensure_library(library))
            .transpose()?;
        for field in &record.fields {
            self.ensure_type_libraries(&field.member_type)?;
        }

        let key = ShapeKey {
            type_id: record.type_id.clone(),
            members: record
                .fields
                .iter()
                .map(|f| (f.name.clone(), f.member_type.clone()))
                .collect(),
        };

        if let Some(&metadata_id) = self.shapes.get(&key) {
            self.out.push(record_type::CLASS_WITH_ID);
            write_i32(&mut self.out, id);
            write_i32(&mut self.out, metadata_id);
        } else {
            self.out.push(match library_id {
                Some(_) => record_type::CLASS_WITH_MEMBERS_AND_TYPES,
                None => record_type::SYSTEM_CLASS_WITH_MEMBERS_AND_TYPES,
            });
            write_i32(&mut self.out, id);
            write_string(&mut self.out, &record.type_id.name)?;
            write_len(&mut self.out, record.fields.len())?;
            for field in &record.fields {
                write_string(&mut self.out, &field.name)?;
            }
            for field in &record.fields {
                self.out.push(type_tag(&field.member_type));
            }
            for field in &record.fields {
                self.write_type_info(&field.member_type)?;
            }
            if let Some(library_id) = library_id {
                write_i32(&mut self.out, library_id);
            }
            self.shapes.insert(key, id);
        }

        for field in &record.fields {
            match (&field.member_type, &field.value) {
                (MemberType::Primitive(_), Node::Primitive(p)) => write_primitive(&mut self.out, p)?,
                _ => self.write_value(&field.value)?,
            }
        }
        Ok(())
    }

    fn write_list(&mut self, id: i32, list: &'g List) -> Result<()> {
        for (index, item) in list.items.iter().enumerate() {
            if !list.element_type.accepts(item) {
                return Err(Error::InvalidInput(format!(
                    "element {} of a {:?} list holds a {}",
                    index,
                    list.element_type,
                    item.describe()
                )));
            }
        }

        match &list.element_type {
            MemberType::Primitive(kind) => {
                self.out.push(record_type::ARRAY_SINGLE_PRIMITIVE);
                write_i32(&mut self.out, id);
                write_len(&mut self.out, list.items.len())?;
                self.out.push(kind.code());
                for item in &list.items {
                    if let Node::Primitive(p) = item {
                        write_primitive(&mut self.out, p)?;
                    }
                }
                return Ok(());
            }
            MemberType::String => {
                self.out.push(record_type::ARRAY_SINGLE_STRING);
                write_i32(&mut self.out, id);
                write_len(&mut self.out, list.items.len())?;
            }
            MemberType::Object => {
                self.out.push(record_type::ARRAY_SINGLE_OBJECT);
                write_i32(&mut self.out, id);
                write_len(&mut self.out, list.items.len())?;
            }
            other => {
                self.ensure_type_libraries(other)?;
                self.out.push(record_type::BINARY_ARRAY);
                write_i32(&mut self.out, id);
                self.out.push(BINARY_ARRAY_SINGLE);
                write_i32(&mut self.out, 1);
                write_len(&mut self.out, list.items.len())?;
                self.out.push(type_tag(other));
                self.write_type_info(other)?;
            }
        }

        self.write_elements(&list.items)
    }

    /// Write element values, collapsing runs of nulls.
    fn write_elements(&mut self, items: &'g [Node]) -> Result<()> {
        let mut index = 0;
        while index < items.len() {
            let run = items[index..].iter().take_while(|n| n.is_null()).count();
            match run {
                0 => {
                    self.write_value(&items[index])?;
                    index += 1;
                    continue;
                }
                1 => self.out.push(record_type::OBJECT_NULL),
                2..=255 => {
                    self.out.push(record_type::OBJECT_NULL_MULTIPLE_256);
                    self.out.push(run as u8);
                }
                _ => {
                    self.out.push(record_type::OBJECT_NULL_MULTIPLE);
                    write_len(&mut self.out, run)?;
                }
            }
            index += run;
        }
        Ok(())
    }

    /// Write a non-inline value: null, boxed primitive, string, or a
    /// reference to a record or list emitted later.
    fn write_value(&mut self, value: &'g Node) -> Result<()> {
        match value {
            Node::Null => self.out.push(record_type::OBJECT_NULL),
            Node::Primitive(p) => {
                self.out.push(record_type::MEMBER_PRIMITIVE_TYPED);
                self.out.push(p.kind().code());
                write_primitive(&mut self.out, p)?;
            }
            Node::String(s) => {
                let id = self.allocate_id();
                self.out.push(record_type::BINARY_OBJECT_STRING);
                write_i32(&mut self.out, id);
                write_string(&mut self.out, s)?;
            }
            Node::Record(_) | Node::List(_) => {
                let id = self.allocate_id();
                self.out.push(record_type::MEMBER_REFERENCE);
                write_i32(&mut self.out, id);
                self.queue.push_back((id, value));
            }
        }
        Ok(())
    }

    fn write_type_info(&mut self, member_type: &MemberType) -> Result<()> {
        match member_type {
            MemberType::Primitive(kind) | MemberType::PrimitiveArray(kind) => {
                self.out.push(kind.code());
            }
            MemberType::SystemClass(name) => write_string(&mut self.out, name)?,
            MemberType::Class(type_id) => {
                write_string(&mut self.out, &type_id.name)?;
                let library = class_library(type_id)?;
                let library_id = self.libraries.get(library).copied().ok_or_else(|| {
                    Error::InvalidInput(format!("library {} was not declared", library))
                })?;
                write_i32(&mut self.out, library_id);
            }
            MemberType::String
            | MemberType::Object
            | MemberType::ObjectArray
            | MemberType::StringArray => {}
        }
        Ok(())
    }
}

fn class_library(type_id: &TypeId) -> Result<&str> {
    type_id.library.as_deref().ok_or_else(|| {
        Error::InvalidInput(format!("class member type {} has no library", type_id.name))
    })
}

fn type_tag(member_type: &MemberType) -> u8 {
    match member_type {
        MemberType::Primitive(_) => binary_type::PRIMITIVE,
        MemberType::String => binary_type::STRING,
        MemberType::Object => binary_type::OBJECT,
        MemberType::SystemClass(_) => binary_type::SYSTEM_CLASS,
        MemberType::Class(_) => binary_type::CLASS,
        MemberType::ObjectArray => binary_type::OBJECT_ARRAY,
        MemberType::StringArray => binary_type::STRING_ARRAY,
        MemberType::PrimitiveArray(_) => binary_type::PRIMITIVE_ARRAY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Primitive, PrimitiveKind};

    fn count(haystack: &[u8], needle: &[u8]) -> usize {
        haystack.windows(needle.len()).filter(|w| *w == needle).count()
    }

    fn point(x: i32) -> Node {
        Record::new(TypeId::new("Zq.Point", "Geometry"))
            .with_field("x", Primitive::Int32(x).into())
            .into()
    }

    #[test]
    fn test_output_is_deterministic() {
        let graph: Node = Record::new(TypeId::new("Root", "Game"))
            .with_field("a", point(1))
            .with_field("b", Node::string("text"))
            .into();
        assert_eq!(encode(&graph).unwrap(), encode(&graph).unwrap());
    }

    #[test]
    fn test_repeated_shape_written_once() {
        let graph: Node =
            List::new(MemberType::Object, vec![point(1), point(2), point(3)]).into();
        let bytes = encode(&graph).unwrap();

        assert_eq!(count(&bytes, b"Zq.Point"), 1);
        assert_eq!(count(&bytes, b"Geometry"), 1);
    }

    #[test]
    fn test_library_precedes_record() {
        let bytes = encode(&point(5)).unwrap();
        let library = bytes
            .iter()
            .position(|&b| b == record_type::BINARY_LIBRARY)
            .unwrap();
        let record = bytes
            .iter()
            .position(|&b| b == record_type::CLASS_WITH_MEMBERS_AND_TYPES)
            .unwrap();
        // Header is 17 bytes; the library comes right after it.
        assert_eq!(library, 17);
        assert!(library < record);
    }

    #[test]
    fn test_null_runs_compressed() {
        let mut items = vec![Node::Null; 300];
        items.push(Node::string("end"));
        items.extend(vec![Node::Null; 3]);
        let graph: Node = List::new(MemberType::Object, items).into();
        let bytes = encode(&graph).unwrap();

        assert!(bytes.contains(&record_type::OBJECT_NULL_MULTIPLE));
        // Header, array prefix, two runs, one string, message end.
        assert!(bytes.len() < 60);
    }

    #[test]
    fn test_primitive_list_uses_compact_record() {
        let graph: Node = List::new(
            MemberType::Primitive(PrimitiveKind::Byte),
            vec![Primitive::Byte(7).into(), Primitive::Byte(9).into()],
        )
        .into();
        let bytes = encode(&graph).unwrap();
        assert_eq!(bytes[17], record_type::ARRAY_SINGLE_PRIMITIVE);
        assert_eq!(&bytes[bytes.len() - 3..], &[7, 9, record_type::MESSAGE_END]);
    }

    #[test]
    fn test_scalar_root_rejected() {
        assert!(matches!(
            encode(&Node::string("alone")),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_mistyped_field_rejected() {
        let graph: Node = Record::new(TypeId::system("T"))
            .with_typed_field(
                "hp",
                MemberType::Primitive(PrimitiveKind::Int32),
                Node::string("forty"),
            )
            .into();
        match encode(&graph) {
            Err(Error::InvalidInput(msg)) => assert!(msg.contains("hp")),
            other => panic!("expected invalid input, got {:?}", other),
        }
    }

    #[test]
    fn test_mistyped_element_rejected() {
        let graph: Node = List::new(
            MemberType::Primitive(PrimitiveKind::Int32),
            vec![Primitive::Int64(1).into()],
        )
        .into();
        assert!(matches!(encode(&graph), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_class_member_without_library_rejected() {
        let graph: Node = Record::new(TypeId::system("T"))
            .with_typed_field("x", MemberType::Class(TypeId::system("U")), Node::Null)
            .into();
        assert!(matches!(encode(&graph), Err(Error::InvalidInput(_))));
    }
}
