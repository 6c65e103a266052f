//! Mapping between a decoded graph and a `SaveDocument`.
//!
//! Only the four document fields are read or written. Every other field of
//! the root record is left as decoded, so saving against the graph a
//! document was loaded from keeps data the editor does not know about.
//! Building a graph from a document alone cannot recover those fields.

use atosave_common::{Error, Result};
use atosave_graph::{Field, MemberType, Node, Primitive, Record, TypeId};

use crate::document::SaveDocument;

const GAME_DATE: &str = "GameDate";
const CURRENT_MAP_NODE: &str = "CurrentMapNode";
const TEAM_PAYLOAD: &str = "TeamAtO";
const GAME_MODE: &str = "GameMode";

/// Root type written for documents that have no decoded graph.
const ROOT_TYPE: &str = "GameData";
const ROOT_LIBRARY: &str = "Assembly-CSharp, Version=0.0.0.0, Culture=neutral, PublicKeyToken=null";

/// Read the document fields from a decoded graph.
///
/// # Errors
/// - Root is not a record
/// - `TeamAtO` or `GameMode` is missing
/// - A field holds a value of the wrong kind
pub fn document_from_graph(graph: &Node) -> Result<SaveDocument> {
    let root = root_record(graph)?;

    let team_payload = match required(root, TEAM_PAYLOAD)? {
        Node::Null => String::new(),
        Node::String(s) => s.clone(),
        other => return Err(wrong_kind(TEAM_PAYLOAD, "a string", other)),
    };
    let game_mode = match required(root, GAME_MODE)? {
        Node::Primitive(Primitive::Int32(mode)) => *mode,
        other => return Err(wrong_kind(GAME_MODE, "a 32-bit integer", other)),
    };

    Ok(SaveDocument {
        game_date: optional_string(root, GAME_DATE)?,
        current_map_node: optional_string(root, CURRENT_MAP_NODE)?,
        team_payload,
        game_mode,
    })
}

/// Write the document fields into an existing graph.
///
/// Fields that exist keep their position and declared type. A field the
/// graph lacks is appended.
///
/// # Errors
/// - Root is not a record
/// - An existing field is declared with a type that cannot hold the value
pub fn apply_document(document: &SaveDocument, graph: &mut Node) -> Result<()> {
    let root = graph
        .as_record_mut()
        .ok_or_else(|| Error::Document("save root is not a record".to_string()))?;

    set_field(root, GAME_DATE, optional_node(&document.game_date))?;
    set_field(root, CURRENT_MAP_NODE, optional_node(&document.current_map_node))?;
    set_field(root, TEAM_PAYLOAD, Node::string(document.team_payload.as_str()))?;
    set_field(root, GAME_MODE, Primitive::Int32(document.game_mode).into())?;
    Ok(())
}

/// Build a fresh graph holding only the document fields.
pub fn document_to_graph(document: &SaveDocument) -> Node {
    Record::new(TypeId::new(ROOT_TYPE, ROOT_LIBRARY))
        .with_typed_field(
            backing_field(GAME_DATE),
            MemberType::String,
            optional_node(&document.game_date),
        )
        .with_typed_field(
            backing_field(CURRENT_MAP_NODE),
            MemberType::String,
            optional_node(&document.current_map_node),
        )
        .with_typed_field(
            backing_field(TEAM_PAYLOAD),
            MemberType::String,
            Node::string(document.team_payload.as_str()),
        )
        .with_field(backing_field(GAME_MODE), Primitive::Int32(document.game_mode).into())
        .into()
}

fn root_record(graph: &Node) -> Result<&Record> {
    graph.as_record().ok_or_else(|| {
        Error::Document(format!("save root is a {}, not a record", graph.describe()))
    })
}

/// Auto-property storage name the game's serializer writes.
fn backing_field(name: &str) -> String {
    format!("<{}>k__BackingField", name)
}

fn lower_first(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Position of a field under its plain, backing-field or camel-case name.
fn find_field(record: &Record, name: &str) -> Option<usize> {
    let candidates = [name.to_string(), backing_field(name), lower_first(name)];
    candidates
        .iter()
        .find_map(|candidate| record.fields.iter().position(|f| f.name == *candidate))
}

fn required<'r>(record: &'r Record, name: &str) -> Result<&'r Node> {
    find_field(record, name)
        .map(|index| &record.fields[index].value)
        .ok_or_else(|| {
            Error::Document(format!("{} has no {} field", record.type_id.name, name))
        })
}

fn optional_string(record: &Record, name: &str) -> Result<Option<String>> {
    match find_field(record, name).map(|index| &record.fields[index].value) {
        None | Some(Node::Null) => Ok(None),
        Some(Node::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(wrong_kind(name, "a string", other)),
    }
}

fn optional_node(value: &Option<String>) -> Node {
    value.as_deref().map(Node::string).unwrap_or(Node::Null)
}

fn set_field(record: &mut Record, name: &str, value: Node) -> Result<()> {
    match find_field(record, name) {
        Some(index) => {
            let field = &mut record.fields[index];
            if !field.member_type.accepts(&value) {
                return Err(Error::Document(format!(
                    "field {} is declared {:?} and cannot hold a {}",
                    field.name,
                    field.member_type,
                    value.describe()
                )));
            }
            field.value = value;
        }
        None => {
            let member_type = match &value {
                Node::Null => MemberType::String,
                other => MemberType::infer(other),
            };
            record.fields.push(Field {
                name: backing_field(name),
                member_type,
                value,
            });
        }
    }
    Ok(())
}

fn wrong_kind(name: &str, expected: &str, found: &Node) -> Error {
    Error::Document(format!(
        "field {} should hold {}, found a {}",
        name,
        expected,
        found.describe()
    ))
}
