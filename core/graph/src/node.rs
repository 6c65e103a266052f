//! The decoded object graph.
//!
//! A graph is a tree: every record and list is owned by exactly one
//! parent. Records keep the member types they were declared with so that
//! re-encoding reproduces the same type descriptors.

use std::fmt;

/// Qualified type identifier of a record.
///
/// `library` is the declaring assembly name; `None` marks a system type
/// (declared without a library record).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeId {
    pub name: String,
    pub library: Option<String>,
}

impl TypeId {
    /// A type declared in the given library.
    pub fn new(name: impl Into<String>, library: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            library: Some(library.into()),
        }
    }

    /// A system type (no library).
    pub fn system(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            library: None,
        }
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.library {
            Some(library) => write!(f, "{}, {}", self.name, library),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Primitive kinds, numbered as on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    Boolean,
    Byte,
    Char,
    Decimal,
    Double,
    Int16,
    Int32,
    Int64,
    SByte,
    Single,
    TimeSpan,
    DateTime,
    UInt16,
    UInt32,
    UInt64,
}

impl PrimitiveKind {
    /// Wire tag for this kind.
    pub fn code(self) -> u8 {
        match self {
            PrimitiveKind::Boolean => 1,
            PrimitiveKind::Byte => 2,
            PrimitiveKind::Char => 3,
            PrimitiveKind::Decimal => 5,
            PrimitiveKind::Double => 6,
            PrimitiveKind::Int16 => 7,
            PrimitiveKind::Int32 => 8,
            PrimitiveKind::Int64 => 9,
            PrimitiveKind::SByte => 10,
            PrimitiveKind::Single => 11,
            PrimitiveKind::TimeSpan => 12,
            PrimitiveKind::DateTime => 13,
            PrimitiveKind::UInt16 => 14,
            PrimitiveKind::UInt32 => 15,
            PrimitiveKind::UInt64 => 16,
        }
    }

    /// Kind for a wire tag, if known.
    pub fn from_code(code: u8) -> Option<Self> {
        let kind = match code {
            1 => PrimitiveKind::Boolean,
            2 => PrimitiveKind::Byte,
            3 => PrimitiveKind::Char,
            5 => PrimitiveKind::Decimal,
            6 => PrimitiveKind::Double,
            7 => PrimitiveKind::Int16,
            8 => PrimitiveKind::Int32,
            9 => PrimitiveKind::Int64,
            10 => PrimitiveKind::SByte,
            11 => PrimitiveKind::Single,
            12 => PrimitiveKind::TimeSpan,
            13 => PrimitiveKind::DateTime,
            14 => PrimitiveKind::UInt16,
            15 => PrimitiveKind::UInt32,
            16 => PrimitiveKind::UInt64,
            _ => return None,
        };
        Some(kind)
    }
}

/// A primitive value.
#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    Boolean(bool),
    Byte(u8),
    Char(char),
    /// Decimal in its invariant textual form.
    Decimal(String),
    Double(f64),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    SByte(i8),
    Single(f32),
    /// Ticks.
    TimeSpan(i64),
    /// Ticks with the kind in the top two bits, kept verbatim.
    DateTime(i64),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
}

impl Primitive {
    pub fn kind(&self) -> PrimitiveKind {
        match self {
            Primitive::Boolean(_) => PrimitiveKind::Boolean,
            Primitive::Byte(_) => PrimitiveKind::Byte,
            Primitive::Char(_) => PrimitiveKind::Char,
            Primitive::Decimal(_) => PrimitiveKind::Decimal,
            Primitive::Double(_) => PrimitiveKind::Double,
            Primitive::Int16(_) => PrimitiveKind::Int16,
            Primitive::Int32(_) => PrimitiveKind::Int32,
            Primitive::Int64(_) => PrimitiveKind::Int64,
            Primitive::SByte(_) => PrimitiveKind::SByte,
            Primitive::Single(_) => PrimitiveKind::Single,
            Primitive::TimeSpan(_) => PrimitiveKind::TimeSpan,
            Primitive::DateTime(_) => PrimitiveKind::DateTime,
            Primitive::UInt16(_) => PrimitiveKind::UInt16,
            Primitive::UInt32(_) => PrimitiveKind::UInt32,
            Primitive::UInt64(_) => PrimitiveKind::UInt64,
        }
    }
}

/// Declared type of a record member or list element.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MemberType {
    /// Written inline without a record header.
    Primitive(PrimitiveKind),
    String,
    Object,
    /// A class from the system library, by name.
    SystemClass(String),
    Class(TypeId),
    ObjectArray,
    StringArray,
    PrimitiveArray(PrimitiveKind),
}

impl MemberType {
    /// The member type a freshly built value would be declared with.
    pub fn infer(value: &Node) -> Self {
        match value {
            Node::Null => MemberType::Object,
            Node::Primitive(p) => MemberType::Primitive(p.kind()),
            Node::String(_) => MemberType::String,
            Node::Record(record) => match &record.type_id.library {
                Some(_) => MemberType::Class(record.type_id.clone()),
                None => MemberType::SystemClass(record.type_id.name.clone()),
            },
            Node::List(list) => match &list.element_type {
                MemberType::Primitive(kind) => MemberType::PrimitiveArray(*kind),
                MemberType::String => MemberType::StringArray,
                MemberType::Object => MemberType::ObjectArray,
                _ => MemberType::Object,
            },
        }
    }

    /// Whether a value of this shape may be stored under this type.
    pub fn accepts(&self, value: &Node) -> bool {
        match (self, value) {
            (MemberType::Primitive(kind), Node::Primitive(p)) => p.kind() == *kind,
            (MemberType::Primitive(_), _) => false,
            (MemberType::Object, _) => true,
            (_, Node::Null) => true,
            (MemberType::String, Node::String(_)) => true,
            (MemberType::SystemClass(_) | MemberType::Class(_), Node::Record(_) | Node::List(_)) => {
                true
            }
            (
                MemberType::ObjectArray | MemberType::StringArray | MemberType::PrimitiveArray(_),
                Node::List(_),
            ) => true,
            _ => false,
        }
    }
}

/// A named record member.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub member_type: MemberType,
    pub value: Node,
}

/// A typed record with ordered fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub type_id: TypeId,
    pub fields: Vec<Field>,
}

impl Record {
    pub fn new(type_id: TypeId) -> Self {
        Self {
            type_id,
            fields: Vec::new(),
        }
    }

    /// Append a field whose member type is inferred from the value.
    pub fn with_field(self, name: impl Into<String>, value: Node) -> Self {
        let member_type = MemberType::infer(&value);
        self.with_typed_field(name, member_type, value)
    }

    /// Append a field with an explicit member type.
    pub fn with_typed_field(
        mut self,
        name: impl Into<String>,
        member_type: MemberType,
        value: Node,
    ) -> Self {
        self.fields.push(Field {
            name: name.into(),
            member_type,
            value,
        });
        self
    }

    /// Look up a field value by exact name.
    pub fn field(&self, name: &str) -> Option<&Node> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.value)
    }

    /// Look up a field by exact name for modification.
    pub fn field_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.fields.iter_mut().find(|f| f.name == name)
    }

    /// Names of all fields, in order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }
}

/// A homogeneous sequence with one declared element type.
#[derive(Debug, Clone, PartialEq)]
pub struct List {
    pub element_type: MemberType,
    pub items: Vec<Node>,
}

impl List {
    pub fn new(element_type: MemberType, items: Vec<Node>) -> Self {
        Self {
            element_type,
            items,
        }
    }
}

/// One node of the object graph.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Null,
    Primitive(Primitive),
    String(String),
    Record(Record),
    List(List),
}

impl Node {
    /// Shorthand for a string node.
    pub fn string(value: impl Into<String>) -> Self {
        Node::String(value.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Node::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Node::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Node::Record(record) => Some(record),
            _ => None,
        }
    }

    pub fn as_record_mut(&mut self) -> Option<&mut Record> {
        match self {
            Node::Record(record) => Some(record),
            _ => None,
        }
    }

    /// Short description of the node's shape, for error messages.
    pub fn describe(&self) -> &'static str {
        match self {
            Node::Null => "null",
            Node::Primitive(_) => "primitive",
            Node::String(_) => "string",
            Node::Record(_) => "record",
            Node::List(_) => "list",
        }
    }
}

impl From<Primitive> for Node {
    fn from(value: Primitive) -> Self {
        Node::Primitive(value)
    }
}

impl From<Record> for Node {
    fn from(value: Record) -> Self {
        Node::Record(value)
    }
}

impl From<List> for Node {
    fn from(value: List) -> Self {
        Node::List(value)
    }
}
