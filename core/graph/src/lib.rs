//! Schema-less binary object graph codec.
//!
//! This module provides:
//! - A neutral tagged-node tree (`Node`) for records, lists, strings and
//!   primitives, carrying the declared member types of every record
//! - Decode/encode of the legacy .NET binary formatter record stream
//!   (the subset used by trees of plain records)
//! - Type forwarding for records whose type was renamed or moved
//!
//! # Security
//! Type identifiers are data. Decoding never instantiates or looks up
//! application types; it only builds `Node` values.

pub mod decode;
pub mod encode;
pub mod forwarding;
pub mod node;
mod wire;

pub use decode::decode;
pub use encode::encode;
pub use forwarding::{ForwardingRule, TypeForwardingRegistry};
pub use node::{Field, List, MemberType, Node, Primitive, PrimitiveKind, Record, TypeId};
