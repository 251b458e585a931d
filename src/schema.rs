//! Caller-declared record schemas and dynamic row values
//!
//! The file format carries no member names, so the caller describes the
//! record shape up front: ordered members with an element type, an array
//! cardinality, and a handful of flags. Rows come back as [`Record`] values
//! whose members sit in schema order.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Which category of schema members participates in decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberKind {
    Field,
    Property,
}

/// Element type of a schema member.
#[derive(Debug, Clone)]
pub enum ElemType {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    String,
    Struct(Arc<Schema>),
}

impl ElemType {
    /// Width in bits for primitive types; `None` for strings and structs.
    pub fn bit_size(&self) -> Option<u32> {
        match self {
            ElemType::Int8 | ElemType::UInt8 => Some(8),
            ElemType::Int16 | ElemType::UInt16 => Some(16),
            ElemType::Int32 | ElemType::UInt32 | ElemType::Float32 => Some(32),
            ElemType::Int64 | ElemType::UInt64 => Some(64),
            ElemType::String | ElemType::Struct(_) => None,
        }
    }

    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            ElemType::Int8 | ElemType::Int16 | ElemType::Int32 | ElemType::Int64
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(self, ElemType::Float32)
    }

    fn hash_into(&self, h: &mut impl Hasher) {
        match self {
            ElemType::Int8 => 0u8.hash(h),
            ElemType::UInt8 => 1u8.hash(h),
            ElemType::Int16 => 2u8.hash(h),
            ElemType::UInt16 => 3u8.hash(h),
            ElemType::Int32 => 4u8.hash(h),
            ElemType::UInt32 => 5u8.hash(h),
            ElemType::Int64 => 6u8.hash(h),
            ElemType::UInt64 => 7u8.hash(h),
            ElemType::Float32 => 8u8.hash(h),
            ElemType::String => 9u8.hash(h),
            ElemType::Struct(s) => {
                10u8.hash(h);
                s.hash_into(h);
            }
        }
    }
}

/// One named member of a record schema.
#[derive(Debug, Clone)]
pub struct Member {
    pub name: String,
    pub elem: ElemType,
    /// Number of elements; 1 for scalar members.
    pub cardinality: u32,
    /// Marks the row-id member.
    pub index: bool,
    /// Ignored members are skipped and consume no column.
    pub ignored: bool,
    pub writable: bool,
    pub kind: MemberKind,
}

impl Member {
    pub fn new(name: impl Into<String>, elem: ElemType) -> Self {
        Member {
            name: name.into(),
            elem,
            cardinality: 1,
            index: false,
            ignored: false,
            writable: true,
            kind: MemberKind::Field,
        }
    }

    /// Fixed-size array member of `n` elements.
    pub fn array(name: impl Into<String>, elem: ElemType, n: u32) -> Self {
        let mut m = Member::new(name, elem);
        m.cardinality = n.max(1);
        m
    }

    pub fn index(mut self) -> Self {
        self.index = true;
        self
    }

    pub fn ignored(mut self) -> Self {
        self.ignored = true;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.writable = false;
        self
    }

    pub fn property(mut self) -> Self {
        self.kind = MemberKind::Property;
        self
    }

    fn hash_into(&self, h: &mut impl Hasher) {
        self.name.hash(h);
        self.elem.hash_into(h);
        self.cardinality.hash(h);
        self.index.hash(h);
        self.ignored.hash(h);
        self.writable.hash(h);
        self.kind.hash(h);
    }
}

/// Ordered description of the caller's record type.
#[derive(Debug, Clone)]
pub struct Schema {
    name: String,
    members: Vec<Member>,
}

impl Schema {
    pub fn new(name: impl Into<String>) -> Self {
        Schema {
            name: name.into(),
            members: Vec::new(),
        }
    }

    /// Append a member, builder style.
    pub fn with_member(mut self, member: Member) -> Self {
        self.members.push(member);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn member_index(&self, name: &str) -> Option<usize> {
        self.members.iter().position(|m| m.name == name)
    }

    fn hash_into(&self, h: &mut impl Hasher) {
        self.name.hash(h);
        self.members.len().hash(h);
        for m in &self.members {
            m.hash_into(h);
        }
    }

    /// Stable identity hash used to key the compiled-plan cache.
    pub fn fingerprint(&self) -> u64 {
        let mut h = DefaultHasher::new();
        self.hash_into(&mut h);
        h.finish()
    }
}

/// One decoded member value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    Str(String),
    Array(Vec<Value>),
    Struct(Record),
}

impl Value {
    fn default_for(elem: &ElemType) -> Value {
        match elem {
            ElemType::Int8 => Value::I8(0),
            ElemType::UInt8 => Value::U8(0),
            ElemType::Int16 => Value::I16(0),
            ElemType::UInt16 => Value::U16(0),
            ElemType::Int32 => Value::I32(0),
            ElemType::UInt32 => Value::U32(0),
            ElemType::Int64 => Value::I64(0),
            ElemType::UInt64 => Value::U64(0),
            ElemType::Float32 => Value::F32(0.0),
            ElemType::String => Value::Str(String::new()),
            ElemType::Struct(s) => Value::Struct(Record::default_for(s.clone())),
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match *self {
            Value::U32(v) => Some(v),
            Value::I32(v) => Some(v as u32),
            _ => None,
        }
    }
}

/// A decoded row: member values parallel to the schema's member order.
#[derive(Debug, Clone)]
pub struct Record {
    schema: Arc<Schema>,
    values: Vec<Value>,
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values
    }
}

impl Record {
    /// Build the zero value of a schema: integers 0, floats 0.0, strings
    /// empty, arrays and nested structs recursively.
    pub(crate) fn default_for(schema: Arc<Schema>) -> Record {
        let values = schema
            .members()
            .iter()
            .map(|m| {
                if m.cardinality > 1 {
                    Value::Array(
                        (0..m.cardinality)
                            .map(|_| Value::default_for(&m.elem))
                            .collect(),
                    )
                } else {
                    Value::default_for(&m.elem)
                }
            })
            .collect();
        Record { schema, values }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Look up a member value by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.schema.member_index(name).map(|i| &self.values[i])
    }

    /// Resolve the storage slot for a member path and optional array slot.
    ///
    /// The path walks nested struct members; the final component selects the
    /// member whose value (or array element) is returned.
    pub(crate) fn slot_mut(&mut self, path: &[usize], slot: Option<usize>) -> &mut Value {
        let mut rec = self;
        for &idx in &path[..path.len() - 1] {
            rec = match &mut rec.values[idx] {
                Value::Struct(inner) => inner,
                other => panic!("schema path descends into non-struct value {:?}", other),
            };
        }
        let value = &mut rec.values[path[path.len() - 1]];
        match (slot, value) {
            (Some(i), Value::Array(items)) => &mut items[i],
            (Some(_), other) => panic!("array slot on non-array value {:?}", other),
            (None, other) => other,
        }
    }

    pub(crate) fn slot(&self, path: &[usize], slot: Option<usize>) -> &Value {
        let mut rec = self;
        for &idx in &path[..path.len() - 1] {
            rec = match &rec.values[idx] {
                Value::Struct(inner) => inner,
                other => panic!("schema path descends into non-struct value {:?}", other),
            };
        }
        let value = &rec.values[path[path.len() - 1]];
        match (slot, value) {
            (Some(i), Value::Array(items)) => &items[i],
            (Some(_), other) => panic!("array slot on non-array value {:?}", other),
            (None, value) => value,
        }
    }
}
