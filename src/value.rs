//! # Typed Values and the Inbound Event Model
//!
//! This module defines the closed set of value kinds a column can hold, and
//! the shape of an inbound monitoring event as this engine sees it: a kind
//! tag plus a sequence of `(field, value)` pairs. Decoding from the wire is
//! someone else's job; by the time an event reaches Sinkwell it is already
//! typed.
//!
//! ## Why a Closed Enum?
//!
//! The store's bulk-bind layer reinterpreted a raw byte buffer through a
//! runtime type tag. Here the column kind is part of the type system: a
//! [`Value`] is one of eight variants and nothing else, so a kind mismatch
//! is visible at the `match` site instead of corrupting a buffer.

use std::fmt;

// =============================================================================
// Column Kinds
// =============================================================================

/// The declared value kind of a column.
///
/// Fixed on the first write to a column and immutable for the container's
/// lifetime. Every later write to that column, in any row, must use the
/// same kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnKind {
    /// 32-bit signed integer.
    I32,
    /// 32-bit unsigned integer.
    U32,
    /// 64-bit signed integer.
    I64,
    /// 64-bit unsigned integer.
    U64,
    /// 32-bit float.
    F32,
    /// 64-bit float.
    F64,
    /// Boolean.
    Bool,
    /// Byte string (bounded by the target column's declared length).
    Str,
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ColumnKind::I32 => "i32",
            ColumnKind::U32 => "u32",
            ColumnKind::I64 => "i64",
            ColumnKind::U64 => "u64",
            ColumnKind::F32 => "f32",
            ColumnKind::F64 => "f64",
            ColumnKind::Bool => "bool",
            ColumnKind::Str => "str",
        };
        write!(f, "{s}")
    }
}

// =============================================================================
// Values
// =============================================================================

/// A typed value carried by an event field or bound into a column.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Bool(bool),
    Str(String),
}

impl Value {
    /// Returns the column kind this value binds as.
    pub fn kind(&self) -> ColumnKind {
        match self {
            Value::I32(_) => ColumnKind::I32,
            Value::U32(_) => ColumnKind::U32,
            Value::I64(_) => ColumnKind::I64,
            Value::U64(_) => ColumnKind::U64,
            Value::F32(_) => ColumnKind::F32,
            Value::F64(_) => ColumnKind::F64,
            Value::Bool(_) => ColumnKind::Bool,
            Value::Str(_) => ColumnKind::Str,
        }
    }

    /// Renders this value as a SQL literal for the multi-insert text path.
    ///
    /// Strings are single-quoted with embedded quotes doubled; everything
    /// else renders as a bare literal. Floats that are not finite render as
    /// NULL, since no store accepts `NaN` as a numeric literal.
    pub fn to_sql_literal(&self) -> String {
        match self {
            Value::I32(v) => v.to_string(),
            Value::U32(v) => v.to_string(),
            Value::I64(v) => v.to_string(),
            Value::U64(v) => v.to_string(),
            Value::F32(v) if v.is_finite() => v.to_string(),
            Value::F64(v) if v.is_finite() => v.to_string(),
            Value::F32(_) | Value::F64(_) => "NULL".to_string(),
            Value::Bool(v) => if *v { "1" } else { "0" }.to_string(),
            Value::Str(s) => format!("'{}'", s.replace('\'', "''")),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::I32(v) => write!(f, "{v}"),
            Value::U32(v) => write!(f, "{v}"),
            Value::I64(v) => write!(f, "{v}"),
            Value::U64(v) => write!(f, "{v}"),
            Value::F32(v) => write!(f, "{v}"),
            Value::F64(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Str(v) => write!(f, "{v}"),
        }
    }
}

macro_rules! impl_value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Value::$variant(v)
            }
        })*
    };
}

impl_value_from! {
    i32 => I32, u32 => U32, i64 => I64, u64 => U64,
    f32 => F32, f64 => F64, bool => Bool, String => Str,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

// =============================================================================
// Fields and Events
// =============================================================================

/// How an event field addresses its target statement parameter.
///
/// Positional references resolve directly to a column index; named
/// references resolve through the statement's parameter map and may fail,
/// in which case the single field is dropped with a warning.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldRef {
    /// 0-based parameter index.
    Index(usize),
    /// Parameter name, resolved through the statement's map.
    Name(String),
}

impl From<usize> for FieldRef {
    fn from(i: usize) -> Self {
        FieldRef::Index(i)
    }
}

impl From<&str> for FieldRef {
    fn from(s: &str) -> Self {
        FieldRef::Name(s.to_string())
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldRef::Index(i) => write!(f, "#{i}"),
            FieldRef::Name(n) => write!(f, "{n}"),
        }
    }
}

/// One field of an inbound event: a parameter reference plus its value,
/// or an explicit NULL of a declared kind.
#[derive(Debug, Clone)]
pub struct Field {
    /// Which statement parameter this field binds to.
    pub target: FieldRef,
    /// The value, or `None` for an explicit NULL.
    pub value: Option<Value>,
    /// The kind a NULL binds as. Ignored when `value` is `Some`.
    pub null_kind: ColumnKind,
}

impl Field {
    /// A field carrying a value.
    pub fn value(target: impl Into<FieldRef>, value: impl Into<Value>) -> Self {
        let value = value.into();
        let null_kind = value.kind();
        Self {
            target: target.into(),
            value: Some(value),
            null_kind,
        }
    }

    /// A field carrying an explicit NULL of the given kind.
    pub fn null(target: impl Into<FieldRef>, kind: ColumnKind) -> Self {
        Self {
            target: target.into(),
            value: None,
            null_kind: kind,
        }
    }
}

/// The name of a registered batch stream, used as an event-kind tag.
///
/// Events carry this tag to pick their target statement (or builder) and
/// action category. Examples: `"metrics"`, `"custom_variables"`, `"logs"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamName(String);

impl StreamName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StreamName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for StreamName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// An inbound monitoring event, already decoded upstream.
///
/// Presented to the engine as a kind tag plus `(field, value)` pairs. The
/// optional `instance_id` pins the event's writes to one connection, so all
/// writes of one poller serialize in order.
#[derive(Debug, Clone)]
pub struct Event {
    /// Which registered stream this event feeds.
    pub stream: StreamName,
    /// The typed fields, in statement-parameter order or named.
    pub fields: Vec<Field>,
    /// Originating monitoring instance, if the event carries one.
    pub instance_id: Option<u32>,
}

impl Event {
    /// Creates an event for the given stream with no fields.
    pub fn new(stream: impl Into<StreamName>) -> Self {
        Self {
            stream: stream.into(),
            fields: Vec::new(),
            instance_id: None,
        }
    }

    /// Adds a value field (builder pattern).
    pub fn field(mut self, target: impl Into<FieldRef>, value: impl Into<Value>) -> Self {
        self.fields.push(Field::value(target, value));
        self
    }

    /// Adds an explicit NULL field.
    pub fn null_field(mut self, target: impl Into<FieldRef>, kind: ColumnKind) -> Self {
        self.fields.push(Field::null(target, kind));
        self
    }

    /// Pins this event to a monitoring instance.
    pub fn from_instance(mut self, instance_id: u32) -> Self {
        self.instance_id = Some(instance_id);
        self
    }
}

// =============================================================================
// Tests
// =============================================================================
