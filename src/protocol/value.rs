//! Tagged value definitions
//!
//! Defines the closed set of values that can cross the engine socket, the peer link
//! or a FISH binary file.

use std::fmt;

use bytes::Bytes;
use serde::Serialize;

/// Type tags, written as an Int32 in front of every payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(i32)]
pub enum Tag {
    Int = 1,
    Float = 2,
    Text = 3,
    Vec2 = 5,
    Vec3 = 6,
    /// Opaque serialized array, peer link only
    Blob = 7,
    /// Encoded as an Int32 0/1, FISH files only
    Bool = 8,
}

impl Tag {
    /// Look up a tag by its wire code
    pub fn from_code(code: i32) -> Option<Tag> {
        match code {
            1 => Some(Tag::Int),
            2 => Some(Tag::Float),
            3 => Some(Tag::Text),
            5 => Some(Tag::Vec2),
            6 => Some(Tag::Vec3),
            7 => Some(Tag::Blob),
            8 => Some(Tag::Bool),
            _ => None,
        }
    }

    /// Get the wire code for this tag
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tag::Int => "int",
            Tag::Float => "float",
            Tag::Text => "string",
            Tag::Vec2 => "vec2",
            Tag::Vec3 => "vec3",
            Tag::Blob => "blob",
            Tag::Bool => "bool",
        };
        f.write_str(name)
    }
}

/// A single tagged value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Int(i32),
    Float(f64),
    Text(String),
    Vec2([f64; 2]),
    Vec3([f64; 3]),
    Blob(Bytes),
    Bool(bool),
}

impl Value {
    /// Get the tag this value is written with
    pub fn tag(&self) -> Tag {
        match self {
            Value::Int(_) => Tag::Int,
            Value::Float(_) => Tag::Float,
            Value::Text(_) => Tag::Text,
            Value::Vec2(_) => Tag::Vec2,
            Value::Vec3(_) => Tag::Vec3,
            Value::Blob(_) => Tag::Blob,
            Value::Bool(_) => Tag::Bool,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_vec2(&self) -> Option<[f64; 2]> {
        match self {
            Value::Vec2(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_vec3(&self) -> Option<[f64; 3]> {
        match self {
            Value::Vec3(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// True for the Int32 0 acknowledgement the engine sends after COMMAND/ASSIGN
    pub fn is_ack(&self) -> bool {
        matches!(self, Value::Int(0))
    }

    /// Render this value as a literal in the engine's expression language.
    ///
    /// Floats always keep a decimal point so they are not re-read as integers.
    /// Values with no literal form give None: blobs, non-finite floats and text
    /// containing a quote, which the expression syntax cannot escape.
    pub fn to_expression(&self) -> Option<String> {
        match self {
            Value::Int(v) => Some(v.to_string()),
            Value::Float(v) => float_literal(*v),
            Value::Text(s) if s.contains('\'') => None,
            Value::Text(s) => Some(format!("'{}'", s)),
            Value::Vec2([x, y]) => Some(format!("vector({},{})", float_literal(*x)?, float_literal(*y)?)),
            Value::Vec3([x, y, z]) => Some(format!(
                "vector({},{},{})",
                float_literal(*x)?,
                float_literal(*y)?,
                float_literal(*z)?
            )),
            Value::Bool(b) => Some(b.to_string()),
            Value::Blob(_) => None,
        }
    }
}

fn float_literal(v: f64) -> Option<String> {
    v.is_finite().then(|| format!("{:?}", v))
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{:?}", v),
            Value::Text(s) => write!(f, "{:?}", s),
            Value::Vec2([x, y]) => write!(f, "[{:?}, {:?}]", x, y),
            Value::Vec3([x, y, z]) => write!(f, "[{:?}, {:?}, {:?}]", x, y, z),
            Value::Blob(b) => write!(f, "<blob {} bytes>", b.len()),
            Value::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<[f64; 2]> for Value {
    fn from(v: [f64; 2]) -> Self {
        Value::Vec2(v)
    }
}

impl From<[f64; 3]> for Value {
    fn from(v: [f64; 3]) -> Self {
        Value::Vec3(v)
    }
}

impl From<Bytes> for Value {
    fn from(v: Bytes) -> Self {
        Value::Blob(v)
    }
}
