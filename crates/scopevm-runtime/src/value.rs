//! Runtime value representation
//!
//! A value is exactly one of int64, float64 or a string handle. String
//! handles either index the constant pool or own a runtime string, so no
//! value ever points into a buffer it could outlive.

use crate::program::ConstantPool;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

/// Declared type of a slot, parameter or return value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VarType {
    Void,
    Double,
    Int,
    String,
}

impl VarType {
    /// Short lowercase name used by the disassembler and error messages
    pub fn name(self) -> &'static str {
        match self {
            VarType::Void => "void",
            VarType::Double => "double",
            VarType::Int => "int",
            VarType::String => "string",
        }
    }

    pub(crate) fn to_byte(self) -> u8 {
        match self {
            VarType::Void => 0,
            VarType::Double => 1,
            VarType::Int => 2,
            VarType::String => 3,
        }
    }

    pub(crate) fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(VarType::Void),
            1 => Some(VarType::Double),
            2 => Some(VarType::Int),
            3 => Some(VarType::String),
            _ => None,
        }
    }
}

impl fmt::Display for VarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Handle to string data
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrHandle {
    /// Index into the program's constant pool
    Constant(u16),
    /// String produced at runtime or supplied by the embedder
    Owned(Arc<str>),
}

/// Runtime value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Double(f64),
    Str(StrHandle),
}

impl Value {
    /// Create an owned string value
    pub fn string(s: impl Into<Arc<str>>) -> Self {
        Value::Str(StrHandle::Owned(s.into()))
    }

    /// The empty string
    pub fn empty_string() -> Self {
        Value::Str(StrHandle::Owned(Arc::from("")))
    }

    /// Zero value a freshly entered scope slot holds
    pub fn zero(ty: VarType) -> Self {
        match ty {
            VarType::Double => Value::Double(0.0),
            VarType::String => Value::empty_string(),
            VarType::Int | VarType::Void => Value::Int(0),
        }
    }

    /// Tag of the stored value
    pub fn var_type(&self) -> VarType {
        match self {
            Value::Int(_) => VarType::Int,
            Value::Double(_) => VarType::Double,
            Value::Str(_) => VarType::String,
        }
    }

    /// Resolve string data against the constant pool
    ///
    /// Returns `None` for non-strings or dangling constant indices.
    pub fn as_str<'a>(&'a self, pool: &'a ConstantPool) -> Option<&'a str> {
        match self {
            Value::Str(StrHandle::Owned(s)) => Some(s.as_ref()),
            Value::Str(StrHandle::Constant(idx)) => pool.get(*idx),
            _ => None,
        }
    }

    /// Replace a constant-pool handle with an owned copy of its text
    ///
    /// Used when values leave the VM (final globals) so they stay valid
    /// without the pool.
    pub fn detach(self, pool: &ConstantPool) -> Value {
        match self {
            Value::Str(StrHandle::Constant(idx)) => match pool.get(idx) {
                Some(s) => Value::string(s),
                None => Value::empty_string(),
            },
            other => other,
        }
    }

    /// Canonical textual form written by the print instructions
    pub fn render<'a>(&'a self, pool: &'a ConstantPool) -> Cow<'a, str> {
        match self {
            Value::Int(i) => Cow::Owned(i.to_string()),
            Value::Double(d) => Cow::Owned(d.to_string()),
            Value::Str(_) => Cow::Borrowed(self.as_str(pool).unwrap_or("")),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::string(value)
    }
}
