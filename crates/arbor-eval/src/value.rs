//! Runtime values.

use std::fmt;

use crate::heap::{ClassId, ObjectId};

/// A value produced by evaluating a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Value {
    Int(i32),
    /// A reference; `None` is null.
    Ref(Option<ObjectId>),
    /// A class pointer, as loaded through the vft field.
    Class(ClassId),
    /// Address of an array element.
    Element { array: ObjectId, index: i32 },
}

impl Value {
    pub const NULL: Value = Value::Ref(None);

    pub fn object(object: ObjectId) -> Self {
        Value::Ref(Some(object))
    }

    pub fn is_null(self) -> bool {
        self == Value::NULL
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Ref(None) => f.write_str("null"),
            Value::Ref(Some(object)) => write!(f, "{object}"),
            Value::Class(class) => write!(f, "{class}"),
            Value::Element { array, index } => write!(f, "{array}[{index}]"),
        }
    }
}
