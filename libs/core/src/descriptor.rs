//! Type descriptors: the static stand-in for reflected type information.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Shape of a described type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "of", rename_all = "snake_case")]
pub enum TypeKind {
    String,
    Int,
    Uint,
    Float,
    Bool,
    Unit,
    Struct,
    List(Box<TypeDescriptor>),
    Map(Box<TypeDescriptor>),
    Channel(Box<TypeDescriptor>),
    Context,
    Error,
}

/// Name and shape of a parameter or result type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDescriptor {
    pub name: String,
    pub kind: TypeKind,
}

impl TypeDescriptor {
    pub fn new(name: impl Into<String>, kind: TypeKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn string() -> Self {
        Self::new("String", TypeKind::String)
    }

    pub fn int(name: impl Into<String>) -> Self {
        Self::new(name, TypeKind::Int)
    }

    pub fn uint(name: impl Into<String>) -> Self {
        Self::new(name, TypeKind::Uint)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, TypeKind::Float)
    }

    pub fn bool() -> Self {
        Self::new("bool", TypeKind::Bool)
    }

    pub fn unit() -> Self {
        Self::new("()", TypeKind::Unit)
    }

    /// A user-defined record type.
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(name, TypeKind::Struct)
    }

    pub fn list(elem: TypeDescriptor) -> Self {
        Self::new(format!("Vec<{}>", elem.name), TypeKind::List(Box::new(elem)))
    }

    pub fn map(value: TypeDescriptor) -> Self {
        Self::new(
            format!("HashMap<String, {}>", value.name),
            TypeKind::Map(Box::new(value)),
        )
    }

    pub fn channel(elem: TypeDescriptor) -> Self {
        Self::new(
            format!("Receiver<{}>", elem.name),
            TypeKind::Channel(Box::new(elem)),
        )
    }

    pub fn context() -> Self {
        Self::new("Context", TypeKind::Context)
    }

    pub fn error() -> Self {
        Self::new("Error", TypeKind::Error)
    }

    pub fn is_context(&self) -> bool {
        self.kind == TypeKind::Context
    }

    pub fn is_error(&self) -> bool {
        self.kind == TypeKind::Error
    }

    pub fn is_channel(&self) -> bool {
        matches!(self.kind, TypeKind::Channel(_))
    }

    /// String and integer kinds, the ones usable as a `{id}` path segment.
    pub fn is_simple(&self) -> bool {
        matches!(self.kind, TypeKind::String | TypeKind::Int | TypeKind::Uint)
    }

    /// Element type of a channel, or the type itself.
    pub fn unwrap_channel(&self) -> &TypeDescriptor {
        match &self.kind {
            TypeKind::Channel(elem) => elem,
            _ => self,
        }
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
