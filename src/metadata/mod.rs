//! The portable-module side of the type system.
//!
//! A module reader parses bytecode modules and hands the registry owned,
//! immutable descriptors through [`ModuleMetadata`]. Descriptor handles are
//! opaque to the registry; it only ever passes them back to the module that
//! produced them.
use crate::utils::{join_type_name, sync::Arc};
use gc_arena::{unsafe_empty_collect, Collect};
use std::fmt::{self, Display, Formatter};

pub mod memory;

/// A module-local type descriptor handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeDefId(pub u32);

/// Identifies a module loaded into a registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Collect)]
#[collect(require_static)]
pub struct ModuleId(pub u32);

/// The stable lookup key used by bytecode to address a field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Collect)]
#[collect(require_static)]
pub struct FieldToken(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodToken(pub u32);

/// A type reference as written in module metadata.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeRef {
    /// A type defined in the same module.
    Defined(TypeDefId),
    /// A type outside the module, by full name: another loaded module or a
    /// native type.
    Named(String),
    /// An unbound generic parameter of the enclosing type or method.
    GenericParameter(String),
    Array(Box<TypeRef>, u32),
    ByRef(Box<TypeRef>),
    GenericInstance {
        definition: Box<TypeRef>,
        arguments: Vec<TypeRef>,
    },
}

impl TypeRef {
    pub fn named(name: impl Into<String>) -> Self {
        TypeRef::Named(name.into())
    }

    pub fn parameter(name: impl Into<String>) -> Self {
        TypeRef::GenericParameter(name.into())
    }

    pub fn array(self) -> Self {
        TypeRef::Array(Box::new(self), 1)
    }

    pub fn by_ref(self) -> Self {
        TypeRef::ByRef(Box::new(self))
    }

    pub fn generic(self, arguments: Vec<TypeRef>) -> Self {
        TypeRef::GenericInstance {
            definition: Box::new(self),
            arguments,
        }
    }

    pub fn contains_generic_parameter(&self) -> bool {
        match self {
            TypeRef::GenericParameter(_) => true,
            TypeRef::Defined(_) | TypeRef::Named(_) => false,
            TypeRef::Array(inner, _) | TypeRef::ByRef(inner) => inner.contains_generic_parameter(),
            TypeRef::GenericInstance {
                definition,
                arguments,
            } => {
                definition.contains_generic_parameter()
                    || arguments.iter().any(TypeRef::contains_generic_parameter)
            }
        }
    }
}

impl Display for TypeRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Defined(d) => write!(f, "<def {}>", d.0),
            TypeRef::Named(n) => write!(f, "{n}"),
            TypeRef::GenericParameter(p) => write!(f, "{p}"),
            TypeRef::Array(inner, rank) => {
                write!(f, "{inner}[{}]", ",".repeat(rank.saturating_sub(1) as usize))
            }
            TypeRef::ByRef(inner) => write!(f, "{inner}&"),
            TypeRef::GenericInstance {
                definition,
                arguments,
            } => {
                write!(f, "{definition}<")?;
                for (i, a) in arguments.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, ">")
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TypeKind {
    #[default]
    Class,
    ValueType,
    Interface,
    Enum,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldDefinition {
    pub name: String,
    pub field_type: TypeRef,
    pub is_static: bool,
    pub token: FieldToken,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MethodDefinition {
    pub name: String,
    pub parameters: Vec<TypeRef>,
    /// `None` for `void` and for constructors.
    pub return_type: Option<TypeRef>,
    pub generic_parameters: Vec<String>,
    pub is_static: bool,
    pub is_constructor: bool,
    pub has_body: bool,
    pub token: MethodToken,
}

impl MethodDefinition {
    pub fn is_static_constructor(&self) -> bool {
        self.is_constructor && self.is_static && self.parameters.is_empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TypeDefinition {
    pub namespace: String,
    pub name: String,
    pub kind: TypeKind,
    pub generic_parameters: Vec<String>,
    pub base: Option<TypeRef>,
    pub interfaces: Vec<TypeRef>,
    pub fields: Vec<FieldDefinition>,
    pub methods: Vec<MethodDefinition>,
}
unsafe_empty_collect!(TypeDefinition);

impl TypeDefinition {
    pub fn full_name(&self) -> String {
        join_type_name(&self.namespace, &self.name)
    }

    pub fn is_value_type(&self) -> bool {
        matches!(self.kind, TypeKind::ValueType | TypeKind::Enum)
    }

    pub fn is_generic_definition(&self) -> bool {
        !self.generic_parameters.is_empty()
    }
}

/// A module metadata reader.
pub trait ModuleMetadata: Send + Sync {
    fn name(&self) -> &str;

    /// Every type descriptor the module defines.
    fn type_definitions(&self) -> Vec<TypeDefId>;

    /// Returns `None` when the module cannot supply the descriptor.
    fn type_definition(&self, id: TypeDefId) -> Option<Arc<TypeDefinition>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_ref_display() {
        let r = TypeRef::named("Game.Box").generic(vec![TypeRef::parameter("T").array()]);
        assert_eq!(r.to_string(), "Game.Box<T[]>");
        assert!(r.contains_generic_parameter());
        assert!(!TypeRef::named("System.Int32").by_ref().contains_generic_parameter());
        assert_eq!(
            TypeRef::Array(Box::new(TypeRef::named("A")), 2).to_string(),
            "A[,]"
        );
    }
}
