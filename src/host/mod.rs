//! The native side of the type system.
//!
//! [`NativeReflection`] is the seam between the registry and whatever
//! reflection facility the host platform offers. Descriptors are plain owned
//! data; the registry wraps them in [`NativeType`](crate::types::native::NativeType)
//! models and caches everything it derives from them.
use crate::{
    utils::sync::Arc,
    value::{DefaultValue, ObjectRef, Value},
};
use gc_arena::{unsafe_empty_collect, Collect};
use std::fmt::{self, Debug, Formatter};

pub mod memory;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Collect)]
#[collect(require_static)]
pub struct NativeTypeId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Collect)]
#[collect(require_static)]
pub struct NativeFieldId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Collect)]
#[collect(require_static)]
pub struct NativeMethodId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NativeTypeKind {
    Class,
    ValueType,
    Interface,
    Enum,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    Boolean,
    Char,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
    IntPtr,
    UIntPtr,
}

impl PrimitiveKind {
    pub fn default_value(self) -> DefaultValue {
        use PrimitiveKind::*;
        match self {
            Boolean | Char | Int8 | UInt8 | Int16 | UInt16 | Int32 | UInt32 => {
                DefaultValue::Integer
            }
            Int64 | UInt64 | IntPtr | UIntPtr => DefaultValue::Long,
            Float32 => DefaultValue::Float,
            Float64 => DefaultValue::Double,
        }
    }
}

/// Root types that never surface as a base type of an interpreted type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WellKnownType {
    Object,
    ValueType,
    Enum,
    Delegate,
    MulticastDelegate,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NativeTypeInfo {
    pub full_name: String,
    pub kind: NativeTypeKind,
    pub primitive: Option<PrimitiveKind>,
    pub well_known: Option<WellKnownType>,
    pub is_delegate: bool,
    pub is_abstract: bool,
    pub base: Option<NativeTypeId>,
    pub interfaces: Vec<NativeTypeId>,
    /// Element of an array or by-ref type.
    pub element: Option<NativeTypeId>,
    /// Nonzero for arrays.
    pub array_rank: u32,
    pub is_by_ref: bool,
    pub generic_definition: Option<NativeTypeId>,
    pub generic_arguments: Vec<NativeTypeId>,
    /// Declared parameter names of an open generic definition.
    pub generic_parameters: Vec<String>,
}

impl NativeTypeInfo {
    pub fn new(full_name: impl Into<String>, kind: NativeTypeKind) -> Self {
        Self {
            full_name: full_name.into(),
            kind,
            primitive: None,
            well_known: None,
            is_delegate: false,
            is_abstract: false,
            base: None,
            interfaces: vec![],
            element: None,
            array_rank: 0,
            is_by_ref: false,
            generic_definition: None,
            generic_arguments: vec![],
            generic_parameters: vec![],
        }
    }

    pub fn is_value_type(&self) -> bool {
        matches!(self.kind, NativeTypeKind::ValueType | NativeTypeKind::Enum)
    }

    pub fn is_generic_definition(&self) -> bool {
        !self.generic_parameters.is_empty() && self.generic_arguments.is_empty()
    }
}

/// A native member signature, possibly open over type or method generics.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum NativeSig {
    Type(NativeTypeId),
    TypeParameter(usize),
    MethodParameter(usize),
    Array(Box<NativeSig>, u32),
    ByRef(Box<NativeSig>),
    Generic {
        definition: NativeTypeId,
        arguments: Vec<NativeSig>,
    },
}

impl From<NativeTypeId> for NativeSig {
    fn from(id: NativeTypeId) -> Self {
        NativeSig::Type(id)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Visibility {
    Public,
    Family,
    Private,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NativeField {
    pub id: NativeFieldId,
    pub name: String,
    pub field_type: NativeSig,
    pub is_static: bool,
    pub visibility: Visibility,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NativeMethod {
    pub id: NativeMethodId,
    pub name: String,
    pub parameters: Vec<NativeSig>,
    pub return_type: Option<NativeSig>,
    pub generic_parameters: Vec<String>,
    pub is_static: bool,
    pub is_virtual: bool,
    pub visibility: Visibility,
}

pub type FieldGetter = Arc<dyn Fn(Option<&ObjectRef>) -> Result<Value, String> + Send + Sync>;
pub type FieldSetter =
    Arc<dyn Fn(Option<&ObjectRef>, Value) -> Result<(), String> + Send + Sync>;

/// Custom get/set thunks the host registers for a native field.
///
/// A missing half falls through to the facility's own field access.
#[derive(Clone, Default)]
pub struct FieldAccessor {
    pub getter: Option<FieldGetter>,
    pub setter: Option<FieldSetter>,
}
unsafe_empty_collect!(FieldAccessor);

impl FieldAccessor {
    pub fn new(
        getter: impl Fn(Option<&ObjectRef>) -> Result<Value, String> + Send + Sync + 'static,
        setter: impl Fn(Option<&ObjectRef>, Value) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            getter: Some(Arc::new(getter)),
            setter: Some(Arc::new(setter)),
        }
    }
}

impl Debug for FieldAccessor {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldAccessor")
            .field("getter", &self.getter.is_some())
            .field("setter", &self.setter.is_some())
            .finish()
    }
}

/// The host platform's reflection facility.
///
/// Member enumerations return declared members only, in the facility's own
/// enumeration order. That order is not contractually stable, and overload
/// tie-breaking inherits it.
pub trait NativeReflection: Send + Sync {
    fn describe(&self, ty: NativeTypeId) -> Option<NativeTypeInfo>;

    fn find_type(&self, full_name: &str) -> Option<NativeTypeId>;

    fn fields(&self, ty: NativeTypeId) -> Vec<NativeField>;

    /// Non-constructor methods.
    fn methods(&self, ty: NativeTypeId) -> Vec<NativeMethod>;

    fn constructors(&self, ty: NativeTypeId) -> Vec<NativeMethod>;

    /// Closes an open generic definition. The error describes the refusal,
    /// e.g. a constraint violation.
    fn make_generic_type(
        &self,
        definition: NativeTypeId,
        arguments: &[NativeTypeId],
    ) -> Result<NativeTypeId, String>;

    fn make_array_type(&self, element: NativeTypeId, rank: u32) -> Result<NativeTypeId, String>;

    fn make_by_ref_type(&self, element: NativeTypeId) -> Result<NativeTypeId, String>;

    fn is_assignable_from(&self, target: NativeTypeId, source: NativeTypeId) -> bool;

    /// Creates an object with every field at its default, without running a
    /// constructor.
    fn create_default_instance(&self, ty: NativeTypeId) -> Result<ObjectRef, String>;

    /// `target` is `None` for static fields.
    fn get_field_value(&self, field: NativeFieldId, target: Option<&ObjectRef>)
        -> Result<Value, String>;

    fn set_field_value(
        &self,
        field: NativeFieldId,
        target: Option<&ObjectRef>,
        value: Value,
    ) -> Result<(), String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_defaults() {
        assert_eq!(PrimitiveKind::Boolean.default_value(), DefaultValue::Integer);
        assert_eq!(PrimitiveKind::UInt64.default_value(), DefaultValue::Long);
        assert_eq!(PrimitiveKind::Float32.default_value(), DefaultValue::Float);
        assert_eq!(PrimitiveKind::Float64.default_value(), DefaultValue::Double);
    }

    #[test]
    fn test_generic_definition_flag() {
        let mut info = NativeTypeInfo::new("System.Collections.Generic.List", NativeTypeKind::Class);
        assert!(!info.is_generic_definition());
        info.generic_parameters = vec!["T".into()];
        assert!(info.is_generic_definition());
        info.generic_arguments = vec![NativeTypeId(1)];
        assert!(!info.is_generic_definition());
    }
}
