//! Runtime values exchanged between the interpreter, the type system and the
//! native facility.
use crate::{
    types::TypeHandle,
    utils::sync::{Arc, RwLock},
};
use gc_arena::{unsafe_empty_collect, Collect};
use std::{
    any::Any,
    fmt::{self, Debug, Formatter},
};

/// An opaque reference to an object owned by either side of the boundary.
///
/// Equality is reference identity.
#[derive(Clone)]
pub struct ObjectRef(Arc<dyn Any + Send + Sync>);
unsafe_empty_collect!(ObjectRef);

impl ObjectRef {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Debug for ObjectRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if let Some(instance) = self.downcast_ref::<Instance>() {
            return write!(f, "ObjectRef({instance:?})");
        }
        write!(f, "ObjectRef({:p})", Arc::as_ptr(&self.0))
    }
}

#[derive(Clone, Debug, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Object(ObjectRef),
}
unsafe_empty_collect!(Value);

impl Value {
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Int32(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int64(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

/// The storage-slot initializer of a type, used instead of running a
/// constructor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DefaultValue {
    /// Reference types and opaque slots.
    Null,
    /// 32-bit and narrower integral primitives, `bool` and `char`.
    Integer,
    Long,
    Float,
    Double,
    /// A non-primitive value type; materialized by instantiating the type.
    ValueType(TypeHandle),
}
unsafe_empty_collect!(DefaultValue);

impl DefaultValue {
    /// Returns the slot value when no instantiation is required.
    pub fn scalar(self) -> Option<Value> {
        match self {
            DefaultValue::Null => Some(Value::Null),
            DefaultValue::Integer => Some(Value::Int32(0)),
            DefaultValue::Long => Some(Value::Int64(0)),
            DefaultValue::Float => Some(Value::Float32(0.0)),
            DefaultValue::Double => Some(Value::Float64(0.0)),
            DefaultValue::ValueType(_) => None,
        }
    }
}

/// Storage of an object whose type is interpreted.
///
/// Slots are laid out base-first, so a field's ordinal is its slot index.
pub struct Instance {
    ty: TypeHandle,
    fields: RwLock<Vec<Value>>,
}

impl Instance {
    pub fn new(ty: TypeHandle, fields: Vec<Value>) -> Self {
        Self {
            ty,
            fields: RwLock::new(fields),
        }
    }

    pub fn type_handle(&self) -> TypeHandle {
        self.ty
    }

    pub fn len(&self) -> usize {
        self.fields.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, slot: usize) -> Option<Value> {
        self.fields.read().get(slot).cloned()
    }

    /// Returns `false` when `slot` is outside the object.
    pub fn set(&self, slot: usize, value: Value) -> bool {
        match self.fields.write().get_mut(slot) {
            Some(s) => {
                *s = value;
                true
            }
            None => false,
        }
    }
}

impl Debug for Instance {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("type", &self.ty)
            .field("fields", &*self.fields.read())
            .finish()
    }
}
