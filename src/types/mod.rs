//! Type models.
//!
//! Every canonical type is a [`TypeModel`] living in the registry's arena and
//! addressed by a [`TypeHandle`]. The variants share the [`TypeInfo`]
//! contract; operations that may need to resolve other types take the
//! registry explicitly.
use crate::{
    error::Result,
    metadata::FieldToken,
    resolve::TypeRegistry,
    types::{
        adaptor::AdaptorType,
        generics::GenericArguments,
        interpreted::InterpretedType,
        layout::ValueLayout,
        members::{FieldEntry, MethodEntry, MethodQuery},
        native::NativeType,
    },
    value::DefaultValue,
};
use enum_dispatch::enum_dispatch;
use gc_arena::Collect;
use std::fmt::{self, Display, Formatter};

pub mod adaptor;
pub mod generics;
pub mod interpreted;
pub mod layout;
pub mod members;
pub mod native;
pub mod statics;

/// A canonical type. The value is also the type's dense type index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Collect)]
#[collect(require_static)]
pub struct TypeHandle(pub u32);

impl TypeHandle {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl Display for TypeHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[enum_dispatch]
pub trait TypeInfo {
    fn handle(&self) -> TypeHandle;

    fn full_name(&self) -> &str;

    /// The numeric type index allocated when the model was registered.
    fn type_index(&self) -> u32 {
        self.handle().0
    }

    fn is_value_type(&self) -> bool;

    fn is_interface(&self) -> bool;

    fn is_enum(&self) -> bool;

    fn is_primitive(&self) -> bool;

    /// Zero unless the type is an array.
    fn array_rank(&self) -> u32;

    fn is_array(&self) -> bool {
        self.array_rank() > 0
    }

    fn is_by_ref(&self) -> bool;

    /// Element of an array or by-ref type.
    fn element_type(&self) -> Option<TypeHandle>;

    /// Arguments of a closed generic instance.
    fn generic_arguments(&self) -> Option<&GenericArguments>;

    fn generic_definition(&self) -> Option<TypeHandle>;

    /// Declared parameter names; empty for non-generic types.
    fn generic_parameters(&self) -> &[String];

    fn is_generic_definition(&self) -> bool {
        !self.generic_parameters().is_empty() && self.generic_arguments().is_none()
    }

    /// Looks a generic argument up by parameter name, falling back to the
    /// parameter's declaration position.
    fn find_generic_argument(&self, name: &str) -> Option<TypeHandle> {
        let position = self.generic_parameters().iter().position(|p| p == name);
        self.generic_arguments()?.find(name, position)
    }

    fn is_delegate(&self, registry: &TypeRegistry) -> Result<bool>;

    /// The base type; root types (`System.Object`, `System.ValueType`,
    /// `System.Enum`, `System.MulticastDelegate`) are elided for interpreted
    /// types.
    fn base_type(&self, registry: &TypeRegistry) -> Result<Option<TypeHandle>>;

    fn interfaces(&self, registry: &TypeRegistry) -> Result<Vec<TypeHandle>>;

    fn default_value(&self, registry: &TypeRegistry) -> Result<DefaultValue>;

    /// Declared fields, static and instance.
    fn fields(&self, registry: &TypeRegistry) -> Result<Vec<FieldEntry>>;

    /// Looks a field up by token, walking the base chain.
    fn get_field(&self, registry: &TypeRegistry, token: FieldToken) -> Result<Option<FieldEntry>>;

    fn get_field_by_name(&self, registry: &TypeRegistry, name: &str) -> Result<Option<FieldEntry>>;

    /// Instance fields of the type and its interpreted ancestors.
    fn total_field_count(&self, registry: &TypeRegistry) -> Result<usize>;

    /// Declared non-constructor methods.
    fn methods(&self, registry: &TypeRegistry) -> Result<Vec<MethodEntry>>;

    fn find_method(
        &self,
        registry: &TypeRegistry,
        query: &MethodQuery<'_>,
    ) -> Result<Option<MethodEntry>>;

    /// The implementation of `method` on this type, or `method` itself when
    /// nothing overrides it.
    fn find_virtual_method(
        &self,
        registry: &TypeRegistry,
        method: &MethodEntry,
    ) -> Result<Option<MethodEntry>>;

    fn constructors(&self, registry: &TypeRegistry) -> Result<Vec<MethodEntry>>;

    fn find_constructor(
        &self,
        registry: &TypeRegistry,
        parameters: &[TypeHandle],
    ) -> Result<Option<MethodEntry>>;

    fn make_generic_instance(
        &self,
        registry: &TypeRegistry,
        arguments: &[TypeHandle],
    ) -> Result<TypeHandle>;

    fn can_assign_to(&self, registry: &TypeRegistry, target: TypeHandle) -> Result<bool>;

    fn value_layout(&self, registry: &TypeRegistry) -> Result<Option<ValueLayout>> {
        layout::value_layout(registry, self.handle())
    }

    /// Where native-side dispatch takes over: the type itself for native
    /// models and adaptors, the first adaptor in the ancestry for
    /// interpreted ones.
    fn first_native_ancestor(&self, registry: &TypeRegistry) -> Result<Option<TypeHandle>>;

    fn enum_underlying_type(&self, registry: &TypeRegistry) -> Result<Option<TypeHandle>>;
}

#[enum_dispatch(TypeInfo)]
pub enum TypeModel {
    NativeType,
    InterpretedType,
    AdaptorType,
}

impl TypeModel {
    pub fn as_native(&self) -> Option<&NativeType> {
        match self {
            TypeModel::NativeType(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_interpreted(&self) -> Option<&InterpretedType> {
        match self {
            TypeModel::InterpretedType(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_adaptor(&self) -> Option<&AdaptorType> {
        match self {
            TypeModel::AdaptorType(a) => Some(a),
            _ => None,
        }
    }
}

impl fmt::Debug for TypeModel {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let kind = match self {
            TypeModel::NativeType(_) => "native",
            TypeModel::InterpretedType(_) => "interpreted",
            TypeModel::AdaptorType(_) => "adaptor",
        };
        write!(f, "{kind} {} ({})", self.full_name(), self.handle())
    }
}

/// Walks `start`'s base chain, `start` included.
pub(crate) fn ancestors(
    registry: &TypeRegistry,
    start: TypeHandle,
) -> impl Iterator<Item = Result<TypeHandle>> + '_ {
    let mut next = Some(Ok(start));
    std::iter::from_fn(move || {
        let current = next.take()?;
        if let Ok(handle) = current {
            next = match registry.get(handle).and_then(|m| m.base_type(registry)) {
                Ok(base) => base.map(Ok),
                Err(e) => Some(Err(e)),
            };
        }
        Some(current)
    })
}

/// Finds `method` in the declared methods of `ty` and its ancestors,
/// retrying with the explicit interface name when the method is declared on
/// an interface.
pub(crate) fn find_override(
    registry: &TypeRegistry,
    ty: TypeHandle,
    method: &MethodEntry,
) -> Result<Option<MethodEntry>> {
    let parameters = method
        .parameters()
        .iter()
        .map(|p| p.resolved())
        .collect::<Option<Vec<_>>>();
    let Some(parameters) = parameters else {
        return Ok(None);
    };
    let declaring = registry.get(method.declaring_type())?;
    let explicit = declaring
        .is_interface()
        .then(|| format!("{}.{}", declaring.full_name(), method.name()));

    let mut query = MethodQuery::new(method.name(), &parameters).declared_only();
    if let Some(args) = method.generic_arguments() {
        query = query.with_generic_arguments(args);
    }
    for handle in ancestors(registry, ty) {
        let model = registry.get(handle?)?;
        if let Some(found) = model.find_method(registry, &query)? {
            return Ok(Some(found));
        }
        if let Some(explicit) = &explicit {
            if let Some(found) = model.find_method(registry, &query.renamed(explicit))? {
                return Ok(Some(found));
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_display() {
        assert_eq!(TypeHandle(12).to_string(), "#12");
        assert_eq!(TypeHandle(12).index(), 12);
    }

    #[test]
    fn test_handles_are_collect() {
        fn assert_collect<T: Collect>() {}
        assert_collect::<TypeHandle>();
        assert_collect::<GenericArguments>();
    }
}
